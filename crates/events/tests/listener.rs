use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{Value, json};

use finshared_core::{NaturalKey, NewStatement, StatementId};
use finshared_events::{
    ChannelError, ConnectionState, InMemoryBroker, MessageChannel, MessageListener,
    StatementEvent,
};

const QUEUE: &str = "statements";
const WAIT: Duration = Duration::from_secs(5);

async fn publish_numbers(broker: &InMemoryBroker, numbers: &[i64]) {
    let channel = MessageChannel::new(broker.clone(), QUEUE);
    for n in numbers {
        channel.publish(&json!({ "n": n })).await.unwrap();
    }
    channel.close().await.unwrap();
}

fn number(value: &Value) -> i64 {
    value["n"].as_i64().unwrap()
}

#[tokio::test]
async fn deliveries_arrive_in_publish_order_and_are_acked() {
    let broker = InMemoryBroker::new();
    publish_numbers(&broker, &[1, 2, 3, 4, 5]).await;

    let listener = MessageListener::new(broker.clone(), QUEUE);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle = listener.stop_handle();

    let sink = seen.clone();
    let result = tokio::time::timeout(
        WAIT,
        listener.listen(move |delivery| {
            let sink = sink.clone();
            let handle = handle.clone();
            async move {
                let value: Value = delivery.decode()?;
                let done = {
                    let mut seen = sink.lock().unwrap();
                    seen.push(number(&value));
                    seen.len() == 5
                };
                if done {
                    handle.stop();
                }
                anyhow::Ok(())
            }
        }),
    )
    .await
    .expect("listener did not stop");

    assert!(result.is_ok());
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    assert!(broker.messages(QUEUE).is_empty());
    assert_eq!(broker.unacked(QUEUE), 0);
    assert_eq!(listener.state(), ConnectionState::Disconnected);
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn failing_handler_dead_letters_the_message_and_keeps_listening() {
    let broker = InMemoryBroker::new();
    publish_numbers(&broker, &[1, 2]).await;

    let listener = MessageListener::new(broker.clone(), QUEUE);
    let handle = listener.stop_handle();

    let result = tokio::time::timeout(
        WAIT,
        listener.listen(move |delivery| {
            let handle = handle.clone();
            async move {
                let value: Value = delivery.decode()?;
                if number(&value) == 1 {
                    anyhow::bail!("cannot handle message 1");
                }
                handle.stop();
                anyhow::Ok(())
            }
        }),
    )
    .await
    .expect("listener did not stop");

    assert!(result.is_ok());
    let dead = broker.dead_letters(QUEUE);
    assert_eq!(dead.len(), 1);
    let body: Value = serde_json::from_slice(&dead[0].body).unwrap();
    assert_eq!(number(&body), 1);
    assert!(broker.messages(QUEUE).is_empty());
    assert_eq!(broker.unacked(QUEUE), 0);
}

#[tokio::test]
async fn stopped_listener_returns_without_connecting() {
    let broker = InMemoryBroker::new();
    let listener = MessageListener::new(broker.clone(), QUEUE);

    listener.stop();
    assert!(listener.stop_handle().is_stopped());

    listener.listen(|_| async { Ok(()) }).await.unwrap();
    assert_eq!(broker.connections_opened(), 0);
    assert_eq!(listener.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn refused_consumer_leaves_the_listener_disconnected() {
    let broker = InMemoryBroker::new();
    let listener = MessageListener::new(broker.clone(), QUEUE);
    broker.refuse_consumers(true);

    let result = listener.listen(|_| async { Ok(()) }).await;
    assert!(matches!(result, Err(ChannelError::Delivery(_))));
    assert_eq!(listener.state(), ConnectionState::Disconnected);
    assert_eq!(broker.open_connections(), 0);

    broker.refuse_consumers(false);
    publish_numbers(&broker, &[7]).await;
    let handle = listener.stop_handle();
    listener
        .listen(move |_| {
            let handle = handle.clone();
            async move {
                handle.stop();
                anyhow::Ok(())
            }
        })
        .await
        .unwrap();
    assert!(broker.messages(QUEUE).is_empty());
}

#[tokio::test]
async fn closing_from_another_task_ends_listen_with_connection_lost() {
    let broker = InMemoryBroker::new();
    let listener = Arc::new(MessageListener::new(broker.clone(), QUEUE));

    let running = listener.clone();
    let task = tokio::spawn(async move { running.listen(|_| async { Ok(()) }).await });

    let mut state = listener.watch_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Listening))
        .await
        .expect("listener never started")
        .unwrap();

    listener.close().await.unwrap();

    let result = tokio::time::timeout(WAIT, task)
        .await
        .expect("listen did not return")
        .unwrap();
    match result {
        Err(ChannelError::ConnectionLost(_)) => {}
        other => panic!("expected ConnectionLost, got {other:?}"),
    }
    assert_eq!(listener.state(), ConnectionState::Disconnected);
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn unacked_message_is_redelivered_after_reconnect() {
    let broker = InMemoryBroker::new();
    publish_numbers(&broker, &[1, 2]).await;

    let listener = MessageListener::new(broker.clone(), QUEUE);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let severing = broker.clone();
    let first = tokio::time::timeout(
        WAIT,
        listener.listen(move |delivery| {
            let sink = sink.clone();
            let severing = severing.clone();
            async move {
                let value: Value = delivery.decode()?;
                sink.lock().unwrap().push((number(&value), delivery.redelivered()));
                severing.sever_connections();
                anyhow::Ok(())
            }
        }),
    )
    .await
    .expect("listen did not return");

    match first {
        Err(ChannelError::ConnectionLost(_)) => {}
        other => panic!("expected ConnectionLost, got {other:?}"),
    }

    let sink = seen.clone();
    let handle = listener.stop_handle();
    let second = tokio::time::timeout(
        WAIT,
        listener.listen(move |delivery| {
            let sink = sink.clone();
            let handle = handle.clone();
            async move {
                let value: Value = delivery.decode()?;
                let n = number(&value);
                sink.lock().unwrap().push((n, delivery.redelivered()));
                if n == 2 {
                    handle.stop();
                }
                anyhow::Ok(())
            }
        }),
    )
    .await
    .expect("listener did not stop");

    assert!(second.is_ok());
    let seen = seen.lock().unwrap().clone();
    let numbers: Vec<i64> = seen.iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, vec![1, 1, 2]);
    assert!(!seen[0].1);
    assert!(seen[1].1);
    assert_eq!(broker.connections_opened(), 3);
    assert!(broker.messages(QUEUE).is_empty());
}

#[tokio::test]
async fn statement_event_survives_the_round_trip() {
    let broker = InMemoryBroker::new();
    let source = NaturalKey::new("NL00BANK0123456789", "Checking");
    let statement = NewStatement::new(Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap(), -4250, &source)
        .with_counterparty(&NaturalKey::new("NL00BANK9876543210", "Savings"))
        .with_description("monthly transfer")
        .into_statement(StatementId::new());
    let event = StatementEvent::recorded(statement);

    let channel = MessageChannel::new(broker.clone(), QUEUE);
    channel.publish(&event).await.unwrap();

    let listener = MessageListener::new(broker.clone(), QUEUE);
    let handle = listener.stop_handle();
    let received = Arc::new(Mutex::new(None));
    let sink = received.clone();

    tokio::time::timeout(
        WAIT,
        listener.listen(move |delivery| {
            let sink = sink.clone();
            let handle = handle.clone();
            async move {
                let event: StatementEvent = delivery.decode()?;
                *sink.lock().unwrap() = Some(event);
                handle.stop();
                anyhow::Ok(())
            }
        }),
    )
    .await
    .expect("listener did not stop")
    .unwrap();

    assert_eq!(received.lock().unwrap().as_ref(), Some(&event));
}
