//! Statement-event relay: tails one queue and logs every decoded event.

use std::future::Future;

use finshared_events::{
    ChannelError, Delivery, MessageListener, StatementEvent, StopHandle, Transport,
};
use tracing::{info, warn};

/// Queue tailed when `STATEMENT_QUEUE` is unset.
pub const DEFAULT_QUEUE: &str = "statements";

pub const QUEUE_VAR: &str = "STATEMENT_QUEUE";

pub fn queue_from_lookup<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(QUEUE_VAR)
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| DEFAULT_QUEUE.to_string())
}

/// Decode one delivery and log it. Undecodable bodies are errors, so the
/// listener dead-letters them.
pub fn handle(delivery: &Delivery) -> anyhow::Result<StatementEvent> {
    let event: StatementEvent = delivery.decode()?;
    info!(
        event_id = %event.event_id,
        kind = ?event.kind,
        statement_id = %event.statement.id,
        amount = event.statement.amount,
        account = %event.statement.source_key(),
        redelivered = delivery.redelivered(),
        "statement event"
    );
    Ok(event)
}

/// Listen until stopped or until the connection is lost.
pub async fn run<T: Transport>(listener: &MessageListener<T>) -> Result<(), ChannelError> {
    listener
        .listen(|delivery| async move { handle(&delivery).map(|_| ()) })
        .await
}

/// Fire `stop` once `interrupt` resolves. If the signal handler cannot be
/// installed the relay keeps running.
pub async fn stop_on_interrupt<Fut>(stop: StopHandle, interrupt: Fut)
where
    Fut: Future<Output = std::io::Result<()>>,
{
    match interrupt.await {
        Ok(()) => {
            info!("interrupt received; stopping");
            stop.stop();
        }
        Err(err) => warn!(error = %err, "cannot listen for interrupt; relay keeps running"),
    }
}
