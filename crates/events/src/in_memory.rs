//! In-memory broker for tests/dev.
//!
//! - Queues live in the broker, not in connections, so messages survive a
//!   dropped connection the way a durable broker queue does
//! - Deliveries stay unacknowledged until acked; a closed connection puts
//!   its unacked deliveries back at the head of the queue (flagged redelivered)
//! - Rejected deliveries move to a per-queue dead-letter list
//! - Fault injection: refused connects, rejected publishes, a connection that
//!   drops mid-publish, and severing every open connection at once

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::transport::{
    Channel, Connection, Consumer, Delivery, DeliveryMode, DeliveryTag, OutgoingMessage,
    Transport,
};

/// A message sitting in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub body: Vec<u8>,
    pub delivery_mode: DeliveryMode,
}

#[derive(Debug)]
struct Ready {
    seq: u64,
    message: QueuedMessage,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    seq: u64,
    connection: u64,
    consumer: u64,
    message: QueuedMessage,
}

#[derive(Debug)]
struct Queue {
    durable: bool,
    ready: VecDeque<Ready>,
    unacked: HashMap<DeliveryTag, Unacked>,
    dead_letters: Vec<QueuedMessage>,
}

impl Queue {
    fn new(durable: bool) -> Self {
        Self {
            durable,
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            dead_letters: Vec::new(),
        }
    }

    /// Move matching unacked deliveries back to `ready`, keeping publish order.
    fn requeue_where(&mut self, mut pred: impl FnMut(&Unacked) -> bool) -> usize {
        let tags: Vec<DeliveryTag> = self
            .unacked
            .iter()
            .filter(|(_, u)| pred(u))
            .map(|(tag, _)| tag.clone())
            .collect();

        for tag in &tags {
            if let Some(u) = self.unacked.remove(tag) {
                self.ready.push_back(Ready {
                    seq: u.seq,
                    message: u.message,
                    redelivered: true,
                });
            }
        }

        if !tags.is_empty() {
            self.ready.make_contiguous().sort_by_key(|r| r.seq);
        }
        tags.len()
    }
}

#[derive(Debug, Default)]
struct Faults {
    refuse_connects: usize,
    reject_publishes: bool,
    drop_on_next_publish: bool,
    refuse_consumers: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, Queue>>,
    connections: Mutex<HashMap<u64, watch::Sender<bool>>>,
    faults: Mutex<Faults>,
    notify: Notify,
    next_id: AtomicU64,
    connections_opened: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BrokerState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn close_connection(&self, connection: u64) {
        let Some(signal) = lock(&self.connections).remove(&connection) else {
            return;
        };
        signal.send_replace(true);

        let mut queues = lock(&self.queues);
        for (name, queue) in queues.iter_mut() {
            let requeued = queue.requeue_where(|u| u.connection == connection);
            if requeued > 0 {
                debug!(queue = %name, requeued, "requeued deliveries of closed connection");
            }
        }
        drop(queues);

        self.notify.notify_waiters();
    }

    fn take_next(
        &self,
        queue: &str,
        connection: u64,
        consumer: u64,
    ) -> Result<Option<Delivery>, ChannelError> {
        let mut queues = lock(&self.queues);

        // Checked under the queues lock: a connection that closes after this
        // point requeues what we take here.
        if !lock(&self.connections).contains_key(&connection) {
            return Err(ChannelError::ConnectionLost("connection is closed".to_string()));
        }

        let q = queues
            .get_mut(queue)
            .ok_or_else(|| ChannelError::ConnectionLost(format!("queue {queue} was deleted")))?;

        let Some(ready) = q.ready.pop_front() else {
            return Ok(None);
        };

        let tag = DeliveryTag(self.next_id().to_string());
        let delivery = Delivery::new(tag.clone(), ready.message.body.clone(), ready.redelivered);
        q.unacked.insert(
            tag,
            Unacked {
                seq: ready.seq,
                connection,
                consumer,
                message: ready.message,
            },
        );
        Ok(Some(delivery))
    }

    fn release_consumer(&self, queue: &str, consumer: u64) {
        let requeued = lock(&self.queues)
            .get_mut(queue)
            .map(|q| q.requeue_where(|u| u.consumer == consumer))
            .unwrap_or(0);
        if requeued > 0 {
            self.notify.notify_waiters();
        }
    }
}

/// Cheaply cloneable handle to one in-process broker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting for delivery, oldest first.
    pub fn messages(&self, queue: &str) -> Vec<QueuedMessage> {
        lock(&self.state.queues)
            .get(queue)
            .map(|q| q.ready.iter().map(|r| r.message.clone()).collect())
            .unwrap_or_default()
    }

    pub fn dead_letters(&self, queue: &str) -> Vec<QueuedMessage> {
        lock(&self.state.queues)
            .get(queue)
            .map(|q| q.dead_letters.clone())
            .unwrap_or_default()
    }

    pub fn unacked(&self, queue: &str) -> usize {
        lock(&self.state.queues)
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    /// `None` when the queue was never declared.
    pub fn is_durable(&self, queue: &str) -> Option<bool> {
        lock(&self.state.queues).get(queue).map(|q| q.durable)
    }

    pub fn connections_opened(&self) -> usize {
        self.state.connections_opened.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        lock(&self.state.connections).len()
    }

    /// Highest number of publishes that were ever in progress at once.
    pub fn max_concurrent_publishes(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_connects(&self, n: usize) {
        lock(&self.state.faults).refuse_connects = n;
    }

    pub fn reject_publishes(&self, reject: bool) {
        lock(&self.state.faults).reject_publishes = reject;
    }

    /// The next publish closes its connection instead of being accepted.
    pub fn drop_on_next_publish(&self) {
        lock(&self.state.faults).drop_on_next_publish = true;
    }

    /// Fail every `consume` call with a delivery error.
    pub fn refuse_consumers(&self, refuse: bool) {
        lock(&self.state.faults).refuse_consumers = refuse;
    }

    /// Close every open connection from the broker side.
    pub fn sever_connections(&self) {
        let ids: Vec<u64> = lock(&self.state.connections).keys().copied().collect();
        for id in ids {
            self.state.close_connection(id);
        }
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    type Connection = InMemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, ChannelError> {
        {
            let mut faults = lock(&self.state.faults);
            if faults.refuse_connects > 0 {
                faults.refuse_connects -= 1;
                return Err(ChannelError::Connection("connection refused".to_string()));
            }
        }

        let id = self.state.next_id();
        let (signal, closed) = watch::channel(false);
        lock(&self.state.connections).insert(id, signal);
        self.state.connections_opened.fetch_add(1, Ordering::SeqCst);

        Ok(InMemoryConnection {
            id,
            state: self.state.clone(),
            closed,
        })
    }
}

/// Connection to an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryConnection {
    id: u64,
    state: Arc<BrokerState>,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl Connection for InMemoryConnection {
    type Channel = InMemoryChannel;

    async fn open_channel(&self) -> Result<Self::Channel, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::ConnectionLost("connection is closed".to_string()));
        }
        Ok(InMemoryChannel {
            connection: self.id,
            state: self.state.clone(),
            closed: self.closed.clone(),
        })
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.state.close_connection(self.id);
        Ok(())
    }
}

/// Channel on an [`InMemoryConnection`].
#[derive(Debug)]
pub struct InMemoryChannel {
    connection: u64,
    state: Arc<BrokerState>,
    closed: watch::Receiver<bool>,
}

struct InFlight<'a>(&'a BrokerState);

impl<'a> InFlight<'a> {
    fn enter(state: &'a BrokerState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), ChannelError> {
        if *self.closed.borrow() {
            Err(ChannelError::ConnectionLost("connection is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let mut queues = lock(&self.state.queues);
        let q = queues
            .entry(queue.to_string())
            .or_insert_with(|| Queue::new(durable));
        if q.durable != durable {
            return Err(ChannelError::Connection(format!(
                "queue {queue} already declared with durable={}",
                q.durable
            )));
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let _in_flight = InFlight::enter(&self.state);

        // Give concurrent publishers a chance to overlap if nothing serializes them.
        tokio::task::yield_now().await;

        {
            let mut faults = lock(&self.state.faults);
            if faults.drop_on_next_publish {
                faults.drop_on_next_publish = false;
                drop(faults);
                self.state.close_connection(self.connection);
                return Err(ChannelError::ConnectionLost(
                    "connection dropped during publish".to_string(),
                ));
            }
            if faults.reject_publishes {
                return Err(ChannelError::Publish("broker rejected message".to_string()));
            }
        }

        let seq = self.state.next_id();
        {
            let mut queues = lock(&self.state.queues);
            let q = queues
                .get_mut(queue)
                .ok_or_else(|| ChannelError::Publish(format!("queue {queue} is not declared")))?;
            q.ready.push_back(Ready {
                seq,
                message: QueuedMessage {
                    body: message.body,
                    delivery_mode: message.delivery_mode,
                },
                redelivered: false,
            });
        }

        self.state.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Consumer, ChannelError> {
        self.ensure_open()?;
        if lock(&self.state.faults).refuse_consumers {
            return Err(ChannelError::Delivery(format!("consumer on {queue} refused")));
        }
        if !lock(&self.state.queues).contains_key(queue) {
            return Err(ChannelError::Connection(format!("queue {queue} is not declared")));
        }

        let consumer = self.state.next_id();
        let (tx, rx) = mpsc::channel(1);
        let state = self.state.clone();
        let mut closed = self.closed.clone();
        let connection = self.connection;
        let queue = queue.to_string();

        tokio::spawn(async move {
            loop {
                // Registered before the queue is inspected so no publish is missed.
                let notified = state.notify.notified();

                if *closed.borrow() {
                    let _ = tx
                        .send(Err(ChannelError::ConnectionLost("connection is closed".to_string())))
                        .await;
                    break;
                }

                match state.take_next(&queue, connection, consumer) {
                    Ok(Some(delivery)) => {
                        if tx.send(Ok(delivery)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }

                tokio::select! {
                    _ = notified => {}
                    _ = closed.changed() => {}
                    _ = tx.closed() => break,
                }
            }

            state.release_consumer(&queue, consumer);
        });

        Ok(Consumer::new(rx))
    }

    async fn ack(&self, queue: &str, tag: &DeliveryTag) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let mut queues = lock(&self.state.queues);
        queues
            .get_mut(queue)
            .and_then(|q| q.unacked.remove(tag))
            .map(|_| ())
            .ok_or_else(|| ChannelError::Delivery(format!("unknown delivery tag {tag}")))
    }

    async fn reject(&self, queue: &str, tag: &DeliveryTag) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let mut queues = lock(&self.state.queues);
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| ChannelError::Delivery(format!("queue {queue} is not declared")))?;
        let unacked = q
            .unacked
            .remove(tag)
            .ok_or_else(|| ChannelError::Delivery(format!("unknown delivery tag {tag}")))?;
        q.dead_letters.push(unacked.message);
        warn!(queue = %queue, delivery_tag = %tag, "message dead-lettered");
        Ok(())
    }
}
