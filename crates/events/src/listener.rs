//! Consumer side: subscribe a callback to a queue and dispatch deliveries in
//! order until stopped or until the connection goes away.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::channel::ConnectionState;
use crate::error::ChannelError;
use crate::transport::{Channel, Connection, Delivery, Session, Transport};

/// Cloneable stop signal for a [`MessageListener`].
///
/// Stopping is sticky: a listener that was stopped returns from every later
/// `listen` call immediately.
#[derive(Debug, Clone)]
pub struct StopHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.signal.borrow()
    }
}

/// Consumer for one queue.
pub struct MessageListener<T: Transport> {
    transport: T,
    queue: String,
    session: Mutex<Option<Session<T::Connection>>>,
    state: watch::Sender<ConnectionState>,
    stop: StopHandle,
}

impl<T: Transport> MessageListener<T> {
    pub fn new(transport: T, queue: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (signal, _) = watch::channel(false);
        Self {
            transport,
            queue: queue.into(),
            session: Mutex::new(None),
            state,
            stop: StopHandle {
                signal: Arc::new(signal),
            },
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Make a running `listen` return `Ok(())` after its current callback.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Open the connection and channel and declare the queue as durable.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        self.session_handles().await.map(|_| ())
    }

    async fn session_handles(
        &self,
    ) -> Result<
        (
            Arc<T::Connection>,
            Arc<<T::Connection as Connection>::Channel>,
        ),
        ChannelError,
    > {
        let mut slot = self.session.lock().await;

        let alive = matches!(slot.as_ref(), Some(session) if !session.is_closed());
        if !alive {
            if slot.take().is_some() {
                warn!(queue = %self.queue, "connection lost; reconnecting");
            }

            self.state.send_replace(ConnectionState::Connecting);
            match Session::open(&self.transport, &self.queue).await {
                Ok(session) => {
                    *slot = Some(session);
                    self.state.send_replace(ConnectionState::Connected);
                    info!(queue = %self.queue, "connected to broker");
                }
                Err(err) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    return Err(err);
                }
            }
        }

        match slot.as_ref() {
            Some(session) => Ok((session.connection.clone(), session.channel.clone())),
            None => Err(ChannelError::Connection("no session after connect".to_string())),
        }
    }

    /// Dispatch every delivery on the queue to `handler`, one at a time.
    ///
    /// The next delivery is taken only after the previous handler call has
    /// finished, so handlers observe broker delivery order. `Ok` acks the
    /// delivery; `Err` is logged and the delivery is rejected (dead-lettered).
    ///
    /// Returns `Ok(())` once stopped via [`StopHandle`]. Closing the
    /// connection out of band (e.g. [`MessageListener::close`] from another
    /// task) ends the call with [`ChannelError::ConnectionLost`]. Either way
    /// the connection is closed on return.
    pub async fn listen<F, Fut>(&self, mut handler: F) -> Result<(), ChannelError>
    where
        F: FnMut(Delivery) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let mut stop = self.stop.signal.subscribe();
        if *stop.borrow_and_update() {
            return Ok(());
        }

        let (connection, channel) = self.session_handles().await?;
        let outcome = match channel.consume(&self.queue).await {
            Ok(mut consumer) => {
                self.state.send_replace(ConnectionState::Listening);
                info!(queue = %self.queue, "listening for messages");

                loop {
                    tokio::select! {
                        biased;

                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                debug!(queue = %self.queue, "stop requested");
                                break Ok(());
                            }
                        }

                        next = consumer.next() => match next {
                            Some(Ok(delivery)) => {
                                if let Err(err) = self.dispatch(&*channel, delivery, &mut handler).await {
                                    break Err(err);
                                }
                            }
                            Some(Err(err)) => break Err(err),
                            None => {
                                break Err(ChannelError::ConnectionLost(format!(
                                    "consumer on queue {} ended",
                                    self.queue
                                )))
                            }
                        },
                    }
                }
            }
            Err(err) => Err(err),
        };

        self.release(&connection).await;

        match &outcome {
            Err(err) if err.is_connectivity() => {
                error!(queue = %self.queue, error = %err, "listener lost the broker")
            }
            Err(err) => error!(queue = %self.queue, error = %err, "listener stopped"),
            Ok(()) => {}
        }
        outcome
    }

    /// Tear down the session `listen` ran on. Every exit from `listen` ends
    /// `Disconnected`; a later call opens a fresh connection.
    async fn release(&self, connection: &Arc<T::Connection>) {
        {
            let mut slot = self.session.lock().await;
            if matches!(slot.as_ref(), Some(session) if Arc::ptr_eq(&session.connection, connection)) {
                slot.take();
            }
        }
        if let Err(err) = connection.close().await {
            debug!(queue = %self.queue, error = %err, "closing listener connection failed");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn dispatch<C, F, Fut>(
        &self,
        channel: &C,
        delivery: Delivery,
        handler: &mut F,
    ) -> Result<(), ChannelError>
    where
        C: Channel,
        F: FnMut(Delivery) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let tag = delivery.tag().clone();

        match handler(delivery).await {
            Ok(()) => channel.ack(&self.queue, &tag).await,
            Err(err) => {
                warn!(
                    queue = %self.queue,
                    delivery_tag = %tag,
                    error = %err,
                    "handler failed; rejecting message"
                );
                channel.reject(&self.queue, &tag).await
            }
        }
    }

    /// Close the connection. A running `listen` ends with `ConnectionLost`.
    pub async fn close(&self) -> Result<(), ChannelError> {
        let session = self.session.lock().await.take();
        match session {
            None => Ok(()),
            Some(session) => {
                let result = session.connection.close().await;
                self.state.send_replace(ConnectionState::Disconnected);
                info!(queue = %self.queue, "connection closed");
                result
            }
        }
    }
}
