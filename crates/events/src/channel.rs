//! Producer side: one durable connection per handle, lazy reconnect, and a
//! publish lock serializing the publish/ack cycle on the shared channel.

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};

use crate::codec;
use crate::error::ChannelError;
use crate::transport::{Channel, Connection, OutgoingMessage, Session, Transport};

/// Lifecycle of a messaging handle.
///
/// ```text
/// Disconnected -> Connecting -> Connected (-> Listening) -> Disconnected
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Consumer only: a `listen` call is dispatching deliveries.
    Listening,
}

/// Publisher for one queue.
///
/// All publishers in a process share one `MessageChannel` (wrap it in an
/// `Arc`). The session mutex doubles as the publish lock: at most one publish
/// is in flight on the channel, and a publish that finds the connection dead
/// reconnects while holding it, so concurrent publishers never race to open
/// two connections.
pub struct MessageChannel<T: Transport> {
    transport: T,
    queue: String,
    session: Mutex<Option<Session<T::Connection>>>,
    state: watch::Sender<ConnectionState>,
}

impl<T: Transport> MessageChannel<T> {
    /// Create a disconnected handle. No IO happens until `connect`/`publish`.
    pub fn new(transport: T, queue: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            queue: queue.into(),
            session: Mutex::new(None),
            state,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Open the connection and channel and declare the queue as durable.
    ///
    /// A no-op when already connected. On failure the handle stays
    /// `Disconnected` and the call may be retried.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let mut slot = self.session.lock().await;
        self.ensure_connected(&mut slot).await.map(|_| ())
    }

    async fn ensure_connected<'a>(
        &self,
        slot: &'a mut Option<Session<T::Connection>>,
    ) -> Result<&'a Session<T::Connection>, ChannelError> {
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

        slot.as_ref()
            .ok_or_else(|| ChannelError::Connection("no session after connect".to_string()))
    }

    /// Serialize `message` and publish it for persistent delivery.
    ///
    /// Serialization happens before the lock is taken, so a message without
    /// a wire form fails without touching the network. Connects first when
    /// not connected. A failed publish is not retried; if the connection
    /// dropped, the next call reconnects.
    #[instrument(skip(self, message), fields(queue = %self.queue), err)]
    pub async fn publish<M>(&self, message: &M) -> Result<(), ChannelError>
    where
        M: Serialize + Sync + ?Sized,
    {
        let body = codec::encode(message)?;
        let bytes = body.len();
        debug!(bytes, "encoded message");

        let mut slot = self.session.lock().await;
        let session = self.ensure_connected(&mut slot).await?;

        let result = session
            .channel
            .publish(&self.queue, OutgoingMessage::persistent(body))
            .await;
        let dropped = session.is_closed();

        match result {
            Ok(()) => {
                info!(queue = %self.queue, status = "sending", bytes, "published message");
                Ok(())
            }
            Err(err) => {
                if dropped {
                    *slot = None;
                    self.state.send_replace(ConnectionState::Disconnected);
                }
                Err(match err {
                    ChannelError::Publish(_) => err,
                    other => ChannelError::Publish(other.to_string()),
                })
            }
        }
    }

    /// Close the connection and channel. Closing a closed handle is a no-op.
    pub async fn close(&self) -> Result<(), ChannelError> {
        let mut slot = self.session.lock().await;
        match slot.take() {
            None => {
                debug!(queue = %self.queue, "connection already closed or never opened");
                Ok(())
            }
            Some(session) => {
                let result = session.connection.close().await;
                self.state.send_replace(ConnectionState::Disconnected);
                info!(queue = %self.queue, "connection closed");
                result
            }
        }
    }
}
