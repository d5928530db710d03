//! Broker transport seam.
//!
//! A transport mirrors the broker's own object model: a [`Transport`] opens a
//! [`Connection`], a connection opens a [`Channel`], and a channel declares
//! queues, publishes to them and consumes from them. Handles in this crate
//! hold exactly one connection and one channel at a time.
//!
//! Broker client protocols are not safe for concurrent use of one channel;
//! callers serialize access (see [`crate::MessageChannel`]).

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::codec;
use crate::error::ChannelError;

/// Whether the broker must store a message durably until it is consumed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    Transient,
    Persistent,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Transient => "transient",
            DeliveryMode::Persistent => "persistent",
        }
    }
}

/// A message on its way to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub delivery_mode: DeliveryMode,
}

impl OutgoingMessage {
    pub fn persistent(body: Vec<u8>) -> Self {
        Self {
            body,
            delivery_mode: DeliveryMode::Persistent,
        }
    }
}

/// Broker-assigned identifier of a delivery, used to ack or reject it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub String);

impl core::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    tag: DeliveryTag,
    body: Vec<u8>,
    redelivered: bool,
}

impl Delivery {
    pub fn new(tag: DeliveryTag, body: Vec<u8>, redelivered: bool) -> Self {
        Self {
            tag,
            body,
            redelivered,
        }
    }

    pub fn tag(&self) -> &DeliveryTag {
        &self.tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Set when the broker handed this message out before without an ack.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn decode<M: DeserializeOwned>(&self) -> Result<M, ChannelError> {
        codec::decode(&self.body)
    }
}

/// Stream of deliveries from one queue, in broker delivery order.
///
/// Transports feed it from a background task. The stream yields an error
/// and ends when the underlying connection goes away.
#[derive(Debug)]
pub struct Consumer {
    receiver: mpsc::Receiver<Result<Delivery, ChannelError>>,
}

impl Consumer {
    pub fn new(receiver: mpsc::Receiver<Result<Delivery, ChannelError>>) -> Self {
        Self { receiver }
    }

    /// Wait for the next delivery. `None` once the feeding task has stopped.
    pub async fn next(&mut self) -> Option<Result<Delivery, ChannelError>> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    /// Establish a new connection to the broker endpoint this transport targets.
    async fn connect(&self) -> Result<Self::Connection, ChannelError>;
}

#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Channel: Channel;

    async fn open_channel(&self) -> Result<Self::Channel, ChannelError>;

    /// Whether the connection was closed (locally or by the broker).
    fn is_closed(&self) -> bool;

    /// Close the connection. Closing twice is not an error.
    async fn close(&self) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Declare `queue` (idempotent). Durable queues survive broker restarts.
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), ChannelError>;

    /// Publish to `queue`; returns once the broker accepted the message.
    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<(), ChannelError>;

    /// Start consuming `queue`.
    async fn consume(&self, queue: &str) -> Result<Consumer, ChannelError>;

    /// Mark a delivery as processed; the broker forgets it.
    async fn ack(&self, queue: &str, tag: &DeliveryTag) -> Result<(), ChannelError>;

    /// Refuse a delivery; the broker dead-letters it instead of redelivering.
    async fn reject(&self, queue: &str, tag: &DeliveryTag) -> Result<(), ChannelError>;
}

/// One live connection plus the channel opened on it, with the queue declared.
pub(crate) struct Session<C: Connection> {
    pub(crate) connection: Arc<C>,
    pub(crate) channel: Arc<C::Channel>,
}

impl<C: Connection> Session<C> {
    /// Connect, open a channel and declare `queue` as durable.
    pub(crate) async fn open<T>(transport: &T, queue: &str) -> Result<Self, ChannelError>
    where
        T: Transport<Connection = C>,
    {
        let connection = transport.connect().await?;

        let channel = match connection.open_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                let _ = connection.close().await;
                return Err(into_connection_error(err));
            }
        };

        if let Err(err) = channel.declare_queue(queue, true).await {
            let _ = connection.close().await;
            return Err(into_connection_error(err));
        }

        Ok(Self {
            connection: Arc::new(connection),
            channel: Arc::new(channel),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }
}

fn into_connection_error(err: ChannelError) -> ChannelError {
    match err {
        ChannelError::Connection(_) => err,
        other => ChannelError::Connection(other.to_string()),
    }
}
