use thiserror::Error;

/// Messaging error.
///
/// Connectivity failures are never retried internally; the only built-in
/// remediation is that the next `publish`/`listen` reconnects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Could not establish the connection, open the channel or declare the queue.
    #[error("connection error: {0}")]
    Connection(String),

    /// The broker rejected a publish or the connection dropped mid-publish.
    #[error("publish error: {0}")]
    Publish(String),

    /// An established connection went away.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Acknowledging or rejecting a delivery failed.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// The message has no wire representation.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A delivery body could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl ChannelError {
    /// Whether the failure came from the network/broker rather than the message.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ChannelError::Connection(_)
                | ChannelError::Publish(_)
                | ChannelError::ConnectionLost(_)
                | ChannelError::Delivery(_)
        )
    }
}
