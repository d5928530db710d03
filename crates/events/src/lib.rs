//! Statement-event messaging mechanics.
//!
//! - [`transport`]: the broker seam (connection → channel → durable queue)
//! - [`MessageChannel`]: producer handle with lazy reconnect and a publish lock
//! - [`MessageListener`]: consumer handle dispatching deliveries in order
//! - [`InMemoryBroker`]: durable in-process broker for tests/dev
//!
//! Broker-backed transports (Redis Streams) live in `finshared-infra`.

pub mod channel;
pub mod codec;
pub mod error;
pub mod in_memory;
pub mod listener;
pub mod message;
pub mod transport;

pub use channel::{ConnectionState, MessageChannel};
pub use error::ChannelError;
pub use in_memory::{InMemoryBroker, QueuedMessage};
pub use listener::{MessageListener, StopHandle};
pub use message::{StatementEvent, StatementEventKind};
pub use transport::{
    Channel, Connection, Consumer, Delivery, DeliveryMode, DeliveryTag, OutgoingMessage,
    Transport,
};
