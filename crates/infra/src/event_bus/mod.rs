//! Broker transports backed by external infrastructure.
//!
//! The transport seam itself lives in `finshared-events`; this module
//! provides the Redis Streams implementation.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisChannel, RedisConnection, RedisStreamsTransport};
