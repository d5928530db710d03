//! Infrastructure layer: storage backends, broker transports, config.

pub mod config;
pub mod event_bus;
pub mod store;

pub use config::{BrokerParams, ConfigError, DatabaseParams};
pub use store::{AccountRegistry, InMemoryStore, PostgresStore, PublishingStore, StatementLedger};
