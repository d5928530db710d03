//! `finshared-core`: account/statement domain building blocks.
//!
//! This crate contains **pure domain** types and rules (no IO, no storage, no
//! broker). Storage backends live in `finshared-infra`, messaging mechanics in
//! `finshared-events`.

pub mod account;
pub mod error;
pub mod hierarchy;
pub mod id;
pub mod statement;
pub mod timestamp;

pub use account::{Account, NaturalKey, NewAccount};
pub use error::{ErrorClass, LedgerError, LedgerResult};
pub use hierarchy::ParentWalk;
pub use id::{AccountId, StatementId, TagId};
pub use statement::{NewStatement, NewTag, Statement, Tag};
