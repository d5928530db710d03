//! Ledger error model.

use thiserror::Error;

use crate::account::NaturalKey;
use crate::id::AccountId;

/// Result type used by the registry and ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Coarse error classes callers branch on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller or data problem. Never retried automatically.
    Validation,
    /// The stored hierarchy is corrupt; the operation was aborted.
    Consistency,
    /// Backend failure (connection, unexpected database error).
    Storage,
}

/// Registry/ledger error.
///
/// Validation variants are detected before or at persistence. Store-level
/// constraint violations are mapped onto the same variants so a lost race
/// between two concurrent writers surfaces exactly like the sequential case.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A unique key (`(name, iban)`, `nickname`, tag name, id) is already taken.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Re-parenting would make an account its own ancestor.
    #[error("cyclic hierarchy: {parent} is {account} or one of its descendants")]
    CyclicHierarchy { account: AccountId, parent: AccountId },

    /// A statement references a natural key with no registered account.
    #[error("unknown account: {0}")]
    UnknownAccount(NaturalKey),

    /// Exactly one of `counterparty_iban` / `counterparty_name` is set.
    #[error("invalid counterparty: iban and name must both be set or both be empty")]
    InvalidCounterparty,

    /// A requested entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Internal-consistency violation (e.g. parent walk exceeded its bound).
    #[error("inconsistent hierarchy: {0}")]
    Inconsistent(String),

    /// Unexpected storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::DuplicateKey(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::DuplicateKey(_)
            | LedgerError::CyclicHierarchy { .. }
            | LedgerError::UnknownAccount(_)
            | LedgerError::InvalidCounterparty
            | LedgerError::NotFound { .. }
            | LedgerError::InvalidId(_) => ErrorClass::Validation,
            LedgerError::Inconsistent(_) => ErrorClass::Consistency,
            LedgerError::Storage(_) => ErrorClass::Storage,
        }
    }
}
