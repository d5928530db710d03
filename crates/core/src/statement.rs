//! Statements (imported bank-statement lines) and tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::NaturalKey;
use crate::error::{LedgerError, LedgerResult};
use crate::id::{StatementId, TagId};

/// A recorded statement line.
///
/// Source and destination accounts are derived from the natural-key columns;
/// no account id is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    #[serde(with = "crate::timestamp")]
    pub date: DateTime<Utc>,
    #[serde(with = "crate::timestamp")]
    pub interest_date: DateTime<Utc>,
    /// Smallest currency unit (cents).
    pub amount: i64,
    pub account_iban: String,
    pub account_name: String,
    pub counterparty_iban: Option<String>,
    pub counterparty_name: Option<String>,
    pub description: Option<String>,
}

impl Statement {
    pub fn source_key(&self) -> NaturalKey {
        NaturalKey::new(self.account_iban.clone(), self.account_name.clone())
    }

    /// Destination key, present only when both counterparty columns are set.
    pub fn counterparty_key(&self) -> Option<NaturalKey> {
        match (&self.counterparty_iban, &self.counterparty_name) {
            (Some(iban), Some(name)) => Some(NaturalKey::new(iban.clone(), name.clone())),
            _ => None,
        }
    }

    /// Whether `key` is this statement's source or destination.
    pub fn involves(&self, key: &NaturalKey) -> bool {
        (self.account_iban == key.iban && self.account_name == key.name)
            || self.counterparty_key().as_ref() == Some(key)
    }
}

/// Input for `StatementLedger::record`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStatement {
    #[serde(with = "crate::timestamp")]
    pub date: DateTime<Utc>,
    #[serde(with = "crate::timestamp")]
    pub interest_date: DateTime<Utc>,
    pub amount: i64,
    pub account_iban: String,
    pub account_name: String,
    pub counterparty_iban: Option<String>,
    pub counterparty_name: Option<String>,
    pub description: Option<String>,
}

impl NewStatement {
    /// A statement with the same booking and interest date and no counterparty.
    pub fn new(date: DateTime<Utc>, amount: i64, source: &NaturalKey) -> Self {
        Self {
            date,
            interest_date: date,
            amount,
            account_iban: source.iban.clone(),
            account_name: source.name.clone(),
            counterparty_iban: None,
            counterparty_name: None,
            description: None,
        }
    }

    pub fn with_counterparty(mut self, destination: &NaturalKey) -> Self {
        self.counterparty_iban = Some(destination.iban.clone());
        self.counterparty_name = Some(destination.name.clone());
        self
    }

    pub fn with_interest_date(mut self, interest_date: DateTime<Utc>) -> Self {
        self.interest_date = interest_date;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn source_key(&self) -> NaturalKey {
        NaturalKey::new(self.account_iban.clone(), self.account_name.clone())
    }

    /// Enforce the both-or-neither rule on the counterparty columns.
    pub fn counterparty_key(&self) -> LedgerResult<Option<NaturalKey>> {
        match (&self.counterparty_iban, &self.counterparty_name) {
            (Some(iban), Some(name)) => Ok(Some(NaturalKey::new(iban.clone(), name.clone()))),
            (None, None) => Ok(None),
            _ => Err(LedgerError::InvalidCounterparty),
        }
    }

    pub fn into_statement(self, id: StatementId) -> Statement {
        Statement {
            id,
            date: self.date,
            interest_date: self.interest_date,
            amount: self.amount,
            account_iban: self.account_iban,
            account_name: self.account_name,
            counterparty_iban: self.counterparty_iban,
            counterparty_name: self.counterparty_name,
            description: self.description,
        }
    }
}

/// A label attachable to any number of statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub color: Option<String>,
}

/// Input for `StatementLedger::create_tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTag {
    pub name: String,
    pub color: Option<String>,
}

impl NewTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn into_tag(self) -> Tag {
        Tag {
            id: TagId::new(),
            name: self.name,
            color: self.color,
        }
    }
}
