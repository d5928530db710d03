//! Accounts and their natural key.

use serde::{Deserialize, Serialize};

use crate::id::AccountId;

/// Business key of an account: `(iban, name)`.
///
/// Statements reference accounts through this key rather than through
/// [`AccountId`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub iban: String,
    pub name: String,
}

impl NaturalKey {
    pub fn new(iban: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            iban: iban.into(),
            name: name.into(),
        }
    }
}

impl core::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "(iban={}, name={})", self.iban, self.name)
    }
}

/// A registered account.
///
/// `parent_id` points at the account this one is an alias of. Aliases are
/// never embedded; they are found by querying for children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub iban: String,
    pub nickname: String,
    pub parent_id: Option<AccountId>,
}

impl Account {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.iban.clone(), self.name.clone())
    }

    pub fn matches(&self, key: &NaturalKey) -> bool {
        self.iban == key.iban && self.name == key.name
    }
}

/// Input for `AccountRegistry::create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    /// Caller-supplied identity (imports). Generated when `None`.
    pub id: Option<AccountId>,
    pub name: String,
    pub iban: String,
    pub nickname: String,
    pub parent_id: Option<AccountId>,
}

impl NewAccount {
    pub fn new(
        name: impl Into<String>,
        iban: impl Into<String>,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            iban: iban.into(),
            nickname: nickname.into(),
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: AccountId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_id(mut self, id: AccountId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.iban.clone(), self.name.clone())
    }

    /// Materialize the account, generating an id when none was supplied.
    pub fn into_account(self) -> Account {
        Account {
            id: self.id.unwrap_or_default(),
            name: self.name,
            iban: self.iban,
            nickname: self.nickname,
            parent_id: self.parent_id,
        }
    }
}
