//! Statement events exchanged between services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use finshared_core::{Statement, TagId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementEventKind {
    Recorded,
    Tagged,
    Untagged,
}

/// Event published after a successful ledger write.
///
/// Carries a full snapshot of the statement so consumers need no read-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementEvent {
    pub event_id: Uuid,
    pub kind: StatementEventKind,
    #[serde(with = "finshared_core::timestamp")]
    pub occurred_at: DateTime<Utc>,
    pub statement: Statement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<TagId>,
}

impl StatementEvent {
    fn new(kind: StatementEventKind, statement: Statement, tag_id: Option<TagId>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            kind,
            occurred_at: Utc::now(),
            statement,
            tag_id,
        }
    }

    pub fn recorded(statement: Statement) -> Self {
        Self::new(StatementEventKind::Recorded, statement, None)
    }

    pub fn tagged(statement: Statement, tag_id: TagId) -> Self {
        Self::new(StatementEventKind::Tagged, statement, Some(tag_id))
    }

    pub fn untagged(statement: Statement, tag_id: TagId) -> Self {
        Self::new(StatementEventKind::Untagged, statement, Some(tag_id))
    }
}
