//! Account registry and statement ledger backends.
//!
//! The traits live in [`r#trait`]; [`InMemoryStore`] is for tests/dev and
//! [`PostgresStore`] is the persistent backend. Both run the same
//! [`finshared_core::ParentWalk`] for cycle detection.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{AccountRegistry, StatementLedger};

use async_trait::async_trait;
use tracing::warn;

use finshared_core::{
    Account, AccountId, LedgerResult, NaturalKey, NewAccount, NewStatement, NewTag, Statement,
    StatementId, Tag, TagId,
};
use finshared_events::{MessageChannel, StatementEvent, Transport};

/// Adapter that publishes a [`StatementEvent`] after every successful ledger
/// write (`record`, `tag`, `untag`).
///
/// Publish happens only after the write committed. A failed publish is
/// logged and does not fail the write.
pub struct PublishingStore<S, T: Transport> {
    store: S,
    channel: MessageChannel<T>,
}

impl<S, T: Transport> PublishingStore<S, T> {
    pub fn new(store: S, channel: MessageChannel<T>) -> Self {
        Self { store, channel }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn channel(&self) -> &MessageChannel<T> {
        &self.channel
    }

    pub fn into_parts(self) -> (S, MessageChannel<T>) {
        (self.store, self.channel)
    }

    async fn announce(&self, event: StatementEvent) {
        if let Err(err) = self.channel.publish(&event).await {
            warn!(
                queue = %self.channel.queue(),
                event_id = %event.event_id,
                statement_id = %event.statement.id,
                error = %err,
                "failed to publish statement event"
            );
        }
    }
}

impl<S: StatementLedger, T: Transport> PublishingStore<S, T> {
    /// Statement to put on a tag event. The association is already committed,
    /// so a failed read only loses the event.
    async fn snapshot(&self, statement: StatementId) -> Option<Statement> {
        match self.store.get(statement).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(
                    statement_id = %statement,
                    error = %err,
                    "cannot read statement for tag event; not publishing"
                );
                None
            }
        }
    }
}

#[async_trait]
impl<S, T> AccountRegistry for PublishingStore<S, T>
where
    S: AccountRegistry,
    T: Transport,
{
    async fn create(&self, account: NewAccount) -> LedgerResult<Account> {
        self.store.create(account).await
    }

    async fn get_by_id(&self, id: AccountId) -> LedgerResult<Account> {
        self.store.get_by_id(id).await
    }

    async fn get_by_natural_key(&self, key: &NaturalKey) -> LedgerResult<Account> {
        self.store.get_by_natural_key(key).await
    }

    async fn list_aliases(&self, id: AccountId) -> LedgerResult<Vec<Account>> {
        self.store.list_aliases(id).await
    }

    async fn reparent(&self, id: AccountId, new_parent: Option<AccountId>) -> LedgerResult<Account> {
        self.store.reparent(id, new_parent).await
    }
}

#[async_trait]
impl<S, T> StatementLedger for PublishingStore<S, T>
where
    S: StatementLedger,
    T: Transport,
{
    async fn record(&self, statement: NewStatement) -> LedgerResult<Statement> {
        let statement = self.store.record(statement).await?;
        self.announce(StatementEvent::recorded(statement.clone())).await;
        Ok(statement)
    }

    async fn get(&self, id: StatementId) -> LedgerResult<Statement> {
        self.store.get(id).await
    }

    async fn resolve_source(&self, statement: &Statement) -> LedgerResult<Account> {
        self.store.resolve_source(statement).await
    }

    async fn resolve_destination(&self, statement: &Statement) -> LedgerResult<Option<Account>> {
        self.store.resolve_destination(statement).await
    }

    async fn create_tag(&self, tag: NewTag) -> LedgerResult<Tag> {
        self.store.create_tag(tag).await
    }

    async fn get_tag(&self, id: TagId) -> LedgerResult<Tag> {
        self.store.get_tag(id).await
    }

    async fn tag(&self, statement: StatementId, tag: TagId) -> LedgerResult<bool> {
        let added = self.store.tag(statement, tag).await?;
        if added {
            if let Some(snapshot) = self.snapshot(statement).await {
                self.announce(StatementEvent::tagged(snapshot, tag)).await;
            }
        }
        Ok(added)
    }

    async fn untag(&self, statement: StatementId, tag: TagId) -> LedgerResult<bool> {
        let removed = self.store.untag(statement, tag).await?;
        if removed {
            if let Some(snapshot) = self.snapshot(statement).await {
                self.announce(StatementEvent::untagged(snapshot, tag)).await;
            }
        }
        Ok(removed)
    }

    async fn tags_of(&self, statement: StatementId) -> LedgerResult<Vec<Tag>> {
        self.store.tags_of(statement).await
    }

    async fn list_by_tag(&self, tag: TagId) -> LedgerResult<Vec<Statement>> {
        self.store.list_by_tag(tag).await
    }

    async fn list_by_account(&self, key: &NaturalKey) -> LedgerResult<Vec<Statement>> {
        self.store.list_by_account(key).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use finshared_events::{InMemoryBroker, StatementEventKind};

    use super::*;

    const QUEUE: &str = "statements";

    async fn seeded() -> (PublishingStore<InMemoryStore, InMemoryBroker>, InMemoryBroker, NaturalKey) {
        let broker = InMemoryBroker::new();
        let store = PublishingStore::new(
            InMemoryStore::new(),
            MessageChannel::new(broker.clone(), QUEUE),
        );
        let account = store
            .create(NewAccount::new("Checking", "NL00BANK0123456789", "checking"))
            .await
            .unwrap();
        (store, broker, account.natural_key())
    }

    fn events(broker: &InMemoryBroker) -> Vec<StatementEvent> {
        broker
            .messages(QUEUE)
            .iter()
            .map(|m| serde_json::from_slice(&m.body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn record_tag_and_untag_are_announced_in_order() {
        let (store, broker, source) = seeded().await;
        let date = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();

        let statement = store.record(NewStatement::new(date, -1200, &source)).await.unwrap();
        let tag = store.create_tag(NewTag::new("groceries")).await.unwrap();
        store.tag(statement.id, tag.id).await.unwrap();
        store.untag(statement.id, tag.id).await.unwrap();

        let kinds: Vec<StatementEventKind> = events(&broker).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StatementEventKind::Recorded,
                StatementEventKind::Tagged,
                StatementEventKind::Untagged
            ]
        );
        assert!(events(&broker).iter().all(|e| e.statement == statement));
    }

    #[tokio::test]
    async fn repeated_tagging_announces_only_real_changes() {
        let (store, broker, source) = seeded().await;
        let date = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();

        let statement = store.record(NewStatement::new(date, -1200, &source)).await.unwrap();
        let tag = store.create_tag(NewTag::new("groceries")).await.unwrap();
        assert!(store.tag(statement.id, tag.id).await.unwrap());
        assert!(!store.tag(statement.id, tag.id).await.unwrap());
        assert!(store.untag(statement.id, tag.id).await.unwrap());
        assert!(!store.untag(statement.id, tag.id).await.unwrap());

        let kinds: Vec<StatementEventKind> = events(&broker).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StatementEventKind::Recorded,
                StatementEventKind::Tagged,
                StatementEventKind::Untagged
            ]
        );
    }

    #[tokio::test]
    async fn rejected_write_publishes_nothing() {
        let (store, broker, _) = seeded().await;
        let date = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();

        let unknown = NaturalKey::new("DE9", "Nowhere");
        assert!(store.record(NewStatement::new(date, 1, &unknown)).await.is_err());
        assert!(broker.messages(QUEUE).is_empty());
        assert_eq!(broker.connections_opened(), 0);
    }

    #[tokio::test]
    async fn broker_failure_does_not_fail_the_write() {
        let (store, broker, source) = seeded().await;
        broker.refuse_connects(1);
        let date = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();

        let statement = store.record(NewStatement::new(date, 7, &source)).await.unwrap();

        assert_eq!(store.store().get(statement.id).await.unwrap(), statement);
        assert!(broker.messages(QUEUE).is_empty());
    }
}
