use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, instrument};

use finshared_core::{
    Account, AccountId, LedgerError, LedgerResult, NaturalKey, NewAccount, NewStatement, NewTag,
    ParentWalk, Statement, StatementId, Tag, TagId,
};

use super::r#trait::{AccountRegistry, StatementLedger};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    by_key: HashMap<NaturalKey, AccountId>,
    by_nickname: HashMap<String, AccountId>,
    statements: HashMap<StatementId, Statement>,
    tags: HashMap<TagId, Tag>,
    tag_names: HashMap<String, TagId>,
    tagging: BTreeSet<(StatementId, TagId)>,
}

impl Tables {
    fn account(&self, id: AccountId) -> LedgerResult<&Account> {
        self.accounts
            .get(&id)
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    fn account_by_key(&self, key: &NaturalKey) -> Option<&Account> {
        self.by_key.get(key).and_then(|id| self.accounts.get(id))
    }

    fn known(&self, key: &NaturalKey) -> LedgerResult<()> {
        if self.by_key.contains_key(key) {
            Ok(())
        } else {
            Err(LedgerError::UnknownAccount(key.clone()))
        }
    }

    fn check_acyclic(&self, account: AccountId, new_parent: AccountId) -> LedgerResult<()> {
        ParentWalk::start(account, new_parent, self.accounts.len())?
            .run(|id| Ok(self.account(id)?.parent_id))
    }

    fn statement(&self, id: StatementId) -> LedgerResult<&Statement> {
        self.statements
            .get(&id)
            .ok_or_else(|| LedgerError::not_found("statement", id))
    }

    fn tag(&self, id: TagId) -> LedgerResult<&Tag> {
        self.tags
            .get(&id)
            .ok_or_else(|| LedgerError::not_found("tag", id))
    }
}

fn sorted_by_date(mut statements: Vec<Statement>) -> Vec<Statement> {
    statements.sort_by(|a, b| (a.date, a.id).cmp(&(b.date, b.id)));
    statements
}

/// In-memory registry and ledger.
///
/// Intended for tests/dev. Every operation runs inside one lock critical
/// section, so validation and the write it guards are atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| LedgerError::storage("lock poisoned"))
    }
}

#[async_trait]
impl AccountRegistry for InMemoryStore {
    #[instrument(skip(self, account), fields(nickname = %account.nickname), err)]
    async fn create(&self, account: NewAccount) -> LedgerResult<Account> {
        let mut tables = self.write()?;

        let key = account.natural_key();
        if tables.by_key.contains_key(&key) {
            return Err(LedgerError::duplicate(format!("account {key} already exists")));
        }
        if tables.by_nickname.contains_key(&account.nickname) {
            return Err(LedgerError::duplicate(format!(
                "nickname {:?} already exists",
                account.nickname
            )));
        }
        if let Some(id) = account.id {
            if tables.accounts.contains_key(&id) {
                return Err(LedgerError::duplicate(format!("account id {id} already exists")));
            }
        }

        let account = account.into_account();
        if let Some(parent) = account.parent_id {
            tables.account(parent)?;
            tables.check_acyclic(account.id, parent)?;
        }

        tables.by_key.insert(key, account.id);
        tables.by_nickname.insert(account.nickname.clone(), account.id);
        tables.accounts.insert(account.id, account.clone());

        debug!(account_id = %account.id, "account created");
        Ok(account)
    }

    async fn get_by_id(&self, id: AccountId) -> LedgerResult<Account> {
        self.read()?.account(id).cloned()
    }

    async fn get_by_natural_key(&self, key: &NaturalKey) -> LedgerResult<Account> {
        self.read()?
            .account_by_key(key)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("account", key))
    }

    async fn list_aliases(&self, id: AccountId) -> LedgerResult<Vec<Account>> {
        let tables = self.read()?;
        tables.account(id)?;

        let mut aliases: Vec<Account> = tables
            .accounts
            .values()
            .filter(|a| a.parent_id == Some(id))
            .cloned()
            .collect();
        aliases.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        Ok(aliases)
    }

    #[instrument(skip(self), fields(account_id = %id, new_parent = ?new_parent), err)]
    async fn reparent(&self, id: AccountId, new_parent: Option<AccountId>) -> LedgerResult<Account> {
        let mut tables = self.write()?;
        tables.account(id)?;

        if let Some(parent) = new_parent {
            tables.account(parent)?;
            tables.check_acyclic(id, parent)?;
        }

        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("account", id))?;
        account.parent_id = new_parent;
        Ok(account.clone())
    }
}

#[async_trait]
impl StatementLedger for InMemoryStore {
    #[instrument(skip(self, statement), fields(amount = statement.amount), err)]
    async fn record(&self, statement: NewStatement) -> LedgerResult<Statement> {
        let destination = statement.counterparty_key()?;

        let mut tables = self.write()?;
        tables.known(&statement.source_key())?;
        if let Some(destination) = &destination {
            tables.known(destination)?;
        }

        let statement = statement.into_statement(StatementId::new());
        tables.statements.insert(statement.id, statement.clone());

        debug!(statement_id = %statement.id, "statement recorded");
        Ok(statement)
    }

    async fn get(&self, id: StatementId) -> LedgerResult<Statement> {
        self.read()?.statement(id).cloned()
    }

    async fn resolve_source(&self, statement: &Statement) -> LedgerResult<Account> {
        let key = statement.source_key();
        self.read()?
            .account_by_key(&key)
            .cloned()
            .ok_or(LedgerError::UnknownAccount(key))
    }

    async fn resolve_destination(&self, statement: &Statement) -> LedgerResult<Option<Account>> {
        let Some(key) = statement.counterparty_key() else {
            return Ok(None);
        };
        self.read()?
            .account_by_key(&key)
            .cloned()
            .map(Some)
            .ok_or(LedgerError::UnknownAccount(key))
    }

    #[instrument(skip(self, tag), fields(name = %tag.name), err)]
    async fn create_tag(&self, tag: NewTag) -> LedgerResult<Tag> {
        let mut tables = self.write()?;
        if tables.tag_names.contains_key(&tag.name) {
            return Err(LedgerError::duplicate(format!("tag {:?} already exists", tag.name)));
        }

        let tag = tag.into_tag();
        tables.tag_names.insert(tag.name.clone(), tag.id);
        tables.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    async fn get_tag(&self, id: TagId) -> LedgerResult<Tag> {
        self.read()?.tag(id).cloned()
    }

    async fn tag(&self, statement: StatementId, tag: TagId) -> LedgerResult<bool> {
        let mut tables = self.write()?;
        tables.statement(statement)?;
        tables.tag(tag)?;
        Ok(tables.tagging.insert((statement, tag)))
    }

    async fn untag(&self, statement: StatementId, tag: TagId) -> LedgerResult<bool> {
        let mut tables = self.write()?;
        tables.statement(statement)?;
        tables.tag(tag)?;
        Ok(tables.tagging.remove(&(statement, tag)))
    }

    async fn tags_of(&self, statement: StatementId) -> LedgerResult<Vec<Tag>> {
        let tables = self.read()?;
        tables.statement(statement)?;

        let mut tags: Vec<Tag> = tables
            .tagging
            .range((statement, TagId::from_uuid(uuid::Uuid::nil()))..)
            .take_while(|(s, _)| *s == statement)
            .filter_map(|(_, t)| tables.tags.get(t).cloned())
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn list_by_tag(&self, tag: TagId) -> LedgerResult<Vec<Statement>> {
        let tables = self.read()?;
        tables.tag(tag)?;

        let statements = tables
            .tagging
            .iter()
            .filter(|(_, t)| *t == tag)
            .filter_map(|(s, _)| tables.statements.get(s).cloned())
            .collect();
        Ok(sorted_by_date(statements))
    }

    async fn list_by_account(&self, key: &NaturalKey) -> LedgerResult<Vec<Statement>> {
        let statements = self
            .read()?
            .statements
            .values()
            .filter(|s| s.involves(key))
            .cloned()
            .collect();
        Ok(sorted_by_date(statements))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn checking() -> NewAccount {
        NewAccount::new("Checking", "NL00BANK0123456789", "checking")
    }

    #[tokio::test]
    async fn unlinked_parent_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .create(checking().with_parent(AccountId::new()))
            .await
            .unwrap_err();
        match err {
            LedgerError::NotFound { entity: "account", .. } => {}
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.read().unwrap().accounts.is_empty());
    }

    #[tokio::test]
    async fn caller_supplied_id_is_kept_and_must_be_unique() {
        let store = InMemoryStore::new();
        let id = AccountId::new();

        let created = store.create(checking().with_id(id)).await.unwrap();
        assert_eq!(created.id, id);

        let err = store
            .create(NewAccount::new("Savings", "NL00BANK9", "savings").with_id(id))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn rejected_record_leaves_no_row() {
        let store = InMemoryStore::new();
        store.create(checking()).await.unwrap();

        let date = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let statement = NewStatement::new(date, 100, &checking().natural_key())
            .with_counterparty(&NaturalKey::new("DE9", "Nobody"));

        let err = store.record(statement).await.unwrap_err();
        assert_eq!(err, LedgerError::UnknownAccount(NaturalKey::new("DE9", "Nobody")));
        assert!(store.read().unwrap().statements.is_empty());
    }

    #[tokio::test]
    async fn statements_on_the_same_date_are_ordered_by_id() {
        let store = InMemoryStore::new();
        let source = store.create(checking()).await.unwrap().natural_key();
        let date = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

        let later = store
            .record(NewStatement::new(date + chrono::Duration::days(1), 1, &source))
            .await
            .unwrap();
        let first = store.record(NewStatement::new(date, 2, &source)).await.unwrap();
        let second = store.record(NewStatement::new(date, 3, &source)).await.unwrap();

        let ids: Vec<StatementId> = store
            .list_by_account(&source)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        let mut same_day = vec![first.id, second.id];
        same_day.sort();
        assert_eq!(ids, vec![same_day[0], same_day[1], later.id]);
    }
}
