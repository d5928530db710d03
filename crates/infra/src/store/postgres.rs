//! PostgreSQL-backed registry and ledger.
//!
//! Every operation is one transaction. Validation reads happen inside the
//! same transaction as the write they guard, and the schema constraints
//! (`schema.sql`) stay the final arbiter when two writers race.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | constraint | LedgerError |
//! |------------|----------|------------|-------------|
//! | Database (unique violation) | `23505` | any | `DuplicateKey` |
//! | Database (foreign key violation) | `23503` | `fk_statements_*_account` | `UnknownAccount` |
//! | Database (foreign key violation) | `23503` | `fk_tags_to_statement_*`, `fk_accounts_parent` | `NotFound` |
//! | Database (check violation) | `23514` | `ck_statements_counterparty` | `InvalidCounterparty` |
//! | Database (other), PoolClosed, Io, ... | any | | `Storage` |
//!
//! Hierarchy writes (`create` with a parent, `reparent`) additionally take a
//! transaction-scoped advisory lock so two concurrent re-parents cannot each
//! pass the cycle check and together close a loop.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, info, instrument};
use uuid::Uuid;

use finshared_core::hierarchy::WalkStep;
use finshared_core::{
    Account, AccountId, LedgerError, LedgerResult, NaturalKey, NewAccount, NewStatement, NewTag,
    ParentWalk, Statement, StatementId, Tag, TagId,
};

use super::r#trait::{AccountRegistry, StatementLedger};
use crate::config::DatabaseParams;

const SCHEMA: &str = include_str!("schema.sql");

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";

const SOURCE_FK: &str = "fk_statements_source_account";
const DESTINATION_FK: &str = "fk_statements_destination_account";

/// Advisory lock key serializing hierarchy writes.
const HIERARCHY_LOCK: i64 = 0x6669_6e73_6861_7264;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Registry and ledger over a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool for `params`.
    #[instrument(skip(params), fields(host = %params.host, database = %params.database), err)]
    pub async fn connect(params: &DatabaseParams) -> LedgerResult<Self> {
        info!(max_connections = DEFAULT_MAX_CONNECTIONS, "connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&params.connection_url())
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        info!("PostgreSQL connection pool established");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables, constraints and indexes that do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> LedgerResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Close the pool. Idempotent.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("PostgreSQL connection pool closed");
        }
    }

    async fn begin(&self) -> LedgerResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn commit(tx: Transaction<'_, Postgres>) -> LedgerResult<()> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

async fn lock_hierarchy(tx: &mut Transaction<'_, Postgres>) -> LedgerResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(HIERARCHY_LOCK)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_hierarchy", e))?;
    Ok(())
}

async fn account_exists(tx: &mut Transaction<'_, Postgres>, id: AccountId) -> LedgerResult<()> {
    let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM accounts WHERE id = $1")
        .bind(*id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("account_exists", e))?;
    found
        .map(|_| ())
        .ok_or_else(|| LedgerError::not_found("account", id))
}

/// Drive a [`ParentWalk`] with one parent lookup per step.
async fn check_acyclic(
    tx: &mut Transaction<'_, Postgres>,
    account: AccountId,
    new_parent: AccountId,
) -> LedgerResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("count_accounts", e))?;

    let mut walk = ParentWalk::start(account, new_parent, count.max(0) as usize)?;
    loop {
        let cursor = walk.cursor();
        let parent: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT parent_id FROM accounts WHERE id = $1")
                .bind(*cursor.as_uuid())
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("parent_walk", e))?;
        let parent = parent.ok_or_else(|| LedgerError::not_found("account", cursor))?;

        match walk.advance(parent.map(AccountId::from_uuid))? {
            WalkStep::Next(_) => continue,
            WalkStep::Clear => return Ok(()),
        }
    }
}

async fn require_account_key(
    tx: &mut Transaction<'_, Postgres>,
    key: &NaturalKey,
) -> LedgerResult<()> {
    let found: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM accounts WHERE iban = $1 AND name = $2 FOR SHARE",
    )
    .bind(&key.iban)
    .bind(&key.name)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lookup_account_key", e))?;
    found
        .map(|_| ())
        .ok_or_else(|| LedgerError::UnknownAccount(key.clone()))
}

async fn require_statement(
    tx: &mut Transaction<'_, Postgres>,
    id: StatementId,
) -> LedgerResult<()> {
    let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM statements WHERE id = $1")
        .bind(*id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lookup_statement", e))?;
    found
        .map(|_| ())
        .ok_or_else(|| LedgerError::not_found("statement", id))
}

async fn require_tag(tx: &mut Transaction<'_, Postgres>, id: TagId) -> LedgerResult<()> {
    let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM tags WHERE id = $1")
        .bind(*id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lookup_tag", e))?;
    found
        .map(|_| ())
        .ok_or_else(|| LedgerError::not_found("tag", id))
}

#[async_trait]
impl AccountRegistry for PostgresStore {
    #[instrument(skip(self, account), fields(nickname = %account.nickname), err)]
    async fn create(&self, account: NewAccount) -> LedgerResult<Account> {
        let account = account.into_account();
        let mut tx = self.begin().await?;

        if account.parent_id.is_some() {
            lock_hierarchy(&mut tx).await?;
        }

        // Insert before the parent checks: duplicates win over cycles.
        sqlx::query(
            r#"
            INSERT INTO accounts (id, name, iban, nickname, parent_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(*account.id.as_uuid())
        .bind(&account.name)
        .bind(&account.iban)
        .bind(&account.nickname)
        .bind(account.parent_id.map(|p| *p.as_uuid()))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_account", e))?;

        if let Some(parent) = account.parent_id {
            account_exists(&mut tx, parent).await?;
            check_acyclic(&mut tx, account.id, parent).await?;
        }

        commit(tx).await?;
        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn get_by_id(&self, id: AccountId) -> LedgerResult<Account> {
        sqlx::query_as::<_, AccountRow>(
            "SELECT id, name, iban, nickname, parent_id FROM accounts WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_account", e))?
        .map(Account::from)
        .ok_or_else(|| LedgerError::not_found("account", id))
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn get_by_natural_key(&self, key: &NaturalKey) -> LedgerResult<Account> {
        sqlx::query_as::<_, AccountRow>(
            "SELECT id, name, iban, nickname, parent_id FROM accounts WHERE iban = $1 AND name = $2",
        )
        .bind(&key.iban)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_account_by_key", e))?
        .map(Account::from)
        .ok_or_else(|| LedgerError::not_found("account", key))
    }

    #[instrument(skip(self), fields(account_id = %id, alias_count = tracing::field::Empty), err)]
    async fn list_aliases(&self, id: AccountId) -> LedgerResult<Vec<Account>> {
        let mut tx = self.begin().await?;
        account_exists(&mut tx, id).await?;

        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, name, iban, nickname, parent_id
            FROM accounts
            WHERE parent_id = $1
            ORDER BY nickname ASC
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("list_aliases", e))?;

        commit(tx).await?;
        Span::current().record("alias_count", rows.len());
        Ok(rows.into_iter().map(Account::from).collect())
    }

    #[instrument(skip(self), fields(account_id = %id, new_parent = ?new_parent), err)]
    async fn reparent(&self, id: AccountId, new_parent: Option<AccountId>) -> LedgerResult<Account> {
        let mut tx = self.begin().await?;
        lock_hierarchy(&mut tx).await?;
        account_exists(&mut tx, id).await?;

        if let Some(parent) = new_parent {
            account_exists(&mut tx, parent).await?;
            check_acyclic(&mut tx, id, parent).await?;
        }

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            UPDATE accounts SET parent_id = $2
            WHERE id = $1
            RETURNING id, name, iban, nickname, parent_id
            "#,
        )
        .bind(*id.as_uuid())
        .bind(new_parent.map(|p| *p.as_uuid()))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("reparent", e))?;

        commit(tx).await?;
        Ok(row.into())
    }
}

#[async_trait]
impl StatementLedger for PostgresStore {
    #[instrument(
        skip(self, statement),
        fields(amount = statement.amount, statement_id = tracing::field::Empty),
        err
    )]
    async fn record(&self, statement: NewStatement) -> LedgerResult<Statement> {
        let source = statement.source_key();
        let destination = statement.counterparty_key()?;

        let mut tx = self.begin().await?;
        require_account_key(&mut tx, &source).await?;
        if let Some(destination) = &destination {
            require_account_key(&mut tx, destination).await?;
        }

        let statement = statement.into_statement(StatementId::new());
        sqlx::query(
            r#"
            INSERT INTO statements (
                id,
                date,
                interest_date,
                amount,
                account_iban,
                account_name,
                counterparty_iban,
                counterparty_name,
                description
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(*statement.id.as_uuid())
        .bind(statement.date)
        .bind(statement.interest_date)
        .bind(statement.amount)
        .bind(&statement.account_iban)
        .bind(&statement.account_name)
        .bind(&statement.counterparty_iban)
        .bind(&statement.counterparty_name)
        .bind(&statement.description)
        .execute(&mut *tx)
        .await
        .map_err(|e| match violated_constraint(&e, FOREIGN_KEY_VIOLATION) {
            Some(SOURCE_FK) => LedgerError::UnknownAccount(source.clone()),
            Some(DESTINATION_FK) => match &destination {
                Some(key) => LedgerError::UnknownAccount(key.clone()),
                None => map_sqlx_error("insert_statement", e),
            },
            _ => map_sqlx_error("insert_statement", e),
        })?;

        commit(tx).await?;
        Span::current().record("statement_id", tracing::field::display(statement.id));
        Ok(statement)
    }

    #[instrument(skip(self), fields(statement_id = %id), err)]
    async fn get(&self, id: StatementId) -> LedgerResult<Statement> {
        sqlx::query_as::<_, StatementRow>(
            r#"
            SELECT id, date, interest_date, amount, account_iban, account_name,
                   counterparty_iban, counterparty_name, description
            FROM statements
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_statement", e))?
        .map(Statement::from)
        .ok_or_else(|| LedgerError::not_found("statement", id))
    }

    async fn resolve_source(&self, statement: &Statement) -> LedgerResult<Account> {
        let key = statement.source_key();
        match self.get_by_natural_key(&key).await {
            Err(LedgerError::NotFound { .. }) => Err(LedgerError::UnknownAccount(key)),
            other => other,
        }
    }

    async fn resolve_destination(&self, statement: &Statement) -> LedgerResult<Option<Account>> {
        let Some(key) = statement.counterparty_key() else {
            return Ok(None);
        };
        match self.get_by_natural_key(&key).await {
            Ok(account) => Ok(Some(account)),
            Err(LedgerError::NotFound { .. }) => Err(LedgerError::UnknownAccount(key)),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, tag), fields(name = %tag.name), err)]
    async fn create_tag(&self, tag: NewTag) -> LedgerResult<Tag> {
        let tag = tag.into_tag();
        sqlx::query("INSERT INTO tags (id, name, color) VALUES ($1, $2, $3)")
            .bind(*tag.id.as_uuid())
            .bind(&tag.name)
            .bind(&tag.color)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_tag", e))?;
        Ok(tag)
    }

    #[instrument(skip(self), fields(tag_id = %id), err)]
    async fn get_tag(&self, id: TagId) -> LedgerResult<Tag> {
        sqlx::query_as::<_, TagRow>("SELECT id, name, color FROM tags WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_tag", e))?
            .map(Tag::from)
            .ok_or_else(|| LedgerError::not_found("tag", id))
    }

    #[instrument(skip(self), fields(statement_id = %statement, tag_id = %tag), err)]
    async fn tag(&self, statement: StatementId, tag: TagId) -> LedgerResult<bool> {
        let mut tx = self.begin().await?;
        require_statement(&mut tx, statement).await?;
        require_tag(&mut tx, tag).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO tags_to_statement (tag_id, statement_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(*tag.as_uuid())
        .bind(*statement.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("tag_statement", e))?
        .rows_affected();

        commit(tx).await?;
        Ok(inserted > 0)
    }

    #[instrument(skip(self), fields(statement_id = %statement, tag_id = %tag), err)]
    async fn untag(&self, statement: StatementId, tag: TagId) -> LedgerResult<bool> {
        let mut tx = self.begin().await?;
        require_statement(&mut tx, statement).await?;
        require_tag(&mut tx, tag).await?;

        let removed = sqlx::query("DELETE FROM tags_to_statement WHERE tag_id = $1 AND statement_id = $2")
            .bind(*tag.as_uuid())
            .bind(*statement.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("untag_statement", e))?
            .rows_affected();

        commit(tx).await?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), fields(statement_id = %statement), err)]
    async fn tags_of(&self, statement: StatementId) -> LedgerResult<Vec<Tag>> {
        let mut tx = self.begin().await?;
        require_statement(&mut tx, statement).await?;

        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT t.id, t.name, t.color
            FROM tags t
            JOIN tags_to_statement ts ON ts.tag_id = t.id
            WHERE ts.statement_id = $1
            ORDER BY t.name ASC
            "#,
        )
        .bind(*statement.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("tags_of", e))?;

        commit(tx).await?;
        Ok(rows.into_iter().map(Tag::from).collect())
    }

    #[instrument(skip(self), fields(tag_id = %tag), err)]
    async fn list_by_tag(&self, tag: TagId) -> LedgerResult<Vec<Statement>> {
        let mut tx = self.begin().await?;
        require_tag(&mut tx, tag).await?;

        let rows = sqlx::query_as::<_, StatementRow>(
            r#"
            SELECT s.id, s.date, s.interest_date, s.amount, s.account_iban, s.account_name,
                   s.counterparty_iban, s.counterparty_name, s.description
            FROM statements s
            JOIN tags_to_statement ts ON ts.statement_id = s.id
            WHERE ts.tag_id = $1
            ORDER BY s.date ASC, s.id ASC
            "#,
        )
        .bind(*tag.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("list_by_tag", e))?;

        commit(tx).await?;
        Ok(rows.into_iter().map(Statement::from).collect())
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn list_by_account(&self, key: &NaturalKey) -> LedgerResult<Vec<Statement>> {
        let rows = sqlx::query_as::<_, StatementRow>(
            r#"
            SELECT id, date, interest_date, amount, account_iban, account_name,
                   counterparty_iban, counterparty_name, description
            FROM statements
            WHERE (account_iban = $1 AND account_name = $2)
               OR (counterparty_iban = $1 AND counterparty_name = $2)
            ORDER BY date ASC, id ASC
            "#,
        )
        .bind(&key.iban)
        .bind(&key.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_account", e))?;

        Ok(rows.into_iter().map(Statement::from).collect())
    }
}

/// Constraint named by a database error with the given SQLSTATE.
fn violated_constraint<'e>(err: &'e sqlx::Error, code: &str) -> Option<&'e str> {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(code) => {
            db_err.constraint()
        }
        _ => None,
    }
}

/// Map SQLx errors to LedgerError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            let constraint = db_err.constraint().unwrap_or("unknown constraint");

            match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => {
                    LedgerError::DuplicateKey(format!("{constraint}: {}", db_err.message()))
                }
                Some(FOREIGN_KEY_VIOLATION) => LedgerError::NotFound {
                    entity: referenced_entity(constraint),
                    id: db_err.message().to_string(),
                },
                Some(CHECK_VIOLATION) if constraint == "ck_statements_counterparty" => {
                    LedgerError::InvalidCounterparty
                }
                _ => LedgerError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            LedgerError::Storage(format!("unexpected row not found in {}", operation))
        }
        _ => LedgerError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn referenced_entity(constraint: &str) -> &'static str {
    match constraint {
        "fk_tags_to_statement_tag" => "tag",
        "fk_tags_to_statement_statement" => "statement",
        _ => "account",
    }
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    id: Uuid,
    name: String,
    iban: String,
    nickname: String,
    parent_id: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            iban: row.try_get("iban")?,
            nickname: row.try_get("nickname")?,
            parent_id: row.try_get("parent_id")?,
        })
    }
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: AccountId::from_uuid(row.id),
            name: row.name,
            iban: row.iban,
            nickname: row.nickname,
            parent_id: row.parent_id.map(AccountId::from_uuid),
        }
    }
}

#[derive(Debug)]
struct StatementRow {
    id: Uuid,
    date: chrono::DateTime<chrono::Utc>,
    interest_date: chrono::DateTime<chrono::Utc>,
    amount: i64,
    account_iban: String,
    account_name: String,
    counterparty_iban: Option<String>,
    counterparty_name: Option<String>,
    description: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for StatementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StatementRow {
            id: row.try_get("id")?,
            date: row.try_get("date")?,
            interest_date: row.try_get("interest_date")?,
            amount: row.try_get("amount")?,
            account_iban: row.try_get("account_iban")?,
            account_name: row.try_get("account_name")?,
            counterparty_iban: row.try_get("counterparty_iban")?,
            counterparty_name: row.try_get("counterparty_name")?,
            description: row.try_get("description")?,
        })
    }
}

impl From<StatementRow> for Statement {
    fn from(row: StatementRow) -> Self {
        Statement {
            id: StatementId::from_uuid(row.id),
            date: row.date,
            interest_date: row.interest_date,
            amount: row.amount,
            account_iban: row.account_iban,
            account_name: row.account_name,
            counterparty_iban: row.counterparty_iban,
            counterparty_name: row.counterparty_name,
            description: row.description,
        }
    }
}

#[derive(Debug)]
struct TagRow {
    id: Uuid,
    name: String,
    color: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for TagRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TagRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            color: row.try_get("color")?,
        })
    }
}

impl From<TagRow> for Tag {
    fn from(row: TagRow) -> Self {
        Tag {
            id: TagId::from_uuid(row.id),
            name: row.name,
            color: row.color,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_keys_name_the_entity_they_reference() {
        assert_eq!(referenced_entity("fk_tags_to_statement_tag"), "tag");
        assert_eq!(referenced_entity("fk_tags_to_statement_statement"), "statement");
        assert_eq!(referenced_entity("fk_accounts_parent"), "account");
    }

    #[test]
    fn pool_errors_are_storage_errors() {
        let err = map_sqlx_error("get_account", sqlx::Error::PoolClosed);
        match err {
            LedgerError::Storage(msg) => assert!(msg.contains("get_account")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn schema_declares_every_named_constraint() {
        for name in [
            "uq_account_name_iban",
            "uq_account_nickname",
            SOURCE_FK,
            DESTINATION_FK,
            "ck_statements_counterparty",
            "fk_tags_to_statement_tag",
            "fk_tags_to_statement_statement",
        ] {
            assert!(SCHEMA.contains(name), "schema is missing {name}");
        }
    }
}
