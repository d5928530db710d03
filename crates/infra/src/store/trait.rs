use async_trait::async_trait;

use finshared_core::{
    Account, AccountId, LedgerResult, NaturalKey, NewAccount, NewStatement, NewTag, Statement,
    StatementId, Tag, TagId,
};

/// Accounts and their parent/alias hierarchy.
///
/// ## Invariants
///
/// - `(name, iban)` is unique, `nickname` is unique
/// - parent links never form a cycle
/// - the aliases of an account are the accounts whose `parent_id` is its id
#[async_trait]
pub trait AccountRegistry: Send + Sync {
    /// Persist a new account.
    ///
    /// `DuplicateKey` when the natural key, the nickname or a caller-supplied
    /// id is taken; `NotFound` when the parent does not exist.
    async fn create(&self, account: NewAccount) -> LedgerResult<Account>;

    async fn get_by_id(&self, id: AccountId) -> LedgerResult<Account>;

    async fn get_by_natural_key(&self, key: &NaturalKey) -> LedgerResult<Account>;

    /// Direct children of `id`, ordered by nickname.
    async fn list_aliases(&self, id: AccountId) -> LedgerResult<Vec<Account>>;

    /// Move `id` under `new_parent`, or detach it with `None`.
    ///
    /// `CyclicHierarchy` when `new_parent` is `id` itself or one of its
    /// descendants.
    async fn reparent(&self, id: AccountId, new_parent: Option<AccountId>) -> LedgerResult<Account>;
}

/// Statements, tags and the statement/tag association.
#[async_trait]
pub trait StatementLedger: Send + Sync {
    /// Validate the natural keys against the registry and persist.
    ///
    /// A one-sided counterparty is rejected before any lookup.
    async fn record(&self, statement: NewStatement) -> LedgerResult<Statement>;

    async fn get(&self, id: StatementId) -> LedgerResult<Statement>;

    async fn resolve_source(&self, statement: &Statement) -> LedgerResult<Account>;

    /// `None` for statements without a counterparty.
    async fn resolve_destination(&self, statement: &Statement) -> LedgerResult<Option<Account>>;

    async fn create_tag(&self, tag: NewTag) -> LedgerResult<Tag>;

    async fn get_tag(&self, id: TagId) -> LedgerResult<Tag>;

    /// Idempotent. `true` when the association was newly added.
    async fn tag(&self, statement: StatementId, tag: TagId) -> LedgerResult<bool>;

    /// Idempotent; removing an absent association is a no-op returning `false`.
    async fn untag(&self, statement: StatementId, tag: TagId) -> LedgerResult<bool>;

    /// Tags of a statement, ordered by name.
    async fn tags_of(&self, statement: StatementId) -> LedgerResult<Vec<Tag>>;

    /// Statements carrying `tag`, ordered by `(date, id)`.
    async fn list_by_tag(&self, tag: TagId) -> LedgerResult<Vec<Statement>>;

    /// Statements whose source or destination is `key`, ordered by `(date, id)`.
    async fn list_by_account(&self, key: &NaturalKey) -> LedgerResult<Vec<Statement>>;
}
