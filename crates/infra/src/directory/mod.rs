//! Storage boundary for the principal hierarchy.
//!
//! The relational store is the single source of truth for principals, the
//! Registry, succession records and units ledgers. Nothing here caches.
//!
//! Multi-statement mutations go through a [`DirectoryTx`]: the provisioning
//! engine issues its statements in a fixed order against one transaction and
//! either commits all of them or none. Adapters only provide the primitive
//! statements; they never decide what a workflow is.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use stratum_auth::{Identity, OwnershipVerifier};
use stratum_core::{AdminError, Entity, ListQuery, NodeId, NodeKind, PrincipalId, RecordId, Role, UnitsLedger};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryDirectory;
pub use postgres::PostgresDirectory;

/// Stable conflict messages, shared by every adapter.
pub mod conflict {
    pub const EMAIL_REGISTERED: &str = "email is already registered";
    pub const HEAD_EXISTS: &str = "node already has a head";
    pub const SERIAL_RECORDED: &str = "unit serial is already recorded";
    pub const GENERIC: &str = "uniqueness constraint violated";
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. The message is caller-safe.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A foreign key did not resolve (the parent row is gone).
    #[error("referenced row does not exist: {0}")]
    ForeignKey(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage operation timed out")]
    Timeout,
}

impl From<StoreError> for AdminError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AdminError::Conflict(msg),
            StoreError::ForeignKey(_) => AdminError::NotFound,
            StoreError::Backend(msg) => AdminError::Transient(msg),
            StoreError::Timeout => AdminError::transient("storage operation timed out"),
        }
    }
}

/// A principal row, whichever role table it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalRow {
    pub id: PrincipalId,
    pub role: Role,
    /// `None` only for the root.
    pub supervisor_id: Option<i64>,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl PrincipalRow {
    pub fn identity(&self) -> Identity {
        Identity::new(self.id, self.email.clone(), self.role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrincipal {
    pub role: Role,
    pub supervisor_id: Option<i64>,
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// What a head deletion removed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RemovedHead {
    pub principal_id: PrincipalId,
    pub node_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSuccession {
    pub node_kind: NodeKind,
    pub node_id: NodeId,
    pub old_principal_id: PrincipalId,
    pub email: String,
    pub performed_by_role: Role,
    pub performed_by_id: PrincipalId,
}

/// Immutable audit row written whenever a head is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuccessionRecord {
    pub id: RecordId,
    pub node_kind: NodeKind,
    pub node_id: NodeId,
    pub old_principal_id: PrincipalId,
    pub email: String,
    pub performed_by_role: Role,
    pub performed_by_id: PrincipalId,
    pub performed_at: DateTime<Utc>,
}

/// Everything a subtree deletion must clean up outside the cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subtree {
    pub emails: Vec<String>,
    pub ledgers: Vec<UnitsLedger>,
}

/// Listing projection of a node or principal row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitRecord {
    pub id: RecordId,
    pub serial: String,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// One open transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait DirectoryTx: Send {
    /// Bind `email` to `role` in the Registry. `Conflict` if already bound.
    async fn register_email(&mut self, email: &str, role: Role) -> Result<(), StoreError>;

    async fn unregister_email(&mut self, email: &str) -> Result<(), StoreError>;

    async fn insert_node(&mut self, kind: NodeKind, parent_id: i64, name: &str) -> Result<NodeId, StoreError>;

    async fn insert_principal(&mut self, principal: &NewPrincipal) -> Result<PrincipalId, StoreError>;

    /// Delete the head of `node_id` whose email is `email`; `None` if no such row.
    async fn delete_head(
        &mut self,
        node: NodeKind,
        node_id: NodeId,
        email: &str,
    ) -> Result<Option<RemovedHead>, StoreError>;

    async fn insert_succession(&mut self, record: &NewSuccession) -> Result<SuccessionRecord, StoreError>;

    /// Create the component's units table and register its name.
    async fn create_units_ledger(&mut self, component: PrincipalId) -> Result<UnitsLedger, StoreError>;

    /// Principal emails and units ledgers in the subtree rooted at `(entity, id)`, root included.
    async fn collect_subtree(&mut self, entity: Entity, id: i64) -> Result<Subtree, StoreError>;

    /// Delete one row; storage cascades to descendants. `false` if it did not exist.
    async fn delete_row(&mut self, entity: Entity, id: i64) -> Result<bool, StoreError>;

    async fn drop_units_ledger(&mut self, ledger: &UnitsLedger) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Non-transactional reads plus the transaction factory.
///
/// Ownership verification is part of the contract: every directory is an
/// [`OwnershipVerifier`] over its own rows.
#[async_trait]
pub trait Directory: OwnershipVerifier + Send + Sync {
    async fn begin(&self) -> Result<Box<dyn DirectoryTx>, StoreError>;

    /// The caller's own row, if it still exists with the claimed email.
    async fn resolve(&self, identity: &Identity) -> Result<Option<PrincipalRow>, StoreError>;

    /// Role-agnostic lookup: Registry first, then the bound role's table.
    async fn find_by_email(&self, email: &str) -> Result<Option<PrincipalRow>, StoreError>;

    async fn update_password(&self, identity: &Identity, password_hash: &str) -> Result<bool, StoreError>;

    /// Rows of `entity` owned by the caller, paged and sorted per `query`.
    async fn list_owned(
        &self,
        identity: &Identity,
        entity: Entity,
        query: &ListQuery,
    ) -> Result<Vec<Summary>, StoreError>;

    /// Newest first.
    async fn list_successions(&self, node: NodeKind, node_id: NodeId) -> Result<Vec<SuccessionRecord>, StoreError>;

    async fn units_ledger(&self, component: PrincipalId) -> Result<Option<UnitsLedger>, StoreError>;

    async fn record_unit(
        &self,
        ledger: &UnitsLedger,
        serial: &str,
        note: Option<&str>,
    ) -> Result<UnitRecord, StoreError>;

    async fn list_units(&self, ledger: &UnitsLedger, limit: u32, offset: u32) -> Result<Vec<UnitRecord>, StoreError>;
}

pub(crate) fn finished() -> StoreError {
    StoreError::Backend("transaction already finished".to_string())
}
