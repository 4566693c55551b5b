//! Provisioning and succession workflows.
//!
//! Every workflow runs the same way: authenticate (done by the caller),
//! verify ownership against the store, validate the payload, generate
//! credentials, then issue the statements of one transaction in a fixed
//! order. The transaction commits as a whole or rolls back as a whole, and
//! must finish within `tx_timeout`. Temporary passwords are dispatched only
//! after commit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use stratum_auth::{CredentialError, CredentialPolicy, Identity, Target, authorize};
use stratum_core::{AdminError, AdminResult, Anchor, Entity, NodeId, NodeKind, PrincipalId, Role, SubordinateKind, validate};

use crate::directory::{Directory, DirectoryTx, NewPrincipal, NewSuccession, StoreError, SuccessionRecord};
use crate::mailer::CredentialDispatcher;

/// Create a node-with-head, or a leaf principal, under the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSubordinate {
    pub kind: SubordinateKind,
    /// Required for branch, department and warehouse; rejected otherwise.
    pub node_name: Option<String>,
    pub head_name: String,
    pub head_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceHead {
    pub old_head_email: String,
    pub new_head_name: String,
    pub new_head_email: String,
}

/// Result of a create. Carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provisioned {
    pub kind: SubordinateKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub principal_id: PrincipalId,
    pub role: Role,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Succession {
    pub record: SuccessionRecord,
    pub new_principal_id: PrincipalId,
    pub new_head_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removed {
    pub entity: &'static str,
    pub id: i64,
    pub principals_removed: usize,
}

pub struct ProvisioningEngine {
    directory: Arc<dyn Directory>,
    credentials: CredentialPolicy,
    dispatcher: CredentialDispatcher,
    tx_timeout: Duration,
}

impl ProvisioningEngine {
    pub fn new(
        directory: Arc<dyn Directory>,
        credentials: CredentialPolicy,
        dispatcher: CredentialDispatcher,
        tx_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            credentials,
            dispatcher,
            tx_timeout,
        }
    }

    #[instrument(skip(self, request), fields(principal = %caller, kind = request.kind.as_str()), err)]
    pub async fn create_subordinate(&self, caller: &Identity, request: CreateSubordinate) -> AdminResult<Provisioned> {
        let kind = request.kind;
        if caller.role != kind.creator() {
            info!(principal = %caller, kind = kind.as_str(), "role may not create this kind");
            return Err(AdminError::Unauthorized);
        }

        // Self-check: the caller's row is re-read, and it provides the parent id.
        let me = self
            .directory
            .resolve(caller)
            .await
            .map_err(|e| store_failure("resolve caller", e))?
            .ok_or(AdminError::Unauthorized)?;
        let parent_id = match kind.entity().anchor_for(caller.role) {
            Some(Anchor::Principal) => Some(me.id.get()),
            Some(Anchor::Supervisor) => me.supervisor_id,
            None => None,
        }
        .ok_or(AdminError::Unauthorized)?;

        let node_name = match (kind.node(), request.node_name.as_deref()) {
            (Some(_), Some(raw)) => Some(validate::name("node_name", raw)?),
            (Some(_), None) => return Err(AdminError::invalid_input("node_name is required")),
            (None, Some(_)) => {
                return Err(AdminError::invalid_input(format!("node_name does not apply to {}", kind.as_str())));
            }
            (None, None) => None,
        };
        let head_name = validate::name("head_name", &request.head_name)?;
        let head_email = validate::email(&request.head_email)?;

        let (password, hash) = self.temporary_credentials().await?;
        let role = kind.principal_role();

        let provisioned = self
            .bounded("create_subordinate", async {
                let mut tx = self.directory.begin().await?;
                let outcome = async {
                    tx.register_email(&head_email, role).await?;
                    let node_id = match (kind.node(), node_name.as_deref()) {
                        (Some(node), Some(name)) => Some(tx.insert_node(node, parent_id, name).await?),
                        _ => None,
                    };
                    let principal_id = tx
                        .insert_principal(&NewPrincipal {
                            role,
                            supervisor_id: Some(node_id.map_or(parent_id, |id| id.get())),
                            name: head_name.clone(),
                            email: head_email.clone(),
                            password_hash: hash,
                        })
                        .await?;
                    if kind.provisions_ledger() {
                        tx.create_units_ledger(principal_id).await?;
                    }
                    Ok::<_, StoreError>(Provisioned {
                        kind,
                        node_id,
                        principal_id,
                        role,
                        email: head_email.clone(),
                    })
                }
                .await;
                settle(tx, outcome).await
            })
            .await?;

        info!(
            principal = %caller,
            kind = kind.as_str(),
            principal_id = %provisioned.principal_id,
            "subordinate provisioned"
        );
        self.dispatcher.dispatch(provisioned.email.clone(), password);
        Ok(provisioned)
    }

    #[instrument(skip(self, request), fields(principal = %caller, node = node.as_str(), node_id = %node_id), err)]
    pub async fn replace_head(
        &self,
        caller: &Identity,
        node: NodeKind,
        node_id: NodeId,
        request: ReplaceHead,
    ) -> AdminResult<Succession> {
        authorize(self.directory.as_ref(), caller, &Target::node(node, node_id)).await?;

        let old_email = validate::email(&request.old_head_email)?;
        let new_name = validate::name("new_head_name", &request.new_head_name)?;
        let new_email = validate::email(&request.new_head_email)?;

        let (password, hash) = self.temporary_credentials().await?;
        let role = node.head_role();

        let succession = self
            .bounded("replace_head", async {
                let mut tx = self.directory.begin().await?;
                let outcome = async {
                    let Some(removed) = tx.delete_head(node, node_id, &old_email).await? else {
                        return Ok(None);
                    };
                    let record = tx
                        .insert_succession(&NewSuccession {
                            node_kind: node,
                            node_id: removed.node_id,
                            old_principal_id: removed.principal_id,
                            email: old_email.clone(),
                            performed_by_role: caller.role,
                            performed_by_id: caller.principal_id,
                        })
                        .await?;
                    tx.unregister_email(&old_email).await?;
                    tx.register_email(&new_email, role).await?;
                    let new_principal_id = tx
                        .insert_principal(&NewPrincipal {
                            role,
                            supervisor_id: Some(removed.node_id.get()),
                            name: new_name.clone(),
                            email: new_email.clone(),
                            password_hash: hash,
                        })
                        .await?;
                    Ok::<_, StoreError>(Some(Succession {
                        record,
                        new_principal_id,
                        new_head_email: new_email.clone(),
                    }))
                }
                .await;
                let outcome = match outcome {
                    Ok(Some(succession)) => Ok(succession),
                    // The delete matched nothing, so nothing was written.
                    Ok(None) => Err(TxFailure::NotFound),
                    Err(err) => Err(TxFailure::Store(err)),
                };
                settle(tx, outcome).await
            })
            .await?;

        info!(
            principal = %caller,
            node = node.as_str(),
            node_id = %node_id,
            succession = %succession.record.id,
            "head replaced"
        );
        self.dispatcher.dispatch(succession.new_head_email.clone(), password);
        Ok(succession)
    }

    /// Delete a node or leaf principal the caller owns, with its whole subtree.
    #[instrument(skip(self), fields(principal = %caller), err)]
    pub async fn remove(&self, caller: &Identity, target: Target) -> AdminResult<Removed> {
        let Target::Row { entity, id } = target else {
            return Err(AdminError::invalid_input("a principal cannot remove itself"));
        };
        if !entity.removable() {
            return Err(AdminError::invalid_input(format!("{entity} cannot be removed directly")));
        }
        authorize(self.directory.as_ref(), caller, &target).await?;

        let principals_removed = self
            .bounded("remove", async {
                let mut tx = self.directory.begin().await?;
                let outcome = remove_statements(tx.as_mut(), entity, id).await;
                settle(tx, outcome).await
            })
            .await?;

        info!(principal = %caller, entity = entity.as_str(), id, principals_removed, "subtree removed");
        Ok(Removed {
            entity: entity.as_str(),
            id,
            principals_removed,
        })
    }

    /// Provision the root principal if `email` is not registered yet.
    ///
    /// Returns `None` when there was nothing to do.
    #[instrument(skip(self, name), err)]
    pub async fn bootstrap_company(&self, name: &str, email: &str) -> AdminResult<Option<PrincipalId>> {
        let name = validate::name("name", name)?;
        let email = validate::email(email)?;

        let existing = self
            .directory
            .find_by_email(&email)
            .await
            .map_err(|e| store_failure("bootstrap lookup", e))?;
        if existing.is_some() {
            info!(%email, "root principal already provisioned");
            return Ok(None);
        }

        let (password, hash) = self.temporary_credentials().await?;
        let created = self
            .bounded("bootstrap_company", async {
                let mut tx = self.directory.begin().await?;
                let outcome = async {
                    tx.register_email(&email, Role::Company).await?;
                    tx.insert_principal(&NewPrincipal {
                        role: Role::Company,
                        supervisor_id: None,
                        name: name.clone(),
                        email: email.clone(),
                        password_hash: hash,
                    })
                    .await
                }
                .await;
                settle(tx, outcome).await
            })
            .await;

        match created {
            Ok(id) => {
                info!(%email, principal_id = %id, "root principal provisioned");
                self.dispatcher.dispatch(email, password);
                Ok(Some(id))
            }
            // Another process won the race.
            Err(AdminError::Conflict(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn temporary_credentials(&self) -> AdminResult<(String, String)> {
        let policy = self.credentials;
        let generated = tokio::task::spawn_blocking(move || policy.temporary())
            .await
            .map_err(|e| AdminError::transient(format!("credential task failed: {e}")))?;
        generated.map_err(|e| match e {
            CredentialError::Exhausted { attempts } => {
                error!(attempts, "password generation exhausted its attempts");
                AdminError::transient("password generation exhausted")
            }
            other => {
                error!(error = %other, "credential generation failed");
                AdminError::transient(other.to_string())
            }
        })
    }

    /// Run one transaction under the timeout. Dropping the future on
    /// elapse drops the open transaction, which rolls it back.
    async fn bounded<T, F>(&self, operation: &'static str, work: F) -> AdminResult<T>
    where
        F: Future<Output = Result<T, TxFailure>>,
    {
        match tokio::time::timeout(self.tx_timeout, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(TxFailure::NotFound)) => Err(AdminError::NotFound),
            Ok(Err(TxFailure::Store(err))) => Err(store_failure(operation, err)),
            Err(_) => {
                error!(operation, timeout_ms = self.tx_timeout.as_millis() as u64, "transaction timed out");
                Err(AdminError::transient(format!("{operation} timed out")))
            }
        }
    }
}

/// Why a transaction did not commit.
#[derive(Debug)]
enum TxFailure {
    NotFound,
    Store(StoreError),
}

impl From<StoreError> for TxFailure {
    fn from(err: StoreError) -> Self {
        TxFailure::Store(err)
    }
}

/// Commit on success, roll back otherwise.
async fn settle<T, E>(mut tx: Box<dyn DirectoryTx>, outcome: Result<T, E>) -> Result<T, TxFailure>
where
    E: Into<TxFailure>,
{
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed; the transaction is discarded on drop");
            }
            Err(err.into())
        }
    }
}

async fn remove_statements(tx: &mut dyn DirectoryTx, entity: Entity, id: i64) -> Result<usize, TxFailure> {
    let subtree = tx.collect_subtree(entity, id).await?;
    for email in &subtree.emails {
        tx.unregister_email(email).await?;
    }
    for ledger in &subtree.ledgers {
        tx.drop_units_ledger(ledger).await?;
    }
    if !tx.delete_row(entity, id).await? {
        return Err(TxFailure::NotFound);
    }
    Ok(subtree.emails.len())
}

fn store_failure(operation: &'static str, err: StoreError) -> AdminError {
    match &err {
        StoreError::Backend(_) | StoreError::Timeout => error!(operation, error = %err, "storage failure"),
        StoreError::Conflict(_) | StoreError::ForeignKey(_) => info!(operation, error = %err, "write rejected"),
    }
    err.into()
}
