//! In-memory directory for tests/dev.
//!
//! A transaction takes the single state lock for its whole lifetime and works
//! on a staged copy; `commit` swaps the copy in, anything else discards it.
//! Foreign keys, cascades and uniqueness are emulated so workflows behave the
//! same as against Postgres.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use stratum_auth::{Identity, OwnershipVerifier, Target, VerifyError};
use stratum_core::{Anchor, Entity, ListQuery, NodeId, NodeKind, PrincipalId, RecordId, Role, SortKey, SortOrder, UnitsLedger};

use super::{
    Directory, DirectoryTx, NewPrincipal, NewSuccession, PrincipalRow, RemovedHead, StoreError, SuccessionRecord,
    Subtree, Summary, UnitRecord, conflict, finished,
};

#[derive(Debug, Clone)]
struct NodeRow {
    id: i64,
    parent_id: i64,
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct State {
    next_id: i64,
    registry: BTreeMap<String, Role>,
    principals: BTreeMap<(Role, i64), PrincipalRow>,
    nodes: BTreeMap<(NodeKind, i64), NodeRow>,
    successions: Vec<SuccessionRecord>,
    ledgers: BTreeMap<i64, UnitsLedger>,
    units: BTreeMap<String, Vec<UnitRecord>>,
}

impl State {
    fn alloc(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn principal(&self, identity: &Identity) -> Option<&PrincipalRow> {
        self.principals
            .get(&(identity.role, identity.principal_id.get()))
            .filter(|row| row.email == identity.email)
    }

    fn exists(&self, entity: Entity, id: i64) -> bool {
        match entity {
            Entity::Principal(role) => self.principals.contains_key(&(role, id)),
            Entity::Node(kind) => self.nodes.contains_key(&(kind, id)),
        }
    }

    fn parent_of(&self, entity: Entity, id: i64) -> Option<i64> {
        match entity {
            Entity::Principal(role) => self.principals.get(&(role, id))?.supervisor_id,
            Entity::Node(kind) => Some(self.nodes.get(&(kind, id))?.parent_id),
        }
    }

    fn owns(&self, identity: &Identity, target: &Target) -> bool {
        let Some(me) = self.principal(identity) else {
            return false;
        };
        let Target::Row { entity, id } = *target else {
            return true;
        };
        let Some(parent) = self.parent_of(entity, id) else {
            return false;
        };
        match entity.anchor_for(identity.role) {
            Some(Anchor::Principal) => parent == me.id.get(),
            Some(Anchor::Supervisor) => Some(parent) == me.supervisor_id,
            None => false,
        }
    }

    fn ids_with_parent(&self, child: Entity, parent_id: i64) -> Vec<i64> {
        match child {
            Entity::Principal(role) => self
                .principals
                .values()
                .filter(|row| row.role == role && row.supervisor_id == Some(parent_id))
                .map(|row| row.id.get())
                .collect(),
            Entity::Node(kind) => self
                .nodes
                .iter()
                .filter(|((k, _), row)| *k == kind && row.parent_id == parent_id)
                .map(|(_, row)| row.id)
                .collect(),
        }
    }

    /// Root first, then every descendant reachable through parent edges.
    fn subtree(&self, entity: Entity, id: i64) -> Vec<(Entity, i64)> {
        let mut out = Vec::new();
        let mut stack = vec![(entity, id)];
        while let Some((entity, id)) = stack.pop() {
            if !self.exists(entity, id) {
                continue;
            }
            out.push((entity, id));
            for child in entity.children() {
                for child_id in self.ids_with_parent(child, id) {
                    stack.push((child, child_id));
                }
            }
        }
        out
    }

    fn summary(&self, entity: Entity, id: i64) -> Option<Summary> {
        match entity {
            Entity::Principal(role) => self.principals.get(&(role, id)).map(|row| Summary {
                id,
                name: row.name.clone(),
                email: Some(row.email.clone()),
                created_at: row.created_at,
            }),
            Entity::Node(kind) => self.nodes.get(&(kind, id)).map(|row| Summary {
                id,
                name: row.name.clone(),
                email: None,
                created_at: row.created_at,
            }),
        }
    }

    fn all_ids(&self, entity: Entity) -> Vec<i64> {
        match entity {
            Entity::Principal(role) => self
                .principals
                .keys()
                .filter(|(r, _)| *r == role)
                .map(|(_, id)| *id)
                .collect(),
            Entity::Node(kind) => self.nodes.keys().filter(|(k, _)| *k == kind).map(|(_, id)| *id).collect(),
        }
    }
}

/// Row counts, for dev introspection and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub registry: usize,
    pub principals: usize,
    pub nodes: usize,
    pub successions: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<Mutex<State>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert a node directly (dev/test setup), enforcing the same constraints.
    pub async fn seed_node(&self, kind: NodeKind, parent_id: i64, name: &str) -> Result<NodeId, StoreError> {
        let mut tx = self.begin().await?;
        let id = tx.insert_node(kind, parent_id, name).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Register and insert a principal directly (dev/test setup).
    pub async fn seed_principal(&self, principal: NewPrincipal) -> Result<PrincipalId, StoreError> {
        let mut tx = self.begin().await?;
        tx.register_email(&principal.email, principal.role).await?;
        let id = tx.insert_principal(&principal).await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn stats(&self) -> DirectoryStats {
        let state = self.state.lock().await;
        DirectoryStats {
            registry: state.registry.len(),
            principals: state.principals.len(),
            nodes: state.nodes.len(),
            successions: state.successions.len(),
        }
    }

    pub async fn registered_role(&self, email: &str) -> Option<Role> {
        self.state.lock().await.registry.get(email).copied()
    }

    pub async fn has_ledger(&self, ledger: &UnitsLedger) -> bool {
        self.state.lock().await.units.contains_key(ledger.as_str())
    }
}

pub struct InMemoryTx {
    guard: Option<OwnedMutexGuard<State>>,
    staged: State,
}

impl InMemoryTx {
    fn state(&mut self) -> Result<&mut State, StoreError> {
        match self.guard {
            Some(_) => Ok(&mut self.staged),
            None => Err(finished()),
        }
    }
}

#[async_trait]
impl DirectoryTx for InMemoryTx {
    async fn register_email(&mut self, email: &str, role: Role) -> Result<(), StoreError> {
        let state = self.state()?;
        if state.registry.contains_key(email) {
            return Err(StoreError::Conflict(conflict::EMAIL_REGISTERED.to_string()));
        }
        state.registry.insert(email.to_string(), role);
        Ok(())
    }

    async fn unregister_email(&mut self, email: &str) -> Result<(), StoreError> {
        self.state()?.registry.remove(email);
        Ok(())
    }

    async fn insert_node(&mut self, kind: NodeKind, parent_id: i64, name: &str) -> Result<NodeId, StoreError> {
        let state = self.state()?;
        if !state.exists(kind.parent().entity(), parent_id) {
            return Err(StoreError::ForeignKey(format!("{} parent {parent_id}", kind.table())));
        }
        let id = state.alloc();
        state.nodes.insert(
            (kind, id),
            NodeRow {
                id,
                parent_id,
                name: name.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(NodeId::new(id))
    }

    async fn insert_principal(&mut self, principal: &NewPrincipal) -> Result<PrincipalId, StoreError> {
        let state = self.state()?;
        let role = principal.role;

        match (role.supervisor(), principal.supervisor_id) {
            (Some(parent), Some(supervisor_id)) if state.exists(parent.entity(), supervisor_id) => {}
            (None, None) => {}
            _ => return Err(StoreError::ForeignKey(format!("{} supervisor", role.table()))),
        }
        for row in state.principals.values().filter(|row| row.role == role) {
            if row.email == principal.email {
                return Err(StoreError::Conflict(conflict::EMAIL_REGISTERED.to_string()));
            }
            if role.heads().is_some() && row.supervisor_id == principal.supervisor_id {
                return Err(StoreError::Conflict(conflict::HEAD_EXISTS.to_string()));
            }
        }

        let id = state.alloc();
        state.principals.insert(
            (role, id),
            PrincipalRow {
                id: PrincipalId::new(id),
                role,
                supervisor_id: principal.supervisor_id,
                name: principal.name.clone(),
                email: principal.email.clone(),
                password_hash: principal.password_hash.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(PrincipalId::new(id))
    }

    async fn delete_head(
        &mut self,
        node: NodeKind,
        node_id: NodeId,
        email: &str,
    ) -> Result<Option<RemovedHead>, StoreError> {
        let state = self.state()?;
        let role = node.head_role();
        let key = state
            .principals
            .iter()
            .find(|((r, _), row)| *r == role && row.supervisor_id == Some(node_id.get()) && row.email == email)
            .map(|(key, _)| *key);

        Ok(key.and_then(|key| state.principals.remove(&key)).map(|row| RemovedHead {
            principal_id: row.id,
            node_id,
        }))
    }

    async fn insert_succession(&mut self, record: &NewSuccession) -> Result<SuccessionRecord, StoreError> {
        let state = self.state()?;
        let stored = SuccessionRecord {
            id: RecordId::new(state.alloc()),
            node_kind: record.node_kind,
            node_id: record.node_id,
            old_principal_id: record.old_principal_id,
            email: record.email.clone(),
            performed_by_role: record.performed_by_role,
            performed_by_id: record.performed_by_id,
            performed_at: Utc::now(),
        };
        state.successions.push(stored.clone());
        Ok(stored)
    }

    async fn create_units_ledger(&mut self, component: PrincipalId) -> Result<UnitsLedger, StoreError> {
        let state = self.state()?;
        if !state.exists(Entity::Principal(Role::Component), component.get()) {
            return Err(StoreError::ForeignKey(format!("component {component}")));
        }
        let ledger = UnitsLedger::for_component(component);
        if state.units.contains_key(ledger.as_str()) {
            return Err(StoreError::Conflict(conflict::GENERIC.to_string()));
        }
        state.units.insert(ledger.as_str().to_string(), Vec::new());
        state.ledgers.insert(component.get(), ledger.clone());
        Ok(ledger)
    }

    async fn collect_subtree(&mut self, entity: Entity, id: i64) -> Result<Subtree, StoreError> {
        let state = self.state()?;
        let mut subtree = Subtree::default();
        for (entity, id) in state.subtree(entity, id) {
            if let Entity::Principal(role) = entity {
                if let Some(row) = state.principals.get(&(role, id)) {
                    subtree.emails.push(row.email.clone());
                }
                if let Some(ledger) = state.ledgers.get(&id).filter(|_| role == Role::Component) {
                    subtree.ledgers.push(ledger.clone());
                }
            }
        }
        Ok(subtree)
    }

    async fn delete_row(&mut self, entity: Entity, id: i64) -> Result<bool, StoreError> {
        let state = self.state()?;
        if !state.exists(entity, id) {
            return Ok(false);
        }
        for (entity, id) in state.subtree(entity, id) {
            match entity {
                Entity::Principal(role) => {
                    state.principals.remove(&(role, id));
                    if role == Role::Component {
                        state.ledgers.remove(&id);
                    }
                }
                Entity::Node(kind) => {
                    state.nodes.remove(&(kind, id));
                }
            }
        }
        Ok(true)
    }

    async fn drop_units_ledger(&mut self, ledger: &UnitsLedger) -> Result<(), StoreError> {
        self.state()?.units.remove(ledger.as_str());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut guard = self.guard.take().ok_or_else(finished)?;
        *guard = std::mem::take(&mut self.staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.guard.take().ok_or_else(finished)?;
        Ok(())
    }
}

#[async_trait]
impl OwnershipVerifier for InMemoryDirectory {
    async fn verify(&self, identity: &Identity, target: &Target) -> Result<bool, VerifyError> {
        Ok(self.state.lock().await.owns(identity, target))
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn begin(&self) -> Result<Box<dyn DirectoryTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard: Some(guard),
            staged,
        }))
    }

    async fn resolve(&self, identity: &Identity) -> Result<Option<PrincipalRow>, StoreError> {
        Ok(self.state.lock().await.principal(identity).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<PrincipalRow>, StoreError> {
        let state = self.state.lock().await;
        let Some(role) = state.registry.get(email).copied() else {
            return Ok(None);
        };
        Ok(state
            .principals
            .values()
            .find(|row| row.role == role && row.email == email)
            .cloned())
    }

    async fn update_password(&self, identity: &Identity, password_hash: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state
            .principals
            .get_mut(&(identity.role, identity.principal_id.get()))
            .filter(|row| row.email == identity.email)
        {
            Some(row) => {
                row.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_owned(
        &self,
        identity: &Identity,
        entity: Entity,
        query: &ListQuery,
    ) -> Result<Vec<Summary>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<Summary> = state
            .all_ids(entity)
            .into_iter()
            .filter(|id| state.owns(identity, &Target::Row { entity, id: *id }))
            .filter_map(|id| state.summary(entity, id))
            .collect();

        rows.sort_by(|a, b| {
            let primary = match query.sort {
                SortKey::Id => a.id.cmp(&b.id),
                SortKey::Name => a.name.cmp(&b.name),
                SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            primary.then(a.id.cmp(&b.id))
        });
        if query.order == SortOrder::Desc {
            rows.reverse();
        }

        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn list_successions(&self, node: NodeKind, node_id: NodeId) -> Result<Vec<SuccessionRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .successions
            .iter()
            .rev()
            .filter(|record| record.node_kind == node && record.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn units_ledger(&self, component: PrincipalId) -> Result<Option<UnitsLedger>, StoreError> {
        Ok(self.state.lock().await.ledgers.get(&component.get()).cloned())
    }

    async fn record_unit(
        &self,
        ledger: &UnitsLedger,
        serial: &str,
        note: Option<&str>,
    ) -> Result<UnitRecord, StoreError> {
        let mut state = self.state.lock().await;
        let units = state
            .units
            .get_mut(ledger.as_str())
            .ok_or_else(|| StoreError::Backend(format!("relation {ledger} does not exist")))?;
        if units.iter().any(|unit| unit.serial == serial) {
            return Err(StoreError::Conflict(conflict::SERIAL_RECORDED.to_string()));
        }
        let unit = UnitRecord {
            id: RecordId::new(units.len() as i64 + 1),
            serial: serial.to_string(),
            note: note.map(str::to_string),
            recorded_at: Utc::now(),
        };
        units.push(unit.clone());
        Ok(unit)
    }

    async fn list_units(&self, ledger: &UnitsLedger, limit: u32, offset: u32) -> Result<Vec<UnitRecord>, StoreError> {
        let state = self.state.lock().await;
        let units = state
            .units
            .get(ledger.as_str())
            .ok_or_else(|| StoreError::Backend(format!("relation {ledger} does not exist")))?;
        Ok(units
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
