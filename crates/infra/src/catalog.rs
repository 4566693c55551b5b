//! Read paths and the component units ledger.

use std::sync::Arc;

use tracing::{error, info, instrument};

use stratum_auth::{Identity, Target, authorize};
use stratum_core::{AdminError, AdminResult, Entity, ListQuery, NodeId, NodeKind, Role, validate};

use crate::directory::{Directory, PrincipalRow, StoreError, SuccessionRecord, Summary, UnitRecord};

pub const MAX_SERIAL_LEN: usize = 64;
pub const MAX_NOTE_LEN: usize = 500;

pub struct CatalogService {
    directory: Arc<dyn Directory>,
}

impl CatalogService {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Rows of `entity` the caller owns.
    #[instrument(skip(self), fields(principal = %caller, entity = %entity), err)]
    pub async fn list_subordinates(
        &self,
        caller: &Identity,
        entity: Entity,
        query: ListQuery,
    ) -> AdminResult<Vec<Summary>> {
        if entity.anchor_for(caller.role).is_none() {
            info!(principal = %caller, entity = %entity, "role owns no rows of this kind");
            return Err(AdminError::Unauthorized);
        }
        authorize(self.directory.as_ref(), caller, &Target::Myself).await?;
        self.directory
            .list_owned(caller, entity, &query)
            .await
            .map_err(|e| read_failure("list_owned", e))
    }

    /// Succession records of a node the caller owns, newest first.
    #[instrument(skip(self), fields(principal = %caller), err)]
    pub async fn list_successions(
        &self,
        caller: &Identity,
        node: NodeKind,
        node_id: NodeId,
    ) -> AdminResult<Vec<SuccessionRecord>> {
        authorize(self.directory.as_ref(), caller, &Target::node(node, node_id)).await?;
        self.directory
            .list_successions(node, node_id)
            .await
            .map_err(|e| read_failure("list_successions", e))
    }

    /// Append a unit to the calling component's own ledger.
    #[instrument(skip(self, note), fields(principal = %caller), err)]
    pub async fn record_unit(&self, caller: &Identity, serial: &str, note: Option<&str>) -> AdminResult<UnitRecord> {
        let serial = validate::name("serial", serial)?;
        if serial.chars().count() > MAX_SERIAL_LEN {
            return Err(AdminError::invalid_input(format!(
                "serial must be at most {MAX_SERIAL_LEN} characters"
            )));
        }
        let note = validate::optional_text("note", note, MAX_NOTE_LEN)?;

        let me = self.component(caller).await?;
        let ledger = self
            .directory
            .units_ledger(me.id)
            .await
            .map_err(|e| read_failure("units_ledger", e))?
            .ok_or(AdminError::NotFound)?;

        self.directory
            .record_unit(&ledger, &serial, note.as_deref())
            .await
            .map_err(|e| read_failure("record_unit", e))
    }

    #[instrument(skip(self), fields(principal = %caller), err)]
    pub async fn list_units(&self, caller: &Identity, query: ListQuery) -> AdminResult<Vec<UnitRecord>> {
        let me = self.component(caller).await?;
        let ledger = self
            .directory
            .units_ledger(me.id)
            .await
            .map_err(|e| read_failure("units_ledger", e))?
            .ok_or(AdminError::NotFound)?;
        self.directory
            .list_units(&ledger, query.limit, query.offset)
            .await
            .map_err(|e| read_failure("list_units", e))
    }

    async fn component(&self, caller: &Identity) -> AdminResult<PrincipalRow> {
        if caller.role != Role::Component {
            return Err(AdminError::Unauthorized);
        }
        self.caller_row(caller).await
    }

    async fn caller_row(&self, caller: &Identity) -> AdminResult<PrincipalRow> {
        self.directory
            .resolve(caller)
            .await
            .map_err(|e| read_failure("resolve", e))?
            .ok_or(AdminError::Unauthorized)
    }
}

fn read_failure(operation: &'static str, err: StoreError) -> AdminError {
    if matches!(err, StoreError::Backend(_) | StoreError::Timeout) {
        error!(operation, error = %err, "storage failure");
    }
    err.into()
}
