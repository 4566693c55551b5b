//! Postgres-backed directory.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | StoreError |
//! |------------|----------|------------|
//! | Database (unique violation) | `23505` | `Conflict` (message picked from the constraint name) |
//! | Database (foreign key violation) | `23503` | `ForeignKey` |
//! | Database (other) | any other | `Backend` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | Other | N/A | `Backend` |
//!
//! ## Identifiers
//!
//! Table and column names come only from the `&'static str` tables in
//! `stratum_core::hierarchy` and `stratum_core::listing`. Units-ledger names
//! are re-validated by [`UnitsLedger`] and double-quoted before use. Every
//! value goes through a bind parameter.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use stratum_auth::{Identity, OwnershipVerifier, Target, VerifyError};
use stratum_core::{Anchor, Entity, ListQuery, NodeId, NodeKind, PrincipalId, RecordId, Role, UnitsLedger};

use super::{
    Directory, DirectoryTx, NewPrincipal, NewSuccession, PrincipalRow, RemovedHead, StoreError, SuccessionRecord,
    Subtree, Summary, UnitRecord, conflict, finished,
};

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Debug, Clone)]
pub struct PostgresDirectory {
    pool: Arc<PgPool>,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Create the static tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn load_principal(&self, role: Role, by: PrincipalFilter<'_>) -> Result<Option<PrincipalRow>, StoreError> {
        let sql = match by {
            PrincipalFilter::Identity { .. } => format!("{} WHERE id = $1 AND email = $2", select_principal(role)),
            PrincipalFilter::Email(_) => format!("{} WHERE email = $1", select_principal(role)),
        };
        let query = match by {
            PrincipalFilter::Identity { id, email } => sqlx::query(&sql).bind(id).bind(email),
            PrincipalFilter::Email(email) => sqlx::query(&sql).bind(email),
        };
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_principal", e))?;
        row.map(|row| principal_row(role, &row))
            .transpose()
            .map_err(|e| map_sqlx_error("load_principal", e))
    }
}

#[derive(Debug, Clone, Copy)]
enum PrincipalFilter<'a> {
    Identity { id: i64, email: &'a str },
    Email(&'a str),
}

pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_mut().map(|tx| &mut **tx).ok_or_else(finished)
    }
}

#[async_trait]
impl DirectoryTx for PgTx {
    async fn register_email(&mut self, email: &str, role: Role) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO registry (email, role) VALUES ($1, $2)")
            .bind(email)
            .bind(role.as_str())
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("register_email", e))?;
        Ok(())
    }

    async fn unregister_email(&mut self, email: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM registry WHERE email = $1")
            .bind(email)
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("unregister_email", e))?;
        Ok(())
    }

    async fn insert_node(&mut self, kind: NodeKind, parent_id: i64, name: &str) -> Result<NodeId, StoreError> {
        let sql = format!(
            "INSERT INTO {} ({}, name) VALUES ($1, $2) RETURNING id",
            kind.table(),
            kind.parent_column()
        );
        let id: i64 = sqlx::query_scalar(&sql)
            .bind(parent_id)
            .bind(name)
            .fetch_one(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("insert_node", e))?;
        Ok(NodeId::new(id))
    }

    async fn insert_principal(&mut self, principal: &NewPrincipal) -> Result<PrincipalId, StoreError> {
        let table = principal.role.table();
        let (sql, supervisor_id) = match (principal.role.supervisor_column(), principal.supervisor_id) {
            (Some(column), Some(supervisor_id)) => (
                format!(
                    "INSERT INTO {table} ({column}, name, email, password_hash) VALUES ($1, $2, $3, $4) RETURNING id"
                ),
                Some(supervisor_id),
            ),
            (None, None) => (
                format!("INSERT INTO {table} (name, email, password_hash) VALUES ($1, $2, $3) RETURNING id"),
                None,
            ),
            _ => return Err(StoreError::ForeignKey(format!("{table} supervisor"))),
        };

        let mut stmt = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(supervisor_id) = supervisor_id {
            stmt = stmt.bind(supervisor_id);
        }
        let id = stmt
            .bind(&principal.name)
            .bind(&principal.email)
            .bind(&principal.password_hash)
            .fetch_one(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("insert_principal", e))?;
        Ok(PrincipalId::new(id))
    }

    async fn delete_head(
        &mut self,
        node: NodeKind,
        node_id: NodeId,
        email: &str,
    ) -> Result<Option<RemovedHead>, StoreError> {
        let role = node.head_role();
        let column = node_parent_of_head(node);
        let sql = format!(
            "DELETE FROM {} WHERE {column} = $1 AND email = $2 RETURNING id, {column}",
            role.table()
        );
        let row = sqlx::query(&sql)
            .bind(node_id.get())
            .bind(email)
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("delete_head", e))?;

        row.map(|row| -> Result<RemovedHead, sqlx::Error> {
            Ok(RemovedHead {
                principal_id: PrincipalId::new(row.try_get("id")?),
                node_id: NodeId::new(row.try_get(column)?),
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("delete_head", e))
    }

    async fn insert_succession(&mut self, record: &NewSuccession) -> Result<SuccessionRecord, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO successions
                (node_kind, node_id, old_principal_id, email, performed_by_role, performed_by_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, performed_at
            "#,
        )
        .bind(record.node_kind.as_str())
        .bind(record.node_id.get())
        .bind(record.old_principal_id.get())
        .bind(&record.email)
        .bind(record.performed_by_role.as_str())
        .bind(record.performed_by_id.get())
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_succession", e))?;

        let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("insert_succession", e))?;
        let performed_at: DateTime<Utc> = row
            .try_get("performed_at")
            .map_err(|e| map_sqlx_error("insert_succession", e))?;

        Ok(SuccessionRecord {
            id: RecordId::new(id),
            node_kind: record.node_kind,
            node_id: record.node_id,
            old_principal_id: record.old_principal_id,
            email: record.email.clone(),
            performed_by_role: record.performed_by_role,
            performed_by_id: record.performed_by_id,
            performed_at,
        })
    }

    async fn create_units_ledger(&mut self, component: PrincipalId) -> Result<UnitsLedger, StoreError> {
        let ledger = UnitsLedger::for_component(component);
        let ddl = format!(
            r#"CREATE TABLE {} (
                id          BIGSERIAL PRIMARY KEY,
                serial      TEXT NOT NULL UNIQUE,
                note        TEXT,
                recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
            quoted(&ledger)
        );
        sqlx::query(&ddl)
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("create_units_ledger", e))?;

        sqlx::query("INSERT INTO unit_ledgers (component_id, table_name) VALUES ($1, $2)")
            .bind(component.get())
            .bind(ledger.as_str())
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("create_units_ledger", e))?;
        Ok(ledger)
    }

    async fn collect_subtree(&mut self, entity: Entity, id: i64) -> Result<Subtree, StoreError> {
        let mut subtree = Subtree::default();
        let mut frontier = vec![(entity, vec![id])];

        while let Some((entity, ids)) = frontier.pop() {
            if let Entity::Principal(role) = entity {
                let sql = format!("SELECT email FROM {} WHERE id = ANY($1)", role.table());
                let emails: Vec<String> = sqlx::query_scalar(&sql)
                    .bind(ids.as_slice())
                    .fetch_all(self.conn()?)
                    .await
                    .map_err(|e| map_sqlx_error("collect_subtree", e))?;
                subtree.emails.extend(emails);

                if role == Role::Component {
                    let names: Vec<String> =
                        sqlx::query_scalar("SELECT table_name FROM unit_ledgers WHERE component_id = ANY($1)")
                            .bind(ids.as_slice())
                            .fetch_all(self.conn()?)
                            .await
                            .map_err(|e| map_sqlx_error("collect_subtree", e))?;
                    for name in names {
                        let ledger = UnitsLedger::parse(&name)
                            .map_err(|_| StoreError::Backend(format!("invalid ledger name in registry: {name}")))?;
                        subtree.ledgers.push(ledger);
                    }
                }
            }

            for child in entity.children() {
                let Some(column) = child.parent_column() else {
                    continue;
                };
                let sql = format!("SELECT id FROM {} WHERE {column} = ANY($1)", child.table());
                let child_ids: Vec<i64> = sqlx::query_scalar(&sql)
                    .bind(ids.as_slice())
                    .fetch_all(self.conn()?)
                    .await
                    .map_err(|e| map_sqlx_error("collect_subtree", e))?;
                if !child_ids.is_empty() {
                    frontier.push((child, child_ids));
                }
            }
        }
        Ok(subtree)
    }

    async fn delete_row(&mut self, entity: Entity, id: i64) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", entity.table());
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("delete_row", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn drop_units_ledger(&mut self, ledger: &UnitsLedger) -> Result<(), StoreError> {
        let ddl = format!("DROP TABLE IF EXISTS {}", quoted(ledger));
        sqlx::query(&ddl)
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("drop_units_ledger", e))?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or_else(finished)?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or_else(finished)?;
        tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl OwnershipVerifier for PostgresDirectory {
    #[instrument(skip(self), fields(principal = %identity), err)]
    async fn verify(&self, identity: &Identity, target: &Target) -> Result<bool, VerifyError> {
        let sql = match *target {
            Target::Myself => format!(
                "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1 AND email = $2)",
                identity.role.table()
            ),
            Target::Row { entity, .. } => match owner_clause(entity, identity.role) {
                Some(owner) => format!(
                    "SELECT EXISTS (SELECT 1 FROM {} t WHERE t.id = $3 AND {owner})",
                    entity.table()
                ),
                None => return Ok(false),
            },
        };

        let mut query = sqlx::query_scalar::<_, bool>(&sql)
            .bind(identity.principal_id.get())
            .bind(&identity.email);
        if let Target::Row { id, .. } = *target {
            query = query.bind(id);
        }
        query
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| VerifyError::Lookup(map_sqlx_error("verify", e).to_string()))
    }
}

#[async_trait]
impl Directory for PostgresDirectory {
    async fn begin(&self) -> Result<Box<dyn DirectoryTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PgTx { tx: Some(tx) }))
    }

    async fn resolve(&self, identity: &Identity) -> Result<Option<PrincipalRow>, StoreError> {
        self.load_principal(
            identity.role,
            PrincipalFilter::Identity {
                id: identity.principal_id.get(),
                email: &identity.email,
            },
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<PrincipalRow>, StoreError> {
        let role: Option<String> = sqlx::query_scalar("SELECT role FROM registry WHERE email = $1")
            .bind(email)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_email", e))?;
        let Some(role) = role else {
            return Ok(None);
        };
        let role: Role = role
            .parse()
            .map_err(|_| StoreError::Backend(format!("unknown role in registry: {role}")))?;
        self.load_principal(role, PrincipalFilter::Email(email)).await
    }

    #[instrument(skip(self, password_hash), fields(principal = %identity), err)]
    async fn update_password(&self, identity: &Identity, password_hash: &str) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET password_hash = $1 WHERE id = $2 AND email = $3",
            identity.role.table()
        );
        let result = sqlx::query(&sql)
            .bind(password_hash)
            .bind(identity.principal_id.get())
            .bind(&identity.email)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_password", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(principal = %identity, entity = %entity), err)]
    async fn list_owned(
        &self,
        identity: &Identity,
        entity: Entity,
        query: &ListQuery,
    ) -> Result<Vec<Summary>, StoreError> {
        let Some(owner) = owner_clause(entity, identity.role) else {
            return Ok(Vec::new());
        };
        let email = match entity {
            Entity::Principal(_) => "t.email",
            Entity::Node(_) => "NULL::TEXT",
        };
        let direction = query.order.keyword();
        let sql = format!(
            "SELECT t.id, t.name, {email} AS email, t.created_at FROM {} t WHERE {owner} \
             ORDER BY t.{} {direction}, t.id {direction} LIMIT $3 OFFSET $4",
            entity.table(),
            query.sort.column(),
        );

        let rows = sqlx::query(&sql)
            .bind(identity.principal_id.get())
            .bind(&identity.email)
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_owned", e))?;

        rows.iter()
            .map(|row| {
                Ok(Summary {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    email: row.try_get("email")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("list_owned", e))
    }

    #[instrument(skip(self), err)]
    async fn list_successions(&self, node: NodeKind, node_id: NodeId) -> Result<Vec<SuccessionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, node_kind, node_id, old_principal_id, email,
                   performed_by_role, performed_by_id, performed_at
            FROM successions
            WHERE node_kind = $1 AND node_id = $2
            ORDER BY performed_at DESC, id DESC
            "#,
        )
        .bind(node.as_str())
        .bind(node_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_successions", e))?;

        rows.iter().map(succession_row).collect()
    }

    async fn units_ledger(&self, component: PrincipalId) -> Result<Option<UnitsLedger>, StoreError> {
        let name: Option<String> = sqlx::query_scalar("SELECT table_name FROM unit_ledgers WHERE component_id = $1")
            .bind(component.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("units_ledger", e))?;
        name.map(|name| {
            UnitsLedger::parse(&name).map_err(|_| StoreError::Backend(format!("invalid ledger name in registry: {name}")))
        })
        .transpose()
    }

    #[instrument(skip(self, note), fields(ledger = %ledger), err)]
    async fn record_unit(
        &self,
        ledger: &UnitsLedger,
        serial: &str,
        note: Option<&str>,
    ) -> Result<UnitRecord, StoreError> {
        let sql = format!(
            "INSERT INTO {} (serial, note) VALUES ($1, $2) RETURNING id, serial, note, recorded_at",
            quoted(ledger)
        );
        let row = sqlx::query(&sql)
            .bind(serial)
            .bind(note)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_unit", e))?;
        unit_row(&row).map_err(|e| map_sqlx_error("record_unit", e))
    }

    async fn list_units(&self, ledger: &UnitsLedger, limit: u32, offset: u32) -> Result<Vec<UnitRecord>, StoreError> {
        let sql = format!(
            "SELECT id, serial, note, recorded_at FROM {} ORDER BY id ASC LIMIT $1 OFFSET $2",
            quoted(ledger)
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_units", e))?;
        rows.iter()
            .map(unit_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("list_units", e))
    }
}

/// Correlated existence predicate tying `t` (a row of `entity`) to the
/// claimant bound as `$1` (id) and `$2` (email). `None` if `claimant` can
/// never own `entity`.
fn owner_clause(entity: Entity, claimant: Role) -> Option<String> {
    let target_column = entity.parent_column()?;
    let anchor = match entity.anchor_for(claimant)? {
        Anchor::Principal => "p.id".to_string(),
        Anchor::Supervisor => format!("p.{}", claimant.supervisor_column()?),
    };
    Some(format!(
        "EXISTS (SELECT 1 FROM {} p WHERE p.id = $1 AND p.email = $2 AND t.{target_column} = {anchor})",
        claimant.table()
    ))
}

fn node_parent_of_head(node: NodeKind) -> &'static str {
    // Head rows point at the node they head.
    stratum_core::Parent::Node(node).column()
}

fn quoted(ledger: &UnitsLedger) -> String {
    format!("\"{}\"", ledger.as_str())
}

fn select_principal(role: Role) -> String {
    let supervisor = role
        .supervisor_column()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "NULL::BIGINT".to_string());
    format!(
        "SELECT id, {supervisor} AS supervisor_id, name, email, password_hash, created_at FROM {}",
        role.table()
    )
}

fn principal_row(role: Role, row: &PgRow) -> Result<PrincipalRow, sqlx::Error> {
    Ok(PrincipalRow {
        id: PrincipalId::new(row.try_get("id")?),
        role,
        supervisor_id: row.try_get("supervisor_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn succession_row(row: &PgRow) -> Result<SuccessionRecord, StoreError> {
    let decode = |e| map_sqlx_error("list_successions", e);
    let node_kind: String = row.try_get("node_kind").map_err(decode)?;
    let performed_by_role: String = row.try_get("performed_by_role").map_err(decode)?;
    Ok(SuccessionRecord {
        id: RecordId::new(row.try_get("id").map_err(decode)?),
        node_kind: node_kind
            .parse()
            .map_err(|_| StoreError::Backend(format!("unknown node kind in successions: {node_kind}")))?,
        node_id: NodeId::new(row.try_get("node_id").map_err(decode)?),
        old_principal_id: PrincipalId::new(row.try_get("old_principal_id").map_err(decode)?),
        email: row.try_get("email").map_err(decode)?,
        performed_by_role: performed_by_role
            .parse()
            .map_err(|_| StoreError::Backend(format!("unknown role in successions: {performed_by_role}")))?,
        performed_by_id: PrincipalId::new(row.try_get("performed_by_id").map_err(decode)?),
        performed_at: row.try_get("performed_at").map_err(decode)?,
    })
}

fn unit_row(row: &PgRow) -> Result<UnitRecord, sqlx::Error> {
    Ok(UnitRecord {
        id: RecordId::new(row.try_get("id")?),
        serial: row.try_get("serial")?,
        note: row.try_get("note")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

/// Map SQLx errors to `StoreError`. Internal detail stays in the message for
/// logs; the API layer never returns it verbatim.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(conflict_message(db_err.constraint()).to_string()),
                Some("23503") => StoreError::ForeignKey(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Caller-safe message for a unique violation, chosen by constraint name.
fn conflict_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("registry_pkey") => conflict::EMAIL_REGISTERED,
        Some(name) if name.ends_with("_email_key") => conflict::EMAIL_REGISTERED,
        Some(name) if name.ends_with("_serial_key") => conflict::SERIAL_RECORDED,
        // Only head tables carry a unique parent column.
        Some(name) if name.ends_with("_id_key") => conflict::HEAD_EXISTS,
        _ => conflict::GENERIC,
    }
}
