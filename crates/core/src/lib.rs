//! `stratum-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the organisational hierarchy, identifiers, the error taxonomy and payload
//! validation shared by every other crate.

pub mod error;
pub mod hierarchy;
pub mod id;
pub mod ledger;
pub mod listing;
pub mod validate;

pub use error::{AdminError, AdminResult};
pub use hierarchy::{Anchor, Entity, NodeKind, Parent, Role, SubordinateKind};
pub use id::{NodeId, PrincipalId, RecordId};
pub use ledger::UnitsLedger;
pub use listing::{ListQuery, SortKey, SortOrder};
