//! Ownership-chain verification seam.
//!
//! A token only proves who the caller *was* when it was issued. Every write
//! is gated by re-reading the store through an [`OwnershipVerifier`]:
//! - [`Target::Myself`]: the caller's own row still exists with the same email.
//! - [`Target::Row`]: the row's parent edge resolves, in one hop, to the caller
//!   (see [`stratum_core::Entity::anchor_for`]).
//!
//! Implementations must not cache: a stale "yes" is a privilege leak.

use async_trait::async_trait;
use thiserror::Error;

use stratum_core::{AdminError, Entity, NodeId, PrincipalId, Role};

use crate::Identity;

/// What the caller intends to act on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Myself,
    Row { entity: Entity, id: i64 },
}

impl Target {
    pub fn node(kind: stratum_core::NodeKind, id: NodeId) -> Self {
        Target::Row { entity: Entity::Node(kind), id: id.get() }
    }

    pub fn principal(role: Role, id: PrincipalId) -> Self {
        Target::Row { entity: Entity::Principal(role), id: id.get() }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// The store could not answer. Distinct from "not owned".
    #[error("ownership lookup failed: {0}")]
    Lookup(String),
}

#[async_trait]
pub trait OwnershipVerifier: Send + Sync {
    /// `Ok(false)` when the lookup ran cleanly but found no matching chain.
    async fn verify(&self, identity: &Identity, target: &Target) -> Result<bool, VerifyError>;
}

/// Verify and map the outcome onto the request-level taxonomy:
/// not owned → `Unauthorized`, lookup failure → `Transient`.
pub async fn authorize<V>(verifier: &V, identity: &Identity, target: &Target) -> Result<(), AdminError>
where
    V: OwnershipVerifier + ?Sized,
{
    match verifier.verify(identity, target).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::info!(principal = %identity, ?target, "ownership check denied");
            Err(AdminError::Unauthorized)
        }
        Err(VerifyError::Lookup(detail)) => {
            tracing::error!(principal = %identity, ?target, %detail, "ownership lookup failed");
            Err(AdminError::transient(detail))
        }
    }
}
