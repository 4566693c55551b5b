use serde::{Deserialize, Serialize};

use stratum_core::{PrincipalId, Role};

/// Identity of an authenticated principal, as claimed by a bearer token.
///
/// This says *who the caller claims to be*, nothing more. Whether that row
/// still exists (and what it owns) is always re-read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub principal_id: PrincipalId,
    pub email: String,
    pub role: Role,
}

impl Identity {
    pub fn new(principal_id: PrincipalId, email: impl Into<String>, role: Role) -> Self {
        Self {
            principal_id,
            email: email.into(),
            role,
        }
    }
}

impl core::fmt::Display for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.role, self.principal_id)
    }
}
