use stratum_auth::Identity;

/// Principal context for a request, taken from a verified bearer token.
///
/// This is only the *claimed* identity. Handlers pass it to services, which
/// re-check liveness and ownership against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    identity: Identity,
}

impl PrincipalContext {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}
