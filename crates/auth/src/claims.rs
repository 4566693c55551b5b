use serde::{Deserialize, Serialize};
use thiserror::Error;

use stratum_core::{PrincipalId, Role};

use crate::Identity;

/// Which issuance window a token came from.
///
/// Both classes are structurally identical; they only differ in lifetime and
/// in where the client keeps them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Bearer token claims (transport-agnostic).
///
/// Timestamps are Unix seconds so the encoded form matches registered JWT
/// claim names (`iat`, `exp`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject / principal identifier within its role table.
    pub sub: PrincipalId,

    pub email: String,

    pub role: Role,

    pub kind: TokenKind,

    /// Issued-at timestamp.
    pub iat: i64,

    /// Expiration timestamp.
    pub exp: i64,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity::new(self.sub, self.email.clone(), self.role)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate the claim time window against `now` (Unix seconds).
///
/// Signature verification is done by [`crate::TokenAuthenticator`]; this only
/// checks the decoded payload.
pub fn validate_claims(claims: &Claims, now: i64) -> Result<(), TokenValidationError> {
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
