//! Domain error model.

use std::time::Duration;

use thiserror::Error;

/// Result type used across the administrative core.
pub type AdminResult<T> = Result<T, AdminError>;

/// Administrative failure taxonomy.
///
/// Every variant is terminal for the request that produced it. Only
/// `Transient` may be retried by the caller, and then only as a whole
/// operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// Bad, expired or missing credential, or the ownership chain did not
    /// resolve to the caller.
    #[error("unauthorized")]
    Unauthorized,

    /// The target of a replace/delete does not exist.
    #[error("not found")]
    NotFound,

    /// The payload failed structural validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A uniqueness invariant would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage or network failure unrelated to caller input.
    ///
    /// The message is internal detail and must not be surfaced to callers.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Rejected by the abuse-mitigation gate.
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
}

impl AdminError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Conflict(_) => "conflict",
            Self::Transient(_) => "transient",
            Self::RateLimited { .. } => "rate_limited",
        }
    }

    /// Message that is safe to show to the caller.
    ///
    /// Transient failures collapse to a generic text so storage details
    /// never leave the process.
    pub fn public_message(&self) -> String {
        match self {
            Self::Transient(_) => "temporary failure, please retry".to_string(),
            Self::RateLimited { retry_after } => {
                format!("too many requests, retry after {}s", retry_after.as_secs().max(1))
            }
            other => other.to_string(),
        }
    }
}
