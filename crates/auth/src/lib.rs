//! `stratum-auth`: authentication/authorization boundary (zero-trust).
//!
//! This crate is intentionally decoupled from HTTP and storage: it states
//! *what* must hold (valid token, live principal, owned target, rate budget)
//! and leaves the store lookups to implementors of [`OwnershipVerifier`].

pub mod claims;
pub mod credentials;
pub mod gate;
pub mod ownership;
pub mod principal;
pub mod token;

pub use claims::{Claims, TokenKind, TokenValidationError, validate_claims};
pub use credentials::{CredentialError, CredentialPolicy, PasswordGenerator, PasswordHasher, meets_policy};
pub use gate::{AbuseGate, FixedWindowCounter, GateDecision, RateCounter, RateSample};
pub use ownership::{OwnershipVerifier, Target, VerifyError, authorize};
pub use principal::Identity;
pub use token::{TokenAuthenticator, TokenError, TokenPair};
