//! Login, refresh, password change.
//!
//! Tokens are stateless. Liveness is always re-checked against the store,
//! so a token for a removed or replaced principal stops working at once.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};

use stratum_auth::{CredentialError, CredentialPolicy, Identity, TokenAuthenticator, TokenPair};
use stratum_core::{AdminError, AdminResult, validate};

use crate::directory::{Directory, PrincipalRow, StoreError};

/// Single message for every login failure.
pub const LOGIN_FAILED: &str = "invalid email or password";

const POLICY_HINT: &str =
    "password must be at least 8 characters with an upper-case letter, a lower-case letter, a digit and a symbol";

pub struct SessionService {
    directory: Arc<dyn Directory>,
    tokens: Arc<TokenAuthenticator>,
    credentials: CredentialPolicy,
    /// Verified against when the email is unknown, so both paths cost one bcrypt check.
    dummy_hash: Arc<str>,
}

impl SessionService {
    pub fn new(
        directory: Arc<dyn Directory>,
        tokens: Arc<TokenAuthenticator>,
        credentials: CredentialPolicy,
    ) -> Result<Self, CredentialError> {
        let dummy_hash = credentials.hasher.hash("Unused-login-placeholder-1!")?;
        Ok(Self {
            directory,
            tokens,
            credentials,
            dummy_hash: dummy_hash.into(),
        })
    }

    pub fn tokens(&self) -> &TokenAuthenticator {
        &self.tokens
    }

    #[instrument(skip(self, password), err)]
    pub async fn login(&self, email: &str, password: &str) -> AdminResult<TokenPair> {
        let row = match validate::email(email) {
            Ok(email) => self
                .directory
                .find_by_email(&email)
                .await
                .map_err(|e| store_failure("find_by_email", e))?,
            Err(_) => None,
        };

        let hash = row
            .as_ref()
            .map_or_else(|| self.dummy_hash.to_string(), |row| row.password_hash.clone());
        let verified = self.verify_password(password, hash).await?;

        match row {
            Some(row) if verified => {
                let identity = row.identity();
                info!(principal = %identity, "login succeeded");
                self.issue(&identity)
            }
            _ => {
                info!("login rejected");
                Err(AdminError::Unauthorized)
            }
        }
    }

    /// Exchange any valid token for a fresh pair, if its principal still exists.
    #[instrument(skip_all, err)]
    pub async fn refresh(&self, token: &str) -> AdminResult<TokenPair> {
        let claims = self
            .tokens
            .authenticate(token, Utc::now())
            .map_err(|_| AdminError::Unauthorized)?;
        let row = self.live(&claims.identity()).await?;
        self.issue(&row.identity())
    }

    #[instrument(skip(self, current, new), fields(principal = %caller), err)]
    pub async fn change_password(&self, caller: &Identity, current: &str, new: &str) -> AdminResult<()> {
        let row = self.live(caller).await?;
        if !self.verify_password(current, row.password_hash).await? {
            info!(principal = %caller, "password change rejected");
            return Err(AdminError::Unauthorized);
        }

        let policy = self.credentials;
        let new = new.to_string();
        let hash = tokio::task::spawn_blocking(move || policy.hash_chosen(&new))
            .await
            .map_err(|e| AdminError::transient(format!("hash task failed: {e}")))?
            .map_err(|e| match e {
                CredentialError::PolicyViolation => AdminError::invalid_input(POLICY_HINT),
                other => AdminError::transient(other.to_string()),
            })?;

        let updated = self
            .directory
            .update_password(caller, &hash)
            .await
            .map_err(|e| store_failure("update_password", e))?;
        if !updated {
            return Err(AdminError::Unauthorized);
        }
        info!(principal = %caller, "password changed");
        Ok(())
    }

    /// The caller's identity, provided its row is still live.
    pub async fn whoami(&self, caller: &Identity) -> AdminResult<Identity> {
        Ok(self.live(caller).await?.identity())
    }

    async fn live(&self, identity: &Identity) -> AdminResult<PrincipalRow> {
        self.directory
            .resolve(identity)
            .await
            .map_err(|e| store_failure("resolve", e))?
            .ok_or(AdminError::Unauthorized)
    }

    async fn verify_password(&self, password: &str, hash: String) -> AdminResult<bool> {
        let hasher = self.credentials.hasher;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AdminError::transient(format!("verify task failed: {e}")))
    }

    fn issue(&self, identity: &Identity) -> AdminResult<TokenPair> {
        self.tokens.issue_pair(identity, Utc::now()).map_err(|e| {
            error!(error = %e, "token issuance failed");
            AdminError::transient("token issuance failed")
        })
    }
}

fn store_failure(operation: &'static str, err: StoreError) -> AdminError {
    error!(operation, error = %err, "storage failure");
    err.into()
}
