//! Service wiring: one directory, shared by every service the routes call.

use std::sync::Arc;

use stratum_auth::{AbuseGate, CredentialError, CredentialPolicy, PasswordGenerator, PasswordHasher, TokenAuthenticator};
use stratum_infra::{
    AppConfig, CatalogService, CredentialDispatcher, CredentialMailer, Directory, ProvisioningEngine, SessionService,
};

pub struct AppServices {
    pub engine: ProvisioningEngine,
    pub catalog: CatalogService,
    pub sessions: SessionService,
}

/// Everything `build_app` needs: services plus the middleware state.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<AppServices>,
    pub tokens: Arc<TokenAuthenticator>,
    pub gate: Arc<AbuseGate>,
    pub trust_forwarded_for: bool,
}

impl AppState {
    /// Wire services over `directory`, delivering credentials through `mailer`.
    ///
    /// Must be called inside a Tokio runtime (the dispatcher spawns its log sink).
    pub fn build(
        config: &AppConfig,
        directory: Arc<dyn Directory>,
        mailer: Arc<dyn CredentialMailer>,
    ) -> Result<Self, CredentialError> {
        let tokens = Arc::new(TokenAuthenticator::new(
            config.jwt_secret.as_bytes(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        ));
        let credentials = CredentialPolicy::new(PasswordGenerator::default(), PasswordHasher::new(config.bcrypt_cost));
        let dispatcher = CredentialDispatcher::spawn(mailer);

        let services = AppServices {
            engine: ProvisioningEngine::new(Arc::clone(&directory), credentials, dispatcher, config.tx_timeout),
            catalog: CatalogService::new(Arc::clone(&directory)),
            sessions: SessionService::new(directory, Arc::clone(&tokens), credentials)?,
        };

        let gate = AbuseGate::fixed_window(
            config.rate_limit_capacity,
            config.rate_limit_window,
            config.rate_limit_block,
        );

        Ok(Self {
            services: Arc::new(services),
            tokens,
            gate: Arc::new(gate),
            trust_forwarded_for: config.trust_forwarded_for,
        })
    }
}
