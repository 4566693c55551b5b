//! Environment-driven configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Root principal provisioned at start-up when not yet registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapCompany {
    pub name: String,
    pub email: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub tx_timeout: Duration,
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub bcrypt_cost: u32,
    pub rate_limit_capacity: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_block: Duration,
    pub trust_forwarded_for: bool,
    pub shutdown_grace: Duration,
    pub bootstrap: Option<BootstrapCompany>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let bootstrap = match (get("BOOTSTRAP_COMPANY_NAME"), get("BOOTSTRAP_COMPANY_EMAIL")) {
            (Some(name), Some(email)) => Some(BootstrapCompany { name, email }),
            (None, None) => None,
            (None, Some(_)) => return Err(ConfigError::Missing("BOOTSTRAP_COMPANY_NAME")),
            (Some(_), None) => return Err(ConfigError::Missing("BOOTSTRAP_COMPANY_EMAIL")),
        };

        let config = Self {
            bind_addr: parse(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            database_url: get("DATABASE_URL"),
            db_max_connections: parse(&get, "DB_MAX_CONNECTIONS", 10)?,
            db_acquire_timeout: secs(&get, "DB_ACQUIRE_TIMEOUT_SECS", 5)?,
            tx_timeout: secs(&get, "TX_TIMEOUT_SECS", 10)?,
            jwt_secret,
            access_token_ttl: secs(&get, "ACCESS_TOKEN_TTL_SECS", 900)?,
            refresh_token_ttl: secs(&get, "REFRESH_TOKEN_TTL_SECS", 604_800)?,
            bcrypt_cost: parse(&get, "BCRYPT_COST", 12)?,
            rate_limit_capacity: parse(&get, "RATE_LIMIT_CAPACITY", 10)?,
            rate_limit_window: secs(&get, "RATE_LIMIT_WINDOW_SECS", 60)?,
            rate_limit_block: secs(&get, "RATE_LIMIT_BLOCK_SECS", 900)?,
            trust_forwarded_for: flag(&get, "TRUST_FORWARDED_FOR")?,
            shutdown_grace: secs(&get, "SHUTDOWN_GRACE_SECS", 10)?,
            bootstrap,
        };
        config.check()?;
        Ok(config)
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    fn check(&self) -> Result<(), ConfigError> {
        let invalid = |var, value: &dyn ToString, reason: &str| ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        };
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(invalid("BCRYPT_COST", &self.bcrypt_cost, "must be between 4 and 31"));
        }
        if self.rate_limit_capacity == 0 {
            return Err(invalid("RATE_LIMIT_CAPACITY", &0, "must be positive"));
        }
        if self.db_max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", &0, "must be positive"));
        }
        for (var, value) in [
            ("TX_TIMEOUT_SECS", self.tx_timeout),
            ("ACCESS_TOKEN_TTL_SECS", self.access_token_ttl),
            ("REFRESH_TOKEN_TTL_SECS", self.refresh_token_ttl),
            ("RATE_LIMIT_WINDOW_SECS", self.rate_limit_window),
        ] {
            if value.is_zero() {
                return Err(invalid(var, &0, "must be positive"));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("db_max_connections", &self.db_max_connections)
            .field("tx_timeout", &self.tx_timeout)
            .field("jwt_secret", &"<redacted>")
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("rate_limit_capacity", &self.rate_limit_capacity)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_block", &self.rate_limit_block)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn secs<G>(get: &G, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse(get, var, default).map(Duration::from_secs)
}

fn flag<G>(get: &G, var: &'static str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::Invalid {
            var,
            value: v,
            reason: "expected a boolean".to_string(),
        }),
    }
}
