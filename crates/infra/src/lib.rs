//! Infrastructure layer: storage, configuration, workflows, mail dispatch.

pub mod catalog;
pub mod config;
pub mod directory;
pub mod mailer;
pub mod provisioning;
pub mod sessions;

pub use catalog::CatalogService;
pub use config::{AppConfig, BootstrapCompany, ConfigError};
pub use directory::{Directory, DirectoryTx, InMemoryDirectory, PostgresDirectory, StoreError};
pub use mailer::{CredentialDispatcher, CredentialMailer, InMemoryOutbox, LogMailer, MailError};
pub use provisioning::{CreateSubordinate, Provisioned, ProvisioningEngine, Removed, ReplaceHead, Succession};
pub use sessions::{LOGIN_FAILED, SessionService};

#[cfg(test)]
mod integration_tests;
