//! Out-of-band credential delivery.
//!
//! Delivery is detached from the request: [`CredentialDispatcher::dispatch`]
//! spawns one task per message and returns immediately. A failed delivery is
//! reported on the dispatcher's failure channel, which only feeds a log sink.
//! It never reaches the caller and never undoes the committed transaction.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Sends a freshly issued temporary password to its owner.
#[async_trait]
pub trait CredentialMailer: Send + Sync {
    async fn send_credentials(&self, email: &str, password: &str) -> Result<(), MailError>;
}

/// Stand-in transport that records only the recipient.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl CredentialMailer for LogMailer {
    async fn send_credentials(&self, email: &str, _password: &str) -> Result<(), MailError> {
        info!(recipient = %email, "temporary credentials issued");
        Ok(())
    }
}

/// Keeps every message in memory (dev/test).
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutbox {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent password sent to `email`.
    pub fn password_for(&self, email: &str) -> Option<String> {
        let sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.iter().rev().find(|(to, _)| to == email).map(|(_, pw)| pw.clone())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialMailer for InMemoryOutbox {
    async fn send_credentials(&self, email: &str, password: &str) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((email.to_string(), password.to_string()));
        Ok(())
    }
}

/// A delivery that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub recipient: String,
    pub error: MailError,
}

/// Fire-and-forget front of a [`CredentialMailer`].
#[derive(Clone)]
pub struct CredentialDispatcher {
    mailer: Arc<dyn CredentialMailer>,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
}

impl CredentialDispatcher {
    /// Dispatcher whose failures go to a spawned log sink. Requires a Tokio runtime.
    pub fn spawn(mailer: Arc<dyn CredentialMailer>) -> Self {
        let (failures, rx) = mpsc::unbounded_channel();
        tokio::spawn(log_failures(rx));
        Self { mailer, failures }
    }

    /// Dispatcher reporting failures to a caller-owned channel.
    pub fn with_failure_channel(
        mailer: Arc<dyn CredentialMailer>,
        failures: mpsc::UnboundedSender<DeliveryFailure>,
    ) -> Self {
        Self { mailer, failures }
    }

    /// Queue delivery and return without waiting for it.
    pub fn dispatch(&self, recipient: String, password: String) {
        let mailer = Arc::clone(&self.mailer);
        let failures = self.failures.clone();
        tokio::spawn(async move {
            if let Err(error) = mailer.send_credentials(&recipient, &password).await {
                // The sink may be gone during shutdown; nothing else to do then.
                let _ = failures.send(DeliveryFailure { recipient, error });
            }
        });
    }
}

impl std::fmt::Debug for CredentialDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialDispatcher").finish_non_exhaustive()
    }
}

async fn log_failures(mut rx: mpsc::UnboundedReceiver<DeliveryFailure>) {
    while let Some(failure) = rx.recv().await {
        warn!(recipient = %failure.recipient, error = %failure.error, "credential delivery failed");
    }
}
