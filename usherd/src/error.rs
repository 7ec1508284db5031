//! Daemon error types.

use thiserror::Error;
use usher_domain::DomainError;
use usher_engine::EngineError;
use usher_gateway::WebhookError;
use usher_store::StoreError;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Webhook verification or parsing error
    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
