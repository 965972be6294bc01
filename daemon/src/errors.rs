//! Error types for the deployd daemon

use thiserror::Error;

/// Crate-wide error for startup, storage and plumbing failures
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Bootstrap error: {0}")]
    BootstrapError(#[from] crate::bootstrap::BootstrapError),

    #[error("Token error: {0}")]
    TokenError(#[from] crate::authn::token::TokenError),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DaemonError {
    fn from(err: anyhow::Error) -> Self {
        DaemonError::Internal(err.to_string())
    }
}
