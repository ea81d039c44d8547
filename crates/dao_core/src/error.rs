use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type handed to the dispatch layer.
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Signer error: {0}")]
    Signer(String),

    /// A request the engines refuse by policy or because inputs are invalid.
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classification of errors for logging and operator display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Caused by operator input (bad address, missing dependency).
    UserError,
    /// RPC connectivity, timeouts, nonce races.
    NetworkError,
    /// External signer refused or is unreachable.
    SignerError,
    /// Disk or key record problems.
    StorageError,
    /// Invalid or missing configuration (including uncompiled artifacts).
    ConfigError,
    SystemError,
}

impl DeployerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::ConfigError,
            Self::Storage(_) => ErrorCategory::StorageError,
            Self::Network(_) => ErrorCategory::NetworkError,
            Self::Signer(_) => ErrorCategory::SignerError,
            Self::Rejected(_) => ErrorCategory::UserError,
            Self::Internal(_) => ErrorCategory::SystemError,
        }
    }

    /// Whether the dispatch layer may retry with backoff. The engines never
    /// retry on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Operator-facing message. Keeps the structured context (amounts,
    /// addresses, network) because operators act on it directly.
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(msg) => format!("Configuration issue: {msg}"),
            Self::Storage(msg) => format!("Key storage problem: {msg}. Check disk space and permissions."),
            Self::Network(msg) => format!("Network problem: {msg}. Safe to retry later."),
            Self::Signer(msg) => format!("Signer: {msg}"),
            Self::Rejected(msg) => msg.clone(),
            Self::Internal(msg) => format!("Unexpected error: {msg}"),
        }
    }
}
