use alloy_primitives::B256;
use dao_core::DeployerError;
use thiserror::Error;

use crate::contracts::ContractRole;

/// Errors raised by the custody, estimation and sequencing engines.
///
/// Every variant carries enough context (addresses, amounts, network) for an
/// operator to act without re-deriving state.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unsupported network: {network}")]
    UnsupportedNetwork { network: String },

    #[error("key storage error at {path}: {reason}")]
    Storage { path: String, reason: String },

    #[error("no ephemeral wallet {address} for network {network}")]
    NotFound { address: String, network: String },

    #[error("corrupt wallet record {path}: {reason}")]
    CorruptRecord { path: String, reason: String },

    #[error("network error on {network}: {reason}")]
    Network { network: String, reason: String },

    #[error("gas estimation failed on {network}: {reason}")]
    Estimation { network: String, reason: String },

    #[error("contract {contract} has no bytecode; compile it before deploying")]
    MissingBytecode { contract: String },

    #[error("{role} deployment requires the {dependency} address: {reason}")]
    MissingDependency {
        role: ContractRole,
        dependency: ContractRole,
        reason: String,
    },

    #[error("nonce conflict for {address} on {network}: {reason}")]
    NonceConflict {
        address: String,
        network: String,
        reason: String,
    },

    #[error("transaction rejected by the signer user")]
    UserRejected,

    #[error("signing device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: String },

    #[error("invalid amount {input:?}: {reason}")]
    InvalidAmount { input: String, reason: String },

    #[error("gas multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("invalid deployment configuration: {0}")]
    InvalidConfig(String),

    #[error("transaction {hash} reverted on {network}")]
    Reverted { hash: B256, network: String },

    #[error("refusing to delete wallet {address} on {network}: balance is {balance}")]
    FundsRemaining {
        address: String,
        network: String,
        balance: String,
    },
}

impl ChainError {
    /// Transient conditions the dispatch layer may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Estimation { .. } | Self::NonceConflict { .. }
        )
    }

    /// Upstream configuration faults that must abort immediately.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(
            self,
            Self::MissingBytecode { .. }
                | Self::MissingDependency { .. }
                | Self::InvalidConfig(_)
                | Self::InvalidMultiplier(_)
                | Self::UnsupportedNetwork { .. }
        )
    }

    pub(crate) fn storage(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::Storage {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::CorruptRecord {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn network(network: &str, reason: impl ToString) -> Self {
        Self::Network {
            network: network.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<ChainError> for DeployerError {
    fn from(err: ChainError) -> Self {
        let msg = err.to_string();
        match err {
            ChainError::UnsupportedNetwork { .. }
            | ChainError::MissingBytecode { .. }
            | ChainError::InvalidMultiplier(_)
            | ChainError::InvalidConfig(_) => DeployerError::Config(msg),
            ChainError::Storage { .. }
            | ChainError::NotFound { .. }
            | ChainError::CorruptRecord { .. } => DeployerError::Storage(msg),
            ChainError::Network { .. }
            | ChainError::Estimation { .. }
            | ChainError::NonceConflict { .. } => DeployerError::Network(msg),
            ChainError::UserRejected
            | ChainError::DeviceUnavailable(_)
            | ChainError::Signing(_) => DeployerError::Signer(msg),
            ChainError::MissingDependency { .. }
            | ChainError::InvalidAddress { .. }
            | ChainError::InvalidAmount { .. }
            | ChainError::FundsRemaining { .. } => DeployerError::Rejected(msg),
            ChainError::Reverted { .. } => DeployerError::Internal(msg),
        }
    }
}
