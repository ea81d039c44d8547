//! Ephemeral key custody, gas-aware sweeps and DAO deployment sequencing for
//! EVM networks. Signing of deployment transactions is left to an external
//! signer; only ephemeral wallets are signed locally.

pub mod artifacts;
pub mod client;
pub mod contracts;
pub mod error;
pub mod gas;
pub mod keystore;
pub mod networks;
pub mod sequencer;
pub mod service;
pub mod session;
pub mod signer;
pub mod sweep;
pub mod tx_builder;
pub mod units;

#[cfg(test)]
mod test_support;

// Re-export primary types for convenient access.
pub use artifacts::{ArtifactStore, ContractArtifact};
pub use client::{ChainClient, Confirmation, JsonRpcClient, TransactionReceipt, wait_for_receipt};
pub use contracts::{ContractRole, DaoConfig};
pub use error::ChainError;
pub use gas::{FeeMode, GasEstimate, GasEstimator, GasMultiplier, to_display_cost};
pub use keystore::{EphemeralKeyStore, EphemeralWallet, SecretKey};
pub use networks::{NetworkInfo, NetworkRegistry, NetworkResolver, ResolvedNetwork, resolve_placeholders};
pub use sequencer::{DeploymentPlanStep, DeploymentSequencer};
pub use service::DeployerService;
pub use session::{DeploymentSession, DeploymentStage};
pub use signer::{LocalKeySigner, TransactionSigner};
pub use sweep::{SweepEngine, SweepResult, SweepStatus, WalletBalance};
pub use tx_builder::{FeeQuote, TransactionRequest, UnsignedTransaction, build_call, build_deployment};
