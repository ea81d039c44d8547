//! Balance reads and full-balance sweeps out of ephemeral wallets.
//!
//! The sweep sends `balance - gasUsed * gasPrice` in a legacy transfer, so a
//! transfer mined at the quoted price leaves exactly zero behind. Key material
//! is deleted only after a post-inclusion balance read of zero.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use dao_core::DeployerConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::{ChainClient, Confirmation, wait_for_receipt};
use crate::error::ChainError;
use crate::gas::{FeeMode, GasEstimator, GasMultiplier};
use crate::keystore::EphemeralKeyStore;
use crate::networks::ResolvedNetwork;
use crate::signer::{LocalKeySigner, TransactionSigner};
use crate::tx_builder::{build_call, call_skeleton};
use crate::units::{format_native, spendable_after};

/// On-chain balance of one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    pub address: Address,
    pub network_name: String,
    pub balance_minimal_units: U256,
    pub balance_display: String,
    pub has_balance: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    /// Funds transferred and the wallet confirmed empty.
    Completed,
    /// The wallet held nothing.
    NothingToSweep,
    /// Balance does not cover the transfer fee. Nothing was broadcast.
    InsufficientForGas,
    /// Transfer mined but some balance remains; the key is kept.
    ResidualBalance,
    /// Transfer mined but the remaining balance could not be read; the key
    /// is kept until a later read shows the wallet empty.
    BalanceUnknown,
    /// Broadcast succeeded, no receipt before the deadline. Check later.
    ConfirmationPending,
    Failed,
}

/// Outcome of a sweep. `key_deleted` is only ever true when the latest balance
/// read for the wallet was zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub wallet: Address,
    pub recipient: Address,
    pub network_name: String,
    pub amount_swept_minimal_units: U256,
    pub amount_swept_display: String,
    pub transaction_hash: Option<B256>,
    pub gas_used_minimal_units: Option<U256>,
    pub status: SweepStatus,
    pub success: bool,
    pub key_deleted: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl SweepResult {
    fn new(wallet: Address, recipient: Address, network: &ResolvedNetwork, status: SweepStatus) -> Self {
        Self {
            wallet,
            recipient,
            network_name: network.name.clone(),
            amount_swept_minimal_units: U256::ZERO,
            amount_swept_display: format_native(U256::ZERO, network.native_currency_decimals, &network.native_symbol),
            transaction_hash: None,
            gas_used_minimal_units: None,
            success: matches!(
                status,
                SweepStatus::Completed
                    | SweepStatus::NothingToSweep
                    | SweepStatus::ResidualBalance
                    | SweepStatus::BalanceUnknown
            ),
            status,
            key_deleted: false,
            message: None,
            error: None,
        }
    }

    fn with_amount(mut self, amount: U256, network: &ResolvedNetwork) -> Self {
        self.amount_swept_minimal_units = amount;
        self.amount_swept_display = format_native(amount, network.native_currency_decimals, &network.native_symbol);
        self
    }

    fn failed(wallet: Address, recipient: Address, network: &ResolvedNetwork, err: &ChainError) -> Self {
        let mut result = Self::new(wallet, recipient, network, SweepStatus::Failed);
        result.error = Some(err.to_string());
        result
    }
}

/// Reads balances and drains ephemeral wallets.
///
/// Operations on one wallet must be serialized by the caller; a concurrent
/// second sweep surfaces as [`ChainError::NonceConflict`].
pub struct SweepEngine {
    keystore: EphemeralKeyStore,
    client: Arc<dyn ChainClient>,
    estimator: Arc<GasEstimator>,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl SweepEngine {
    pub fn new(
        keystore: EphemeralKeyStore,
        client: Arc<dyn ChainClient>,
        estimator: Arc<GasEstimator>,
        config: &DeployerConfig,
    ) -> Self {
        Self {
            keystore,
            client,
            estimator,
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(config.receipt_poll_interval_ms),
        }
    }

    pub fn with_confirmation_timing(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn keystore(&self) -> &EphemeralKeyStore {
        &self.keystore
    }

    pub async fn get_balance(&self, address: Address, network: &ResolvedNetwork) -> Result<WalletBalance, ChainError> {
        let balance = self.client.get_balance(network, address).await?;
        Ok(WalletBalance {
            address,
            network_name: network.name.clone(),
            balance_minimal_units: balance,
            balance_display: format_native(balance, network.native_currency_decimals, &network.native_symbol),
            has_balance: !balance.is_zero(),
        })
    }

    /// Move the whole spendable balance of `wallet` to `recipient`.
    ///
    /// Lookup, balance and estimation failures return `Err`. Once the fee has
    /// been priced, failures are reported in the result instead, except a
    /// nonce conflict, which is returned as `Err` so the caller can retry.
    pub async fn sweep(
        &self,
        wallet: Address,
        recipient: Address,
        network: &ResolvedNetwork,
        delete_after: bool,
    ) -> Result<SweepResult, ChainError> {
        let secret = self.keystore.load_secret(&wallet, &network.name)?;
        let balance = self.client.get_balance(network, wallet).await?;

        if balance.is_zero() {
            let mut result = SweepResult::new(wallet, recipient, network, SweepStatus::NothingToSweep);
            result.message = Some(format!("{wallet} holds no {} on {}", network.native_symbol, network.name));
            if delete_after {
                result.key_deleted = self.keystore.delete(&wallet, &network.name)?;
            }
            info!(%wallet, network = %network.name, key_deleted = result.key_deleted, "nothing to sweep");
            return Ok(result);
        }

        // Legacy pricing with the raw estimate as the limit: fee = G * P exactly.
        let skeleton = call_skeleton(recipient, Bytes::new(), wallet, U256::ZERO);
        let estimate = self
            .estimator
            .estimate_with_fee_mode(network, &skeleton, GasMultiplier::ONE, FeeMode::Legacy)
            .await?;
        let cost = estimate.estimated_cost_minimal_units;

        let decimals = network.native_currency_decimals;
        let symbol = network.native_symbol.as_str();
        let Some(amount) = spendable_after(balance, cost) else {
            let mut result = SweepResult::new(wallet, recipient, network, SweepStatus::InsufficientForGas);
            result.error = Some(format!(
                "balance {} does not cover the transfer fee {}",
                format_native(balance, decimals, symbol),
                format_native(cost, decimals, symbol),
            ));
            warn!(%wallet, network = %network.name, %balance, %cost, "balance too low to sweep");
            return Ok(result);
        };

        let nonce = match self.client.get_transaction_count(network, wallet).await {
            Ok(nonce) => nonce,
            Err(e) => return Ok(SweepResult::failed(wallet, recipient, network, &e)),
        };
        let mut tx = build_call(recipient, Bytes::new(), wallet, network, amount, &estimate);
        tx.nonce = Some(nonce);

        let signed = match LocalKeySigner::new(&secret) {
            Ok(signer) => signer.sign_transaction(&tx).await,
            Err(e) => Err(e),
        };
        drop(secret);
        let raw = match signed {
            Ok(raw) => raw,
            Err(e) => return Ok(SweepResult::failed(wallet, recipient, network, &e)),
        };

        let hash = match self.client.send_raw_transaction(network, &raw).await {
            Ok(hash) => hash,
            Err(ChainError::NonceConflict { reason, .. }) => {
                return Err(ChainError::NonceConflict {
                    address: wallet.to_string(),
                    network: network.name.clone(),
                    reason,
                });
            }
            Err(e) => return Ok(SweepResult::failed(wallet, recipient, network, &e)),
        };
        info!(%wallet, %recipient, %hash, network = %network.name, %amount, "sweep broadcast");

        let receipt = match wait_for_receipt(
            self.client.as_ref(),
            network,
            hash,
            self.confirmation_timeout,
            self.poll_interval,
        )
        .await
        {
            Confirmation::Included(receipt) => receipt,
            Confirmation::Pending => {
                let mut result = SweepResult::new(wallet, recipient, network, SweepStatus::ConfirmationPending)
                    .with_amount(amount, network);
                result.transaction_hash = Some(hash);
                result.message = Some(format!(
                    "broadcast {hash} but no receipt within {}s; check again before deleting the key",
                    self.confirmation_timeout.as_secs()
                ));
                return Ok(result);
            }
        };

        let fee_paid = receipt
            .fee_paid()
            .unwrap_or_else(|| U256::from(receipt.gas_used) * U256::from(estimate.price_or_fee_units));

        if !receipt.success {
            let err = ChainError::Reverted {
                hash,
                network: network.name.clone(),
            };
            let mut result = SweepResult::failed(wallet, recipient, network, &err);
            result.transaction_hash = Some(hash);
            result.gas_used_minimal_units = Some(fee_paid);
            return Ok(result);
        }

        let mut result = match self.client.get_balance(network, wallet).await {
            Ok(remaining) if remaining.is_zero() => {
                let mut result = SweepResult::new(wallet, recipient, network, SweepStatus::Completed);
                if delete_after {
                    match self.keystore.delete(&wallet, &network.name) {
                        Ok(deleted) => result.key_deleted = deleted,
                        Err(e) => {
                            warn!(%wallet, "swept wallet could not be deleted: {e}");
                            result.message = Some(format!("swept, but the key could not be deleted: {e}"));
                        }
                    }
                }
                result
            }
            Ok(remaining) => {
                let mut result = SweepResult::new(wallet, recipient, network, SweepStatus::ResidualBalance);
                result.message = Some(format!(
                    "{} remains in {wallet}; key kept",
                    format_native(remaining, decimals, symbol)
                ));
                warn!(%wallet, network = %network.name, %remaining, "residual balance after sweep");
                result
            }
            Err(e) => {
                warn!(%wallet, network = %network.name, "balance after sweep unreadable: {e}");
                let mut result = SweepResult::new(wallet, recipient, network, SweepStatus::BalanceUnknown);
                result.message = Some(format!(
                    "transfer mined but the remaining balance could not be read ({e}); key kept"
                ));
                result
            }
        };

        result = result.with_amount(amount, network);
        result.transaction_hash = Some(hash);
        result.gas_used_minimal_units = Some(fee_paid);
        info!(%wallet, %hash, status = ?result.status, key_deleted = result.key_deleted, "sweep finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{SimulatedChain, test_network};
    use crate::units::to_minimal_units;

    const GWEI: u128 = 1_000_000_000;

    struct Fixture {
        _dir: tempfile::TempDir,
        chain: Arc<SimulatedChain>,
        engine: SweepEngine,
        network: ResolvedNetwork,
    }

    fn fixture(network: ResolvedNetwork) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = DeployerConfig::with_data_directory(dir.path());
        let chain = Arc::new(SimulatedChain::new(GWEI));
        let estimator = Arc::new(GasEstimator::new(chain.clone(), &config).unwrap());
        let engine = SweepEngine::new(
            EphemeralKeyStore::new(config.ephemeral_wallets_dir()),
            chain.clone(),
            estimator,
            &config,
        )
        .with_confirmation_timing(Duration::from_millis(50), Duration::from_millis(5));
        Fixture {
            _dir: dir,
            chain,
            engine,
            network,
        }
    }

    fn sepolia() -> ResolvedNetwork {
        ResolvedNetwork {
            name: "sepolia".into(),
            chain_id: 11_155_111,
            ..test_network()
        }
    }

    fn recipient() -> Address {
        Address::repeat_byte(0x77)
    }

    #[tokio::test]
    async fn sepolia_wallet_is_drained_and_deleted() {
        let f = fixture(sepolia());
        let wallet = f.engine.keystore().generate("sepolia").unwrap();
        f.chain.fund(wallet.address, to_minimal_units("0.5", 18).unwrap());

        let balance = f.engine.get_balance(wallet.address, &f.network).await.unwrap();
        assert!(balance.has_balance);
        assert_eq!(balance.balance_display, "0.5 ETH");

        let result = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap();

        let cost = U256::from(21_000u128 * GWEI);
        assert_eq!(result.status, SweepStatus::Completed);
        assert!(result.success);
        assert!(result.key_deleted);
        assert_eq!(result.amount_swept_minimal_units, to_minimal_units("0.5", 18).unwrap() - cost);
        assert_eq!(result.amount_swept_display, "0.499979 ETH");
        assert_eq!(result.gas_used_minimal_units, Some(cost));
        assert!(result.transaction_hash.is_some());

        assert_eq!(f.chain.balance_of(wallet.address), U256::ZERO);
        assert_eq!(f.chain.balance_of(recipient()), result.amount_swept_minimal_units);
        assert!(f.engine.keystore().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_without_delete_keeps_key() {
        let f = fixture(test_network());
        let wallet = f.engine.keystore().generate("localhost").unwrap();
        f.chain.fund(wallet.address, U256::from(10u128 * 21_000 * GWEI));

        let result = f.engine.sweep(wallet.address, recipient(), &f.network, false).await.unwrap();
        assert_eq!(result.status, SweepStatus::Completed);
        assert!(!result.key_deleted);
        assert!(f.engine.keystore().exists(&wallet.address));
    }

    #[tokio::test]
    async fn empty_wallet_is_deleted_without_broadcast() {
        let f = fixture(test_network());
        let wallet = f.engine.keystore().generate("localhost").unwrap();

        let result = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap();
        assert_eq!(result.status, SweepStatus::NothingToSweep);
        assert!(result.success);
        assert!(result.key_deleted);
        assert_eq!(result.amount_swept_minimal_units, U256::ZERO);
        assert_eq!(f.chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn balance_not_above_cost_never_broadcasts() {
        let cost = 21_000u128 * GWEI;
        for balance in [1, cost / 2, cost - 1, cost] {
            let f = fixture(test_network());
            let wallet = f.engine.keystore().generate("localhost").unwrap();
            f.chain.fund(wallet.address, U256::from(balance));

            let result = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap();
            assert_eq!(result.status, SweepStatus::InsufficientForGas, "balance {balance}");
            assert!(!result.success);
            assert!(!result.key_deleted);
            assert!(result.error.as_deref().unwrap_or_default().contains("ETH"));
            assert_eq!(f.chain.broadcast_count(), 0);
            assert!(f.engine.keystore().exists(&wallet.address));
        }
    }

    #[tokio::test]
    async fn balance_above_cost_drains_to_zero() {
        let cost = 21_000u128 * GWEI;
        for balance in [cost + 1, cost * 2, cost * 1_000 + 7] {
            let f = fixture(test_network());
            let wallet = f.engine.keystore().generate("localhost").unwrap();
            f.chain.fund(wallet.address, U256::from(balance));

            let result = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap();
            assert_eq!(result.amount_swept_minimal_units, U256::from(balance - cost));
            assert_eq!(f.chain.balance_of(wallet.address), U256::ZERO);
            assert!(result.key_deleted);
        }
    }

    #[tokio::test]
    async fn residual_balance_keeps_key() {
        let f = fixture(test_network());
        let wallet = f.engine.keystore().generate("localhost").unwrap();
        f.chain.fund(wallet.address, U256::from(100u128 * 21_000 * GWEI));
        // Charged less gas than quoted, so part of the fee budget stays behind.
        f.chain.set_gas_used(20_000);

        let result = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap();
        assert_eq!(result.status, SweepStatus::ResidualBalance);
        assert!(result.success);
        assert!(!result.key_deleted);
        assert_eq!(f.chain.balance_of(wallet.address), U256::from(1_000u128 * GWEI));
        assert!(f.engine.keystore().exists(&wallet.address));
    }

    #[tokio::test]
    async fn unconfirmed_broadcast_is_pending_not_failed() {
        let f = fixture(test_network());
        let wallet = f.engine.keystore().generate("localhost").unwrap();
        f.chain.fund(wallet.address, U256::from(100u128 * 21_000 * GWEI));
        f.chain.withhold_receipts();

        let result = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap();
        assert_eq!(result.status, SweepStatus::ConfirmationPending);
        assert!(!result.success);
        assert!(!result.key_deleted);
        assert!(result.transaction_hash.is_some());
        assert!(f.engine.keystore().exists(&wallet.address));
    }

    #[tokio::test]
    async fn reverted_transfer_is_failed() {
        let f = fixture(test_network());
        let wallet = f.engine.keystore().generate("localhost").unwrap();
        f.chain.fund(wallet.address, U256::from(100u128 * 21_000 * GWEI));
        f.chain.revert_next();

        let result = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap();
        assert_eq!(result.status, SweepStatus::Failed);
        assert!(!result.key_deleted);
        assert!(result.error.as_deref().unwrap_or_default().contains("reverted"));
    }

    #[tokio::test]
    async fn nonce_conflict_propagates_with_wallet_address() {
        let f = fixture(test_network());
        let wallet = f.engine.keystore().generate("localhost").unwrap();
        f.chain.fund(wallet.address, U256::from(100u128 * 21_000 * GWEI));
        f.chain.reject_broadcasts("nonce too low");

        let err = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap_err();
        match err {
            ChainError::NonceConflict { ref address, .. } => assert_eq!(address, &wallet.address.to_string()),
            other => panic!("expected nonce conflict, got {other:?}"),
        }
        assert!(err.is_retryable());
        assert!(f.engine.keystore().exists(&wallet.address));
    }

    #[tokio::test]
    async fn other_broadcast_rejection_is_failed_result() {
        let f = fixture(test_network());
        let wallet = f.engine.keystore().generate("localhost").unwrap();
        f.chain.fund(wallet.address, U256::from(100u128 * 21_000 * GWEI));
        f.chain.reject_broadcasts("txpool is full");

        let result = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap();
        assert_eq!(result.status, SweepStatus::Failed);
        assert!(result.transaction_hash.is_none());
        assert!(!result.key_deleted);
    }

    #[tokio::test]
    async fn unreadable_final_balance_keeps_key() {
        let f = fixture(test_network());
        let wallet = f.engine.keystore().generate("localhost").unwrap();
        f.chain.fund(wallet.address, U256::from(100u128 * 21_000 * GWEI));
        f.chain.fail_balance_reads_after(1);

        let result = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap();
        assert_eq!(result.status, SweepStatus::BalanceUnknown);
        assert!(result.success);
        assert!(!result.key_deleted);
        assert!(result.transaction_hash.is_some());
        assert!(f.engine.keystore().exists(&wallet.address));
    }

    #[tokio::test]
    async fn unreadable_balance_with_residue_is_not_reported_complete() {
        let f = fixture(test_network());
        let wallet = f.engine.keystore().generate("localhost").unwrap();
        f.chain.fund(wallet.address, U256::from(100u128 * 21_000 * GWEI));
        f.chain.set_gas_used(20_000);
        f.chain.fail_balance_reads_after(1);

        let result = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap();
        assert_ne!(result.status, SweepStatus::Completed);
        assert_eq!(result.status, SweepStatus::BalanceUnknown);
        assert!(!f.chain.balance_of(wallet.address).is_zero());
        assert!(f.engine.keystore().exists(&wallet.address));
    }

    #[tokio::test]
    async fn unknown_wallet_is_not_found() {
        let f = fixture(test_network());
        let err = f
            .engine
            .sweep(Address::repeat_byte(5), recipient(), &f.network, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn estimation_failure_propagates() {
        let f = fixture(test_network());
        let wallet = f.engine.keystore().generate("localhost").unwrap();
        f.chain.fund(wallet.address, U256::from(GWEI));
        f.chain.fail_estimation("execution reverted");

        let err = f.engine.sweep(wallet.address, recipient(), &f.network, true).await.unwrap_err();
        assert!(matches!(err, ChainError::Estimation { .. }));
        assert_eq!(f.chain.broadcast_count(), 0);
    }
}
