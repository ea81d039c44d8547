//! DeployerService: the operations exposed to the dispatch layer.
//!
//! Inputs arrive as strings (addresses, network names) and are validated
//! here before they reach the engines.

use std::sync::Arc;
use std::time::Duration;

use dao_core::DeployerConfig;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::client::{ChainClient, JsonRpcClient};
use crate::contracts::DaoConfig;
use crate::error::ChainError;
use crate::gas::GasEstimator;
use crate::keystore::{EphemeralKeyStore, EphemeralWallet};
use crate::networks::{NetworkRegistry, NetworkResolver, ResolvedNetwork};
use crate::sequencer::{DeploymentPlanStep, DeploymentSequencer};
use crate::session::DeploymentSession;
use crate::sweep::{SweepEngine, SweepResult, WalletBalance};
use crate::units::{format_native, parse_address, parse_nonzero_address};

pub struct DeployerService {
    resolver: Arc<dyn NetworkResolver>,
    sweeper: SweepEngine,
    sequencer: DeploymentSequencer,
}

impl DeployerService {
    /// Service backed by the built-in network table and JSON-RPC.
    pub fn new(config: DeployerConfig) -> Result<Self, ChainError> {
        let client = JsonRpcClient::new(Duration::from_secs(config.rpc_timeout_secs))?;
        let resolver = NetworkRegistry::from_config(&config);
        Self::with_parts(config, Arc::new(resolver), Arc::new(client))
    }

    pub fn with_parts(
        config: DeployerConfig,
        resolver: Arc<dyn NetworkResolver>,
        client: Arc<dyn ChainClient>,
    ) -> Result<Self, ChainError> {
        config
            .validate()
            .map_err(|e| ChainError::InvalidConfig(e.to_string()))?;

        let estimator = Arc::new(GasEstimator::new(Arc::clone(&client), &config)?);
        let keystore = EphemeralKeyStore::new(config.ephemeral_wallets_dir());
        let sweeper = SweepEngine::new(keystore, client, Arc::clone(&estimator), &config);
        let sequencer = DeploymentSequencer::new(ArtifactStore::new(config.artifacts_dir()), estimator);

        info!(data_dir = %config.data_directory.display(), "deployer service ready");
        Ok(Self {
            resolver,
            sweeper,
            sequencer,
        })
    }

    fn resolve(&self, network_name: &str) -> Result<ResolvedNetwork, ChainError> {
        self.resolver.resolve(network_name)
    }

    /// Network-independent on-disk store behind the ephemeral wallet operations.
    pub fn keystore(&self) -> &EphemeralKeyStore {
        self.sweeper.keystore()
    }

    // -- Ephemeral wallets --------------------------------------------------

    pub fn generate_ephemeral_wallet(&self, network_name: &str) -> Result<EphemeralWallet, ChainError> {
        let network = self.resolve(network_name)?;
        self.keystore().generate(&network.name)
    }

    pub fn list_ephemeral_wallets(&self) -> Result<Vec<EphemeralWallet>, ChainError> {
        self.keystore().list()
    }

    pub async fn get_wallet_balance(&self, address: &str, network_name: &str) -> Result<WalletBalance, ChainError> {
        let address = parse_address(address)?;
        let network = self.resolve(network_name)?;
        self.sweeper.get_balance(address, &network).await
    }

    pub async fn sweep_ephemeral_wallet(
        &self,
        address: &str,
        recipient: &str,
        network_name: &str,
        delete_after: bool,
    ) -> Result<SweepResult, ChainError> {
        let wallet = parse_address(address)?;
        let recipient = parse_nonzero_address(recipient)?;
        let network = self.resolve(network_name)?;
        self.sweeper.sweep(wallet, recipient, &network, delete_after).await
    }

    /// Delete a wallet record after a fresh balance read shows it empty.
    /// `Ok(false)` when no such wallet exists.
    pub async fn delete_ephemeral_wallet(&self, address: &str, network_name: &str) -> Result<bool, ChainError> {
        let address = parse_address(address)?;
        let network = self.resolve(network_name)?;
        if !self.keystore().exists(&address) {
            return Ok(false);
        }

        let balance = self.sweeper.get_balance(address, &network).await?;
        if balance.has_balance {
            return Err(ChainError::FundsRemaining {
                address: address.to_string(),
                network: network.name,
                balance: format_native(
                    balance.balance_minimal_units,
                    network.native_currency_decimals,
                    &network.native_symbol,
                ),
            });
        }
        self.keystore().delete(&address, &network.name)
    }

    /// Delete without checking the balance. Any funds left are unrecoverable.
    pub fn force_delete_ephemeral_wallet(&self, address: &str, network_name: &str) -> Result<bool, ChainError> {
        let address = parse_address(address)?;
        let network = self.resolve(network_name)?;
        warn!(%address, network = %network.name, "force-deleting ephemeral wallet without balance check");
        self.keystore().delete(&address, &network.name)
    }

    // -- Deployment planning ------------------------------------------------

    pub async fn plan_token_deployment(
        &self,
        config: &DaoConfig,
        sender: &str,
        network_name: &str,
    ) -> Result<DeploymentPlanStep, ChainError> {
        let sender = parse_nonzero_address(sender)?;
        let network = self.resolve(network_name)?;
        self.sequencer.plan_token_deployment(config, sender, &network).await
    }

    pub async fn plan_timelock_deployment(
        &self,
        config: &DaoConfig,
        sender: &str,
        network_name: &str,
    ) -> Result<DeploymentPlanStep, ChainError> {
        let sender = parse_nonzero_address(sender)?;
        let network = self.resolve(network_name)?;
        self.sequencer.plan_timelock_deployment(config, sender, &network).await
    }

    pub async fn plan_governor_deployment(
        &self,
        config: &DaoConfig,
        token: Option<&str>,
        timelock: Option<&str>,
        sender: &str,
        network_name: &str,
    ) -> Result<DeploymentPlanStep, ChainError> {
        let sender = parse_nonzero_address(sender)?;
        let network = self.resolve(network_name)?;
        self.sequencer
            .plan_governor_deployment(config, token, timelock, sender, &network)
            .await
    }

    /// New session for `sender` on `network_name`, awaiting the token step.
    pub fn start_deployment_session(&self, network_name: &str, sender: &str) -> Result<DeploymentSession, ChainError> {
        let sender = parse_nonzero_address(sender)?;
        let network = self.resolve(network_name)?;
        Ok(DeploymentSession::new(network.name, sender))
    }

    /// Plan the step `session` is waiting on; `Ok(None)` once it is complete.
    pub async fn plan_next_step(
        &self,
        session: &DeploymentSession,
        config: &DaoConfig,
    ) -> Result<Option<DeploymentPlanStep>, ChainError> {
        let network = self.resolve(&session.network)?;
        self.sequencer.plan_next(session, config, &network).await
    }
}
