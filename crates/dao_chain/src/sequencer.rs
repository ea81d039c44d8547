//! Three-step DAO deployment planning: token, then timelock, then governor.
//!
//! Each call produces one unsigned transaction for the external signer. The
//! caller confirms it, then comes back with the deployed address for the next
//! step; nothing is remembered in between.

use std::collections::BTreeSet;
use std::sync::Arc;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::contracts::{
    ContractRole, DaoConfig, governor_constructor_args, timelock_constructor_args,
    token_constructor_args,
};
use crate::error::ChainError;
use crate::gas::{GasEstimate, GasEstimator, to_display_cost};
use crate::networks::ResolvedNetwork;
use crate::session::{DeploymentSession, DeploymentStage};
use crate::tx_builder::{UnsignedTransaction, build_deployment, deployment_skeleton};
use crate::units::parse_address;

/// One signable step of the deployment plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlanStep {
    pub ordinal: u8,
    pub contract_role: ContractRole,
    pub unsigned_transaction: UnsignedTransaction,
    pub depends_on: BTreeSet<ContractRole>,
    pub gas_estimate: GasEstimate,
    pub estimated_cost_display: String,
    pub instructions: String,
}

pub struct DeploymentSequencer {
    artifacts: ArtifactStore,
    estimator: Arc<GasEstimator>,
}

impl DeploymentSequencer {
    pub fn new(artifacts: ArtifactStore, estimator: Arc<GasEstimator>) -> Self {
        Self {
            artifacts,
            estimator,
        }
    }

    pub async fn plan_token_deployment(
        &self,
        config: &DaoConfig,
        sender: Address,
        network: &ResolvedNetwork,
    ) -> Result<DeploymentPlanStep, ChainError> {
        config.validate()?;
        let args = token_constructor_args(config, sender)?;
        let instructions = format!(
            "Sign and broadcast this transaction from {sender} on {} (chain {}). \
             Once it is confirmed, note the deployed {} address ({} {}); the governor step needs it.",
            network.name,
            network.chain_id,
            ContractRole::Token.artifact_name(),
            config.token_name,
            config.token_symbol,
        );
        self.plan(ContractRole::Token, &args, sender, network, instructions)
            .await
    }

    /// The timelock's constructor does not reference the token; it is second
    /// by convention only.
    pub async fn plan_timelock_deployment(
        &self,
        config: &DaoConfig,
        sender: Address,
        network: &ResolvedNetwork,
    ) -> Result<DeploymentPlanStep, ChainError> {
        config.validate()?;
        let args = timelock_constructor_args(config, sender)?;
        let instructions = format!(
            "Sign and broadcast this transaction from {sender} on {} (chain {}). \
             {sender} becomes timelock admin with a minimum delay of {}s. \
             Once it is confirmed, note the deployed {} address; the governor step needs it.",
            network.name,
            network.chain_id,
            config.timelock_min_delay_secs,
            ContractRole::Timelock.artifact_name(),
        );
        self.plan(ContractRole::Timelock, &args, sender, network, instructions)
            .await
    }

    /// Requires both earlier addresses. Absent, malformed or zero addresses
    /// fail with `MissingDependency` before any network call.
    pub async fn plan_governor_deployment(
        &self,
        config: &DaoConfig,
        token: Option<&str>,
        timelock: Option<&str>,
        sender: Address,
        network: &ResolvedNetwork,
    ) -> Result<DeploymentPlanStep, ChainError> {
        let token = require_dependency(ContractRole::Token, token)?;
        let timelock = require_dependency(ContractRole::Timelock, timelock)?;
        config.validate()?;

        let args = governor_constructor_args(config, token, timelock)?;
        let instructions = format!(
            "Sign and broadcast this transaction from {sender} on {} (chain {}). \
             The governor votes with token {token} and executes through timelock {timelock}. \
             After it is confirmed, grant the governor the proposer and canceller roles on the \
             timelock, then renounce the admin role held by {sender}.",
            network.name, network.chain_id,
        );
        self.plan(ContractRole::Governor, &args, sender, network, instructions)
            .await
    }

    /// Plan whichever step `session` is waiting on. `Ok(None)` once complete.
    pub async fn plan_next(
        &self,
        session: &DeploymentSession,
        config: &DaoConfig,
        network: &ResolvedNetwork,
    ) -> Result<Option<DeploymentPlanStep>, ChainError> {
        if session.network != network.name {
            return Err(ChainError::InvalidConfig(format!(
                "session {} targets {}, not {}",
                session.id, session.network, network.name
            )));
        }

        let step = match &session.stage {
            DeploymentStage::AwaitingToken => {
                self.plan_token_deployment(config, session.sender, network)
                    .await?
            }
            DeploymentStage::AwaitingTimelock { .. } => {
                self.plan_timelock_deployment(config, session.sender, network)
                    .await?
            }
            DeploymentStage::AwaitingGovernor { token, timelock } => {
                let (token, timelock) = (token.to_string(), timelock.to_string());
                self.plan_governor_deployment(
                    config,
                    Some(token.as_str()),
                    Some(timelock.as_str()),
                    session.sender,
                    network,
                )
                .await?
            }
            DeploymentStage::Complete { .. } => return Ok(None),
        };
        Ok(Some(step))
    }

    async fn plan(
        &self,
        role: ContractRole,
        constructor_args: &[u8],
        sender: Address,
        network: &ResolvedNetwork,
        instructions: String,
    ) -> Result<DeploymentPlanStep, ChainError> {
        let artifact = self.artifacts.load_role(role)?;
        let skeleton = deployment_skeleton(&artifact.name, &artifact.bytecode, constructor_args, sender)?;

        let multiplier = self.estimator.multiplier_for(network);
        let estimate = self.estimator.estimate(network, &skeleton, multiplier).await?;
        let unsigned_transaction = build_deployment(
            &artifact.name,
            &artifact.bytecode,
            constructor_args,
            sender,
            network,
            &estimate,
        )?;
        let estimated_cost_display = to_display_cost(&estimate, network);

        info!(
            role = %role,
            network = %network.name,
            gas_limit = estimate.adjusted_limit_units,
            cost = %estimated_cost_display,
            "deployment step planned"
        );
        Ok(DeploymentPlanStep {
            ordinal: role.ordinal(),
            contract_role: role,
            unsigned_transaction,
            depends_on: role.dependencies(),
            gas_estimate: estimate,
            estimated_cost_display,
            instructions: format!("Step {} of 3: {instructions}", role.ordinal()),
        })
    }
}

fn require_dependency(dependency: ContractRole, input: Option<&str>) -> Result<Address, ChainError> {
    let missing = |reason: String| ChainError::MissingDependency {
        role: ContractRole::Governor,
        dependency,
        reason,
    };

    let raw = match input.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(missing("address not supplied".into())),
    };
    let address = parse_address(raw).map_err(|e| missing(e.to_string()))?;
    if address.is_zero() {
        return Err(missing("zero address".into()));
    }
    Ok(address)
}
