//! Gas estimation with a configured safety multiplier.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy_primitives::U256;
use dao_core::DeployerConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::ChainClient;
use crate::error::ChainError;
use crate::networks::{ResolvedNetwork, canonical_name};
use crate::tx_builder::{FeeQuote, TransactionRequest};
use crate::units::{format_native, gas_cost};

/// Multipliers are resolved to nine decimal places.
const SCALE: u128 = 1_000_000_000;

/// Safety factor applied to raw gas estimates. Always finite and `>= 1.0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct GasMultiplier(f64);

impl GasMultiplier {
    pub const ONE: GasMultiplier = GasMultiplier(1.0);

    pub fn new(value: f64) -> Result<Self, ChainError> {
        if !value.is_finite() || value < 1.0 {
            return Err(ChainError::InvalidMultiplier(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Multiplier in billionths. A float within rounding noise of a whole
    /// billionth snaps to it, so `1.1` is exactly 1_100_000_000; anything
    /// else rounds up. Saturates for huge multipliers.
    fn scaled(&self) -> u128 {
        let exact = self.0 * SCALE as f64;
        let nearest = exact.round();
        let units = if (exact - nearest).abs() <= exact * 4.0 * f64::EPSILON {
            nearest
        } else {
            exact.ceil()
        };
        (units as u128).max(SCALE)
    }

    /// `ceil(raw * multiplier)`, computed in 256-bit integers and capped at
    /// `u64::MAX`. Never below `raw`.
    pub fn apply(&self, raw: u64) -> u64 {
        let product = U256::from(raw) * U256::from(self.scaled());
        product
            .div_ceil(U256::from(SCALE))
            .saturating_to::<u64>()
            .max(raw)
    }
}

impl TryFrom<f64> for GasMultiplier {
    type Error = ChainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GasMultiplier> for f64 {
    fn from(m: GasMultiplier) -> Self {
        m.0
    }
}

impl fmt::Display for GasMultiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

/// How a transaction will be priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeMode {
    Legacy,
    Eip1559,
}

/// A gas limit and price quote for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasEstimate {
    pub raw_estimate_units: u64,
    pub multiplier: GasMultiplier,
    pub adjusted_limit_units: u64,
    /// Price per gas used for the cost figure (max fee for EIP-1559).
    pub price_or_fee_units: u128,
    pub estimated_cost_minimal_units: U256,
    pub fee: FeeQuote,
}

impl GasEstimate {
    pub fn new(raw_estimate_units: u64, multiplier: GasMultiplier, fee: FeeQuote) -> Self {
        let adjusted_limit_units = multiplier.apply(raw_estimate_units);
        let price_or_fee_units = fee.max_price_per_gas();
        Self {
            raw_estimate_units,
            multiplier,
            adjusted_limit_units,
            price_or_fee_units,
            estimated_cost_minimal_units: gas_cost(adjusted_limit_units, price_or_fee_units),
            fee,
        }
    }
}

/// Human-readable cost such as `"0.0042 ETH (1320000 gas @ 3.18 gwei)"`.
/// Reporting only; never feed this back into arithmetic.
pub fn to_display_cost(estimate: &GasEstimate, network: &ResolvedNetwork) -> String {
    let gwei = crate::units::to_display_units(U256::from(estimate.price_or_fee_units), 9);
    format!(
        "{} ({} gas @ {gwei} gwei)",
        format_native(
            estimate.estimated_cost_minimal_units,
            network.native_currency_decimals,
            &network.native_symbol
        ),
        estimate.adjusted_limit_units,
    )
}

// ---------------------------------------------------------------------------
// GasEstimator
// ---------------------------------------------------------------------------

/// Simulates transactions through a [`ChainClient`] and prices them.
///
/// Estimation failures always propagate; there is no fallback gas limit.
pub struct GasEstimator {
    client: Arc<dyn ChainClient>,
    default_multiplier: GasMultiplier,
    network_multipliers: HashMap<String, GasMultiplier>,
}

impl GasEstimator {
    pub fn new(client: Arc<dyn ChainClient>, config: &DeployerConfig) -> Result<Self, ChainError> {
        let default_multiplier = GasMultiplier::new(config.default_gas_multiplier)?;
        let network_multipliers = config
            .network_gas_multipliers
            .iter()
            .map(|(name, m)| Ok((canonical_name(name), GasMultiplier::new(*m)?)))
            .collect::<Result<_, ChainError>>()?;
        Ok(Self {
            client,
            default_multiplier,
            network_multipliers,
        })
    }

    /// Configured multiplier for `network`: per-network override, else default.
    pub fn multiplier_for(&self, network: &ResolvedNetwork) -> GasMultiplier {
        self.network_multipliers
            .get(&network.name)
            .copied()
            .unwrap_or(self.default_multiplier)
    }

    /// Estimate using the network's native fee mode.
    pub async fn estimate(
        &self,
        network: &ResolvedNetwork,
        skeleton: &TransactionRequest,
        multiplier: GasMultiplier,
    ) -> Result<GasEstimate, ChainError> {
        let mode = if network.supports_eip1559 {
            FeeMode::Eip1559
        } else {
            FeeMode::Legacy
        };
        self.estimate_with_fee_mode(network, skeleton, multiplier, mode)
            .await
    }

    pub async fn estimate_with_fee_mode(
        &self,
        network: &ResolvedNetwork,
        skeleton: &TransactionRequest,
        multiplier: GasMultiplier,
        mode: FeeMode,
    ) -> Result<GasEstimate, ChainError> {
        let raw = self.client.estimate_gas(network, skeleton).await?;
        let fee = self
            .quote_fee(network, mode)
            .await
            .map_err(|e| as_estimation_error(network, e))?;
        let estimate = GasEstimate::new(raw, multiplier, fee);

        debug!(
            network = %network.name,
            raw,
            adjusted = estimate.adjusted_limit_units,
            %multiplier,
            price = estimate.price_or_fee_units,
            "gas estimated"
        );
        Ok(estimate)
    }

    /// Current price quote. EIP-1559 quotes cap at `2 * baseFee + tip`; chains
    /// that report no base fee fall back to the legacy gas price.
    pub async fn quote_fee(
        &self,
        network: &ResolvedNetwork,
        mode: FeeMode,
    ) -> Result<FeeQuote, ChainError> {
        if mode == FeeMode::Eip1559 {
            if let Some(base_fee) = self.client.latest_base_fee(network).await? {
                let tip = self.client.max_priority_fee_per_gas(network).await?;
                return Ok(FeeQuote::Eip1559 {
                    max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(tip),
                    max_priority_fee_per_gas: tip,
                });
            }
        }
        let gas_price = self.client.gas_price(network).await?;
        Ok(FeeQuote::Legacy { gas_price })
    }
}

/// An unreachable endpoint during estimation is reported as an estimation
/// failure, keeping the underlying reason.
fn as_estimation_error(network: &ResolvedNetwork, err: ChainError) -> ChainError {
    match err {
        ChainError::Network { reason, .. } => ChainError::Estimation {
            network: network.name.clone(),
            reason,
        },
        other => other,
    }
}
