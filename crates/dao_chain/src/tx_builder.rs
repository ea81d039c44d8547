//! Unsigned transaction construction.
//!
//! Pure functions: inputs plus a gas estimate the caller fetched beforehand.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::error::ChainError;
use crate::gas::GasEstimate;
use crate::networks::ResolvedNetwork;

/// A transaction without gas fields, as sent to `eth_estimateGas`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

/// Pricing for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeeQuote {
    Legacy {
        #[serde(rename = "gasPrice")]
        gas_price: u128,
    },
    Eip1559 {
        #[serde(rename = "maxFeePerGas")]
        max_fee_per_gas: u128,
        #[serde(rename = "maxPriorityFeePerGas")]
        max_priority_fee_per_gas: u128,
    },
}

impl FeeQuote {
    /// Highest price per gas this quote can be charged.
    pub fn max_price_per_gas(&self) -> u128 {
        match self {
            Self::Legacy { gas_price } => *gas_price,
            Self::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// A transaction ready for an external signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    #[serde(flatten)]
    pub fee: FeeQuote,
    pub chain_id: u64,
    /// Left for the signer to assign when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

impl UnsignedTransaction {
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Worst-case balance the sender needs: `value + gasLimit * maxPrice`.
    pub fn max_total_cost(&self) -> U256 {
        self.value
            + U256::from(self.gas_limit) * U256::from(self.fee.max_price_per_gas())
    }
}

/// `bytecode ++ constructor_args`. Empty bytecode means the contract was never
/// compiled, which is a configuration fault and never retried.
pub fn deployment_data(
    contract: &str,
    bytecode: &[u8],
    constructor_args: &[u8],
) -> Result<Bytes, ChainError> {
    if bytecode.is_empty() {
        return Err(ChainError::MissingBytecode {
            contract: contract.to_string(),
        });
    }
    let mut data = Vec::with_capacity(bytecode.len() + constructor_args.len());
    data.extend_from_slice(bytecode);
    data.extend_from_slice(constructor_args);
    Ok(Bytes::from(data))
}

/// Gas-less creation request for estimation.
pub fn deployment_skeleton(
    contract: &str,
    bytecode: &[u8],
    constructor_args: &[u8],
    sender: Address,
) -> Result<TransactionRequest, ChainError> {
    Ok(TransactionRequest {
        from: sender,
        to: None,
        data: deployment_data(contract, bytecode, constructor_args)?,
        value: U256::ZERO,
    })
}

/// Gas-less call request for estimation.
pub fn call_skeleton(target: Address, call_data: Bytes, sender: Address, value: U256) -> TransactionRequest {
    TransactionRequest {
        from: sender,
        to: Some(target),
        data: call_data,
        value,
    }
}

/// Contract creation: `to = None`, chain id from the network.
pub fn build_deployment(
    contract: &str,
    bytecode: &[u8],
    constructor_args: &[u8],
    sender: Address,
    network: &ResolvedNetwork,
    estimate: &GasEstimate,
) -> Result<UnsignedTransaction, ChainError> {
    Ok(UnsignedTransaction {
        from: sender,
        to: None,
        data: deployment_data(contract, bytecode, constructor_args)?,
        value: U256::ZERO,
        gas_limit: estimate.adjusted_limit_units,
        fee: estimate.fee,
        chain_id: network.chain_id,
        nonce: None,
    })
}

/// Call or plain value transfer to `target`.
pub fn build_call(
    target: Address,
    call_data: Bytes,
    sender: Address,
    network: &ResolvedNetwork,
    value: U256,
    estimate: &GasEstimate,
) -> UnsignedTransaction {
    UnsignedTransaction {
        from: sender,
        to: Some(target),
        data: call_data,
        value,
        gas_limit: estimate.adjusted_limit_units,
        fee: estimate.fee,
        chain_id: network.chain_id,
        nonce: None,
    }
}
