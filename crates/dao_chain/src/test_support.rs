//! In-memory chain and fixtures shared by the unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use alloy_primitives::{Address, B256, Bytes, TxKind, U256, keccak256};
use async_trait::async_trait;

use crate::client::{ChainClient, TransactionReceipt, classify_broadcast_error};
use crate::contracts::{ContractRole, DaoConfig};
use crate::error::ChainError;
use crate::networks::ResolvedNetwork;
use crate::signer::decode_signed_legacy;
use crate::tx_builder::TransactionRequest;

/// Local dev chain, as served by anvil.
pub(crate) fn test_network() -> ResolvedNetwork {
    ResolvedNetwork {
        name: "localhost".into(),
        chain_id: 31_337,
        rpc_endpoint: "http://127.0.0.1:8545".into(),
        native_currency_decimals: 18,
        native_symbol: "ETH".into(),
        supports_eip1559: true,
        explorer_url: String::new(),
    }
}

pub(crate) fn sample_config() -> DaoConfig {
    DaoConfig {
        token_name: "Acme Governance".into(),
        token_symbol: "ACME".into(),
        ..DaoConfig::default()
    }
}

/// Write minimal artifacts for all three roles into `dir`.
pub(crate) fn write_artifacts(dir: &Path) {
    for (i, role) in ContractRole::ALL.iter().enumerate() {
        let body = serde_json::json!({
            "abi": [],
            "bytecode": format!("0x6080604052{:02x}", i),
        });
        std::fs::write(dir.join(format!("{}.json", role.artifact_name())), body.to_string()).unwrap();
    }
}

struct ChainState {
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    gas_price: u128,
    base_fee: Option<u128>,
    priority_fee: u128,
    estimate: Result<u64, String>,
    gas_used: Option<u64>,
    withhold_receipts: bool,
    revert_next: bool,
    broadcast_rejection: Option<String>,
    balance_reads_fail_after: Option<usize>,
    balance_reads: usize,
    receipts: HashMap<B256, TransactionReceipt>,
    broadcasts: usize,
    block: u64,
}

/// A single-node chain that executes legacy transfers signed by the crate's
/// own signer. Balances move exactly as on a real chain:
/// `value + gasUsed * gasPrice` leaves the sender.
pub(crate) struct SimulatedChain {
    state: Mutex<ChainState>,
}

impl SimulatedChain {
    pub(crate) fn new(gas_price: u128) -> Self {
        Self {
            state: Mutex::new(ChainState {
                balances: HashMap::new(),
                nonces: HashMap::new(),
                gas_price,
                base_fee: None,
                priority_fee: 0,
                estimate: Ok(21_000),
                gas_used: None,
                withhold_receipts: false,
                revert_next: false,
                broadcast_rejection: None,
                balance_reads_fail_after: None,
                balance_reads: 0,
                receipts: HashMap::new(),
                broadcasts: 0,
                block: 1,
            }),
        }
    }

    pub(crate) fn fund(&self, address: Address, amount: U256) {
        let mut state = self.state.lock().unwrap();
        *state.balances.entry(address).or_default() += amount;
    }

    pub(crate) fn balance_of(&self, address: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn set_base_fee(&self, base_fee: Option<u128>, priority_fee: u128) {
        let mut state = self.state.lock().unwrap();
        state.base_fee = base_fee;
        state.priority_fee = priority_fee;
    }

    pub(crate) fn set_estimate(&self, units: u64) {
        self.state.lock().unwrap().estimate = Ok(units);
    }

    pub(crate) fn fail_estimation(&self, reason: &str) {
        self.state.lock().unwrap().estimate = Err(reason.to_string());
    }

    /// Charge this much gas per transaction instead of the full limit.
    pub(crate) fn set_gas_used(&self, units: u64) {
        self.state.lock().unwrap().gas_used = Some(units);
    }

    /// Accept broadcasts but never produce receipts.
    pub(crate) fn withhold_receipts(&self) {
        self.state.lock().unwrap().withhold_receipts = true;
    }

    /// The next transaction is mined with a failed status.
    pub(crate) fn revert_next(&self) {
        self.state.lock().unwrap().revert_next = true;
    }

    /// Reject every broadcast with the given node message.
    pub(crate) fn reject_broadcasts(&self, message: &str) {
        self.state.lock().unwrap().broadcast_rejection = Some(message.to_string());
    }

    /// Let `count` balance reads succeed, then fail every later one.
    pub(crate) fn fail_balance_reads_after(&self, count: usize) {
        self.state.lock().unwrap().balance_reads_fail_after = Some(count);
    }

    pub(crate) fn broadcast_count(&self) -> usize {
        self.state.lock().unwrap().broadcasts
    }
}

#[async_trait]
impl ChainClient for SimulatedChain {
    async fn estimate_gas(
        &self,
        network: &ResolvedNetwork,
        _request: &TransactionRequest,
    ) -> Result<u64, ChainError> {
        self.state
            .lock()
            .unwrap()
            .estimate
            .clone()
            .map_err(|reason| ChainError::Estimation {
                network: network.name.clone(),
                reason,
            })
    }

    async fn gas_price(&self, _network: &ResolvedNetwork) -> Result<u128, ChainError> {
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn max_priority_fee_per_gas(&self, _network: &ResolvedNetwork) -> Result<u128, ChainError> {
        Ok(self.state.lock().unwrap().priority_fee)
    }

    async fn latest_base_fee(&self, _network: &ResolvedNetwork) -> Result<Option<u128>, ChainError> {
        Ok(self.state.lock().unwrap().base_fee)
    }

    async fn get_balance(&self, network: &ResolvedNetwork, address: Address) -> Result<U256, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.balance_reads += 1;
        if let Some(limit) = state.balance_reads_fail_after {
            if state.balance_reads > limit {
                return Err(ChainError::network(&network.name, "connection refused"));
            }
        }
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn get_transaction_count(&self, _network: &ResolvedNetwork, address: Address) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().nonces.get(&address).copied().unwrap_or(0))
    }

    async fn send_raw_transaction(&self, network: &ResolvedNetwork, raw: &Bytes) -> Result<B256, ChainError> {
        let (tx, sender) = decode_signed_legacy(raw)?;
        let mut state = self.state.lock().unwrap();

        if let Some(message) = &state.broadcast_rejection {
            return Err(classify_broadcast_error(&network.name, None, message));
        }
        if tx.chain_id != Some(network.chain_id) {
            return Err(ChainError::network(&network.name, "invalid chain id"));
        }
        let expected_nonce = state.nonces.get(&sender).copied().unwrap_or(0);
        if tx.nonce != expected_nonce {
            return Err(classify_broadcast_error(&network.name, None, "nonce too low"));
        }

        let balance = state.balances.get(&sender).copied().unwrap_or_default();
        let max_cost = tx.value + U256::from(tx.gas_limit) * U256::from(tx.gas_price);
        if balance < max_cost {
            return Err(ChainError::network(
                &network.name,
                "insufficient funds for gas * price + value",
            ));
        }

        let gas_used = state.gas_used.unwrap_or(tx.gas_limit).min(tx.gas_limit);
        let fee = U256::from(gas_used) * U256::from(tx.gas_price);
        let success = !std::mem::take(&mut state.revert_next);

        let debit = if success { tx.value + fee } else { fee };
        state.balances.insert(sender, balance - debit);
        if success {
            if let TxKind::Call(to) = tx.to {
                *state.balances.entry(to).or_default() += tx.value;
            }
        }
        state.nonces.insert(sender, expected_nonce + 1);
        state.broadcasts += 1;
        state.block += 1;

        let hash = keccak256(raw);
        if !state.withhold_receipts {
            let receipt = TransactionReceipt {
                transaction_hash: hash,
                block_number: Some(state.block),
                gas_used,
                effective_gas_price: Some(tx.gas_price),
                success,
                contract_address: None,
            };
            state.receipts.insert(hash, receipt);
        }
        Ok(hash)
    }

    async fn get_receipt(
        &self,
        _network: &ResolvedNetwork,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.state.lock().unwrap().receipts.get(&hash).cloned())
    }
}
