//! Chain access: the [`ChainClient`] trait and its JSON-RPC implementation.
//!
//! All network I/O made by the engines goes through this trait; nothing else
//! in the crate opens sockets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U64, U128, U256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ChainError;
use crate::networks::ResolvedNetwork;
use crate::tx_builder::TransactionRequest;

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub effective_gas_price: Option<u128>,
    pub success: bool,
    pub contract_address: Option<Address>,
}

impl TransactionReceipt {
    /// Fee actually paid, when the node reports the effective price.
    pub fn fee_paid(&self) -> Option<U256> {
        self.effective_gas_price
            .map(|price| U256::from(self.gas_used) * U256::from(price))
    }
}

/// Result of waiting for inclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Included(TransactionReceipt),
    /// Broadcast succeeded but no receipt arrived before the deadline. The
    /// transaction may still land.
    Pending,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Thin RPC surface the engines need from a chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Simulate `request` and return the gas units it needs.
    async fn estimate_gas(
        &self,
        network: &ResolvedNetwork,
        request: &TransactionRequest,
    ) -> Result<u64, ChainError>;

    /// Legacy gas price in minimal units per gas.
    async fn gas_price(&self, network: &ResolvedNetwork) -> Result<u128, ChainError>;

    async fn max_priority_fee_per_gas(&self, network: &ResolvedNetwork)
    -> Result<u128, ChainError>;

    /// Base fee of the latest block, `None` on chains without EIP-1559.
    async fn latest_base_fee(&self, network: &ResolvedNetwork) -> Result<Option<u128>, ChainError>;

    async fn get_balance(
        &self,
        network: &ResolvedNetwork,
        address: Address,
    ) -> Result<U256, ChainError>;

    /// Next nonce for `address`, counting pending transactions.
    async fn get_transaction_count(
        &self,
        network: &ResolvedNetwork,
        address: Address,
    ) -> Result<u64, ChainError>;

    async fn send_raw_transaction(
        &self,
        network: &ResolvedNetwork,
        raw: &Bytes,
    ) -> Result<B256, ChainError>;

    async fn get_receipt(
        &self,
        network: &ResolvedNetwork,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ChainError>;
}

/// Poll for a receipt until `timeout` elapses.
///
/// Poll errors are logged and retried until the deadline because the
/// transaction is already submitted. Dropping the returned future stops only
/// the wait.
pub async fn wait_for_receipt(
    client: &dyn ChainClient,
    network: &ResolvedNetwork,
    hash: B256,
    timeout: Duration,
    poll_interval: Duration,
) -> Confirmation {
    let poll = async {
        loop {
            match client.get_receipt(network, hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => {}
                Err(e) => warn!(%hash, network = %network.name, "receipt poll failed: {e}"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(receipt) => {
            debug!(%hash, block = ?receipt.block_number, success = receipt.success, "transaction included");
            Confirmation::Included(receipt)
        }
        Err(_) => {
            warn!(%hash, network = %network.name, ?timeout, "no receipt before deadline");
            Confirmation::Pending
        }
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

const NONCE_CONFLICT_MARKERS: &[&str] = &[
    "nonce too low",
    "already known",
    "known transaction",
    "replacement transaction underpriced",
    "nonce has already been used",
];

/// Map a node's error message on broadcast to the engine taxonomy.
pub(crate) fn classify_broadcast_error(network: &str, sender: Option<Address>, message: &str) -> ChainError {
    let lower = message.to_lowercase();
    if NONCE_CONFLICT_MARKERS.iter().any(|m| lower.contains(m)) {
        ChainError::NonceConflict {
            address: sender.map(|a| a.to_string()).unwrap_or_else(|| "unknown".into()),
            network: network.to_string(),
            reason: message.to_string(),
        }
    } else {
        ChainError::network(network, format!("broadcast rejected: {message}"))
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC wire types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: Option<U64>,
    gas_used: U64,
    effective_gas_price: Option<U128>,
    status: Option<U64>,
    contract_address: Option<Address>,
}

impl From<RpcReceipt> for TransactionReceipt {
    fn from(raw: RpcReceipt) -> Self {
        Self {
            transaction_hash: raw.transaction_hash,
            block_number: raw.block_number.map(|n| n.to::<u64>()),
            gas_used: raw.gas_used.to::<u64>(),
            effective_gas_price: raw.effective_gas_price.map(|p| p.to::<u128>()),
            // Pre-Byzantium receipts carry no status; treat them as successful.
            success: raw.status.is_none_or(|s| s == U64::from(1)),
            contract_address: raw.contract_address,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlockHeader {
    base_fee_per_gas: Option<U128>,
}

enum RpcFailure {
    Transport(String),
    Rpc { code: i64, message: String },
}

impl RpcFailure {
    fn message(&self) -> String {
        match self {
            Self::Transport(msg) => msg.clone(),
            Self::Rpc { code, message } => format!("{message} (code {code})"),
        }
    }
}

// ---------------------------------------------------------------------------
// JsonRpcClient
// ---------------------------------------------------------------------------

/// [`ChainClient`] over HTTP JSON-RPC 2.0.
pub struct JsonRpcClient {
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Create a client whose requests time out after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ChainError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        network: &ResolvedNetwork,
        method: &str,
        params: Value,
    ) -> Result<T, RpcFailure> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!(network = %network.name, method, id = request.id, "rpc request");

        let response = self
            .client
            .post(&network.rpc_endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcFailure::Transport(format!("HTTP {status} from RPC endpoint")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcFailure::Transport(format!("malformed RPC response: {e}")))?;

        if let Some(err) = body.error {
            return Err(RpcFailure::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let result = body.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| RpcFailure::Transport(format!("unexpected {method} result: {e}")))
    }

    async fn call_network<T: DeserializeOwned>(
        &self,
        network: &ResolvedNetwork,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        self.call(network, method, params)
            .await
            .map_err(|f| ChainError::network(&network.name, format!("{method}: {}", f.message())))
    }
}

fn request_json(request: &TransactionRequest) -> Value {
    let mut obj = json!({
        "from": request.from,
        "data": request.data,
        "value": request.value,
    });
    if let Some(to) = request.to {
        obj["to"] = json!(to);
    }
    obj
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn estimate_gas(
        &self,
        network: &ResolvedNetwork,
        request: &TransactionRequest,
    ) -> Result<u64, ChainError> {
        let gas: U64 = self
            .call(network, "eth_estimateGas", json!([request_json(request)]))
            .await
            .map_err(|f| ChainError::Estimation {
                network: network.name.clone(),
                reason: f.message(),
            })?;
        Ok(gas.to::<u64>())
    }

    async fn gas_price(&self, network: &ResolvedNetwork) -> Result<u128, ChainError> {
        let price: U128 = self.call_network(network, "eth_gasPrice", json!([])).await?;
        Ok(price.to::<u128>())
    }

    async fn max_priority_fee_per_gas(
        &self,
        network: &ResolvedNetwork,
    ) -> Result<u128, ChainError> {
        let fee: U128 = self
            .call_network(network, "eth_maxPriorityFeePerGas", json!([]))
            .await?;
        Ok(fee.to::<u128>())
    }

    async fn latest_base_fee(&self, network: &ResolvedNetwork) -> Result<Option<u128>, ChainError> {
        let header: Option<RpcBlockHeader> = self
            .call_network(network, "eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        Ok(header
            .and_then(|h| h.base_fee_per_gas)
            .map(|fee| fee.to::<u128>()))
    }

    async fn get_balance(
        &self,
        network: &ResolvedNetwork,
        address: Address,
    ) -> Result<U256, ChainError> {
        self.call_network(network, "eth_getBalance", json!([address, "latest"]))
            .await
    }

    async fn get_transaction_count(
        &self,
        network: &ResolvedNetwork,
        address: Address,
    ) -> Result<u64, ChainError> {
        let count: U64 = self
            .call_network(network, "eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(count.to::<u64>())
    }

    async fn send_raw_transaction(
        &self,
        network: &ResolvedNetwork,
        raw: &Bytes,
    ) -> Result<B256, ChainError> {
        self.call(network, "eth_sendRawTransaction", json!([raw]))
            .await
            .map_err(|f| match f {
                RpcFailure::Rpc { message, .. } => {
                    classify_broadcast_error(&network.name, None, &message)
                }
                RpcFailure::Transport(msg) => ChainError::network(&network.name, msg),
            })
    }

    async fn get_receipt(
        &self,
        network: &ResolvedNetwork,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        let raw: Option<RpcReceipt> = self
            .call_network(network, "eth_getTransactionReceipt", json!([hash]))
            .await?;
        Ok(raw.map(TransactionReceipt::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{SimulatedChain, test_network};

    #[test]
    fn nonce_errors_are_classified_as_conflicts() {
        for msg in ["nonce too low", "ALREADY KNOWN", "replacement transaction underpriced"] {
            let err = classify_broadcast_error("sepolia", None, msg);
            assert!(matches!(err, ChainError::NonceConflict { .. }), "{msg}");
        }
    }

    #[test]
    fn other_broadcast_errors_are_network_errors() {
        let err = classify_broadcast_error("sepolia", None, "insufficient funds for gas * price + value");
        assert!(matches!(err, ChainError::Network { .. }));
    }

    #[test]
    fn receipt_wire_format_parses() {
        let raw: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": format!("0x{}", "ab".repeat(32)),
            "blockNumber": "0x10",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00",
            "status": "0x1",
            "contractAddress": null
        }))
        .unwrap();
        let receipt = TransactionReceipt::from(raw);
        assert_eq!(receipt.block_number, Some(16));
        assert_eq!(receipt.gas_used, 21_000);
        assert!(receipt.success);
        assert_eq!(receipt.fee_paid(), Some(U256::from(21_000u64 * 1_000_000_000)));
    }

    #[test]
    fn reverted_receipt_is_not_successful() {
        let raw: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": format!("0x{}", "cd".repeat(32)),
            "blockNumber": "0x1",
            "gasUsed": "0x5208",
            "status": "0x0"
        }))
        .unwrap();
        assert!(!TransactionReceipt::from(raw).success);
    }

    #[test]
    fn request_json_omits_to_for_creation() {
        let request = TransactionRequest {
            from: Address::repeat_byte(1),
            to: None,
            data: Bytes::from(vec![0x60, 0x80]),
            value: U256::ZERO,
        };
        let value = request_json(&request);
        assert!(value.get("to").is_none());
        assert_eq!(value["data"], "0x6080");
    }

    #[tokio::test]
    async fn wait_for_receipt_reports_pending_on_timeout() {
        let chain = SimulatedChain::new(1_000_000_000);
        let network = test_network();
        let outcome = wait_for_receipt(
            &chain,
            &network,
            B256::repeat_byte(9),
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .await;
        assert_eq!(outcome, Confirmation::Pending);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let client = JsonRpcClient::new(Duration::from_millis(200)).unwrap();
        let mut network = test_network();
        network.rpc_endpoint = "http://127.0.0.1:9".into();
        let err = client.gas_price(&network).await.unwrap_err();
        assert!(matches!(err, ChainError::Network { .. }));
        assert!(err.is_retryable());
    }
}
