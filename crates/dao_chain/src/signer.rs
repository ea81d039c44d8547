//! Transaction signing.
//!
//! Deployment transactions are signed by an external device behind
//! [`TransactionSigner`]; only ephemeral wallets are signed locally, and only
//! with legacy (EIP-155) transactions so the fee is exactly `gasUsed * gasPrice`.

use alloy_consensus::{SignableTransaction as _, Signed, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::{Decodable2718, Encodable2718};
use alloy_primitives::{Address, Bytes, Signature, TxKind, U256};
use async_trait::async_trait;
use k256::ecdsa::{SigningKey, VerifyingKey};
use tracing::debug;

use crate::error::ChainError;
use crate::keystore::SecretKey;
use crate::tx_builder::{FeeQuote, UnsignedTransaction};

/// Anything that can turn an unsigned transaction into raw signed bytes.
///
/// Hardware signers report `UserRejected` / `DeviceUnavailable`; callers pass
/// those through unchanged.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_transaction(&self, tx: &UnsignedTransaction) -> Result<Bytes, ChainError>;
}

/// Derive the account address controlled by `key`.
pub fn address_of(key: &SigningKey) -> Address {
    address_of_verifying_key(key.verifying_key())
}

fn address_of_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Uncompressed SEC1: 0x04 || x || y
    Address::from_raw_public_key(&point.as_bytes()[1..])
}

/// Decode a raw legacy transaction and recover its sender.
pub fn decode_signed_legacy(raw: &[u8]) -> Result<(TxLegacy, Address), ChainError> {
    let mut buf = raw;
    let envelope = TxEnvelope::decode_2718(&mut buf)
        .map_err(|e| ChainError::Signing(format!("undecodable transaction: {e}")))?;
    if !buf.is_empty() {
        return Err(ChainError::Signing("trailing bytes after transaction".into()));
    }
    let signed: Signed<TxLegacy> = match envelope {
        TxEnvelope::Legacy(signed) => signed,
        other => {
            return Err(ChainError::Signing(format!(
                "expected a legacy transaction, got {:?}",
                other.tx_type()
            )));
        }
    };
    let sender = signed
        .recover_signer()
        .map_err(|e| ChainError::Signing(format!("invalid signature: {e}")))?;
    Ok((signed.tx().clone(), sender))
}

// ---------------------------------------------------------------------------
// LocalKeySigner
// ---------------------------------------------------------------------------

/// Signs with a key held in memory for the duration of one operation.
pub struct LocalKeySigner {
    key: SigningKey,
    address: Address,
}

impl LocalKeySigner {
    pub fn new(secret: &SecretKey) -> Result<Self, ChainError> {
        let key = secret.signing_key()?;
        let address = address_of(&key);
        Ok(Self { key, address })
    }

    fn sign_legacy(&self, tx: &UnsignedTransaction, gas_price: u128) -> Result<Bytes, ChainError> {
        let nonce = tx
            .nonce
            .ok_or_else(|| ChainError::Signing("local signing requires an explicit nonce".into()))?;
        let legacy = TxLegacy {
            chain_id: Some(tx.chain_id),
            nonce,
            gas_price,
            gas_limit: tx.gas_limit,
            to: tx.to.map_or(TxKind::Create, TxKind::Call),
            value: tx.value,
            input: tx.data.clone(),
        };

        let hash = legacy.signature_hash();
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let signature = Signature::new(
            U256::from_be_slice(&signature.r().to_bytes()),
            U256::from_be_slice(&signature.s().to_bytes()),
            recovery_id.is_y_odd(),
        );

        let envelope = TxEnvelope::from(legacy.into_signed(signature));
        let mut out = Vec::with_capacity(envelope.encode_2718_len());
        envelope.encode_2718(&mut out);
        debug!(from = %self.address, nonce, chain_id = tx.chain_id, "transaction signed locally");
        Ok(Bytes::from(out))
    }
}

#[async_trait]
impl TransactionSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_transaction(&self, tx: &UnsignedTransaction) -> Result<Bytes, ChainError> {
        if tx.from != self.address {
            return Err(ChainError::Signing(format!(
                "transaction is from {} but this key controls {}",
                tx.from, self.address
            )));
        }
        match tx.fee {
            FeeQuote::Legacy { gas_price } => self.sign_legacy(tx, gas_price),
            FeeQuote::Eip1559 { .. } => Err(ChainError::Signing(
                "local signer only produces legacy transactions".into(),
            )),
        }
    }
}
