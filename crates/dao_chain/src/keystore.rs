use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::error::ChainError;
use crate::signer::address_of;
use crate::units::{parse_address, wallet_file_stem};

const SECRET_KEY_LEN: usize = 32;
const RECORD_EXTENSION: &str = "json";

// ---------------------------------------------------------------------------
// SecretKey
// ---------------------------------------------------------------------------

/// Raw secp256k1 scalar. Zeroized on drop, redacted in `Debug`.
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    /// Fresh random key. Retries in the (negligible) case the bytes fall
    /// outside the curve order.
    pub fn random() -> Self {
        loop {
            let mut bytes: [u8; SECRET_KEY_LEN] = rand::random();
            if SigningKey::from_slice(&bytes).is_ok() {
                return Self(bytes);
            }
            bytes.zeroize();
        }
    }

    pub fn from_hex(input: &str) -> Result<Self, String> {
        let mut decoded = hex::decode(input.trim().trim_start_matches("0x"))
            .map_err(|e| format!("private key is not hex: {e}"))?;
        let result = Self::from_slice(&decoded);
        decoded.zeroize();
        result
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(format!(
                "private key must be {SECRET_KEY_LEN} bytes, got {}",
                bytes.len()
            ));
        }
        SigningKey::from_slice(bytes).map_err(|_| "private key is not a valid secp256k1 scalar".to_string())?;
        let mut key = [0u8; SECRET_KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.0
    }

    pub fn signing_key(&self) -> Result<SigningKey, ChainError> {
        SigningKey::from_slice(&self.0).map_err(|e| ChainError::Signing(e.to_string()))
    }

    /// Address controlled by this key.
    pub fn address(&self) -> Result<Address, ChainError> {
        Ok(address_of(&self.signing_key()?))
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Wallet metadata. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralWallet {
    pub address: Address,
    pub network_name: String,
    pub created_at: DateTime<Utc>,
}

/// On-disk layout of one wallet file.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletRecord {
    address: String,
    network_name: String,
    created_at: DateTime<Utc>,
    private_key: String,
}

impl Drop for WalletRecord {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// The listing path deserializes into this, so secrets are never parsed.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletMetadataRecord {
    address: String,
    network_name: String,
    created_at: DateTime<Utc>,
}

fn same_network(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

// ---------------------------------------------------------------------------
// EphemeralKeyStore
// ---------------------------------------------------------------------------

/// One owner-only JSON file per ephemeral wallet, named by lowercase hex
/// address without the `0x` prefix plus a `.json` extension.
#[derive(Debug, Clone)]
pub struct EphemeralKeyStore {
    dir: PathBuf,
}

impl EphemeralKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, address: &Address) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", wallet_file_stem(address)))
    }

    fn ensure_dir(&self) -> Result<(), ChainError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ChainError::storage(&self.dir, e))?;

        // Restrict the directory to owner-only on Unix (0o700 = rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| ChainError::storage(&self.dir, e))?;
        }
        Ok(())
    }

    /// Write `record` to `path` via a temp file in the same directory, so an
    /// interrupted write never leaves a partial record under the final name.
    fn write_atomic(&self, path: &Path, record: &WalletRecord) -> Result<(), ChainError> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".wallet-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| ChainError::storage(&self.dir, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|e| ChainError::storage(path, e))?;
        }

        let mut json = serde_json::to_vec_pretty(record).map_err(|e| ChainError::storage(path, e))?;
        let written = tmp.write_all(&json).and_then(|_| tmp.as_file().sync_all());
        json.zeroize();
        written.map_err(|e| ChainError::storage(path, e))?;

        tmp.persist_noclobber(path)
            .map_err(|e| ChainError::storage(path, e.error))?;
        Ok(())
    }

    /// Create a fresh key pair and persist it.
    pub fn generate(&self, network_tag: &str) -> Result<EphemeralWallet, ChainError> {
        self.ensure_dir()?;

        let secret = SecretKey::random();
        let address = secret.address()?;
        let wallet = EphemeralWallet {
            address,
            network_name: network_tag.to_string(),
            created_at: Utc::now(),
        };
        let record = WalletRecord {
            address: address.to_string(),
            network_name: wallet.network_name.clone(),
            created_at: wallet.created_at,
            private_key: hex::encode(secret.as_bytes()),
        };

        let path = self.record_path(&address);
        self.write_atomic(&path, &record)?;

        info!(address = %address, network = %network_tag, "ephemeral wallet generated");
        Ok(wallet)
    }

    /// All readable wallets, newest first. Corrupt or unreadable records are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<EphemeralWallet>, ChainError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ChainError::storage(&self.dir, e)),
        };

        let mut wallets = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match Self::read_metadata(&path) {
                Ok(wallet) => wallets.push(wallet),
                Err(e) => warn!(path = %path.display(), "skipping wallet record: {e}"),
            }
        }

        wallets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(wallets)
    }

    fn read_metadata(path: &Path) -> Result<EphemeralWallet, ChainError> {
        let json = std::fs::read_to_string(path).map_err(|e| ChainError::storage(path, e))?;
        let meta: WalletMetadataRecord =
            serde_json::from_str(&json).map_err(|e| ChainError::corrupt(path, e))?;
        let address = parse_address(&meta.address).map_err(|e| ChainError::corrupt(path, e))?;

        let expected_stem = wallet_file_stem(&address);
        if path.file_stem().and_then(|s| s.to_str()) != Some(expected_stem.as_str()) {
            return Err(ChainError::corrupt(path, "file name does not match stored address"));
        }
        Ok(EphemeralWallet {
            address,
            network_name: meta.network_name,
            created_at: meta.created_at,
        })
    }

    /// Load the private key for `address` created for `network_tag`.
    pub fn load_secret(&self, address: &Address, network_tag: &str) -> Result<SecretKey, ChainError> {
        let path = self.record_path(address);
        let not_found = || ChainError::NotFound {
            address: address.to_string(),
            network: network_tag.to_string(),
        };

        let mut json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(ChainError::storage(&path, e)),
        };
        let parsed: Result<WalletRecord, _> = serde_json::from_str(&json);
        json.zeroize();
        let record = parsed.map_err(|e| ChainError::corrupt(&path, e))?;

        if !same_network(&record.network_name, network_tag) {
            return Err(not_found());
        }
        if record.private_key.is_empty() {
            return Err(ChainError::corrupt(&path, "record has no key material"));
        }

        let secret = SecretKey::from_hex(&record.private_key).map_err(|e| ChainError::corrupt(&path, e))?;
        let derived = secret.address().map_err(|e| ChainError::corrupt(&path, e))?;
        if derived != *address {
            return Err(ChainError::corrupt(
                &path,
                format!("stored key controls {derived}, not {address}"),
            ));
        }
        Ok(secret)
    }

    /// Remove the record. `Ok(false)` when no record exists for this address
    /// and network. A record too damaged to show its network tag is removed
    /// on request, since nothing else can clear it.
    pub fn delete(&self, address: &Address, network_tag: &str) -> Result<bool, ChainError> {
        let path = self.record_path(address);
        if !path.exists() {
            return Ok(false);
        }

        match Self::read_metadata(&path) {
            Ok(wallet) if !same_network(&wallet.network_name, network_tag) => return Ok(false),
            Ok(_) => {}
            Err(ChainError::CorruptRecord { reason, .. }) => {
                warn!(address = %address, "removing corrupt wallet record: {reason}");
            }
            Err(e) => return Err(e),
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(address = %address, network = %network_tag, "ephemeral wallet deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChainError::storage(&path, e)),
        }
    }

    /// Whether a record file exists for `address`, regardless of network.
    pub fn exists(&self, address: &Address) -> bool {
        self.record_path(address).exists()
    }
}
