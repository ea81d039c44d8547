use std::path::{Path, PathBuf};

use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contracts::ContractRole;
use crate::error::ChainError;

/// Compiled contract ABI and creation bytecode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: serde_json::Value,
    pub bytecode: Bytes,
}

/// `bytecode` is either a hex string (Hardhat) or `{ "object": "0x..." }` (Foundry).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object { object: String },
}

#[derive(Deserialize)]
struct RawArtifact {
    #[serde(default)]
    abi: serde_json::Value,
    bytecode: Option<RawBytecode>,
}

/// Loads compiled artifacts from `<dir>/<ContractName>.json`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load an artifact by contract name.
    ///
    /// A missing file, a missing `bytecode` field or an empty/`0x` bytecode all
    /// mean the contract was never compiled and fail with `MissingBytecode`.
    pub fn load(&self, name: &str) -> Result<ContractArtifact, ChainError> {
        let path = self.dir.join(format!("{name}.json"));
        let missing = || ChainError::MissingBytecode {
            contract: name.to_string(),
        };

        if !path.exists() {
            debug!(path = %path.display(), "artifact file not found");
            return Err(missing());
        }
        let json = std::fs::read_to_string(&path).map_err(|e| ChainError::storage(&path, e))?;
        let raw: RawArtifact = serde_json::from_str(&json)
            .map_err(|e| ChainError::InvalidConfig(format!("artifact {name} is not valid JSON: {e}")))?;

        let hex_code = match raw.bytecode {
            Some(RawBytecode::Hex(s)) | Some(RawBytecode::Object { object: s }) => s,
            None => return Err(missing()),
        };
        let stripped = hex_code.trim().trim_start_matches("0x");
        if stripped.is_empty() {
            return Err(missing());
        }
        let bytecode = hex::decode(stripped).map_err(|e| {
            ChainError::InvalidConfig(format!("artifact {name} has malformed bytecode: {e}"))
        })?;

        Ok(ContractArtifact {
            name: name.to_string(),
            abi: raw.abi,
            bytecode: Bytes::from(bytecode),
        })
    }

    /// Load the artifact for one of the DAO roles.
    pub fn load_role(&self, role: ContractRole) -> Result<ContractArtifact, ChainError> {
        self.load(role.artifact_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("{name}.json")), body).unwrap();
    }

    #[test]
    fn loads_hardhat_style_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "DAOToken", r#"{ "abi": [], "bytecode": "0x6080604052" }"#);

        let artifact = ArtifactStore::new(dir.path()).load_role(ContractRole::Token).unwrap();
        assert_eq!(artifact.name, "DAOToken");
        assert_eq!(artifact.bytecode.as_ref(), &[0x60, 0x80, 0x60, 0x40, 0x52]);
    }

    #[test]
    fn loads_foundry_style_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "DAOTimelock",
            r#"{ "abi": [], "bytecode": { "object": "0x6001" } }"#,
        );

        let artifact = ArtifactStore::new(dir.path()).load("DAOTimelock").unwrap();
        assert_eq!(artifact.bytecode.len(), 2);
    }

    #[test]
    fn missing_file_is_missing_bytecode() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactStore::new(dir.path()).load("DAOGovernor").unwrap_err();
        assert!(matches!(err, ChainError::MissingBytecode { .. }));
    }

    #[test]
    fn empty_bytecode_is_missing_bytecode() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "DAOToken", r#"{ "abi": [], "bytecode": "0x" }"#);
        let err = ArtifactStore::new(dir.path()).load("DAOToken").unwrap_err();
        assert!(matches!(err, ChainError::MissingBytecode { .. }));
    }

    #[test]
    fn malformed_hex_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "DAOToken", r#"{ "abi": [], "bytecode": "0xzz" }"#);
        let err = ArtifactStore::new(dir.path()).load("DAOToken").unwrap_err();
        assert!(matches!(err, ChainError::InvalidConfig(_)));
    }
}
