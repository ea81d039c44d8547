use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const ENV_DATA_DIR: &str = "DAO_DEPLOYER_DATA_DIR";
const ENV_GAS_MULTIPLIER: &str = "DAO_DEPLOYER_GAS_MULTIPLIER";
const ENV_CONFIRMATION_TIMEOUT: &str = "DAO_DEPLOYER_CONFIRMATION_TIMEOUT";

const EPHEMERAL_WALLETS_DIR: &str = "ephemeral-wallets";

// ---------------------------------------------------------------------------
// DeployerConfig
// ---------------------------------------------------------------------------

/// Deployer configuration stored at `~/.dao-deployer/config.json`.
///
/// Passed explicitly into the key store, gas estimator and chain client at
/// startup; nothing below this struct reads the environment on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Root for ephemeral wallet records and logs.
    pub data_directory: PathBuf,
    /// Directory holding compiled contract artifacts. Defaults to
    /// `<data_directory>/artifacts` when unset.
    pub artifacts_directory: Option<PathBuf>,

    // Gas
    pub default_gas_multiplier: f64,
    pub network_gas_multipliers: HashMap<String, f64>,

    // RPC
    pub rpc_timeout_secs: u64,
    pub confirmation_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    pub rpc_overrides: HashMap<String, String>,
    /// Saved values for `${NAME}` placeholders in RPC URL templates.
    pub placeholder_values: HashMap<String, String>,

    // General
    pub log_level: String,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            data_directory: Self::base_dir().unwrap_or_else(|_| PathBuf::from(".dao-deployer")),
            artifacts_directory: None,
            default_gas_multiplier: 1.2,
            network_gas_multipliers: HashMap::new(),
            rpc_timeout_secs: 30,
            confirmation_timeout_secs: 120,
            receipt_poll_interval_ms: 2_000,
            rpc_overrides: HashMap::new(),
            placeholder_values: HashMap::new(),
            log_level: "info".into(),
        }
    }
}

impl DeployerConfig {
    /// Returns the base config directory: `~/.dao-deployer/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".dao-deployer"))
    }

    /// Returns the config file path: `~/.dao-deployer/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Configuration rooted at `data_directory`, everything else default.
    pub fn with_data_directory(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
            ..Self::default()
        }
    }

    /// Directory holding one record per ephemeral wallet.
    pub fn ephemeral_wallets_dir(&self) -> PathBuf {
        self.data_directory.join(EPHEMERAL_WALLETS_DIR)
    }

    /// Directory for rolling log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_directory.join("logs")
    }

    /// Directory holding compiled contract artifacts.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.artifacts_directory
            .clone()
            .unwrap_or_else(|| self.data_directory.join("artifacts"))
    }

    /// Loads config from the default location, applying environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from_path(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a specific file path, creating a default file if missing.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Save config to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Apply `DAO_DEPLOYER_*` environment variables on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup. Unparseable values are ignored
    /// with a warning so a typo never silently zeroes a setting.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.is_empty()) {
            self.data_directory = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_GAS_MULTIPLIER) {
            match raw.trim().parse::<f64>() {
                Ok(m) => self.default_gas_multiplier = m,
                Err(_) => warn!(value = %raw, "ignoring unparseable {ENV_GAS_MULTIPLIER}"),
            }
        }
        if let Some(raw) = lookup(ENV_CONFIRMATION_TIMEOUT) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.confirmation_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "ignoring unparseable {ENV_CONFIRMATION_TIMEOUT}"),
            }
        }
    }

    /// Reject settings the engines cannot work with.
    pub fn validate(&self) -> Result<()> {
        check_multiplier("default_gas_multiplier", self.default_gas_multiplier)?;
        for (network, m) in &self.network_gas_multipliers {
            check_multiplier(&format!("network_gas_multipliers.{network}"), *m)?;
        }
        for (network, rpc) in &self.rpc_overrides {
            if !validate_url(rpc) {
                anyhow::bail!("invalid RPC override for {network}: {rpc}");
            }
        }
        if self.receipt_poll_interval_ms == 0 {
            anyhow::bail!("receipt_poll_interval_ms must be greater than zero");
        }
        Ok(())
    }
}

fn check_multiplier(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 1.0 {
        anyhow::bail!("{name} must be a finite number >= 1.0, got {value}");
    }
    Ok(())
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            (scheme == "http" || scheme == "https") && parsed.host().is_some()
        }
        Err(_) => false,
    }
}
