use std::collections::HashMap;

use dao_core::{DeployerConfig, validate_url};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChainError;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("placeholder regex is valid"));

/// Static description of an EVM network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub name: String,
    pub display_name: String,
    pub chain_id: u64,
    pub native_symbol: String,
    pub native_decimals: u8,
    pub supports_eip1559: bool,
    /// May contain `${NAME}` placeholders.
    pub rpc_url: String,
    pub explorer_url: String,
}

/// A network ready for RPC use: placeholders substituted, overrides applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedNetwork {
    pub name: String,
    pub chain_id: u64,
    pub rpc_endpoint: String,
    pub native_currency_decimals: u8,
    pub native_symbol: String,
    pub supports_eip1559: bool,
    pub explorer_url: String,
}

/// Resolves a logical network name to an endpoint plus chain metadata.
pub trait NetworkResolver: Send + Sync {
    fn resolve(&self, network_name: &str) -> Result<ResolvedNetwork, ChainError>;
}

fn network(
    name: &str,
    display_name: &str,
    chain_id: u64,
    native_symbol: &str,
    supports_eip1559: bool,
    rpc_url: &str,
    explorer_url: &str,
) -> NetworkInfo {
    NetworkInfo {
        name: name.to_string(),
        display_name: display_name.to_string(),
        chain_id,
        native_symbol: native_symbol.to_string(),
        native_decimals: 18,
        supports_eip1559,
        rpc_url: rpc_url.to_string(),
        explorer_url: explorer_url.to_string(),
    }
}

/// Built-in network table.
pub fn builtin_networks() -> Vec<NetworkInfo> {
    vec![
        network("ethereum", "Ethereum Mainnet", 1, "ETH", true, "https://eth.llamarpc.com", "https://etherscan.io"),
        network("sepolia", "Sepolia Testnet", 11_155_111, "ETH", true, "https://ethereum-sepolia-rpc.publicnode.com", "https://sepolia.etherscan.io"),
        network("holesky", "Holesky Testnet", 17_000, "ETH", true, "https://ethereum-holesky-rpc.publicnode.com", "https://holesky.etherscan.io"),
        network("polygon", "Polygon PoS", 137, "POL", true, "https://polygon-rpc.com", "https://polygonscan.com"),
        network("amoy", "Polygon Amoy Testnet", 80_002, "POL", true, "https://rpc-amoy.polygon.technology", "https://amoy.polygonscan.com"),
        network("base", "Base Mainnet", 8453, "ETH", true, "https://mainnet.base.org", "https://basescan.org"),
        network("base-sepolia", "Base Sepolia Testnet", 84_532, "ETH", true, "https://sepolia.base.org", "https://sepolia.basescan.org"),
        network("arbitrum", "Arbitrum One", 42_161, "ETH", true, "https://arb1.arbitrum.io/rpc", "https://arbiscan.io"),
        network("arbitrum-sepolia", "Arbitrum Sepolia Testnet", 421_614, "ETH", true, "https://sepolia-rollup.arbitrum.io/rpc", "https://sepolia.arbiscan.io"),
        network("optimism", "OP Mainnet", 10, "ETH", true, "https://mainnet.optimism.io", "https://optimistic.etherscan.io"),
        network("optimism-sepolia", "OP Sepolia Testnet", 11_155_420, "ETH", true, "https://sepolia.optimism.io", "https://sepolia-optimism.etherscan.io"),
        network("bsc", "BNB Smart Chain", 56, "BNB", false, "https://bsc-dataseed.bnbchain.org", "https://bscscan.com"),
        network("avalanche", "Avalanche C-Chain", 43_114, "AVAX", true, "https://api.avax.network/ext/bc/C/rpc", "https://snowtrace.io"),
        network("gnosis", "Gnosis Chain", 100, "xDAI", true, "https://rpc.gnosischain.com", "https://gnosisscan.io"),
        network("localhost", "Local Dev Node", 31_337, "ETH", true, "http://127.0.0.1:8545", ""),
    ]
}

pub(crate) fn canonical_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "mainnet" | "eth" => "ethereum".into(),
        "matic" => "polygon".into(),
        "arbitrum-one" => "arbitrum".into(),
        "op" => "optimism".into(),
        "bnb" => "bsc".into(),
        "avax" => "avalanche".into(),
        "anvil" | "hardhat" => "localhost".into(),
        _ => lower,
    }
}

/// Substitute `${NAME}` tokens in `template` using `lookup`.
///
/// Fails naming the first placeholder the lookup cannot resolve; the
/// template is never returned with a placeholder still inside.
pub fn resolve_placeholders(
    template: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ChainError> {
    let mut missing = None;
    let resolved = PLACEHOLDER_RE.replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match lookup(name).filter(|v| !v.is_empty()) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ChainError::InvalidConfig(format!(
            "no value for placeholder ${{{name}}}; set it in placeholder_values or the environment"
        ))),
        None => Ok(resolved.into_owned()),
    }
}

// ---------------------------------------------------------------------------
// NetworkRegistry
// ---------------------------------------------------------------------------

/// Built-in networks plus per-network RPC overrides from configuration.
///
/// Placeholder values are looked up in saved configuration first, then in
/// the process environment.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    networks: HashMap<String, NetworkInfo>,
    rpc_overrides: HashMap<String, String>,
    placeholder_values: HashMap<String, String>,
}

impl NetworkRegistry {
    /// Registry with the built-in table and no overrides.
    pub fn with_defaults() -> Self {
        let networks = builtin_networks()
            .into_iter()
            .map(|n| (n.name.clone(), n))
            .collect();
        Self {
            networks,
            rpc_overrides: HashMap::new(),
            placeholder_values: HashMap::new(),
        }
    }

    pub fn from_config(config: &DeployerConfig) -> Self {
        let mut registry = Self::with_defaults();
        registry.rpc_overrides = config
            .rpc_overrides
            .iter()
            .map(|(k, v)| (canonical_name(k), v.clone()))
            .collect();
        registry.placeholder_values = config.placeholder_values.clone();
        registry
    }

    /// Add or replace a network definition.
    pub fn register(&mut self, info: NetworkInfo) {
        self.networks.insert(canonical_name(&info.name), info);
    }

    /// Override the RPC URL template for a network.
    pub fn set_rpc_override(&mut self, network_name: &str, url: String) {
        self.rpc_overrides.insert(canonical_name(network_name), url);
    }

    pub fn set_placeholder(&mut self, name: &str, value: String) {
        self.placeholder_values.insert(name.to_string(), value);
    }

    pub fn get(&self, network_name: &str) -> Option<&NetworkInfo> {
        self.networks.get(&canonical_name(network_name))
    }

    /// Names of all known networks, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.networks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn lookup_placeholder(&self, name: &str) -> Option<String> {
        self.placeholder_values
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl NetworkResolver for NetworkRegistry {
    fn resolve(&self, network_name: &str) -> Result<ResolvedNetwork, ChainError> {
        let key = canonical_name(network_name);
        let info = self
            .networks
            .get(&key)
            .ok_or_else(|| ChainError::UnsupportedNetwork {
                network: network_name.to_string(),
            })?;

        let template = self.rpc_overrides.get(&key).unwrap_or(&info.rpc_url);
        let rpc_endpoint = resolve_placeholders(template, |name| self.lookup_placeholder(name))?;
        if !validate_url(&rpc_endpoint) {
            return Err(ChainError::InvalidConfig(format!(
                "RPC endpoint for {} is not a valid http(s) URL",
                info.name
            )));
        }

        debug!(network = %info.name, chain_id = info.chain_id, "network resolved");
        Ok(ResolvedNetwork {
            name: info.name.clone(),
            chain_id: info.chain_id,
            rpc_endpoint,
            native_currency_decimals: info.native_decimals,
            native_symbol: info.native_symbol.clone(),
            supports_eip1559: info.supports_eip1559,
            explorer_url: info.explorer_url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_chain_ids() {
        let registry = NetworkRegistry::with_defaults();
        assert_eq!(registry.resolve("sepolia").unwrap().chain_id, 11_155_111);
        assert_eq!(registry.resolve("polygon").unwrap().chain_id, 137);
        assert_eq!(registry.resolve("base").unwrap().chain_id, 8453);
    }

    #[test]
    fn aliases_and_case_are_normalised() {
        let registry = NetworkRegistry::with_defaults();
        assert_eq!(registry.resolve("Mainnet").unwrap().name, "ethereum");
        assert_eq!(registry.resolve("MATIC").unwrap().chain_id, 137);
    }

    #[test]
    fn unknown_network_is_unsupported() {
        let registry = NetworkRegistry::with_defaults();
        let err = registry.resolve("narnia").unwrap_err();
        assert!(matches!(err, ChainError::UnsupportedNetwork { ref network } if network == "narnia"));
    }

    #[test]
    fn builtin_rpc_urls_are_valid() {
        for info in builtin_networks() {
            assert!(validate_url(&info.rpc_url), "bad RPC URL for {}", info.name);
            assert_eq!(info.native_decimals, 18);
        }
    }

    #[test]
    fn chain_ids_are_unique() {
        let mut ids: Vec<u64> = builtin_networks().iter().map(|n| n.chain_id).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len());
    }

    #[test]
    fn override_with_saved_placeholder_is_substituted() {
        let mut registry = NetworkRegistry::with_defaults();
        registry.set_rpc_override(
            "sepolia",
            "https://sepolia.infura.io/v3/${DAO_TEST_INFURA_KEY}".into(),
        );
        registry.set_placeholder("DAO_TEST_INFURA_KEY", "k123".into());

        let resolved = registry.resolve("sepolia").unwrap();
        assert_eq!(resolved.rpc_endpoint, "https://sepolia.infura.io/v3/k123");
        assert_eq!(resolved.chain_id, 11_155_111);
    }

    #[test]
    fn unresolved_placeholder_is_an_error() {
        let mut registry = NetworkRegistry::with_defaults();
        registry.set_rpc_override(
            "base",
            "https://base.example/${DAO_TEST_PLACEHOLDER_NEVER_SET}".into(),
        );
        let err = registry.resolve("base").unwrap_err();
        assert!(err.to_string().contains("DAO_TEST_PLACEHOLDER_NEVER_SET"));
    }

    #[test]
    fn resolve_placeholders_uses_lookup() {
        let out = resolve_placeholders("https://${HOST}/v1/${KEY}", |name| match name {
            "HOST" => Some("rpc.example.com".into()),
            "KEY" => Some("abc".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(out, "https://rpc.example.com/v1/abc");
    }

    #[test]
    fn resolve_placeholders_treats_empty_as_missing() {
        let result = resolve_placeholders("https://x/${KEY}", |_| Some(String::new()));
        assert!(result.is_err());
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        let out = resolve_placeholders("https://polygon-rpc.com", |_| None).unwrap();
        assert_eq!(out, "https://polygon-rpc.com");
    }

    #[test]
    fn registered_network_resolves() {
        let mut registry = NetworkRegistry::with_defaults();
        registry.register(network(
            "devnet",
            "Private Devnet",
            424_242,
            "DEV",
            false,
            "http://10.0.0.5:8545",
            "",
        ));

        assert!(registry.names().contains(&"devnet"));
        assert_eq!(registry.get("DevNet").unwrap().display_name, "Private Devnet");
        let resolved = registry.resolve("devnet").unwrap();
        assert_eq!(resolved.chain_id, 424_242);
        assert!(!resolved.supports_eip1559);
        assert_eq!(resolved.native_symbol, "DEV");
    }

    #[test]
    fn from_config_applies_overrides() {
        let mut config = DeployerConfig::default();
        config
            .rpc_overrides
            .insert("Polygon".into(), "https://my-node.example.com".into());
        let registry = NetworkRegistry::from_config(&config);
        assert_eq!(
            registry.resolve("polygon").unwrap().rpc_endpoint,
            "https://my-node.example.com"
        );
    }
}
