//! DAO contract roles, deployment parameters and constructor encoding.

use std::collections::BTreeSet;
use std::fmt;

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::error::ChainError;
use crate::units::{parse_address, to_minimal_units};

/// Voting tokens are always 18-decimal ERC20Votes.
pub const TOKEN_DECIMALS: u8 = 18;

/// The three contracts of a DAO deployment, in deployment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContractRole {
    Token,
    Timelock,
    Governor,
}

impl ContractRole {
    pub const ALL: [ContractRole; 3] = [Self::Token, Self::Timelock, Self::Governor];

    /// 1-based position in the deployment sequence.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Token => 1,
            Self::Timelock => 2,
            Self::Governor => 3,
        }
    }

    /// Artifact file name (without `.json`) holding this contract's bytecode.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            Self::Token => "DAOToken",
            Self::Timelock => "DAOTimelock",
            Self::Governor => "DAOGovernor",
        }
    }

    /// Roles whose deployed addresses this role's constructor consumes.
    pub fn dependencies(&self) -> BTreeSet<ContractRole> {
        match self {
            Self::Token | Self::Timelock => BTreeSet::new(),
            Self::Governor => BTreeSet::from([Self::Token, Self::Timelock]),
        }
    }
}

impl fmt::Display for ContractRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Token => "Token",
            Self::Timelock => "Timelock",
            Self::Governor => "Governor",
        };
        f.write_str(label)
    }
}

/// Operator-supplied parameters for the whole DAO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaoConfig {
    pub token_name: String,
    pub token_symbol: String,
    /// Whole tokens, display form (`"1000000"`).
    pub initial_supply: String,
    /// Receives the initial supply; the sender when unset.
    pub initial_recipient: Option<String>,

    pub timelock_min_delay_secs: u64,
    /// Empty by default: the governor is granted the proposer role afterwards.
    pub proposers: Vec<String>,
    /// Defaults to the zero address, which opens execution to anyone.
    pub executors: Vec<String>,

    pub governor_name: String,
    pub voting_delay_blocks: u64,
    pub voting_period_blocks: u64,
    /// Whole tokens, display form.
    pub proposal_threshold: String,
    pub quorum_percent: u8,
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            token_name: String::new(),
            token_symbol: String::new(),
            initial_supply: "1000000".into(),
            initial_recipient: None,
            timelock_min_delay_secs: 3_600,
            proposers: Vec::new(),
            executors: vec![Address::ZERO.to_string()],
            governor_name: String::new(),
            voting_delay_blocks: 7_200,
            voting_period_blocks: 50_400,
            proposal_threshold: "0".into(),
            quorum_percent: 4,
        }
    }
}

impl DaoConfig {
    /// Reject parameters that would produce an unusable DAO.
    pub fn validate(&self) -> Result<(), ChainError> {
        let bad = |msg: String| Err(ChainError::InvalidConfig(msg));

        if self.token_name.trim().is_empty() {
            return bad("token name must not be empty".into());
        }
        if self.token_symbol.trim().is_empty() {
            return bad("token symbol must not be empty".into());
        }
        if self.initial_supply()?.is_zero() {
            return bad("initial supply must be greater than zero".into());
        }
        self.proposal_threshold()?;
        if !(1..=100).contains(&self.quorum_percent) {
            return bad(format!(
                "quorum percent must be between 1 and 100, got {}",
                self.quorum_percent
            ));
        }
        if self.voting_period_blocks == 0 {
            return bad("voting period must be at least one block".into());
        }
        if let Some(recipient) = &self.initial_recipient {
            parse_address(recipient)?;
        }
        for addr in self.proposers.iter().chain(&self.executors) {
            parse_address(addr)?;
        }
        Ok(())
    }

    /// Governor name, falling back to `"<token name> Governor"`.
    pub fn governor_name(&self) -> String {
        if self.governor_name.trim().is_empty() {
            format!("{} Governor", self.token_name.trim())
        } else {
            self.governor_name.clone()
        }
    }

    pub fn initial_supply(&self) -> Result<U256, ChainError> {
        to_minimal_units(&self.initial_supply, TOKEN_DECIMALS)
    }

    pub fn proposal_threshold(&self) -> Result<U256, ChainError> {
        to_minimal_units(&self.proposal_threshold, TOKEN_DECIMALS)
    }
}

fn parse_all(addresses: &[String]) -> Result<Vec<Address>, ChainError> {
    addresses.iter().map(|a| parse_address(a)).collect()
}

/// `constructor(string name, string symbol, uint256 initialSupply, address initialRecipient)`
pub fn token_constructor_args(config: &DaoConfig, sender: Address) -> Result<Vec<u8>, ChainError> {
    let recipient = match &config.initial_recipient {
        Some(r) => parse_address(r)?,
        None => sender,
    };
    Ok((
        config.token_name.clone(),
        config.token_symbol.clone(),
        config.initial_supply()?,
        recipient,
    )
        .abi_encode_params())
}

/// `constructor(uint256 minDelay, address[] proposers, address[] executors, address admin)`
pub fn timelock_constructor_args(
    config: &DaoConfig,
    admin: Address,
) -> Result<Vec<u8>, ChainError> {
    Ok((
        U256::from(config.timelock_min_delay_secs),
        parse_all(&config.proposers)?,
        parse_all(&config.executors)?,
        admin,
    )
        .abi_encode_params())
}

/// `constructor(address token, address timelock, string name, uint256 votingDelay,
/// uint256 votingPeriod, uint256 proposalThreshold, uint256 quorumPercent)`
pub fn governor_constructor_args(
    config: &DaoConfig,
    token: Address,
    timelock: Address,
) -> Result<Vec<u8>, ChainError> {
    Ok((
        token,
        timelock,
        config.governor_name(),
        U256::from(config.voting_delay_blocks),
        U256::from(config.voting_period_blocks),
        config.proposal_threshold()?,
        U256::from(config.quorum_percent),
    )
        .abi_encode_params())
}
