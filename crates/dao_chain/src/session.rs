//! Progress of one DAO deployment across calls.
//!
//! The sequencer itself is stateless; the dispatch layer persists a
//! [`DeploymentSession`] between steps and feeds it back in.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contracts::ContractRole;
use crate::error::ChainError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum DeploymentStage {
    AwaitingToken,
    AwaitingTimelock {
        token: Address,
    },
    AwaitingGovernor {
        token: Address,
        timelock: Address,
    },
    Complete {
        token: Address,
        timelock: Address,
        governor: Address,
    },
}

impl DeploymentStage {
    /// Role whose address is needed to advance, `None` once complete.
    pub fn next_role(&self) -> Option<ContractRole> {
        match self {
            Self::AwaitingToken => Some(ContractRole::Token),
            Self::AwaitingTimelock { .. } => Some(ContractRole::Timelock),
            Self::AwaitingGovernor { .. } => Some(ContractRole::Governor),
            Self::Complete { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSession {
    pub id: Uuid,
    pub network: String,
    pub sender: Address,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub stage: DeploymentStage,
}

impl DeploymentSession {
    pub fn new(network: impl Into<String>, sender: Address) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            network: network.into(),
            sender,
            created_at: now,
            updated_at: now,
            stage: DeploymentStage::AwaitingToken,
        }
    }

    pub fn next_role(&self) -> Option<ContractRole> {
        self.stage.next_role()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.stage, DeploymentStage::Complete { .. })
    }

    /// Advance after the caller confirmed that `role` was deployed at
    /// `address`. Steps must be recorded in order, with non-zero addresses.
    pub fn record_deployed(&mut self, role: ContractRole, address: Address) -> Result<(), ChainError> {
        if address.is_zero() {
            return Err(ChainError::InvalidAddress {
                input: address.to_string(),
                reason: format!("{role} cannot be deployed at the zero address"),
            });
        }

        let next = match (&self.stage, role) {
            (DeploymentStage::AwaitingToken, ContractRole::Token) => {
                DeploymentStage::AwaitingTimelock { token: address }
            }
            (DeploymentStage::AwaitingTimelock { token }, ContractRole::Timelock) => {
                DeploymentStage::AwaitingGovernor {
                    token: *token,
                    timelock: address,
                }
            }
            (DeploymentStage::AwaitingGovernor { token, timelock }, ContractRole::Governor) => {
                DeploymentStage::Complete {
                    token: *token,
                    timelock: *timelock,
                    governor: address,
                }
            }
            (stage, role) => {
                let expected = stage
                    .next_role()
                    .map_or_else(|| "nothing (deployment complete)".to_string(), |r| r.to_string());
                return Err(ChainError::InvalidConfig(format!(
                    "session {} expects {expected} next, not {role}",
                    self.id
                )));
            }
        };

        self.stage = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
