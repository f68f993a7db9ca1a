//! Node query capability consumed by the resolver and the scrape handlers.
//!
//! Amounts are parsed from the chain's decimal strings into `f64` at the
//! edge; everything downstream works with raw (unscaled) floating point
//! amounts in the chain's smallest unit.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by node queries.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Node returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed node response: {0}")]
    Malformed(String),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),
}

impl NodeError {
    /// Short classification used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Transport { .. } => "transport",
            NodeError::Status { .. } => "status",
            NodeError::Malformed(_) => "malformed",
            NodeError::Timeout(_) => "timeout",
        }
    }
}

/// A single amount of one denomination.
#[derive(Debug, Clone, PartialEq)]
pub struct Coin {
    pub denom: String,
    /// Raw amount in the denomination's smallest unit.
    pub amount: f64,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: f64) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

/// One unit of a currency, e.g. `uatom` with exponent 0 or `atom` with 6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenomUnit {
    pub denom: String,
    pub exponent: u32,
}

/// A currency entry of the node's denomination metadata registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenomMetadata {
    /// Smallest on-chain unit.
    pub base: String,
    /// Unit intended for display.
    pub display: String,
    pub denom_units: Vec<DenomUnit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delegation {
    pub validator_address: String,
    pub shares: f64,
    pub balance: Coin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnbondingDelegation {
    pub validator_address: String,
    /// Sum of the balances of all pending entries.
    pub balance: f64,
    pub entries: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelegationReward {
    pub validator_address: String,
    pub reward: Vec<Coin>,
}

/// Validator bonding status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BondStatus {
    #[default]
    Unspecified,
    Unbonded,
    Unbonding,
    Bonded,
}

impl BondStatus {
    /// Parse the protobuf enum name used by the REST gateway.
    pub fn from_name(name: &str) -> Self {
        match name {
            "BOND_STATUS_UNBONDED" => BondStatus::Unbonded,
            "BOND_STATUS_UNBONDING" => BondStatus::Unbonding,
            "BOND_STATUS_BONDED" => BondStatus::Bonded,
            _ => BondStatus::Unspecified,
        }
    }

    /// Numeric value matching the protobuf enum.
    pub fn as_value(&self) -> f64 {
        match self {
            BondStatus::Unspecified => 0.0,
            BondStatus::Unbonded => 1.0,
            BondStatus::Unbonding => 2.0,
            BondStatus::Bonded => 3.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validator {
    pub operator_address: String,
    pub moniker: String,
    pub jailed: bool,
    pub status: BondStatus,
    /// Raw bonded tokens.
    pub tokens: f64,
    pub delegator_shares: f64,
    pub commission_rate: f64,
    pub min_self_delegation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakingPool {
    pub bonded_tokens: f64,
    pub not_bonded_tokens: f64,
}

/// Queries the exporter issues against a chain node.
///
/// Each method is an independent fallible round trip. Implementations must
/// be cheap to share between concurrent scrapes.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Full denomination metadata registry, in node order.
    async fn denoms_metadata(&self) -> Result<Vec<DenomMetadata>, NodeError>;

    async fn balances(&self, address: &str) -> Result<Vec<Coin>, NodeError>;

    async fn delegations(&self, address: &str) -> Result<Vec<Delegation>, NodeError>;

    async fn unbonding_delegations(
        &self,
        address: &str,
    ) -> Result<Vec<UnbondingDelegation>, NodeError>;

    async fn delegation_rewards(&self, address: &str)
    -> Result<Vec<DelegationReward>, NodeError>;

    async fn validator(&self, operator: &str) -> Result<Validator, NodeError>;

    async fn validator_commission(&self, operator: &str) -> Result<Vec<Coin>, NodeError>;

    async fn validator_outstanding_rewards(&self, operator: &str)
    -> Result<Vec<Coin>, NodeError>;

    /// Up to `limit` validators in node order.
    async fn validators(&self, limit: u64) -> Result<Vec<Validator>, NodeError>;

    async fn staking_pool(&self) -> Result<StakingPool, NodeError>;

    async fn community_pool(&self) -> Result<Vec<Coin>, NodeError>;

    async fn supply_of(&self, denom: &str) -> Result<Coin, NodeError>;
}

/// Parse a chain amount (`Int` or `Dec` string) into a raw `f64`.
pub fn parse_amount(value: &str) -> Result<f64, NodeError> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| NodeError::Malformed(format!("invalid amount '{}'", value)))?;

    if !parsed.is_finite() {
        return Err(NodeError::Malformed(format!(
            "non-finite amount '{}'",
            value
        )));
    }

    Ok(parsed)
}
