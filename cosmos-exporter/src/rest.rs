//! [`NodeClient`] implementation over the Cosmos SDK REST (LCD) gateway.
//!
//! Endpoints used:
//!
//! ```text
//! GET /cosmos/bank/v1beta1/denoms_metadata
//! GET /cosmos/bank/v1beta1/balances/{address}
//! GET /cosmos/bank/v1beta1/supply/by_denom?denom={denom}
//! GET /cosmos/staking/v1beta1/delegations/{address}
//! GET /cosmos/staking/v1beta1/delegators/{address}/unbonding_delegations
//! GET /cosmos/staking/v1beta1/validators/{operator}
//! GET /cosmos/staking/v1beta1/validators?pagination.limit={limit}
//! GET /cosmos/staking/v1beta1/pool
//! GET /cosmos/distribution/v1beta1/delegators/{address}/rewards
//! GET /cosmos/distribution/v1beta1/validators/{operator}/commission
//! GET /cosmos/distribution/v1beta1/validators/{operator}/outstanding_rewards
//! GET /cosmos/distribution/v1beta1/community_pool
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::node::{
    BondStatus, Coin, Delegation, DelegationReward, DenomMetadata, DenomUnit, NodeClient,
    NodeError, StakingPool, UnbondingDelegation, Validator, parse_amount,
};

/// REST gateway client.
///
/// Wraps a single pooled `reqwest::Client`; clones share the pool.
#[derive(Clone)]
pub struct RestNodeClient {
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl RestNodeClient {
    /// Create a client for the gateway at `base_url`, e.g. `http://127.0.0.1:1317`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NodeError> {
        let base_url = base_url.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Transport {
                url: base_url.clone(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, NodeError> {
        let url = self.endpoint(path);
        trace!(url = %url, "Querying node");

        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NodeError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        serde_json::from_slice(&body)
            .map_err(|e| NodeError::Malformed(format!("{}: {}", url, e)))
    }

    fn transport_error(&self, url: &str, err: reqwest::Error) -> NodeError {
        if err.is_timeout() {
            NodeError::Timeout(self.timeout)
        } else {
            NodeError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

// --- Wire types -------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireCoin {
    denom: String,
    amount: String,
}

impl TryFrom<WireCoin> for Coin {
    type Error = NodeError;

    fn try_from(wire: WireCoin) -> Result<Self, Self::Error> {
        let amount = parse_amount(&wire.amount)?;
        Ok(Coin {
            denom: wire.denom,
            amount,
        })
    }
}

fn coins(wire: Vec<WireCoin>) -> Result<Vec<Coin>, NodeError> {
    wire.into_iter().map(Coin::try_from).collect()
}

fn zero() -> String {
    "0".to_string()
}

#[derive(Debug, Deserialize)]
struct DenomsMetadataResponse {
    #[serde(default)]
    metadatas: Vec<WireMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    base: String,
    #[serde(default)]
    display: String,
    #[serde(default)]
    denom_units: Vec<WireDenomUnit>,
}

#[derive(Debug, Deserialize)]
struct WireDenomUnit {
    denom: String,
    #[serde(default)]
    exponent: u32,
}

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    #[serde(default)]
    balances: Vec<WireCoin>,
}

#[derive(Debug, Deserialize)]
struct SupplyResponse {
    amount: WireCoin,
}

#[derive(Debug, Deserialize)]
struct DelegationsResponse {
    #[serde(default)]
    delegation_responses: Vec<WireDelegationResponse>,
}

#[derive(Debug, Deserialize)]
struct WireDelegationResponse {
    delegation: WireDelegation,
    balance: WireCoin,
}

#[derive(Debug, Deserialize)]
struct WireDelegation {
    validator_address: String,
    #[serde(default = "zero")]
    shares: String,
}

#[derive(Debug, Deserialize)]
struct UnbondingResponse {
    #[serde(default)]
    unbonding_responses: Vec<WireUnbonding>,
}

#[derive(Debug, Deserialize)]
struct WireUnbonding {
    validator_address: String,
    #[serde(default)]
    entries: Vec<WireUnbondingEntry>,
}

#[derive(Debug, Deserialize)]
struct WireUnbondingEntry {
    balance: String,
}

#[derive(Debug, Deserialize)]
struct RewardsResponse {
    #[serde(default)]
    rewards: Vec<WireReward>,
}

#[derive(Debug, Deserialize)]
struct WireReward {
    validator_address: String,
    #[serde(default)]
    reward: Vec<WireCoin>,
}

#[derive(Debug, Deserialize)]
struct ValidatorResponse {
    validator: WireValidator,
}

#[derive(Debug, Deserialize)]
struct ValidatorsResponse {
    #[serde(default)]
    validators: Vec<WireValidator>,
}

#[derive(Debug, Deserialize)]
struct WireValidator {
    operator_address: String,
    #[serde(default)]
    jailed: bool,
    #[serde(default)]
    status: String,
    #[serde(default = "zero")]
    tokens: String,
    #[serde(default = "zero")]
    delegator_shares: String,
    #[serde(default)]
    description: WireDescription,
    #[serde(default)]
    commission: WireCommission,
    #[serde(default = "zero")]
    min_self_delegation: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireDescription {
    #[serde(default)]
    moniker: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireCommission {
    #[serde(default)]
    commission_rates: WireCommissionRates,
}

#[derive(Debug, Deserialize)]
struct WireCommissionRates {
    #[serde(default = "zero")]
    rate: String,
}

impl Default for WireCommissionRates {
    fn default() -> Self {
        Self { rate: zero() }
    }
}

impl TryFrom<WireValidator> for Validator {
    type Error = NodeError;

    fn try_from(wire: WireValidator) -> Result<Self, Self::Error> {
        Ok(Validator {
            tokens: parse_amount(&wire.tokens)?,
            delegator_shares: parse_amount(&wire.delegator_shares)?,
            commission_rate: parse_amount(&wire.commission.commission_rates.rate)?,
            min_self_delegation: parse_amount(&wire.min_self_delegation)?,
            status: BondStatus::from_name(&wire.status),
            jailed: wire.jailed,
            moniker: wire.description.moniker,
            operator_address: wire.operator_address,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CommissionResponse {
    commission: CommissionField,
}

#[derive(Debug, Deserialize)]
struct OutstandingRewardsResponse {
    rewards: RewardsField,
}

#[derive(Debug, Deserialize)]
struct CommissionField {
    #[serde(default)]
    commission: Vec<WireCoin>,
}

#[derive(Debug, Deserialize)]
struct RewardsField {
    #[serde(default)]
    rewards: Vec<WireCoin>,
}

#[derive(Debug, Deserialize)]
struct PoolResponse {
    pool: WirePool,
}

#[derive(Debug, Deserialize)]
struct WirePool {
    bonded_tokens: String,
    not_bonded_tokens: String,
}

#[derive(Debug, Deserialize)]
struct CommunityPoolResponse {
    #[serde(default)]
    pool: Vec<WireCoin>,
}

// --- Queries ----------------------------------------------------------------

#[async_trait]
impl NodeClient for RestNodeClient {
    async fn denoms_metadata(&self) -> Result<Vec<DenomMetadata>, NodeError> {
        let resp: DenomsMetadataResponse = self
            .get_json("/cosmos/bank/v1beta1/denoms_metadata", &[])
            .await?;

        Ok(resp
            .metadatas
            .into_iter()
            .map(|m| DenomMetadata {
                base: m.base,
                display: m.display,
                denom_units: m
                    .denom_units
                    .into_iter()
                    .map(|u| DenomUnit {
                        denom: u.denom,
                        exponent: u.exponent,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn balances(&self, address: &str) -> Result<Vec<Coin>, NodeError> {
        let resp: BalancesResponse = self
            .get_json(&format!("/cosmos/bank/v1beta1/balances/{}", address), &[])
            .await?;
        coins(resp.balances)
    }

    async fn delegations(&self, address: &str) -> Result<Vec<Delegation>, NodeError> {
        let resp: DelegationsResponse = self
            .get_json(&format!("/cosmos/staking/v1beta1/delegations/{}", address), &[])
            .await?;

        resp.delegation_responses
            .into_iter()
            .map(|d| -> Result<Delegation, NodeError> {
                Ok(Delegation {
                    shares: parse_amount(&d.delegation.shares)?,
                    validator_address: d.delegation.validator_address,
                    balance: Coin::try_from(d.balance)?,
                })
            })
            .collect()
    }

    async fn unbonding_delegations(
        &self,
        address: &str,
    ) -> Result<Vec<UnbondingDelegation>, NodeError> {
        let resp: UnbondingResponse = self
            .get_json(
                &format!(
                    "/cosmos/staking/v1beta1/delegators/{}/unbonding_delegations",
                    address
                ),
                &[],
            )
            .await?;

        resp.unbonding_responses
            .into_iter()
            .map(|u| -> Result<UnbondingDelegation, NodeError> {
                let mut balance = 0.0;
                for entry in &u.entries {
                    balance += parse_amount(&entry.balance)?;
                }
                Ok(UnbondingDelegation {
                    validator_address: u.validator_address,
                    balance,
                    entries: u.entries.len(),
                })
            })
            .collect()
    }

    async fn delegation_rewards(
        &self,
        address: &str,
    ) -> Result<Vec<DelegationReward>, NodeError> {
        let resp: RewardsResponse = self
            .get_json(
                &format!("/cosmos/distribution/v1beta1/delegators/{}/rewards", address),
                &[],
            )
            .await?;

        resp.rewards
            .into_iter()
            .map(|r| -> Result<DelegationReward, NodeError> {
                Ok(DelegationReward {
                    validator_address: r.validator_address,
                    reward: coins(r.reward)?,
                })
            })
            .collect()
    }

    async fn validator(&self, operator: &str) -> Result<Validator, NodeError> {
        let resp: ValidatorResponse = self
            .get_json(&format!("/cosmos/staking/v1beta1/validators/{}", operator), &[])
            .await?;
        Validator::try_from(resp.validator)
    }

    async fn validator_commission(&self, operator: &str) -> Result<Vec<Coin>, NodeError> {
        let resp: CommissionResponse = self
            .get_json(
                &format!(
                    "/cosmos/distribution/v1beta1/validators/{}/commission",
                    operator
                ),
                &[],
            )
            .await?;
        coins(resp.commission.commission)
    }

    async fn validator_outstanding_rewards(
        &self,
        operator: &str,
    ) -> Result<Vec<Coin>, NodeError> {
        let resp: OutstandingRewardsResponse = self
            .get_json(
                &format!(
                    "/cosmos/distribution/v1beta1/validators/{}/outstanding_rewards",
                    operator
                ),
                &[],
            )
            .await?;
        coins(resp.rewards.rewards)
    }

    async fn validators(&self, limit: u64) -> Result<Vec<Validator>, NodeError> {
        let resp: ValidatorsResponse = self
            .get_json(
                "/cosmos/staking/v1beta1/validators",
                &[("pagination.limit", limit.to_string())],
            )
            .await?;

        resp.validators
            .into_iter()
            .map(Validator::try_from)
            .collect()
    }

    async fn staking_pool(&self) -> Result<StakingPool, NodeError> {
        let resp: PoolResponse = self.get_json("/cosmos/staking/v1beta1/pool", &[]).await?;

        Ok(StakingPool {
            bonded_tokens: parse_amount(&resp.pool.bonded_tokens)?,
            not_bonded_tokens: parse_amount(&resp.pool.not_bonded_tokens)?,
        })
    }

    async fn community_pool(&self) -> Result<Vec<Coin>, NodeError> {
        let resp: CommunityPoolResponse = self
            .get_json("/cosmos/distribution/v1beta1/community_pool", &[])
            .await?;
        coins(resp.pool)
    }

    async fn supply_of(&self, denom: &str) -> Result<Coin, NodeError> {
        let resp: SupplyResponse = self
            .get_json(
                "/cosmos/bank/v1beta1/supply/by_denom",
                &[("denom", denom.to_string())],
            )
            .await?;
        Coin::try_from(resp.amount)
    }
}
