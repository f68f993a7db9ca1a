//! Startup resolution of the working denomination and its scaling coefficient.
//!
//! Resolution follows a fixed decision table:
//!
//! | symbol | coefficient | exponent | outcome                                   |
//! |--------|-------------|----------|-------------------------------------------|
//! | empty  | any         | any      | query node, adopt entry 0's display unit  |
//! | set    | set         | set      | error: ambiguous scaling                  |
//! | set    | set         | -        | use coefficient as given                  |
//! | set    | -           | set      | coefficient = 10^exponent                 |
//! | set    | -           | -        | query node, match symbol in entry 0       |
//!
//! The node is only contacted in the first and last rows. The resulting
//! [`DenominationConfig`] is built once and never mutated afterwards.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConfigError;
use crate::node::{DenomMetadata, NodeClient, NodeError};

/// Operator-supplied denomination settings. `None` means "not provided".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DenomOverrides {
    #[serde(default)]
    pub symbol: Option<String>,

    #[serde(default)]
    pub coefficient: Option<f64>,

    #[serde(default)]
    pub exponent: Option<u32>,
}

impl DenomOverrides {
    /// The symbol, with an empty string treated as absent.
    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref().filter(|s| !s.is_empty())
    }
}

/// Where the coefficient came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenomSource {
    ExplicitCoefficient,
    ExplicitExponent,
    NodeMetadata,
}

impl DenomSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenomSource::ExplicitCoefficient => "coefficient",
            DenomSource::ExplicitExponent => "exponent",
            DenomSource::NodeMetadata => "node",
        }
    }
}

/// Resolved denomination, shared read-only by every scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct DenominationConfig {
    /// Display symbol attached to every scaled metric.
    pub symbol: String,
    /// `display = raw / coefficient`; always finite and positive.
    pub coefficient: f64,
    /// Exponent the coefficient was derived from, if any.
    pub exponent: Option<u32>,
    /// On-chain base denom when known from node metadata.
    pub base: Option<String>,
    pub source: DenomSource,
}

impl DenominationConfig {
    /// Convert a raw on-chain amount into display units.
    pub fn scale(&self, raw: f64) -> f64 {
        raw / self.coefficient
    }

    /// Denom to use for supply lookups.
    pub fn query_denom(&self) -> &str {
        self.base.as_deref().unwrap_or(&self.symbol)
    }
}

/// Outcome of the override-only part of the decision table.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionPlan {
    /// Overrides were sufficient.
    Resolved(DenominationConfig),
    /// The node's metadata must be consulted, optionally matching a symbol.
    QueryNode { symbol: Option<String> },
}

/// Errors from [`resolve`].
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to query denomination metadata: {0}")]
    Upstream(#[from] NodeError),
}

/// Largest exponent whose power of ten is a finite `f64`.
pub const MAX_EXPONENT: u32 = f64::MAX_10_EXP as u32;

/// `10^exponent` as used for coefficient derivation.
pub fn pow10(exponent: u32) -> Result<f64, ConfigError> {
    if exponent > MAX_EXPONENT {
        return Err(ConfigError::ExponentOutOfRange(exponent));
    }
    Ok(10f64.powi(exponent as i32))
}

/// Evaluate the overrides without touching the node.
pub fn plan(overrides: &DenomOverrides) -> Result<ResolutionPlan, ConfigError> {
    let Some(symbol) = overrides.symbol() else {
        return Ok(ResolutionPlan::QueryNode { symbol: None });
    };

    match (overrides.coefficient, overrides.exponent) {
        (Some(_), Some(_)) => Err(ConfigError::AmbiguousScaling),
        (Some(coefficient), None) => {
            if !(coefficient.is_finite() && coefficient > 0.0) {
                return Err(ConfigError::InvalidCoefficient(coefficient));
            }
            Ok(ResolutionPlan::Resolved(DenominationConfig {
                symbol: symbol.to_string(),
                coefficient,
                exponent: None,
                base: None,
                source: DenomSource::ExplicitCoefficient,
            }))
        }
        (None, Some(exponent)) => Ok(ResolutionPlan::Resolved(DenominationConfig {
            symbol: symbol.to_string(),
            coefficient: pow10(exponent)?,
            exponent: Some(exponent),
            base: None,
            source: DenomSource::ExplicitExponent,
        })),
        (None, None) => Ok(ResolutionPlan::QueryNode {
            symbol: Some(symbol.to_string()),
        }),
    }
}

/// Pick the scaling from the first registry entry.
///
/// Entry 0 is always used, whatever the registry size.
pub fn select_from_registry(
    registry: &[DenomMetadata],
    symbol: Option<&str>,
) -> Result<DenominationConfig, ConfigError> {
    let Some(metadata) = registry.first() else {
        return Err(ConfigError::NoDenomMetadata);
    };

    let symbol = symbol.unwrap_or(metadata.display.as_str());

    for unit in &metadata.denom_units {
        debug!(denom = %unit.denom, exponent = unit.exponent, "Denom info");
    }

    let unit = metadata
        .denom_units
        .iter()
        .find(|unit| unit.denom == symbol)
        .ok_or_else(|| ConfigError::SymbolNotFound {
            symbol: symbol.to_string(),
        })?;

    Ok(DenominationConfig {
        symbol: symbol.to_string(),
        coefficient: pow10(unit.exponent)?,
        exponent: Some(unit.exponent),
        base: (!metadata.base.is_empty()).then(|| metadata.base.clone()),
        source: DenomSource::NodeMetadata,
    })
}

/// Resolve the working denomination, consulting the node only when needed.
pub async fn resolve(
    overrides: &DenomOverrides,
    node: &dyn NodeClient,
) -> Result<DenominationConfig, ResolveError> {
    let symbol = match plan(overrides)? {
        ResolutionPlan::Resolved(config) => {
            info!(
                denom = %config.symbol,
                coefficient = config.coefficient,
                exponent = ?config.exponent,
                source = config.source.as_str(),
                "Using provided denom scaling"
            );
            return Ok(config);
        }
        ResolutionPlan::QueryNode { symbol } => symbol,
    };

    let registry = node.denoms_metadata().await?;
    let config = select_from_registry(&registry, symbol.as_deref())?;

    info!(
        denom = %config.symbol,
        coefficient = config.coefficient,
        registry_entries = registry.len(),
        "Got denom info from node"
    );

    Ok(config)
}
