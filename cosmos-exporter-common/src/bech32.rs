//! Bech32 human-readable prefixes for chain addresses.
//!
//! Cosmos SDK chains derive all of their address prefixes from a single
//! base (`cosmos`, `osmo`, `umee`, ...). Any prefix can be overridden
//! individually for chains that deviate from the convention.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bech32 data characters never include `1`, so the last `1` is the separator.
const SEPARATOR: char = '1';

/// Characters allowed in the data part.
const CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Prefix configuration as supplied by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bech32Config {
    /// Base prefix all others are derived from.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub account_prefix: Option<String>,

    #[serde(default)]
    pub account_pubkey_prefix: Option<String>,

    #[serde(default)]
    pub validator_prefix: Option<String>,

    #[serde(default)]
    pub validator_pubkey_prefix: Option<String>,

    #[serde(default)]
    pub consensus_node_prefix: Option<String>,

    #[serde(default)]
    pub consensus_node_pubkey_prefix: Option<String>,
}

fn default_prefix() -> String {
    "cosmos".to_string()
}

impl Default for Bech32Config {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            account_prefix: None,
            account_pubkey_prefix: None,
            validator_prefix: None,
            validator_pubkey_prefix: None,
            consensus_node_prefix: None,
            consensus_node_pubkey_prefix: None,
        }
    }
}

/// Fully resolved set of prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bech32Prefixes {
    pub account: String,
    pub account_pubkey: String,
    pub validator: String,
    pub validator_pubkey: String,
    pub consensus_node: String,
    pub consensus_node_pubkey: String,
}

/// Kind of address a scrape target is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Account,
    Validator,
}

impl Bech32Config {
    /// Derive every prefix, preferring explicitly configured ones.
    pub fn resolve(&self) -> Bech32Prefixes {
        let pick = |explicit: &Option<String>, suffix: &str| match explicit {
            Some(p) if !p.is_empty() => p.clone(),
            _ => format!("{}{}", self.prefix, suffix),
        };

        Bech32Prefixes {
            account: pick(&self.account_prefix, ""),
            account_pubkey: pick(&self.account_pubkey_prefix, "pub"),
            validator: pick(&self.validator_prefix, "valoper"),
            validator_pubkey: pick(&self.validator_pubkey_prefix, "valoperpub"),
            consensus_node: pick(&self.consensus_node_prefix, "valcons"),
            consensus_node_pubkey: pick(&self.consensus_node_pubkey_prefix, "valconspub"),
        }
    }
}

impl Bech32Prefixes {
    /// Expected human-readable part for the given address kind.
    pub fn hrp(&self, kind: AddressKind) -> &str {
        match kind {
            AddressKind::Account => &self.account,
            AddressKind::Validator => &self.validator,
        }
    }

    /// Check that `address` carries the human-readable part expected for `kind`.
    ///
    /// The data part must use the bech32 charset in a single case, so the
    /// address is safe to place in a URL path. The checksum is left to the
    /// node.
    pub fn check(&self, address: &str, kind: AddressKind) -> Result<()> {
        let expected = self.hrp(kind);

        let Some(pos) = address.rfind(SEPARATOR) else {
            return Err(Error::Prefix(format!(
                "'{}' is not a bech32 address",
                address
            )));
        };

        let (hrp, data) = (&address[..pos], &address[pos + 1..]);
        if data.is_empty() {
            return Err(Error::Prefix(format!(
                "'{}' has an empty data part",
                address
            )));
        }

        let lower = data.to_ascii_lowercase();
        let mixed_case = data != lower && data != data.to_ascii_uppercase();
        if mixed_case || !lower.chars().all(|c| CHARSET.contains(c)) {
            return Err(Error::Prefix(format!(
                "'{}' has characters outside the bech32 charset",
                address
            )));
        }

        if hrp != expected {
            return Err(Error::Prefix(format!(
                "expected prefix '{}', got '{}'",
                expected, hrp
            )));
        }

        Ok(())
    }
}
