//! Market configuration
//!
//! Defaults mirror the production deployment: 5-minute rounds, bids up to 10
//! rounds ahead, a 5 USDC (6 decimals) minimum bid, 300bp fee, and a claim
//! walker capped at 250 nodes per call.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::BasisPoints;
use crate::types::Amount;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What to do when the loyalty hook fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyHookPolicy {
    /// Log and keep the bid
    #[default]
    BestEffort,
    /// Reject the bid; the hook runs before any state changes
    Required,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Round duration; also the minimum age before a round can settle
    pub round_length_secs: u64,
    /// Slack on top of one round length for the next round's start time
    pub max_start_delay_secs: u64,
    /// Bidding look-ahead horizon in rounds
    pub max_rounds_ahead: u64,
    pub min_bid_amount: Amount,
    pub initial_fee_rate_bps: BasisPoints,
    pub fee_rate_min_bps: BasisPoints,
    pub fee_rate_max_bps: BasisPoints,
    /// Claim walker step cap
    pub max_claims_per_call: u32,
    /// Per-round, per-side market-maker liquidity cap
    pub initial_market_limit: Amount,
    /// Treasury share of collected fees; `None` routes everything to the pool
    pub treasury_split_bps: Option<BasisPoints>,
    pub loyalty_hook_policy: LoyaltyHookPolicy,
}

/// 3% per side
pub const DEFAULT_FEE_RATE: BasisPoints = BasisPoints::new_const(300);
/// Ceiling for admin fee updates, 10%
pub const DEFAULT_MAX_FEE_RATE: BasisPoints = BasisPoints::new_const(1_000);

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            round_length_secs: 300,
            max_start_delay_secs: 1_500,
            max_rounds_ahead: 10,
            min_bid_amount: 5_000_000,
            initial_fee_rate_bps: DEFAULT_FEE_RATE,
            fee_rate_min_bps: BasisPoints::ZERO,
            fee_rate_max_bps: DEFAULT_MAX_FEE_RATE,
            max_claims_per_call: 250,
            initial_market_limit: 0,
            treasury_split_bps: None,
            loyalty_hook_policy: LoyaltyHookPolicy::BestEffort,
        }
    }
}

impl MarketConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: MarketConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.round_length_secs == 0 {
            return Err(ConfigError::Invalid("round_length_secs must be > 0".into()));
        }
        if self.round_length_secs > i64::MAX as u64 || self.max_start_delay_secs > i64::MAX as u64
        {
            return Err(ConfigError::Invalid("durations must fit in a signed timestamp".into()));
        }
        if self.max_rounds_ahead == 0 {
            return Err(ConfigError::Invalid("max_rounds_ahead must be > 0".into()));
        }
        if self.min_bid_amount == 0 {
            return Err(ConfigError::Invalid("min_bid_amount must be > 0".into()));
        }
        if self.max_claims_per_call == 0 {
            return Err(ConfigError::Invalid("max_claims_per_call must be > 0".into()));
        }
        for bps in [
            self.initial_fee_rate_bps,
            self.fee_rate_min_bps,
            self.fee_rate_max_bps,
        ]
        .into_iter()
        .chain(self.treasury_split_bps)
        {
            if bps.value() > BasisPoints::MAX {
                return Err(ConfigError::Invalid(format!("{} exceeds 10000bp", bps.value())));
            }
        }
        if self.fee_rate_min_bps > self.fee_rate_max_bps {
            return Err(ConfigError::Invalid("fee_rate_min_bps > fee_rate_max_bps".into()));
        }
        if self.initial_fee_rate_bps < self.fee_rate_min_bps
            || self.initial_fee_rate_bps > self.fee_rate_max_bps
        {
            return Err(ConfigError::Invalid(format!(
                "initial fee rate {} outside [{}, {}]",
                self.initial_fee_rate_bps, self.fee_rate_min_bps, self.fee_rate_max_bps
            )));
        }
        Ok(())
    }
}
