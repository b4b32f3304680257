//! Core data model for the round market
//!
//! # Ownership
//! - `Round` / `RoundPool`: owned by `RoundLedger`, one per round index
//! - `BidNode` / `UserQueueState`: owned by `BidSparseQueue`
//! - `MarketEvent`: emitted by `RoundMarket`, drained by the host
//!
//! Round index 0 is the genesis round. It can never hold a bid, so queue
//! pointers use `None` where the host-facing views report `0`.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::math::BasisPoints;

/// Monotonically increasing round identifier
pub type RoundIndex = u64;

/// Settlement-asset amount in its smallest unit
pub type Amount = u64;

/// Reference price as injected by the operator. Must be strictly positive.
pub type Price = i64;

/// Unix timestamp (seconds)
pub type Timestamp = i64;

// ============================================================================
// Identity
// ============================================================================

/// Opaque account identifier supplied by the host environment
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Privileged roles consulted through `AccessControl`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Grants and revokes other roles
    Admin,
    /// Processes rounds and changes market parameters
    GameAdmin,
    /// Commits pool liquidity into future rounds
    MarketMaker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN_ROLE",
            Role::GameAdmin => "GAME_ADMIN_ROLE",
            Role::MarketMaker => "MARKET_MAKER_ROLE",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller identity and block time for a single engine call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub caller: AccountId,
    pub now: Timestamp,
}

impl CallContext {
    pub fn new(caller: impl Into<AccountId>, now: Timestamp) -> Self {
        Self { caller: caller.into(), now }
    }
}

/// The two sides a stake can be placed on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Up,
    Down,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Up => Side::Down,
            Side::Down => Side::Up,
        }
    }

    pub fn from_is_up(is_up: bool) -> Self {
        if is_up {
            Side::Up
        } else {
            Side::Down
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Up => f.write_str("up"),
            Side::Down => f.write_str("down"),
        }
    }
}

// ============================================================================
// Round ledger entities
// ============================================================================

/// Per-round data. Written when the round opens, then once more when it settles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub index: RoundIndex,
    pub start_time: Timestamp,
    /// Round duration in seconds
    pub length: u64,
    /// Price this round is measured against, fixed when the round opens
    pub strike_price: Price,
    /// Filled when the round closes
    pub settlement_price: Option<Price>,
    pub fee_collected: Amount,
    /// Fee rate snapshot taken when the round opened; applied at close
    pub lp_fee_rate: BasisPoints,
    /// Frozen per-round results used by claims
    pub outcome: Option<RoundOutcome>,
}

impl Round {
    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    /// Earliest time the round may be settled
    pub fn end_time(&self) -> Timestamp {
        self.start_time.saturating_add(self.length as i64)
    }

    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.start_time, 0).single()
    }
}

/// Settlement results a claim needs to price a stake
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub winner: Side,
    /// Users plus liquidity on the winning side
    pub winning_total: Amount,
    /// Users plus liquidity on the losing side
    pub losing_total: Amount,
    /// Losing side total minus the losing side's fee
    pub post_fee_losing_total: Amount,
}

/// Pool totals for one round
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundPool {
    pub total_user_up: Amount,
    pub total_user_down: Amount,
    pub up_count: u32,
    pub down_count: u32,
    pub up_liquidity: Amount,
    pub down_liquidity: Amount,
}

impl RoundPool {
    pub fn user_total(&self, side: Side) -> Amount {
        match side {
            Side::Up => self.total_user_up,
            Side::Down => self.total_user_down,
        }
    }

    pub fn liquidity(&self, side: Side) -> Amount {
        match side {
            Side::Up => self.up_liquidity,
            Side::Down => self.down_liquidity,
        }
    }

    /// Users plus liquidity on one side; `None` on overflow
    pub fn side_total(&self, side: Side) -> Option<Amount> {
        self.user_total(side).checked_add(self.liquidity(side))
    }

    pub fn is_empty(&self) -> bool {
        self.total_user_up == 0
            && self.total_user_down == 0
            && self.up_liquidity == 0
            && self.down_liquidity == 0
    }
}

// ============================================================================
// Sparse bid queue entities
// ============================================================================

/// One user's accumulated stake in one round
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidNode {
    pub amount_up: Amount,
    pub amount_down: Amount,
    /// Next round (increasing order) where this user holds a node
    pub next_round_index: Option<RoundIndex>,
    /// Previous round where this user holds a node
    pub prev_round_index: Option<RoundIndex>,
}

impl BidNode {
    pub fn amount(&self, side: Side) -> Amount {
        match side {
            Side::Up => self.amount_up,
            Side::Down => self.amount_down,
        }
    }

    pub(crate) fn amount_mut(&mut self, side: Side) -> &mut Amount {
        match side {
            Side::Up => &mut self.amount_up,
            Side::Down => &mut self.amount_down,
        }
    }
}

/// Per-user queue bookkeeping
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQueueState {
    /// Oldest unclaimed node
    pub head_round_index: Option<RoundIndex>,
    /// Newest node
    pub tail_round_index: Option<RoundIndex>,
    /// Nodes pending claim
    pub unsettled_count: u32,
}

impl UserQueueState {
    pub fn is_empty(&self) -> bool {
        self.unsettled_count == 0
    }

    /// Head index with `0` standing for "empty"
    pub fn head_or_zero(&self) -> RoundIndex {
        self.head_round_index.unwrap_or(0)
    }

    /// Tail index with `0` standing for "empty"
    pub fn tail_or_zero(&self) -> RoundIndex {
        self.tail_round_index.unwrap_or(0)
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Settlement record for a closed round
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub start_time: Timestamp,
    pub length: u64,
    pub strike_price: Price,
    pub fee: Amount,
    pub settlement_price: Price,
}

/// One drained node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedRound {
    pub round: RoundIndex,
    pub payout: Amount,
}

/// Result of a single `claim` call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSummary {
    pub account: AccountId,
    pub rounds: Vec<ClaimedRound>,
    pub total_payout: Amount,
    /// Queue state after the call
    pub queue: UserQueueState,
    /// True when the step cap stopped the walk with settled nodes still pending
    pub more_pending: bool,
}

impl ClaimSummary {
    pub fn rounds_processed(&self) -> usize {
        self.rounds.len()
    }
}

/// State transitions reported to the host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MarketEvent {
    BidPlaced {
        account: AccountId,
        round: RoundIndex,
        side: Side,
        amount: Amount,
        /// True when the stake merged into an existing node
        merged: bool,
    },
    LiquidityCommitted {
        account: AccountId,
        round: RoundIndex,
        up: Amount,
        down: Amount,
    },
    RoundSettled {
        round: RoundIndex,
        winner: Side,
        record: SettlementRecord,
    },
    RoundOpened {
        round: RoundIndex,
        start_time: Timestamp,
        strike_price: Price,
        fee_rate: BasisPoints,
    },
    LiquidityReturned {
        round: RoundIndex,
        amount: Amount,
    },
    FeeDistributed {
        round: RoundIndex,
        treasury: Amount,
        pool: Amount,
    },
    Claimed {
        account: AccountId,
        rounds_processed: u32,
        payout: Amount,
        more_pending: bool,
    },
    FeeRateUpdated {
        old: BasisPoints,
        new: BasisPoints,
    },
    MarketLimitUpdated {
        old: Amount,
        new: Amount,
    },
}

/// Engine counters for observability
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStats {
    pub bids_placed: u64,
    pub bids_merged: u64,
    pub liquidity_commitments: u64,
    pub rounds_settled: u64,
    pub claim_calls: u64,
    pub nodes_drained: u64,
    pub hook_failures: u64,
    pub fees_collected: u128,
}
