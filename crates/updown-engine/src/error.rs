//! Engine error taxonomy
//!
//! Every rejection is synchronous and all-or-nothing: a call that returns
//! `Err` has not mutated any engine or collaborator state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AccountId, Amount, RoundIndex, Role, Side, Timestamp};

pub type MarketResult<T> = Result<T, MarketError>;

/// Coarse error category, stable for callers that only branch on kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AccessDenied,
    InvalidAmount,
    InvalidRound,
    TimingViolation,
    NonPositiveArgument,
    LimitExceeded,
    StateConflict,
    ArithmeticOverflow,
}

/// Why a round index was refused for a bid or liquidity commitment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RoundRejection {
    #[error("cannot bid in live round")]
    LiveOrPast,
    #[error("cannot bid more than {0} rounds in advance")]
    TooFarAhead(u64),
    #[error("round has no settlement record")]
    NotRecorded,
}

/// Round-advance timing gates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TimingViolation {
    #[error("min duration for start required: next start {next_start} < {earliest}")]
    StartNotAdvanced { next_start: Timestamp, earliest: Timestamp },
    #[error("minimum settlement time not reached: now {now} < {earliest}")]
    SettlementTooEarly { now: Timestamp, earliest: Timestamp },
    #[error("startTime offset g.t. allowed: next start {next_start} > {latest}")]
    StartTooFarAhead { next_start: Timestamp, latest: Timestamp },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MarketError {
    #[error("account {account} is missing role {role}")]
    AccessDenied { account: AccountId, role: Role },

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("bid amount {amount} is below the minimum {minimum}")]
    BelowMinimum { amount: Amount, minimum: Amount },

    #[error("insufficient balance for {account}: needed {needed}, available {available}")]
    InsufficientBalance { account: AccountId, needed: Amount, available: Amount },

    #[error("insufficient liquidity pool balance: needed {needed}, available {available}")]
    InsufficientPoolBalance { needed: Amount, available: Amount },

    #[error("invalid round {round}: {reason}")]
    InvalidRound { round: RoundIndex, reason: RoundRejection },

    #[error("timing violation: {0}")]
    Timing(#[from] TimingViolation),

    #[error("args must be g.t. 0")]
    NonPositiveArgument,

    #[error("amount exceeds limit: {side} liquidity {requested} > {limit}")]
    LimitExceeded { side: Side, requested: Amount, limit: Amount },

    #[error("no pending claims")]
    NoPendingClaims,

    #[error("fee must be within bounds: {rate} not in [{min}, {max}]")]
    FeeRateOutOfBounds { rate: u32, min: u32, max: u32 },

    #[error("basis points value {0} exceeds 10000")]
    InvalidBasisPoints(u32),

    #[error("loyalty hook rejected the bid: {0}")]
    LoyaltyHook(String),

    #[error("arithmetic overflow: {0}")]
    ArithmeticOverflow(&'static str),
}

impl MarketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarketError::AccessDenied { .. } => ErrorKind::AccessDenied,
            MarketError::ZeroAmount
            | MarketError::BelowMinimum { .. }
            | MarketError::InsufficientBalance { .. }
            | MarketError::InsufficientPoolBalance { .. }
            | MarketError::FeeRateOutOfBounds { .. }
            | MarketError::InvalidBasisPoints(_) => ErrorKind::InvalidAmount,
            MarketError::InvalidRound { .. } => ErrorKind::InvalidRound,
            MarketError::Timing(_) => ErrorKind::TimingViolation,
            MarketError::NonPositiveArgument => ErrorKind::NonPositiveArgument,
            MarketError::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            MarketError::NoPendingClaims | MarketError::LoyaltyHook(_) => ErrorKind::StateConflict,
            MarketError::ArithmeticOverflow(_) => ErrorKind::ArithmeticOverflow,
        }
    }
}
