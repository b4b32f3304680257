//! Fixed-point fee and payout arithmetic.
//!
//! Basis points with an implicit denominator of 10000. Every division floors,
//! so rounding residue always stays in the pool and never exceeds it.

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};
use crate::types::Amount;
use crate::BPS_DENOMINATOR;

/// Rate in basis points (0-10000 = 0%-100%)
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BasisPoints(u32);

impl BasisPoints {
    pub const ZERO: BasisPoints = BasisPoints(0);
    pub const MAX: u32 = BPS_DENOMINATOR as u32;
    pub const ONE_HUNDRED_PERCENT: BasisPoints = BasisPoints(BPS_DENOMINATOR as u32);

    pub fn new(value: u32) -> MarketResult<Self> {
        if value > Self::MAX {
            return Err(MarketError::InvalidBasisPoints(value));
        }
        Ok(BasisPoints(value))
    }

    /// Constructor for constants; an out-of-range value fails const evaluation
    pub const fn new_const(value: u32) -> Self {
        assert!(value <= Self::MAX, "basis points value exceeds 10000");
        BasisPoints(value)
    }

    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// `10000 - self`
    #[inline]
    pub fn complement(&self) -> BasisPoints {
        BasisPoints(Self::MAX - self.0.min(Self::MAX))
    }

    /// `floor(amount * self / 10000)`
    #[inline]
    pub fn apply(&self, amount: Amount) -> Amount {
        // bps <= 10000, so the quotient never exceeds `amount`
        ((amount as u128 * self.0 as u128) / BPS_DENOMINATOR as u128) as Amount
    }
}

impl std::fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}bp ({}%)", self.0, self.0 as f64 / 100.0)
    }
}

/// Fee split between treasury and liquidity pool
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeSplit {
    pub treasury: Amount,
    pub pool: Amount,
}

/// Fee charged on one side of a round: `floor(side_total * rate / 10000)`
pub fn side_fee(side_total: Amount, rate: BasisPoints) -> Amount {
    rate.apply(side_total)
}

/// Payout for a winning stake of size `stake`:
///
/// `floor(stake * post_fee_losing / winning_total) + floor(stake * (10000 - rate) / 10000)`
///
/// Both terms floor independently. Returns 0 when nobody won.
pub fn winning_payout(
    stake: Amount,
    post_fee_losing_total: Amount,
    winning_total: Amount,
    rate: BasisPoints,
) -> MarketResult<Amount> {
    if stake == 0 || winning_total == 0 {
        return Ok(0);
    }
    if stake > winning_total {
        return Err(MarketError::ArithmeticOverflow("stake exceeds winning side total"));
    }

    let share = (stake as u128 * post_fee_losing_total as u128) / winning_total as u128;
    let principal = rate.complement().apply(stake) as u128;

    Amount::try_from(share + principal)
        .map_err(|_| MarketError::ArithmeticOverflow("payout exceeds amount range"))
}

/// Split `fee` with the treasury taking `floor(fee * split / 10000)` and the
/// pool taking the exact remainder. No treasury means the pool takes it all.
pub fn split_fee(fee: Amount, treasury_split: Option<BasisPoints>) -> FeeSplit {
    match treasury_split {
        Some(split) => {
            let treasury = split.apply(fee);
            FeeSplit { treasury, pool: fee - treasury }
        }
        None => FeeSplit { treasury: 0, pool: fee },
    }
}
