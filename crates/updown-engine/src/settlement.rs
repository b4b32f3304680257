//! Settlement Engine - round-advance gates and close-out arithmetic
//!
//! # Transition
//! Live -> Settled, driven by `process_round(next_start, settlement, next_strike)`:
//! 1. `next_start >= round.start_time + round_length`
//! 2. `now >= round.start_time + round_length`
//! 3. `next_start <= now + round_length + max_start_delay`
//! 4. Both prices strictly positive
//! 5. Fee, winner, post-fee losing pool and liquidity return computed from
//!    the round's frozen pool and its opening fee-rate snapshot
//!
//! Everything here is pure. `RoundMarket` applies the result.

use tracing::debug;

use crate::error::{MarketError, MarketResult, TimingViolation};
use crate::math::{self, BasisPoints, FeeSplit};
use crate::types::{
    Amount, Price, Round, RoundOutcome, RoundPool, SettlementRecord, Side, Timestamp,
};

/// Computed close-out for one round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundSettlement {
    pub winner: Side,
    pub fee: Amount,
    pub fee_split: FeeSplit,
    pub outcome: RoundOutcome,
    /// What winning-side market-maker liquidity earned; credited to the pool
    pub liquidity_return: Amount,
    /// Post-fee losing side when nobody staked on the winning side
    pub unclaimable_sweep: Amount,
    pub record: SettlementRecord,
}

impl RoundSettlement {
    /// Everything this settlement sends to the liquidity pool
    pub fn pool_credit(&self) -> Amount {
        self.fee_split
            .pool
            .saturating_add(self.liquidity_return)
            .saturating_add(self.unclaimable_sweep)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SettlementEngine {
    round_length: u64,
    max_start_delay: u64,
}

impl SettlementEngine {
    pub fn new(round_length: u64, max_start_delay: u64) -> Self {
        Self { round_length, max_start_delay }
    }

    /// Earliest `now` at which `round` may be settled
    pub fn earliest_settlement(&self, round: &Round) -> Timestamp {
        round.start_time.saturating_add(self.round_length as i64)
    }

    /// Latest permitted start time for the next round, given `now`
    pub fn latest_next_start(&self, now: Timestamp) -> Timestamp {
        now.saturating_add(self.round_length as i64)
            .saturating_add(self.max_start_delay as i64)
    }

    pub fn check_timing(
        &self,
        round: &Round,
        now: Timestamp,
        next_start_time: Timestamp,
    ) -> Result<(), TimingViolation> {
        // Rounds may not overlap: the next one starts no earlier than this one ends
        let earliest = self.earliest_settlement(round);
        if next_start_time < earliest {
            return Err(TimingViolation::StartNotAdvanced { next_start: next_start_time, earliest });
        }
        if now < earliest {
            return Err(TimingViolation::SettlementTooEarly { now, earliest });
        }
        let latest = self.latest_next_start(now);
        if next_start_time > latest {
            return Err(TimingViolation::StartTooFarAhead { next_start: next_start_time, latest });
        }
        Ok(())
    }

    /// Run every gate, then compute the close-out of `round`
    pub fn settle(
        &self,
        round: &Round,
        pool: &RoundPool,
        now: Timestamp,
        next_start_time: Timestamp,
        settlement_price: Price,
        next_strike_price: Price,
        treasury_split: Option<BasisPoints>,
    ) -> MarketResult<RoundSettlement> {
        self.check_timing(round, now, next_start_time)?;
        if settlement_price <= 0 || next_strike_price <= 0 {
            return Err(MarketError::NonPositiveArgument);
        }
        compute_settlement(round, pool, settlement_price, treasury_split)
    }
}

/// Fee, winner and payout unit values for a round closing at `settlement_price`
pub fn compute_settlement(
    round: &Round,
    pool: &RoundPool,
    settlement_price: Price,
    treasury_split: Option<BasisPoints>,
) -> MarketResult<RoundSettlement> {
    let rate = round.lp_fee_rate;
    let up_total = pool
        .side_total(Side::Up)
        .ok_or(MarketError::ArithmeticOverflow("up side total"))?;
    let down_total = pool
        .side_total(Side::Down)
        .ok_or(MarketError::ArithmeticOverflow("down side total"))?;

    let fee = math::side_fee(up_total, rate)
        .checked_add(math::side_fee(down_total, rate))
        .ok_or(MarketError::ArithmeticOverflow("round fee"))?;

    // Equal prices resolve to down
    let winner = if settlement_price > round.strike_price { Side::Up } else { Side::Down };
    let (winning_total, losing_total) = match winner {
        Side::Up => (up_total, down_total),
        Side::Down => (down_total, up_total),
    };
    let post_fee_losing_total = losing_total - math::side_fee(losing_total, rate);

    let liquidity_return =
        math::winning_payout(pool.liquidity(winner), post_fee_losing_total, winning_total, rate)?;
    let unclaimable_sweep = if winning_total == 0 { post_fee_losing_total } else { 0 };

    debug!(
        "Round {} settles {} (strike {}, price {}): fee {}, winning {}, losing {}",
        round.index, winner, round.strike_price, settlement_price, fee, winning_total, losing_total
    );

    Ok(RoundSettlement {
        winner,
        fee,
        fee_split: math::split_fee(fee, treasury_split),
        outcome: RoundOutcome { winner, winning_total, losing_total, post_fee_losing_total },
        liquidity_return,
        unclaimable_sweep,
        record: SettlementRecord {
            start_time: round.start_time,
            length: round.length,
            strike_price: round.strike_price,
            fee,
            settlement_price,
        },
    })
}
