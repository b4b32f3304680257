//! Round Ledger - per-round data and pool totals
//!
//! Holds the round currently live, every closed round, and the pool totals of
//! every round that has received a stake. Mutation is split into a pure
//! `prepare_*` step that returns the new pool and a `store_pool` step that
//! cannot fail, so callers can validate everything before touching state.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{MarketError, MarketResult, RoundRejection};
use crate::math::BasisPoints;
use crate::types::{Amount, Price, Round, RoundIndex, RoundOutcome, RoundPool, Side, Timestamp};

#[derive(Debug)]
pub struct RoundLedger {
    /// Live round; the only one whose outcome is unknown
    current: Round,
    /// Rounds below `current.index`
    closed: HashMap<RoundIndex, Round>,
    pools: HashMap<RoundIndex, RoundPool>,
}

impl RoundLedger {
    /// Create a ledger holding only the genesis round (index 0, start 0, strike 0)
    pub fn new(round_length: u64, fee_rate: BasisPoints) -> Self {
        Self {
            current: Round {
                index: 0,
                start_time: 0,
                length: round_length,
                strike_price: 0,
                settlement_price: None,
                fee_collected: 0,
                lp_fee_rate: fee_rate,
                outcome: None,
            },
            closed: HashMap::new(),
            pools: HashMap::new(),
        }
    }

    pub fn current_index(&self) -> RoundIndex {
        self.current.index
    }

    pub fn current_round(&self) -> &Round {
        &self.current
    }

    /// Round `r` is settled iff `r < current_round_index`
    pub fn is_settled(&self, round: RoundIndex) -> bool {
        round < self.current.index
    }

    /// Stakes may target `current < round <= current + max_rounds_ahead`
    pub fn check_betting_window(
        &self,
        round: RoundIndex,
        max_rounds_ahead: u64,
    ) -> MarketResult<()> {
        let current = self.current.index;
        if round <= current {
            return Err(MarketError::InvalidRound { round, reason: RoundRejection::LiveOrPast });
        }
        if round - current > max_rounds_ahead {
            return Err(MarketError::InvalidRound {
                round,
                reason: RoundRejection::TooFarAhead(max_rounds_ahead),
            });
        }
        Ok(())
    }

    /// Opened rounds only; future rounds have a pool but no round record yet
    pub fn round(&self, index: RoundIndex) -> Option<&Round> {
        if index == self.current.index {
            Some(&self.current)
        } else {
            self.closed.get(&index)
        }
    }

    /// Pool totals, all zero for rounds nobody staked in
    pub fn pool(&self, index: RoundIndex) -> RoundPool {
        self.pools.get(&index).copied().unwrap_or_default()
    }

    /// Pool after adding a user stake; `count` tracks bids, not bidders
    pub fn prepare_bid(
        &self,
        round: RoundIndex,
        side: Side,
        amount: Amount,
    ) -> MarketResult<RoundPool> {
        let mut pool = self.pool(round);
        match side {
            Side::Up => {
                pool.total_user_up = pool
                    .total_user_up
                    .checked_add(amount)
                    .ok_or(MarketError::ArithmeticOverflow("round up total"))?;
                pool.up_count = pool.up_count.saturating_add(1);
            }
            Side::Down => {
                pool.total_user_down = pool
                    .total_user_down
                    .checked_add(amount)
                    .ok_or(MarketError::ArithmeticOverflow("round down total"))?;
                pool.down_count = pool.down_count.saturating_add(1);
            }
        }
        ensure_side_totals(&pool)?;
        Ok(pool)
    }

    /// Pool after adding market-maker liquidity to both sides
    pub fn prepare_liquidity(
        &self,
        round: RoundIndex,
        up: Amount,
        down: Amount,
    ) -> MarketResult<RoundPool> {
        let mut pool = self.pool(round);
        pool.up_liquidity = pool
            .up_liquidity
            .checked_add(up)
            .ok_or(MarketError::ArithmeticOverflow("round up liquidity"))?;
        pool.down_liquidity = pool
            .down_liquidity
            .checked_add(down)
            .ok_or(MarketError::ArithmeticOverflow("round down liquidity"))?;
        ensure_side_totals(&pool)?;
        Ok(pool)
    }

    pub fn store_pool(&mut self, round: RoundIndex, pool: RoundPool) {
        self.pools.insert(round, pool);
    }

    /// Freeze the live round's results and open the next one
    pub fn close_and_open(
        &mut self,
        settlement_price: Price,
        fee: Amount,
        outcome: RoundOutcome,
        next_start_time: Timestamp,
        next_strike_price: Price,
        next_fee_rate: BasisPoints,
    ) -> &Round {
        let next = Round {
            index: self.current.index + 1,
            start_time: next_start_time,
            length: self.current.length,
            strike_price: next_strike_price,
            settlement_price: None,
            fee_collected: 0,
            lp_fee_rate: next_fee_rate,
            outcome: None,
        };
        let mut closed = std::mem::replace(&mut self.current, next);
        closed.settlement_price = Some(settlement_price);
        closed.fee_collected = fee;
        closed.outcome = Some(outcome);

        debug!(
            "Round {} closed, round {} opened at {}",
            closed.index, self.current.index, next_start_time
        );
        self.closed.insert(closed.index, closed);
        &self.current
    }
}

/// Both side totals and their sum must fit in `Amount`. A winning payout is at
/// most the whole round, so this bounds every payout the round can produce.
fn ensure_side_totals(pool: &RoundPool) -> MarketResult<()> {
    let up = pool
        .side_total(Side::Up)
        .ok_or(MarketError::ArithmeticOverflow("round side total"))?;
    let down = pool
        .side_total(Side::Down)
        .ok_or(MarketError::ArithmeticOverflow("round side total"))?;
    up.checked_add(down)
        .ok_or(MarketError::ArithmeticOverflow("round total"))?;
    Ok(())
}
