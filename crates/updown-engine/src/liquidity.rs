//! Market Maker Gateway - capped liquidity commitments
//!
//! Market makers move pool funds into a future round on either or both
//! sides. Each side's running total for a round is capped by the market
//! limit. The stake then settles like any user bid and its return flows back
//! to the pool.

use tracing::info;

use crate::error::{MarketError, MarketResult};
use crate::types::{Amount, RoundPool, Side};

#[derive(Clone, Copy, Debug)]
pub struct MarketMakerGateway {
    limit: Amount,
}

impl MarketMakerGateway {
    pub fn new(limit: Amount) -> Self {
        Self { limit }
    }

    /// Per-round, per-side liquidity cap
    pub fn limit(&self) -> Amount {
        self.limit
    }

    /// Replace the cap, returning the previous one. Existing commitments are
    /// not revisited.
    pub fn set_limit(&mut self, limit: Amount) -> Amount {
        let old = std::mem::replace(&mut self.limit, limit);
        info!("Market limit updated: {} -> {}", old, limit);
        old
    }

    /// Validate a commitment of `up`/`down` against `pool`'s existing liquidity
    pub fn check(&self, pool: &RoundPool, up: Amount, down: Amount) -> MarketResult<()> {
        if up == 0 && down == 0 {
            return Err(MarketError::ZeroAmount);
        }
        for (side, amount) in [(Side::Up, up), (Side::Down, down)] {
            if amount == 0 {
                continue;
            }
            let requested = pool.liquidity(side).saturating_add(amount);
            if requested > self.limit {
                return Err(MarketError::LimitExceeded { side, requested, limit: self.limit });
            }
        }
        Ok(())
    }
}
