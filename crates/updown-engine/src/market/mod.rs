//! Round Market - the engine facade
//!
//! Owns every component and both collaborators, and exposes the four
//! operations (`place_bid`, `process_round`, `claim`, `commit_liquidity`)
//! plus parameter administration and read views.
//!
//! # Atomicity
//! Each operation runs in three phases:
//! 1. Validate and plan against current state (pure)
//! 2. Debit the collaborator ledger, the only fallible external call
//! 3. Apply planned mutations, credit payouts, record events
//!
//! A call that returns `Err` leaves engine and ledger state unchanged.

use tracing::{debug, info, warn};

use crate::claims::{ClaimPlan, ClaimProcessor};
use crate::config::{ConfigError, LoyaltyHookPolicy, MarketConfig};
use crate::error::{MarketError, MarketResult};
use crate::external::{AccessControl, BalanceLedger, InMemoryLedger, LoyaltyHook, RoleRegistry};
use crate::ledger::RoundLedger;
use crate::liquidity::MarketMakerGateway;
use crate::math::BasisPoints;
use crate::queue::{BidSparseQueue, QueueInvariantViolation};
use crate::settlement::SettlementEngine;
use crate::types::{
    AccountId, Amount, BidNode, CallContext, ClaimSummary, MarketEvent, MarketStats, Price, Role,
    Round, RoundIndex, RoundPool, SettlementRecord, Side, Timestamp, UserQueueState,
};

#[cfg(test)]
mod tests;

/// Up/down round market over a balance ledger `L` and role source `A`
pub struct RoundMarket<L: BalanceLedger = InMemoryLedger, A: AccessControl = RoleRegistry> {
    config: MarketConfig,
    ledger: RoundLedger,
    queue: BidSparseQueue,
    settlement: SettlementEngine,
    claims: ClaimProcessor,
    gateway: MarketMakerGateway,

    // Collaborators
    balances: L,
    access: A,
    hook: Option<Box<dyn LoyaltyHook>>,

    // Fee rate applied to rounds opened from now on
    fee_rate: BasisPoints,

    events: Vec<MarketEvent>,
    stats: MarketStats,
}

impl<L: BalanceLedger, A: AccessControl> RoundMarket<L, A> {
    /// Create a market at the genesis round
    pub fn new(config: MarketConfig, balances: L, access: A) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Creating RoundMarket: round length {}s, {} rounds ahead, min bid {}, fee {}",
            config.round_length_secs,
            config.max_rounds_ahead,
            config.min_bid_amount,
            config.initial_fee_rate_bps
        );

        Ok(Self {
            ledger: RoundLedger::new(config.round_length_secs, config.initial_fee_rate_bps),
            queue: BidSparseQueue::new(),
            settlement: SettlementEngine::new(
                config.round_length_secs,
                config.max_start_delay_secs,
            ),
            claims: ClaimProcessor::new(config.max_claims_per_call),
            gateway: MarketMakerGateway::new(config.initial_market_limit),
            balances,
            access,
            hook: None,
            fee_rate: config.initial_fee_rate_bps,
            events: Vec::new(),
            stats: MarketStats::default(),
            config,
        })
    }

    /// Attach a loyalty hook notified on every accepted bid
    pub fn with_loyalty_hook(mut self, hook: impl LoyaltyHook + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Stake `amount` on `side` of a future round
    pub fn place_bid(
        &mut self,
        ctx: &CallContext,
        round: RoundIndex,
        side: Side,
        amount: Amount,
    ) -> MarketResult<UserQueueState> {
        let account = &ctx.caller;

        if amount == 0 {
            return Err(MarketError::ZeroAmount);
        }
        if amount < self.config.min_bid_amount {
            return Err(MarketError::BelowMinimum { amount, minimum: self.config.min_bid_amount });
        }
        self.ledger.check_betting_window(round, self.config.max_rounds_ahead)?;

        let pool = self.ledger.prepare_bid(round, side, amount)?;
        let plan = self.queue.plan_insert(account, round, side, amount)?;

        let available = self.balances.balance(account);
        if available < amount {
            return Err(MarketError::InsufficientBalance {
                account: account.clone(),
                needed: amount,
                available,
            });
        }

        if self.config.loyalty_hook_policy == LoyaltyHookPolicy::Required {
            if let Some(hook) = self.hook.as_mut() {
                hook.on_bid_recorded(account, amount, round).map_err(|e| {
                    warn!("Loyalty hook rejected bid from {} in round {}: {}", account, round, e);
                    MarketError::LoyaltyHook(e.to_string())
                })?;
            }
        }

        self.balances.debit(account, amount)?;

        self.ledger.store_pool(round, pool);
        self.queue.apply_insert(account, plan);

        let merged = plan.merges();
        self.stats.bids_placed += 1;
        if merged {
            self.stats.bids_merged += 1;
        }
        debug!("{} bid {} {} in round {} (merged: {})", account, amount, side, round, merged);
        self.events.push(MarketEvent::BidPlaced {
            account: account.clone(),
            round,
            side,
            amount,
            merged,
        });

        if self.config.loyalty_hook_policy == LoyaltyHookPolicy::BestEffort {
            if let Some(hook) = self.hook.as_mut() {
                if let Err(e) = hook.on_bid_recorded(account, amount, round) {
                    warn!("Loyalty hook failed for {} in round {}: {}", account, round, e);
                    self.stats.hook_failures += 1;
                }
            }
        }

        Ok(self.queue.state(account))
    }

    /// Settle the live round at `settlement_price` and open the next one
    pub fn process_round(
        &mut self,
        ctx: &CallContext,
        next_start_time: Timestamp,
        settlement_price: Price,
        next_strike_price: Price,
    ) -> MarketResult<SettlementRecord> {
        self.require_role(ctx, Role::GameAdmin)?;

        let round = self.ledger.current_round();
        let index = round.index;
        let pool = self.ledger.pool(index);
        let settled = self.settlement.settle(
            round,
            &pool,
            ctx.now,
            next_start_time,
            settlement_price,
            next_strike_price,
            self.config.treasury_split_bps,
        )?;

        if settled.fee_split.treasury > 0 {
            self.balances.credit_treasury(settled.fee_split.treasury);
        }
        let pool_credit = settled.pool_credit();
        if pool_credit > 0 {
            self.balances.credit_pool(pool_credit);
        }

        let opened = self.ledger.close_and_open(
            settlement_price,
            settled.fee,
            settled.outcome,
            next_start_time,
            next_strike_price,
            self.fee_rate,
        );
        let opened_event = MarketEvent::RoundOpened {
            round: opened.index,
            start_time: opened.start_time,
            strike_price: opened.strike_price,
            fee_rate: opened.lp_fee_rate,
        };

        info!(
            "Round {} settled: {} wins (strike {}, price {}), fee {} -> treasury {} / pool {}",
            index,
            settled.winner,
            settled.record.strike_price,
            settlement_price,
            settled.fee,
            settled.fee_split.treasury,
            settled.fee_split.pool
        );
        if settled.unclaimable_sweep > 0 {
            info!(
                "Round {}: nobody on the winning side, {} swept to pool",
                index, settled.unclaimable_sweep
            );
        }

        self.stats.rounds_settled += 1;
        self.stats.fees_collected += settled.fee as u128;

        self.events.push(MarketEvent::RoundSettled {
            round: index,
            winner: settled.winner,
            record: settled.record,
        });
        if pool.liquidity(Side::Up) > 0 || pool.liquidity(Side::Down) > 0 {
            self.events.push(MarketEvent::LiquidityReturned {
                round: index,
                amount: settled.liquidity_return,
            });
        }
        self.events.push(MarketEvent::FeeDistributed {
            round: index,
            treasury: settled.fee_split.treasury,
            pool: settled.fee_split.pool,
        });
        self.events.push(opened_event);

        Ok(settled.record)
    }

    /// Drain up to `max_claims_per_call` settled nodes from the caller's queue
    pub fn claim(&mut self, ctx: &CallContext) -> MarketResult<ClaimSummary> {
        let account = &ctx.caller;
        let plan = self.claims.plan(&self.queue, &self.ledger, account)?;

        if plan.total_payout > 0 {
            self.balances.credit(account, plan.total_payout);
        }
        self.claims.apply(&mut self.queue, account, &plan);

        let queue = self.queue.state(account);
        let rounds_processed = plan.rounds.len() as u32;
        info!(
            "{} claimed {} over {} round(s), {} pending{}",
            account,
            plan.total_payout,
            rounds_processed,
            queue.unsettled_count,
            if plan.more_pending { " (cap reached)" } else { "" }
        );

        self.stats.claim_calls += 1;
        self.stats.nodes_drained += rounds_processed as u64;
        self.events.push(MarketEvent::Claimed {
            account: account.clone(),
            rounds_processed,
            payout: plan.total_payout,
            more_pending: plan.more_pending,
        });

        Ok(ClaimSummary {
            account: account.clone(),
            rounds: plan.rounds,
            total_payout: plan.total_payout,
            queue,
            more_pending: plan.more_pending,
        })
    }

    /// Move pool funds into a future round as market-maker liquidity
    pub fn commit_liquidity(
        &mut self,
        ctx: &CallContext,
        round: RoundIndex,
        up: Amount,
        down: Amount,
    ) -> MarketResult<RoundPool> {
        self.require_role(ctx, Role::MarketMaker)?;
        self.ledger.check_betting_window(round, self.config.max_rounds_ahead)?;

        let current = self.ledger.pool(round);
        self.gateway.check(&current, up, down)?;
        let pool = self.ledger.prepare_liquidity(round, up, down)?;
        let total = up
            .checked_add(down)
            .ok_or(MarketError::ArithmeticOverflow("liquidity commitment"))?;

        self.balances.debit_pool(total)?;
        self.ledger.store_pool(round, pool);

        info!("{} committed liquidity to round {}: up {}, down {}", ctx.caller, round, up, down);
        self.stats.liquidity_commitments += 1;
        self.events.push(MarketEvent::LiquidityCommitted {
            account: ctx.caller.clone(),
            round,
            up,
            down,
        });

        Ok(pool)
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Change the fee rate for rounds opened after this call. Returns the old rate.
    pub fn update_fee_rate(
        &mut self,
        ctx: &CallContext,
        rate_bps: u32,
    ) -> MarketResult<BasisPoints> {
        self.require_role(ctx, Role::GameAdmin)?;

        let (min, max) = (self.config.fee_rate_min_bps, self.config.fee_rate_max_bps);
        if rate_bps < min.value() || rate_bps > max.value() {
            return Err(MarketError::FeeRateOutOfBounds {
                rate: rate_bps,
                min: min.value(),
                max: max.value(),
            });
        }
        let rate = BasisPoints::new(rate_bps)?;
        let old = std::mem::replace(&mut self.fee_rate, rate);

        info!("Fee rate updated: {} -> {}", old, rate);
        self.events.push(MarketEvent::FeeRateUpdated { old, new: rate });
        Ok(old)
    }

    /// Change the per-round, per-side liquidity cap. Returns the old limit.
    pub fn set_market_limit(&mut self, ctx: &CallContext, limit: Amount) -> MarketResult<Amount> {
        self.require_role(ctx, Role::GameAdmin)?;
        let old = self.gateway.set_limit(limit);
        self.events.push(MarketEvent::MarketLimitUpdated { old, new: limit });
        Ok(old)
    }

    fn require_role(&self, ctx: &CallContext, role: Role) -> MarketResult<()> {
        if self.access.has_role(&ctx.caller, role) {
            Ok(())
        } else {
            Err(MarketError::AccessDenied { account: ctx.caller.clone(), role })
        }
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Config the market was created with
    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Index of the live round
    pub fn current_round_index(&self) -> RoundIndex {
        self.ledger.current_index()
    }

    pub fn current_round(&self) -> &Round {
        self.ledger.current_round()
    }

    /// Opened rounds; `None` for rounds not yet opened
    pub fn round(&self, index: RoundIndex) -> Option<&Round> {
        self.ledger.round(index)
    }

    /// Stake totals of a round, zero if nobody staked in it
    pub fn pool(&self, index: RoundIndex) -> RoundPool {
        self.ledger.pool(index)
    }

    pub fn is_settled(&self, index: RoundIndex) -> bool {
        self.ledger.is_settled(index)
    }

    /// Head, tail and pending count of `account`'s bid queue
    pub fn queue_state(&self, account: &AccountId) -> UserQueueState {
        self.queue.state(account)
    }

    pub fn bid_node(&self, account: &AccountId, round: RoundIndex) -> Option<&BidNode> {
        self.queue.node(account, round)
    }

    /// Rounds pending claim for `account`, in order
    pub fn unclaimed_rounds(&self, account: &AccountId) -> Vec<RoundIndex> {
        self.queue.iter_user(account).map(|(index, _)| index).collect()
    }

    /// Number of rounds pending claim for `account`
    pub fn unclaimed_len(&self, account: &AccountId) -> u32 {
        self.queue.state(account).unsettled_count
    }

    /// What the next `claim` would pay, without claiming
    pub fn preview_claim(&self, account: &AccountId) -> MarketResult<ClaimPlan> {
        self.claims.plan(&self.queue, &self.ledger, account)
    }

    /// Rate the next opened round will snapshot
    pub fn fee_rate(&self) -> BasisPoints {
        self.fee_rate
    }

    /// Per-round, per-side liquidity cap
    pub fn market_limit(&self) -> Amount {
        self.gateway.limit()
    }

    pub fn stats(&self) -> &MarketStats {
        &self.stats
    }

    pub fn balances(&self) -> &L {
        &self.balances
    }

    pub fn balances_mut(&mut self) -> &mut L {
        &mut self.balances
    }

    pub fn access(&self) -> &A {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut A {
        &mut self.access
    }

    /// Take every event recorded since the last drain
    pub fn drain_events(&mut self) -> Vec<MarketEvent> {
        std::mem::take(&mut self.events)
    }

    /// Check the chain invariants of every account with pending nodes
    pub fn check_queue_invariants(&self) -> Result<(), QueueInvariantViolation> {
        for account in self.queue.accounts() {
            self.queue.check_invariants(account)?;
        }
        Ok(())
    }

    /// One-line summary for operator logs as of `now`
    pub fn status_line(&self, now: Timestamp) -> String {
        let round = self.ledger.current_round();
        let started = round
            .start_datetime()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "invalid".to_string());
        let until_close = round.end_time().saturating_sub(now);
        format!(
            "round {} (start {}, strike {}, fee {}) | {} settled | \
             {} bids, {} claims, {} nodes pending | closes in {}s",
            round.index,
            started,
            round.strike_price,
            round.lp_fee_rate,
            self.stats.rounds_settled,
            self.stats.bids_placed,
            self.stats.claim_calls,
            self.queue.node_count(),
            until_close.max(0)
        )
    }
}
