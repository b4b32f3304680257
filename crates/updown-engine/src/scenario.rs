//! Scenario replay
//!
//! A scenario is a JSON document holding a market config and an ordered list
//! of steps. `ScenarioRunner` plays the steps against an in-memory engine and
//! records each step's outcome. A rejected step is recorded and the run
//! continues with the next step.
//!
//! ```json
//! {
//!   "config": { "min_bid_amount": 1 },
//!   "steps": [
//!     { "op": "fund", "account": "alice", "amount": 1000 },
//!     { "op": "bid", "account": "alice", "round": 2, "side": "up", "amount": 100 },
//!     { "op": "process_round", "settlement_price": 1000, "next_strike_price": 3000 },
//!     { "op": "claim", "account": "alice" }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, MarketConfig};
use crate::error::{ErrorKind, MarketError};
use crate::external::{BalanceLedger, InMemoryLedger, RoleRegistry};
use crate::market::RoundMarket;
use crate::types::{
    AccountId, Amount, CallContext, MarketEvent, MarketStats, Price, Role, RoundIndex, Side,
    Timestamp,
};

fn default_admin() -> AccountId {
    AccountId::from("operator")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: MarketConfig,
    /// Holds every role; default caller of privileged steps
    #[serde(default = "default_admin")]
    pub admin: AccountId,
    pub steps: Vec<ScenarioStep>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioStep {
    Fund {
        account: AccountId,
        amount: Amount,
    },
    FundPool {
        amount: Amount,
    },
    GrantRole {
        account: AccountId,
        role: Role,
    },
    RevokeRole {
        account: AccountId,
        role: Role,
    },
    Bid {
        account: AccountId,
        round: RoundIndex,
        side: Side,
        amount: Amount,
    },
    CommitLiquidity {
        #[serde(default)]
        caller: Option<AccountId>,
        round: RoundIndex,
        up: Amount,
        down: Amount,
    },
    /// `now` defaults to the live round's earliest settlement time and
    /// `next_start_time` defaults to `now`
    ProcessRound {
        #[serde(default)]
        caller: Option<AccountId>,
        #[serde(default)]
        now: Option<Timestamp>,
        #[serde(default)]
        next_start_time: Option<Timestamp>,
        settlement_price: Price,
        next_strike_price: Price,
    },
    Claim {
        account: AccountId,
    },
    SetFeeRate {
        #[serde(default)]
        caller: Option<AccountId>,
        bps: u32,
    },
    SetMarketLimit {
        #[serde(default)]
        caller: Option<AccountId>,
        limit: Amount,
    },
}

impl ScenarioStep {
    pub fn op(&self) -> &'static str {
        match self {
            ScenarioStep::Fund { .. } => "fund",
            ScenarioStep::FundPool { .. } => "fund_pool",
            ScenarioStep::GrantRole { .. } => "grant_role",
            ScenarioStep::RevokeRole { .. } => "revoke_role",
            ScenarioStep::Bid { .. } => "bid",
            ScenarioStep::CommitLiquidity { .. } => "commit_liquidity",
            ScenarioStep::ProcessRound { .. } => "process_round",
            ScenarioStep::Claim { .. } => "claim",
            ScenarioStep::SetFeeRate { .. } => "set_fee_rate",
            ScenarioStep::SetMarketLimit { .. } => "set_market_limit",
        }
    }
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let scenario: Scenario = serde_json::from_str(json)?;
        scenario.config.validate()?;
        Ok(scenario)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Two bettors and a market maker over three rounds, with literal amounts
    pub fn demo() -> Self {
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");
        let maker = AccountId::from("maker");
        Self {
            name: Some("two-user round with market maker".into()),
            config: MarketConfig { min_bid_amount: 1, ..Default::default() },
            admin: default_admin(),
            steps: vec![
                ScenarioStep::Fund { account: alice.clone(), amount: 1_000 },
                ScenarioStep::Fund { account: bob.clone(), amount: 1_000 },
                ScenarioStep::FundPool { amount: 10_000 },
                ScenarioStep::GrantRole { account: maker.clone(), role: Role::MarketMaker },
                ScenarioStep::SetMarketLimit { caller: None, limit: 500 },
                ScenarioStep::Bid { account: alice.clone(), round: 2, side: Side::Up, amount: 100 },
                ScenarioStep::Bid { account: bob.clone(), round: 2, side: Side::Down, amount: 200 },
                ScenarioStep::CommitLiquidity { caller: Some(maker), round: 3, up: 50, down: 50 },
                ScenarioStep::Bid {
                    account: alice.clone(),
                    round: 3,
                    side: Side::Down,
                    amount: 100,
                },
                ScenarioStep::ProcessRound {
                    caller: None,
                    now: None,
                    next_start_time: None,
                    settlement_price: 2_000,
                    next_strike_price: 2_000,
                },
                ScenarioStep::ProcessRound {
                    caller: None,
                    now: None,
                    next_start_time: None,
                    settlement_price: 2_500,
                    next_strike_price: 3_000,
                },
                // round 2 is still live
                ScenarioStep::Claim { account: alice.clone() },
                ScenarioStep::ProcessRound {
                    caller: None,
                    now: None,
                    next_start_time: None,
                    settlement_price: 4_000,
                    next_strike_price: 4_000,
                },
                ScenarioStep::ProcessRound {
                    caller: None,
                    now: None,
                    next_start_time: None,
                    settlement_price: 3_900,
                    next_strike_price: 3_900,
                },
                ScenarioStep::Claim { account: alice },
                ScenarioStep::Claim { account: bob },
            ],
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok { detail: serde_json::Value },
    Rejected { kind: ErrorKind, error: String },
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok { .. })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub op: &'static str,
    pub outcome: StepOutcome,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScenarioReport {
    pub name: Option<String>,
    pub steps: Vec<StepReport>,
    pub events: Vec<MarketEvent>,
    pub stats: MarketStats,
    pub current_round: RoundIndex,
    pub balances: BTreeMap<AccountId, Amount>,
    pub pool_balance: Amount,
    pub treasury_balance: Amount,
}

impl ScenarioReport {
    pub fn rejected_count(&self) -> usize {
        self.steps.iter().filter(|s| !s.outcome.is_ok()).count()
    }
}

/// Plays scenario steps against an in-memory market
pub struct ScenarioRunner {
    market: RoundMarket<InMemoryLedger, RoleRegistry>,
    admin: AccountId,
    /// Last timestamp a step ran at
    clock: Timestamp,
}

impl ScenarioRunner {
    pub fn new(config: MarketConfig, admin: AccountId) -> Result<Self, ConfigError> {
        let access = RoleRegistry::with_admin(admin.clone());
        let market = RoundMarket::new(config, InMemoryLedger::new(), access)?;
        Ok(Self { market, admin, clock: 0 })
    }

    /// Play every step of `scenario` on a fresh market
    pub fn run(scenario: &Scenario) -> Result<ScenarioReport, ConfigError> {
        info!(
            "=== Replaying scenario {} ({} steps) ===",
            scenario.name.as_deref().unwrap_or("<unnamed>"),
            scenario.steps.len()
        );
        let mut runner = Self::new(scenario.config.clone(), scenario.admin.clone())?;
        let steps = scenario
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepReport { index, op: step.op(), outcome: runner.apply(step) })
            .collect();
        Ok(runner.into_report(scenario.name.clone(), steps))
    }

    pub fn market(&self) -> &RoundMarket<InMemoryLedger, RoleRegistry> {
        &self.market
    }

    pub fn clock(&self) -> Timestamp {
        self.clock
    }

    fn caller(&self, caller: &Option<AccountId>) -> AccountId {
        caller.clone().unwrap_or_else(|| self.admin.clone())
    }

    /// Execute one step, recording rather than propagating engine rejections
    pub fn apply(&mut self, step: &ScenarioStep) -> StepOutcome {
        let result: Result<serde_json::Value, MarketError> = match step {
            ScenarioStep::Fund { account, amount } => {
                self.market.balances_mut().fund(account, *amount);
                Ok(serde_json::json!({ "balance": self.market.balances().balance(account) }))
            }
            ScenarioStep::FundPool { amount } => {
                self.market.balances_mut().fund_pool(*amount);
                Ok(serde_json::json!({ "pool_balance": self.market.balances().pool_balance() }))
            }
            ScenarioStep::GrantRole { account, role } => {
                let added = self.market.access_mut().grant(*role, account.clone());
                Ok(serde_json::json!({ "added": added }))
            }
            ScenarioStep::RevokeRole { account, role } => {
                let removed = self.market.access_mut().revoke(*role, account);
                Ok(serde_json::json!({ "removed": removed }))
            }
            ScenarioStep::Bid { account, round, side, amount } => {
                let ctx = CallContext::new(account.clone(), self.clock);
                self.market
                    .place_bid(&ctx, *round, *side, *amount)
                    .map(|state| to_detail(&state))
            }
            ScenarioStep::CommitLiquidity { caller, round, up, down } => {
                let ctx = CallContext::new(self.caller(caller), self.clock);
                self.market
                    .commit_liquidity(&ctx, *round, *up, *down)
                    .map(|pool| to_detail(&pool))
            }
            ScenarioStep::ProcessRound {
                caller,
                now,
                next_start_time,
                settlement_price,
                next_strike_price,
            } => {
                let earliest = self.market.current_round().end_time();
                let now = now.unwrap_or_else(|| earliest.max(self.clock));
                let next_start = next_start_time.unwrap_or(now);
                self.clock = now;
                let ctx = CallContext::new(self.caller(caller), now);
                self.market
                    .process_round(&ctx, next_start, *settlement_price, *next_strike_price)
                    .map(|record| to_detail(&record))
            }
            ScenarioStep::Claim { account } => {
                let ctx = CallContext::new(account.clone(), self.clock);
                self.market.claim(&ctx).map(|summary| to_detail(&summary))
            }
            ScenarioStep::SetFeeRate { caller, bps } => {
                let ctx = CallContext::new(self.caller(caller), self.clock);
                self.market
                    .update_fee_rate(&ctx, *bps)
                    .map(|old| serde_json::json!({ "old": old, "new": bps }))
            }
            ScenarioStep::SetMarketLimit { caller, limit } => {
                let ctx = CallContext::new(self.caller(caller), self.clock);
                self.market
                    .set_market_limit(&ctx, *limit)
                    .map(|old| serde_json::json!({ "old": old, "new": limit }))
            }
        };

        match result {
            Ok(detail) => {
                debug!("{} ok: {}", step.op(), detail);
                StepOutcome::Ok { detail }
            }
            Err(e) => {
                warn!("{} rejected: {}", step.op(), e);
                StepOutcome::Rejected { kind: e.kind(), error: e.to_string() }
            }
        }
    }

    pub fn into_report(mut self, name: Option<String>, steps: Vec<StepReport>) -> ScenarioReport {
        let balances = self
            .market
            .balances()
            .accounts()
            .map(|(account, balance)| (account.clone(), balance))
            .collect();
        ScenarioReport {
            name,
            steps,
            events: self.market.drain_events(),
            stats: self.market.stats().clone(),
            current_round: self.market.current_round_index(),
            balances,
            pool_balance: self.market.balances().pool_balance(),
            treasury_balance: self.market.balances().treasury_balance(),
        }
    }
}

fn to_detail<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}
