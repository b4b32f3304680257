//! Loyalty hook
//!
//! Notified once per accepted bid. Whether a failure rejects the bid is
//! decided by `LoyaltyHookPolicy`, not by the hook.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{AccountId, Amount, RoundIndex};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

pub trait LoyaltyHook {
    fn on_bid_recorded(
        &mut self,
        account: &AccountId,
        amount: Amount,
        round: RoundIndex,
    ) -> Result<(), HookError>;
}

/// Shared handle so the host can inspect a hook the engine owns
impl<H: LoyaltyHook> LoyaltyHook for Arc<Mutex<H>> {
    fn on_bid_recorded(
        &mut self,
        account: &AccountId,
        amount: Amount,
        round: RoundIndex,
    ) -> Result<(), HookError> {
        let mut inner = self.lock().map_err(|_| HookError("loyalty hook lock poisoned".into()))?;
        inner.on_bid_recorded(account, amount, round)
    }
}

/// Cumulative bidding activity for one account
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidActivity {
    pub total_amount: Amount,
    pub bid_count: u64,
    pub last_round: RoundIndex,
    /// Number of tier thresholds reached
    pub level: u32,
}

/// Tier tracker: levels up an account as its cumulative stake crosses
/// ascending thresholds.
#[derive(Clone, Debug, Default)]
pub struct BidActivityTracker {
    thresholds: Vec<Amount>,
    activity: HashMap<AccountId, BidActivity>,
}

impl BidActivityTracker {
    pub fn new(mut thresholds: Vec<Amount>) -> Self {
        thresholds.sort_unstable();
        thresholds.dedup();
        Self { thresholds, activity: HashMap::new() }
    }

    pub fn activity(&self, account: &AccountId) -> BidActivity {
        self.activity.get(account).copied().unwrap_or_default()
    }

    fn level_for(&self, total: Amount) -> u32 {
        self.thresholds.iter().take_while(|&&t| total >= t).count() as u32
    }
}

impl LoyaltyHook for BidActivityTracker {
    fn on_bid_recorded(
        &mut self,
        account: &AccountId,
        amount: Amount,
        round: RoundIndex,
    ) -> Result<(), HookError> {
        let current = self.activity(account);
        let total_amount = current
            .total_amount
            .checked_add(amount)
            .ok_or_else(|| HookError(format!("activity total overflow for {}", account)))?;
        let level = self.level_for(total_amount);
        if level > current.level {
            debug!("{} reached loyalty level {}", account, level);
        }
        self.activity.insert(
            account.clone(),
            BidActivity {
                total_amount,
                bid_count: current.bid_count + 1,
                last_round: round,
                level,
            },
        );
        Ok(())
    }
}
