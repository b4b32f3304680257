//! Balance custody

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};
use crate::types::{AccountId, Amount};

/// Custody of the settlement asset.
///
/// Only debits can fail. The engine performs all of its own validation
/// before the first debit and makes no fallible call after it, which keeps
/// every operation all-or-nothing.
pub trait BalanceLedger {
    fn balance(&self, account: &AccountId) -> Amount;

    /// Take `amount` from `account` to escrow a stake
    fn debit(&mut self, account: &AccountId, amount: Amount) -> MarketResult<()>;

    /// Pay `amount` out to `account`
    fn credit(&mut self, account: &AccountId, amount: Amount);

    fn pool_balance(&self) -> Amount;

    /// Take `amount` from the liquidity pool for a market-maker commitment
    fn debit_pool(&mut self, amount: Amount) -> MarketResult<()>;

    fn credit_pool(&mut self, amount: Amount);

    fn credit_treasury(&mut self, amount: Amount);
}

/// HashMap-backed ledger
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InMemoryLedger {
    balances: HashMap<AccountId, Amount>,
    pool: Amount,
    treasury: Amount,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint `amount` to `account` (host-side deposit)
    pub fn fund(&mut self, account: &AccountId, amount: Amount) {
        self.credit(account, amount);
    }

    pub fn fund_pool(&mut self, amount: Amount) {
        self.credit_pool(amount);
    }

    pub fn treasury_balance(&self) -> Amount {
        self.treasury
    }

    /// Sum of every balance held outside the engine's escrow
    pub fn total_held(&self) -> u128 {
        let accounts: u128 = self.balances.values().map(|&b| b as u128).sum();
        accounts + self.pool as u128 + self.treasury as u128
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&AccountId, Amount)> {
        self.balances.iter().map(|(a, &b)| (a, b))
    }
}

impl BalanceLedger for InMemoryLedger {
    fn balance(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn debit(&mut self, account: &AccountId, amount: Amount) -> MarketResult<()> {
        let available = self.balance(account);
        if available < amount {
            return Err(MarketError::InsufficientBalance {
                account: account.clone(),
                needed: amount,
                available,
            });
        }
        self.balances.insert(account.clone(), available - amount);
        Ok(())
    }

    fn credit(&mut self, account: &AccountId, amount: Amount) {
        let balance = self.balances.entry(account.clone()).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    fn pool_balance(&self) -> Amount {
        self.pool
    }

    fn debit_pool(&mut self, amount: Amount) -> MarketResult<()> {
        if self.pool < amount {
            return Err(MarketError::InsufficientPoolBalance {
                needed: amount,
                available: self.pool,
            });
        }
        self.pool -= amount;
        Ok(())
    }

    fn credit_pool(&mut self, amount: Amount) {
        self.pool = self.pool.saturating_add(amount);
    }

    fn credit_treasury(&mut self, amount: Amount) {
        self.treasury = self.treasury.saturating_add(amount);
    }
}
