//! Bid Sparse Queue - per-user linked list over round indices
//!
//! Nodes live in a flat table keyed by `(account, round)`. Each user's nodes
//! form a doubly linked chain in strictly increasing round order, so rounds a
//! user never bid on cost nothing to store and nothing to claim.
//!
//! # Insertion
//! - Same round as an existing node: amounts merge, no new node
//! - Round above the tail: O(1) append
//! - Round below the tail: walk back from the tail through `prev` links.
//!   Every node above the target sits inside the bidding window, so the walk
//!   is bounded by the look-ahead horizon.
//!
//! Insertion is split into `plan_insert` (pure, fallible) and `apply_insert`
//! (infallible) so the caller can settle external debits in between.

use std::collections::HashMap;

use thiserror::Error;

use crate::error::{MarketError, MarketResult};
use crate::types::{AccountId, Amount, BidNode, RoundIndex, Side, UserQueueState};

/// Where a planned stake lands in the user's chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertPosition {
    /// Accumulate into the node already at this round
    Merge,
    /// New node between `prev` and `next`; `None` means chain head / chain end
    Link {
        prev: Option<RoundIndex>,
        next: Option<RoundIndex>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertPlan {
    pub round: RoundIndex,
    pub side: Side,
    pub amount: Amount,
    pub position: InsertPosition,
}

impl InsertPlan {
    pub fn merges(&self) -> bool {
        self.position == InsertPosition::Merge
    }
}

/// A broken chain found by `check_invariants`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueInvariantViolation {
    #[error("{account}: head is {head:?} but unsettled_count is {count}")]
    HeadCountMismatch {
        account: AccountId,
        head: Option<RoundIndex>,
        count: u32,
    },
    #[error("{account}: missing node at round {round}")]
    MissingNode { account: AccountId, round: RoundIndex },
    #[error("{account}: chain not strictly increasing at round {round}")]
    NotIncreasing { account: AccountId, round: RoundIndex },
    #[error("{account}: prev link of round {round} does not point back to {expected:?}")]
    BrokenPrevLink {
        account: AccountId,
        round: RoundIndex,
        expected: Option<RoundIndex>,
    },
    #[error("{account}: walked {walked} nodes to {end:?}, expected {count} to tail {tail:?}")]
    LengthMismatch {
        account: AccountId,
        walked: u32,
        count: u32,
        end: Option<RoundIndex>,
        tail: Option<RoundIndex>,
    },
    #[error("{account}: {orphans} node(s) not reachable from head")]
    Orphans { account: AccountId, orphans: usize },
}

#[derive(Debug, Default)]
pub struct BidSparseQueue {
    nodes: HashMap<(AccountId, RoundIndex), BidNode>,
    users: HashMap<AccountId, UserQueueState>,
}

impl BidSparseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bookkeeping for `account`; empty for unknown accounts
    pub fn state(&self, account: &AccountId) -> UserQueueState {
        self.users.get(account).copied().unwrap_or_default()
    }

    pub fn node(&self, account: &AccountId, round: RoundIndex) -> Option<&BidNode> {
        self.nodes.get(&(account.clone(), round))
    }

    /// Total live nodes across all users
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Accounts with at least one pending node
    pub fn accounts(&self) -> impl Iterator<Item = &AccountId> {
        self.users.keys()
    }

    /// Walk `account`'s chain from head in round order
    pub fn iter_user<'a>(&'a self, account: &'a AccountId) -> UserNodes<'a> {
        UserNodes {
            queue: self,
            account,
            cursor: self.state(account).head_round_index,
        }
    }

    /// Decide where a stake goes without touching state
    pub fn plan_insert(
        &self,
        account: &AccountId,
        round: RoundIndex,
        side: Side,
        amount: Amount,
    ) -> MarketResult<InsertPlan> {
        if let Some(node) = self.node(account, round) {
            node.amount(side)
                .checked_add(amount)
                .ok_or(MarketError::ArithmeticOverflow("bid node amount"))?;
            return Ok(InsertPlan { round, side, amount, position: InsertPosition::Merge });
        }

        let state = self.state(account);
        let mut next = None;
        let mut cursor = state.tail_round_index;
        while let Some(index) = cursor {
            if index < round {
                break;
            }
            next = Some(index);
            cursor = self.node(account, index).and_then(|n| n.prev_round_index);
        }

        Ok(InsertPlan {
            round,
            side,
            amount,
            position: InsertPosition::Link { prev: cursor, next },
        })
    }

    /// Commit a plan produced by `plan_insert` against the current state
    pub fn apply_insert(&mut self, account: &AccountId, plan: InsertPlan) {
        let key = (account.clone(), plan.round);

        let (prev, next) = match plan.position {
            InsertPosition::Merge => {
                let node = self.nodes.entry(key).or_default();
                let slot = node.amount_mut(plan.side);
                *slot = slot.saturating_add(plan.amount);
                return;
            }
            InsertPosition::Link { prev, next } => (prev, next),
        };

        let mut node = BidNode {
            next_round_index: next,
            prev_round_index: prev,
            ..Default::default()
        };
        *node.amount_mut(plan.side) = plan.amount;
        self.nodes.insert(key, node);

        if let Some(p) = prev {
            if let Some(prev_node) = self.nodes.get_mut(&(account.clone(), p)) {
                prev_node.next_round_index = Some(plan.round);
            }
        }
        if let Some(n) = next {
            if let Some(next_node) = self.nodes.get_mut(&(account.clone(), n)) {
                next_node.prev_round_index = Some(plan.round);
            }
        }

        let state = self.users.entry(account.clone()).or_default();
        if prev.is_none() {
            state.head_round_index = Some(plan.round);
        }
        if next.is_none() {
            state.tail_round_index = Some(plan.round);
        }
        state.unsettled_count += 1;
    }

    /// Unlink and return the head node
    pub fn pop_head(&mut self, account: &AccountId) -> Option<(RoundIndex, BidNode)> {
        let state = self.users.get_mut(account)?;
        let head = state.head_round_index?;
        let node = self.nodes.remove(&(account.clone(), head))?;

        state.head_round_index = node.next_round_index;
        state.unsettled_count = state.unsettled_count.saturating_sub(1);
        match node.next_round_index {
            Some(next) => {
                if let Some(next_node) = self.nodes.get_mut(&(account.clone(), next)) {
                    next_node.prev_round_index = None;
                }
            }
            None => {
                state.tail_round_index = None;
            }
        }
        if state.unsettled_count == 0 {
            self.users.remove(account);
        }
        Some((head, node))
    }

    /// Verify `account`'s chain: head is `None` iff the count is zero, and
    /// following `next` from head exactly `count` times ends at tail.
    pub fn check_invariants(&self, account: &AccountId) -> Result<(), QueueInvariantViolation> {
        let state = self.state(account);
        if state.head_round_index.is_none() != (state.unsettled_count == 0) {
            return Err(QueueInvariantViolation::HeadCountMismatch {
                account: account.clone(),
                head: state.head_round_index,
                count: state.unsettled_count,
            });
        }

        let mut walked = 0u32;
        let mut last: Option<RoundIndex> = None;
        let mut cursor = state.head_round_index;
        while let Some(index) = cursor {
            let node = self.node(account, index).ok_or_else(|| {
                QueueInvariantViolation::MissingNode { account: account.clone(), round: index }
            })?;
            if last.is_some_and(|l| l >= index) {
                return Err(QueueInvariantViolation::NotIncreasing {
                    account: account.clone(),
                    round: index,
                });
            }
            if node.prev_round_index != last {
                return Err(QueueInvariantViolation::BrokenPrevLink {
                    account: account.clone(),
                    round: index,
                    expected: last,
                });
            }
            walked += 1;
            if walked > state.unsettled_count {
                break;
            }
            last = Some(index);
            cursor = node.next_round_index;
        }

        if walked != state.unsettled_count || last != state.tail_round_index {
            return Err(QueueInvariantViolation::LengthMismatch {
                account: account.clone(),
                walked,
                count: state.unsettled_count,
                end: last,
                tail: state.tail_round_index,
            });
        }

        let owned = self.nodes.keys().filter(|(a, _)| a == account).count();
        if owned != walked as usize {
            return Err(QueueInvariantViolation::Orphans {
                account: account.clone(),
                orphans: owned.saturating_sub(walked as usize),
            });
        }
        Ok(())
    }
}

/// Iterator over one user's nodes in round order
pub struct UserNodes<'a> {
    queue: &'a BidSparseQueue,
    account: &'a AccountId,
    cursor: Option<RoundIndex>,
}

impl<'a> Iterator for UserNodes<'a> {
    type Item = (RoundIndex, &'a BidNode);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let node = self.queue.node(self.account, index)?;
        self.cursor = node.next_round_index;
        Some((index, node))
    }
}
