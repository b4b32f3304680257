//! Claim Processor - bounded, resumable drain of a user's bid queue
//!
//! A claim walks the chain from head, pricing each node against its round's
//! frozen outcome, and stops at the first live round, at the end of the
//! chain, or after `max_steps` nodes. The head pointer only moves past nodes
//! that were paid, so a later call resumes exactly where this one stopped.
//!
//! Planning is pure; the caller credits the total and then applies the plan.

use tracing::debug;

use crate::error::{MarketError, MarketResult, RoundRejection};
use crate::ledger::RoundLedger;
use crate::math;
use crate::queue::BidSparseQueue;
use crate::types::{AccountId, Amount, ClaimedRound};

/// Nodes to drain and what they pay
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClaimPlan {
    pub rounds: Vec<ClaimedRound>,
    pub total_payout: Amount,
    /// Settled nodes remain after this plan's last node
    pub more_pending: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct ClaimProcessor {
    max_steps: u32,
}

impl ClaimProcessor {
    pub fn new(max_steps: u32) -> Self {
        Self { max_steps: max_steps.max(1) }
    }

    pub fn plan(
        &self,
        queue: &BidSparseQueue,
        ledger: &RoundLedger,
        account: &AccountId,
    ) -> MarketResult<ClaimPlan> {
        let state = queue.state(account);
        match state.head_round_index {
            Some(head) if state.unsettled_count > 0 && ledger.is_settled(head) => {}
            _ => return Err(MarketError::NoPendingClaims),
        }

        let mut plan = ClaimPlan::default();
        let mut nodes = queue.iter_user(account);

        for (index, node) in nodes.by_ref() {
            if !ledger.is_settled(index) {
                break;
            }
            let round = ledger.round(index).ok_or(MarketError::InvalidRound {
                round: index,
                reason: RoundRejection::NotRecorded,
            })?;
            let outcome = round.outcome.ok_or(MarketError::InvalidRound {
                round: index,
                reason: RoundRejection::NotRecorded,
            })?;

            let payout = math::winning_payout(
                node.amount(outcome.winner),
                outcome.post_fee_losing_total,
                outcome.winning_total,
                round.lp_fee_rate,
            )?;
            let Some(total) = plan.total_payout.checked_add(payout) else {
                // Leave the node at the head; the next call starts from it
                debug!("{} claim total full before round {}", account, index);
                plan.more_pending = true;
                return Ok(plan);
            };
            plan.total_payout = total;
            plan.rounds.push(ClaimedRound { round: index, payout });

            debug!("{} claims round {}: payout {}", account, index, payout);

            if plan.rounds.len() >= self.max_steps as usize {
                break;
            }
        }

        plan.more_pending = plan.rounds.len() >= self.max_steps as usize
            && nodes.next().is_some_and(|(index, _)| ledger.is_settled(index));

        Ok(plan)
    }

    /// Unlink the planned nodes from the head of `account`'s chain
    pub fn apply(&self, queue: &mut BidSparseQueue, account: &AccountId, plan: &ClaimPlan) {
        for claimed in &plan.rounds {
            match queue.pop_head(account) {
                Some((index, _)) if index == claimed.round => {}
                other => {
                    debug!(
                        "{}: head {:?} diverged from plan at round {}",
                        account,
                        other.map(|(i, _)| i),
                        claimed.round
                    );
                    break;
                }
            }
        }
    }
}
