use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::*;
use crate::error::{ErrorKind, RoundRejection, TimingViolation};
use crate::external::{BidActivityTracker, HookError};
use crate::types::ClaimedRound;

const ADMIN: &str = "operator";
const MAKER: &str = "maker";
const ALICE: &str = "alice";
const BOB: &str = "bob";
const CAROL: &str = "carol";

const FUNDING: Amount = 1_000_000;
const POOL_FUNDING: Amount = 10_000;

fn ctx(who: &str, now: Timestamp) -> CallContext {
    CallContext::new(who, now)
}

fn id(who: &str) -> AccountId {
    AccountId::from(who)
}

/// Literal-amount config: minimum bid of 1 so golden values read as written
fn config() -> MarketConfig {
    MarketConfig { min_bid_amount: 1, ..Default::default() }
}

fn market_with(config: MarketConfig) -> RoundMarket {
    let mut registry = RoleRegistry::with_admin(ADMIN);
    registry.grant(Role::MarketMaker, MAKER);

    let mut ledger = InMemoryLedger::new();
    for who in [ALICE, BOB, CAROL] {
        ledger.fund(&id(who), FUNDING);
    }
    ledger.fund_pool(POOL_FUNDING);

    RoundMarket::new(config, ledger, registry).unwrap()
}

fn market() -> RoundMarket {
    market_with(config())
}

/// Settle the live round as soon as allowed, opening the next one immediately
fn advance(m: &mut RoundMarket, price: Price, next_strike: Price) -> SettlementRecord {
    let now = m.current_round().start_time + 300;
    m.process_round(&ctx(ADMIN, now), now, price, next_strike).unwrap()
}

fn bid(m: &mut RoundMarket, who: &str, round: RoundIndex, side: Side, amount: Amount) {
    m.place_bid(&ctx(who, 0), round, side, amount).unwrap();
}

fn balance(m: &RoundMarket, who: &str) -> Amount {
    m.balances().balance(&id(who))
}

// ============================================================================
// Golden scenarios
// ============================================================================

#[test]
fn test_two_user_golden_scenario() {
    let mut m = market();
    bid(&mut m, ALICE, 2, Side::Up, 100);
    bid(&mut m, BOB, 2, Side::Down, 200);

    advance(&mut m, 1_500, 2_000);
    advance(&mut m, 2_500, 3_000);
    assert_eq!(m.current_round().strike_price, 3_000);
    let record = advance(&mut m, 4_000, 4_000);

    assert_eq!(record.strike_price, 3_000);
    assert_eq!(record.settlement_price, 4_000);
    assert_eq!(record.fee, 9);
    assert_eq!(record.length, 300);
    assert_eq!(m.round(2).unwrap().outcome.unwrap().winner, Side::Up);

    let summary = m.claim(&ctx(ALICE, 0)).unwrap();
    assert_eq!(summary.total_payout, 291);
    assert_eq!(summary.rounds, vec![ClaimedRound { round: 2, payout: 291 }]);
    assert!(!summary.more_pending);
    assert!(summary.queue.is_empty());
    assert_eq!(balance(&m, ALICE), FUNDING - 100 + 291);

    let summary = m.claim(&ctx(BOB, 0)).unwrap();
    assert_eq!(summary.total_payout, 0);
    assert_eq!(balance(&m, BOB), FUNDING - 200);

    // the whole fee went to the pool
    assert_eq!(m.balances().pool_balance(), POOL_FUNDING + 9);
    assert_eq!(m.balances().treasury_balance(), 0);
}

#[test]
fn test_two_up_one_down_golden() {
    let mut m = market();
    bid(&mut m, ALICE, 1, Side::Up, 100);
    bid(&mut m, CAROL, 1, Side::Up, 100);
    bid(&mut m, BOB, 1, Side::Down, 200);

    advance(&mut m, 1_000, 3_000);
    advance(&mut m, 3_001, 3_001);

    assert_eq!(m.claim(&ctx(ALICE, 0)).unwrap().total_payout, 194);
    assert_eq!(m.claim(&ctx(CAROL, 0)).unwrap().total_payout, 194);
    assert_eq!(m.claim(&ctx(BOB, 0)).unwrap().total_payout, 0);
}

#[test]
fn test_equal_price_resolves_down() {
    let mut m = market();
    bid(&mut m, ALICE, 1, Side::Up, 100);
    bid(&mut m, BOB, 1, Side::Down, 100);

    advance(&mut m, 1_000, 3_000);
    advance(&mut m, 3_000, 3_000);

    assert_eq!(m.claim(&ctx(BOB, 0)).unwrap().total_payout, 97 + 97);
    assert_eq!(m.claim(&ctx(ALICE, 0)).unwrap().total_payout, 0);
}

#[test]
fn test_empty_winning_side_swept_to_pool() {
    let mut m = market();
    bid(&mut m, BOB, 1, Side::Down, 200);

    advance(&mut m, 1_000, 3_000);
    advance(&mut m, 3_500, 3_500);

    assert_eq!(m.balances().pool_balance(), POOL_FUNDING + 200);
    assert_eq!(m.claim(&ctx(BOB, 0)).unwrap().total_payout, 0);
}

// ============================================================================
// Admission gates
// ============================================================================

#[test]
fn test_betting_window_boundary() {
    let mut m = market();
    assert!(m.place_bid(&ctx(ALICE, 0), 10, Side::Up, 5).is_ok());

    let err = m.place_bid(&ctx(ALICE, 0), 11, Side::Up, 5).unwrap_err();
    assert_eq!(
        err,
        MarketError::InvalidRound { round: 11, reason: RoundRejection::TooFarAhead(10) }
    );
    assert_eq!(err.kind(), ErrorKind::InvalidRound);

    let err = m.place_bid(&ctx(ALICE, 0), 0, Side::Up, 5).unwrap_err();
    assert_eq!(err, MarketError::InvalidRound { round: 0, reason: RoundRejection::LiveOrPast });

    advance(&mut m, 1_000, 1_000);
    assert!(m.place_bid(&ctx(ALICE, 0), 1, Side::Up, 5).is_err());
    assert!(m.place_bid(&ctx(ALICE, 0), 11, Side::Up, 5).is_ok());
}

#[test]
fn test_minimum_bid_amount() {
    let mut m = market_with(MarketConfig::default());
    let ledger = m.balances_mut();
    ledger.fund(&id(ALICE), 10_000_000);

    assert_eq!(m.place_bid(&ctx(ALICE, 0), 1, Side::Up, 0).unwrap_err(), MarketError::ZeroAmount);
    assert_eq!(
        m.place_bid(&ctx(ALICE, 0), 1, Side::Up, 4_999_999).unwrap_err(),
        MarketError::BelowMinimum { amount: 4_999_999, minimum: 5_000_000 }
    );
    assert!(m.place_bid(&ctx(ALICE, 0), 1, Side::Up, 5_000_000).is_ok());
}

#[test]
fn test_insufficient_balance_leaves_state_untouched() {
    let mut m = market();
    let err = m.place_bid(&ctx(ALICE, 0), 1, Side::Up, FUNDING + 1).unwrap_err();
    assert!(matches!(err, MarketError::InsufficientBalance { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidAmount);

    assert_eq!(balance(&m, ALICE), FUNDING);
    assert!(m.pool(1).is_empty());
    assert!(m.queue_state(&id(ALICE)).is_empty());
    assert!(m.drain_events().is_empty());
    assert_eq!(m.stats().bids_placed, 0);
}

#[test]
fn test_round_total_overflow_keeps_queue_drainable() {
    let mut m = market();
    let stake = Amount::MAX / 10 * 6;
    m.balances_mut().fund(&id(ALICE), stake);
    m.balances_mut().fund(&id(BOB), stake);

    bid(&mut m, ALICE, 1, Side::Up, stake);
    let err = m.place_bid(&ctx(BOB, 0), 1, Side::Down, stake).unwrap_err();
    assert_eq!(err, MarketError::ArithmeticOverflow("round total"));
    assert_eq!(err.kind(), ErrorKind::ArithmeticOverflow);
    assert_eq!(balance(&m, BOB), FUNDING + stake);
    assert!(m.queue_state(&id(BOB)).is_empty());

    bid(&mut m, BOB, 1, Side::Down, 200);
    bid(&mut m, ALICE, 2, Side::Up, 100);
    advance(&mut m, 1_000, 1_000);
    advance(&mut m, 2_000, 1_000);
    advance(&mut m, 2_000, 1_000);

    let summary = m.claim(&ctx(ALICE, 0)).unwrap();
    assert_eq!(summary.rounds_processed(), 2);
    assert!(summary.queue.is_empty());
}

#[test]
fn test_timing_gate_exact_boundary() {
    let mut m = market();
    let err = m.process_round(&ctx(ADMIN, 299), 300, 1_000, 1_000).unwrap_err();
    assert_eq!(
        err,
        MarketError::Timing(TimingViolation::SettlementTooEarly { now: 299, earliest: 300 })
    );
    assert!(m.process_round(&ctx(ADMIN, 300), 300, 1_000, 1_000).is_ok());

    // round 1 started at 300
    assert!(m.process_round(&ctx(ADMIN, 599), 599, 1_000, 1_000).is_err());
    assert!(m.process_round(&ctx(ADMIN, 600), 600, 1_000, 1_000).is_ok());
    assert_eq!(m.current_round_index(), 2);
}

#[test]
fn test_start_offset_bounds() {
    let mut m = market();
    // now + 300 + 1500
    let err = m.process_round(&ctx(ADMIN, 300), 2_101, 1_000, 1_000).unwrap_err();
    assert!(matches!(
        err,
        MarketError::Timing(TimingViolation::StartTooFarAhead { latest: 2_100, .. })
    ));
    let err = m.process_round(&ctx(ADMIN, 300), 0, 1_000, 1_000).unwrap_err();
    assert!(matches!(err, MarketError::Timing(TimingViolation::StartNotAdvanced { .. })));
    assert!(m.process_round(&ctx(ADMIN, 300), 2_100, 1_000, 1_000).is_ok());
}

#[test]
fn test_non_positive_prices_rejected() {
    let mut m = market();
    bid(&mut m, ALICE, 1, Side::Up, 100);
    assert_eq!(
        m.process_round(&ctx(ADMIN, 300), 300, 0, 1_000).unwrap_err(),
        MarketError::NonPositiveArgument
    );
    assert_eq!(
        m.process_round(&ctx(ADMIN, 300), 300, 1_000, -5).unwrap_err(),
        MarketError::NonPositiveArgument
    );
    assert_eq!(m.current_round_index(), 0);
    assert_eq!(m.stats().rounds_settled, 0);
}

#[test]
fn test_privileged_operations_require_roles() {
    let mut m = market();
    let err = m.process_round(&ctx(ALICE, 300), 300, 1_000, 1_000).unwrap_err();
    assert_eq!(err, MarketError::AccessDenied { account: id(ALICE), role: Role::GameAdmin });
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    assert!(m.commit_liquidity(&ctx(ALICE, 0), 1, 1, 1).is_err());
    assert!(m.update_fee_rate(&ctx(MAKER, 0), 100).is_err());
    assert!(m.set_market_limit(&ctx(BOB, 0), 100).is_err());

    m.access_mut().revoke(Role::MarketMaker, &id(MAKER));
    m.set_market_limit(&ctx(ADMIN, 0), 100).unwrap();
    assert!(matches!(
        m.commit_liquidity(&ctx(MAKER, 0), 1, 1, 1),
        Err(MarketError::AccessDenied { role: Role::MarketMaker, .. })
    ));
}

// ============================================================================
// Queue and claims
// ============================================================================

#[test]
fn test_merge_same_round() {
    let mut m = market();
    bid(&mut m, ALICE, 3, Side::Up, 100);
    let state = m.place_bid(&ctx(ALICE, 0), 3, Side::Down, 50).unwrap();

    assert_eq!(state.unsettled_count, 1);
    let node = m.bid_node(&id(ALICE), 3).unwrap();
    assert_eq!((node.amount_up, node.amount_down), (100, 50));

    let pool = m.pool(3);
    assert_eq!((pool.total_user_up, pool.total_user_down), (100, 50));
    assert_eq!((pool.up_count, pool.down_count), (1, 1));
    assert_eq!(m.stats().bids_merged, 1);
}

#[test]
fn test_out_of_order_bids_are_kept_in_round_order() {
    let mut m = market();
    bid(&mut m, ALICE, 7, Side::Up, 10);
    bid(&mut m, ALICE, 3, Side::Up, 10);
    bid(&mut m, ALICE, 5, Side::Down, 10);

    assert_eq!(m.unclaimed_rounds(&id(ALICE)), vec![3, 5, 7]);
    assert_eq!(m.unclaimed_len(&id(ALICE)), 3);
    let state = m.queue_state(&id(ALICE));
    assert_eq!((state.head_or_zero(), state.tail_or_zero()), (3, 7));
    m.check_queue_invariants().unwrap();
}

#[test]
fn test_claim_stops_at_live_round() {
    let mut m = market();
    bid(&mut m, ALICE, 1, Side::Up, 100);
    bid(&mut m, ALICE, 4, Side::Up, 100);
    advance(&mut m, 1_000, 1_000);

    assert_eq!(m.claim(&ctx(ALICE, 0)).unwrap_err(), MarketError::NoPendingClaims);

    advance(&mut m, 2_000, 2_000);
    let summary = m.claim(&ctx(ALICE, 0)).unwrap();
    assert_eq!(summary.rounds_processed(), 1);
    // nobody on the other side: payout is the stake minus fee
    assert_eq!(summary.total_payout, 97);
    assert_eq!(summary.queue.head_round_index, Some(4));
    assert_eq!(m.claim(&ctx(ALICE, 0)).unwrap_err(), MarketError::NoPendingClaims);
}

#[test]
fn test_preview_matches_claim_without_mutating() {
    let mut m = market();
    bid(&mut m, ALICE, 1, Side::Up, 100);
    bid(&mut m, ALICE, 2, Side::Down, 100);
    assert_eq!(m.preview_claim(&id(ALICE)).unwrap_err(), MarketError::NoPendingClaims);

    advance(&mut m, 1_000, 1_000);
    advance(&mut m, 2_000, 2_000);

    let preview = m.preview_claim(&id(ALICE)).unwrap();
    assert_eq!(preview.total_payout, 97);
    assert!(!preview.more_pending);
    assert_eq!(m.unclaimed_len(&id(ALICE)), 2);
    assert_eq!(balance(&m, ALICE), 1_000_000 - 200);

    let summary = m.claim(&ctx(ALICE, 0)).unwrap();
    assert_eq!(summary.total_payout, preview.total_payout);
    assert_eq!(summary.rounds, preview.rounds);
}

#[test]
fn test_claim_cap_and_resume() {
    let mut m = market();
    for _ in 0..260 {
        let next = m.current_round_index() + 1;
        bid(&mut m, ALICE, next, Side::Up, 10);
        advance(&mut m, 2_000, 1_000);
    }
    advance(&mut m, 2_000, 1_000);
    assert_eq!(m.unclaimed_len(&id(ALICE)), 260);

    let first = m.claim(&ctx(ALICE, 0)).unwrap();
    assert_eq!(first.rounds_processed(), 250);
    assert!(first.more_pending);
    assert_eq!(first.queue.unsettled_count, 10);
    assert_eq!(first.queue.head_round_index, Some(251));

    let second = m.claim(&ctx(ALICE, 0)).unwrap();
    assert_eq!(second.rounds_processed(), 10);
    assert!(!second.more_pending);
    assert!(second.queue.is_empty());
    assert_eq!(m.claim(&ctx(ALICE, 0)).unwrap_err(), MarketError::NoPendingClaims);

    assert_eq!(m.stats().nodes_drained, 260);
    assert_eq!(m.stats().claim_calls, 2);
}

#[test]
fn test_one_claim_equals_many_capped_claims() {
    let run = |cap: u32| {
        let mut m = market_with(MarketConfig { max_claims_per_call: cap, ..config() });
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..40 {
            let current = m.current_round_index();
            let round = current + rng.gen_range(1..4);
            bid(&mut m, ALICE, round, Side::from_is_up(rng.gen_bool(0.5)), rng.gen_range(1..500));
            bid(&mut m, BOB, round, Side::from_is_up(rng.gen_bool(0.5)), rng.gen_range(1..500));
            let price: Price = rng.gen_range(2_000..4_000);
            advance(&mut m, price, price);
        }
        for _ in 0..4 {
            advance(&mut m, 3_000, 3_000);
        }

        let mut calls = 0;
        loop {
            let summary = m.claim(&ctx(ALICE, 0)).unwrap();
            calls += 1;
            if !summary.more_pending {
                break;
            }
        }
        (balance(&m, ALICE), m.queue_state(&id(ALICE)), calls)
    };

    let (single_balance, single_state, single_calls) = run(250);
    let (chunked_balance, chunked_state, chunked_calls) = run(3);

    assert_eq!(single_calls, 1);
    assert!(chunked_calls > 1);
    assert_eq!(single_balance, chunked_balance);
    assert_eq!(single_state, chunked_state);
    assert!(single_state.is_empty());
}

// ============================================================================
// Market maker, fees, treasury
// ============================================================================

#[test]
fn test_market_maker_liquidity_participates_like_a_stake() {
    let mut m = market();
    m.set_market_limit(&ctx(ADMIN, 0), 1_000).unwrap();

    let pool = m.commit_liquidity(&ctx(MAKER, 0), 2, 50, 50).unwrap();
    assert_eq!((pool.up_liquidity, pool.down_liquidity), (50, 50));
    assert_eq!(m.balances().pool_balance(), POOL_FUNDING - 100);

    bid(&mut m, ALICE, 2, Side::Up, 100);
    bid(&mut m, BOB, 2, Side::Down, 200);
    advance(&mut m, 1_000, 1_000);
    advance(&mut m, 1_000, 3_000);
    advance(&mut m, 3_100, 3_100);

    // up: 150 (fee 4), down: 250 (fee 7) -> 243 to split
    // alice: floor(100 * 243 / 150) + 97 = 162 + 97
    assert_eq!(m.claim(&ctx(ALICE, 0)).unwrap().total_payout, 259);
    // maker return floor(50 * 243 / 150) + 48 = 129, plus the 11 fee
    assert_eq!(m.balances().pool_balance(), POOL_FUNDING - 100 + 129 + 11);
    assert_eq!(balance(&m, MAKER), 0);

    let events = m.drain_events();
    assert!(events.contains(&MarketEvent::LiquidityReturned { round: 2, amount: 129 }));
}

#[test]
fn test_market_limit_enforced_per_side() {
    let mut m = market();
    let err = m.commit_liquidity(&ctx(MAKER, 0), 1, 1, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    assert_eq!(m.set_market_limit(&ctx(ADMIN, 0), 1_000).unwrap(), 0);
    m.commit_liquidity(&ctx(MAKER, 0), 1, 600, 0).unwrap();
    assert_eq!(
        m.commit_liquidity(&ctx(MAKER, 0), 1, 401, 0).unwrap_err(),
        MarketError::LimitExceeded { side: Side::Up, requested: 1_001, limit: 1_000 }
    );
    m.commit_liquidity(&ctx(MAKER, 0), 1, 400, 1_000).unwrap();
    assert_eq!(m.commit_liquidity(&ctx(MAKER, 0), 1, 0, 0).unwrap_err(), MarketError::ZeroAmount);

    let err = m.commit_liquidity(&ctx(MAKER, 0), 0, 1, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRound);
}

#[test]
fn test_liquidity_needs_pool_funds() {
    let mut m = market();
    m.set_market_limit(&ctx(ADMIN, 0), Amount::MAX).unwrap();
    let err = m.commit_liquidity(&ctx(MAKER, 0), 1, POOL_FUNDING, 1).unwrap_err();
    assert_eq!(
        err,
        MarketError::InsufficientPoolBalance { needed: POOL_FUNDING + 1, available: POOL_FUNDING }
    );
    assert!(m.pool(1).is_empty());
}

#[test]
fn test_treasury_split() {
    let mut m = market_with(MarketConfig {
        treasury_split_bps: Some(BasisPoints::new(3_333).unwrap()),
        ..config()
    });
    bid(&mut m, ALICE, 1, Side::Up, 100);
    bid(&mut m, BOB, 1, Side::Down, 200);
    advance(&mut m, 1_000, 3_000);
    advance(&mut m, 4_000, 4_000);

    // fee 9 -> floor(9 * 3333 / 10000) = 2 to treasury, 7 to pool
    assert_eq!(m.balances().treasury_balance(), 2);
    assert_eq!(m.balances().pool_balance(), POOL_FUNDING + 7);
    let events = m.drain_events();
    assert!(events.contains(&MarketEvent::FeeDistributed { round: 1, treasury: 2, pool: 7 }));
}

#[test]
fn test_fee_rate_snapshot_at_round_open() {
    let mut m = market();
    bid(&mut m, ALICE, 2, Side::Up, 100);
    bid(&mut m, BOB, 2, Side::Down, 200);
    advance(&mut m, 1_000, 1_000);
    advance(&mut m, 1_000, 3_000);

    // round 2 is live with the 300bp snapshot
    let old = m.update_fee_rate(&ctx(ADMIN, 0), 1_000).unwrap();
    assert_eq!(old.value(), 300);
    assert_eq!(m.current_round().lp_fee_rate.value(), 300);

    let record = advance(&mut m, 4_000, 4_000);
    assert_eq!(record.fee, 9);
    assert_eq!(m.claim(&ctx(ALICE, 0)).unwrap().total_payout, 291);
    assert_eq!(m.current_round().lp_fee_rate.value(), 1_000);
}

#[test]
fn test_fee_rate_bounds() {
    let mut m = market();
    assert_eq!(
        m.update_fee_rate(&ctx(ADMIN, 0), 1_001).unwrap_err(),
        MarketError::FeeRateOutOfBounds { rate: 1_001, min: 0, max: 1_000 }
    );
    assert_eq!(m.fee_rate().value(), 300);
    m.update_fee_rate(&ctx(ADMIN, 0), 0).unwrap();
    assert_eq!(m.fee_rate(), BasisPoints::ZERO);
}

// ============================================================================
// Loyalty hook policy
// ============================================================================

struct RejectingHook;

impl LoyaltyHook for RejectingHook {
    fn on_bid_recorded(
        &mut self,
        _: &AccountId,
        _: Amount,
        _: RoundIndex,
    ) -> Result<(), HookError> {
        Err(HookError("tier service unavailable".into()))
    }
}

#[test]
fn test_best_effort_hook_failure_keeps_bid() {
    let mut m = market().with_loyalty_hook(RejectingHook);
    bid(&mut m, ALICE, 1, Side::Up, 100);

    assert_eq!(m.unclaimed_len(&id(ALICE)), 1);
    assert_eq!(balance(&m, ALICE), FUNDING - 100);
    assert_eq!(m.stats().hook_failures, 1);
}

#[test]
fn test_required_hook_failure_rejects_bid() {
    let policy = MarketConfig { loyalty_hook_policy: LoyaltyHookPolicy::Required, ..config() };
    let mut m = market_with(policy).with_loyalty_hook(RejectingHook);

    let err = m.place_bid(&ctx(ALICE, 0), 1, Side::Up, 100).unwrap_err();
    assert!(matches!(err, MarketError::LoyaltyHook(_)));
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    assert_eq!(balance(&m, ALICE), FUNDING);
    assert!(m.pool(1).is_empty());
    assert!(m.queue_state(&id(ALICE)).is_empty());
}

#[test]
fn test_hook_sees_accepted_bids_only() {
    let tracker = Arc::new(Mutex::new(BidActivityTracker::new(vec![150])));
    let mut m = market().with_loyalty_hook(Arc::clone(&tracker));

    bid(&mut m, ALICE, 1, Side::Up, 100);
    assert!(m.place_bid(&ctx(ALICE, 0), 50, Side::Up, 100).is_err());
    bid(&mut m, ALICE, 2, Side::Down, 100);

    let activity = tracker.lock().unwrap().activity(&id(ALICE));
    assert_eq!(activity.bid_count, 2);
    assert_eq!(activity.total_amount, 200);
    assert_eq!(activity.level, 1);
    assert_eq!(activity.last_round, 2);
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn test_conservation_and_sparseness_over_random_play() {
    let mut m = market_with(MarketConfig {
        treasury_split_bps: Some(BasisPoints::new(2_500).unwrap()),
        initial_market_limit: 1_000,
        max_claims_per_call: 5,
        ..config()
    });
    let initial_held = m.balances().total_held();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let users = [ALICE, BOB, CAROL];
    let mut paid: HashMap<RoundIndex, Amount> = HashMap::new();
    let mut record = |summary: ClaimSummary| {
        for claimed in summary.rounds {
            *paid.entry(claimed.round).or_default() += claimed.payout;
        }
    };

    for _ in 0..60 {
        let current = m.current_round_index();
        for _ in 0..rng.gen_range(0..6) {
            let who = users[rng.gen_range(0..users.len())];
            let round = current + rng.gen_range(1..11);
            bid(&mut m, who, round, Side::from_is_up(rng.gen_bool(0.5)), rng.gen_range(1..1_000));
            m.check_queue_invariants().unwrap();
        }
        if rng.gen_ratio(1, 3) {
            let round = current + rng.gen_range(1..11);
            let (up, down) = (rng.gen_range(0..200), rng.gen_range(1..200));
            // may hit the cap; rejected commitments must not change anything
            let before = m.pool(round);
            if m.commit_liquidity(&ctx(MAKER, 0), round, up, down).is_err() {
                assert_eq!(m.pool(round), before);
            }
        }
        if rng.gen_ratio(1, 4) {
            let who = users[rng.gen_range(0..users.len())];
            if let Ok(summary) = m.claim(&ctx(who, 0)) {
                record(summary);
            }
            m.check_queue_invariants().unwrap();
        }
        let price: Price = rng.gen_range(2_900..3_100);
        advance(&mut m, price, price);
    }
    for _ in 0..11 {
        advance(&mut m, 3_000, 3_000);
    }

    for who in users {
        while let Ok(summary) = m.claim(&ctx(who, 0)) {
            record(summary);
            m.check_queue_invariants().unwrap();
        }
        assert!(m.queue_state(&id(who)).is_empty());
    }

    let returned: HashMap<RoundIndex, Amount> = m
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            MarketEvent::LiquidityReturned { round, amount } => Some((round, amount)),
            _ => None,
        })
        .collect();

    for index in 0..m.current_round_index() {
        let pool = m.pool(index);
        let round = m.round(index).unwrap();
        let total = pool.side_total(Side::Up).unwrap() as u128
            + pool.side_total(Side::Down).unwrap() as u128;
        let out = paid.get(&index).copied().unwrap_or(0) as u128
            + returned.get(&index).copied().unwrap_or(0) as u128
            + round.fee_collected as u128;
        assert!(out <= total, "round {index}: paid {out} out of {total}");
    }

    // floor residue stays in escrow, nothing is created
    assert!(m.balances().total_held() <= initial_held);
}

// ============================================================================
// Events and views
// ============================================================================

#[test]
fn test_event_log() {
    let mut m = market();
    bid(&mut m, ALICE, 1, Side::Up, 100);
    bid(&mut m, ALICE, 1, Side::Up, 100);
    advance(&mut m, 1_000, 3_000);

    let events = m.drain_events();
    assert!(matches!(events[0], MarketEvent::BidPlaced { merged: false, .. }));
    assert!(matches!(events[1], MarketEvent::BidPlaced { merged: true, .. }));
    assert!(events.iter().any(|e| matches!(e, MarketEvent::RoundSettled { round: 0, .. })));
    assert!(events.contains(&MarketEvent::RoundOpened {
        round: 1,
        start_time: 300,
        strike_price: 3_000,
        fee_rate: BasisPoints::new(300).unwrap(),
    }));
    assert!(m.drain_events().is_empty());

    let json = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(json["event"], "bid_placed");
    assert_eq!(json["account"], "alice");
    assert_eq!(json["side"], "up");
}

#[test]
fn test_genesis_round_settles_trivially() {
    let mut m = market();
    assert_eq!(m.current_round().strike_price, 0);
    let record = advance(&mut m, 1, 2_000);
    assert_eq!(record.fee, 0);
    assert!(m.is_settled(0));
    assert_eq!(m.current_round().strike_price, 2_000);
    assert!(m.status_line(400).contains("round 1"));
}
