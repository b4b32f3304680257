//! Up/Down Round Market Simulator CLI
//!
//! Commands:
//! - `replay`: Replay a JSON scenario against an in-memory engine
//! - `demo`: Replay the built-in two-user scenario
//! - `simulate`: Drive a seeded random market in wall-clock-anchored rounds
//! - `default-config`: Print the default market config as JSON
//!
//! # Usage
//! ```bash
//! # Replay a scenario and save the full report
//! updown_sim replay --scenario demos/two_user_round.json --out data/report.json
//!
//! # Fail the run if any step was rejected
//! updown_sim replay --scenario demos/two_user_round.json --strict
//!
//! # Random market, 200 rounds, 8 bettors
//! updown_sim simulate --rounds 200 --users 8 --seed 7
//!
//! # Dump defaults as a starting point for a config file
//! updown_sim default-config --out config/market.json
//! ```

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use updown_engine::external::{BalanceLedger, InMemoryLedger, RoleRegistry};
use updown_engine::scenario::{Scenario, ScenarioReport, ScenarioRunner, StepOutcome};
use updown_engine::{AccountId, CallContext, MarketConfig, MarketError, Role, RoundMarket, Side};

const OPERATOR: &str = "operator";
const MAKER: &str = "maker";

#[derive(Parser)]
#[command(name = "updown_sim")]
#[command(about = "Up/down round market simulator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file
    Replay {
        /// Scenario JSON file
        #[arg(long)]
        scenario: PathBuf,

        /// Output file for the report JSON (optional, defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Exit with an error if any step was rejected
        #[arg(long, default_value = "false")]
        strict: bool,
    },

    /// Replay the built-in demo scenario
    Demo {
        /// Output file for the report JSON (optional, defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run a seeded random market
    Simulate {
        /// Rounds to settle
        #[arg(long, default_value = "50")]
        rounds: u64,

        /// Number of bettors
        #[arg(long, default_value = "5")]
        users: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Market config JSON (optional, defaults apply)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output file for the event log as JSONL
        #[arg(long)]
        events_out: Option<PathBuf>,
    },

    /// Print the default market config
    DefaultConfig {
        /// Output file (optional, defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, stopping after the current round...");
        shutdown_clone.store(true, Ordering::Relaxed);
    });

    match cli.command {
        Commands::Replay { scenario, out, strict } => run_replay(scenario, out, strict).await,
        Commands::Demo { out } => run_demo(out).await,
        Commands::Simulate { rounds, users, seed, config, events_out } => {
            run_simulate(rounds, users, seed, config, events_out, shutdown).await
        }
        Commands::DefaultConfig { out } => run_default_config(out).await,
    }
}

async fn run_replay(path: PathBuf, out: Option<PathBuf>, strict: bool) -> Result<()> {
    info!("=== Scenario Replay ===");
    info!("Scenario: {}", path.display());
    info!("");

    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    let scenario = Scenario::from_json_str(&raw).context("invalid scenario")?;

    let report = ScenarioRunner::run(&scenario)?;
    print_summary(&report);
    write_json(&report, out).await?;

    if strict && report.rejected_count() > 0 {
        anyhow::bail!("{} step(s) rejected", report.rejected_count());
    }
    Ok(())
}

async fn run_demo(out: Option<PathBuf>) -> Result<()> {
    info!("=== Demo Scenario ===");
    info!("");

    let report = ScenarioRunner::run(&Scenario::demo())?;
    print_summary(&report);
    write_json(&report, out).await
}

async fn run_default_config(out: Option<PathBuf>) -> Result<()> {
    write_json(&MarketConfig::default(), out).await
}

async fn run_simulate(
    rounds: u64,
    users: usize,
    seed: u64,
    config_path: Option<PathBuf>,
    events_out: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let config = match config_path {
        Some(ref path) => MarketConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => MarketConfig::default(),
    };
    if users == 0 {
        anyhow::bail!("--users must be at least 1");
    }

    info!("=== Random Market Simulation ===");
    info!("Rounds: {}", rounds);
    info!("Users: {}", users);
    info!("Seed: {}", seed);
    info!("Round length: {}s, fee: {}", config.round_length_secs, config.initial_fee_rate_bps);
    info!("Press Ctrl+C to stop");
    info!("");

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let min_bid = config.min_bid_amount;
    let max_ahead = config.max_rounds_ahead;
    let round_length = config.round_length_secs as i64;

    let bettors: Vec<AccountId> =
        (0..users).map(|i| AccountId::new(format!("user-{}", i))).collect();
    let mut ledger = InMemoryLedger::new();
    for bettor in &bettors {
        ledger.fund(bettor, min_bid.saturating_mul(1_000));
    }
    ledger.fund_pool(min_bid.saturating_mul(10_000));
    let mut registry = RoleRegistry::with_admin(OPERATOR);
    registry.grant(Role::MarketMaker, MAKER);

    let mut market = RoundMarket::new(config, ledger, registry)?;
    let initial_held = market.balances().total_held();

    let mut now = Utc::now().timestamp();
    let mut price: i64 = 300_000;
    market.set_market_limit(&CallContext::new(OPERATOR, now), min_bid.saturating_mul(20))?;

    let mut rejected = 0u64;
    for _ in 0..rounds {
        if shutdown.load(Ordering::Relaxed) {
            warn!("Stopping early at round {}", market.current_round_index());
            break;
        }

        let current = market.current_round_index();
        for bettor in &bettors {
            if !rng.gen_bool(0.6) {
                continue;
            }
            let round = current + rng.gen_range(1..=max_ahead);
            let side = Side::from_is_up(rng.gen_bool(0.5));
            let amount = rng.gen_range(min_bid..=min_bid.saturating_mul(10));
            let ctx = CallContext::new(bettor.clone(), now);
            if let Err(e) = market.place_bid(&ctx, round, side, amount) {
                warn!("Bid rejected: {}", e);
                rejected += 1;
            }
        }

        if rng.gen_bool(0.3) {
            let round = current + rng.gen_range(1..=max_ahead);
            let up = rng.gen_range(0..=min_bid.saturating_mul(5));
            let down = rng.gen_range(0..=min_bid.saturating_mul(5));
            match market.commit_liquidity(&CallContext::new(MAKER, now), round, up, down) {
                Ok(_) => {}
                Err(MarketError::LimitExceeded { .. }) | Err(MarketError::ZeroAmount) => {}
                Err(e) => {
                    warn!("Liquidity rejected: {}", e);
                    rejected += 1;
                }
            }
        }

        // Random walk in cents, never below 1
        price = (price + rng.gen_range(-500..=500)).max(1);
        now = now.max(market.current_round().end_time());
        let next_strike = price;
        market.process_round(&CallContext::new(OPERATOR, now), now, price, next_strike)?;

        if market.current_round_index() % 10 == 0 {
            info!("{}", market.status_line(now));
            for bettor in &bettors {
                claim_all(&mut market, bettor, now)?;
            }
        }
        now += round_length;
    }

    // Settle everything still in flight so every queue can drain
    for _ in 0..=max_ahead {
        now = now.max(market.current_round().end_time());
        market.process_round(&CallContext::new(OPERATOR, now), now, price, price)?;
    }
    for bettor in &bettors {
        claim_all(&mut market, bettor, now)?;
    }
    market
        .check_queue_invariants()
        .context("queue invariant violated")?;

    let stats = market.stats().clone();
    let held = market.balances().total_held();
    let anchor = Utc.timestamp_opt(now, 0).single().map(|t| t.to_rfc3339()).unwrap_or_default();

    info!("");
    info!("=== Summary ===");
    info!("Finished at: {}", anchor);
    info!("Rounds settled: {}", stats.rounds_settled);
    info!("Bids placed: {} ({} merged)", stats.bids_placed, stats.bids_merged);
    info!("Liquidity commitments: {}", stats.liquidity_commitments);
    info!("Claim calls: {} ({} nodes drained)", stats.claim_calls, stats.nodes_drained);
    info!("Fees collected: {}", stats.fees_collected);
    info!("Rejected operations: {}", rejected);
    info!("Pool balance: {}", market.balances().pool_balance());
    info!("Treasury balance: {}", market.balances().treasury_balance());
    info!("Escrow residual: {}", initial_held.saturating_sub(held));
    info!("");
    for bettor in &bettors {
        info!("  {}: {}", bettor, market.balances().balance(bettor));
    }

    let events = market.drain_events();
    if let Some(path) = events_out {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut lines = String::new();
        for event in &events {
            lines.push_str(&serde_json::to_string(event)?);
            lines.push('\n');
        }
        tokio::fs::write(&path, lines).await?;
        info!("");
        info!("{} events written to: {}", events.len(), path.display());
    }

    Ok(())
}

/// Claim until the queue is empty or its head round is still live
fn claim_all(
    market: &mut RoundMarket<InMemoryLedger, RoleRegistry>,
    account: &AccountId,
    now: i64,
) -> Result<()> {
    loop {
        match market.claim(&CallContext::new(account.clone(), now)) {
            Ok(summary) if summary.more_pending => continue,
            Ok(_) | Err(MarketError::NoPendingClaims) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

fn print_summary(report: &ScenarioReport) {
    info!("=== Steps ===");
    for step in &report.steps {
        match &step.outcome {
            StepOutcome::Ok { .. } => info!("  [{}] {}: ok", step.index, step.op),
            StepOutcome::Rejected { kind, error } => {
                warn!("  [{}] {}: REJECTED ({:?}) {}", step.index, step.op, kind, error)
            }
        }
    }
    info!("");
    info!("=== Summary ===");
    info!("Steps: {} ({} rejected)", report.steps.len(), report.rejected_count());
    info!("Current round: {}", report.current_round);
    info!("Rounds settled: {}", report.stats.rounds_settled);
    info!("Bids placed: {}", report.stats.bids_placed);
    info!("Nodes drained: {}", report.stats.nodes_drained);
    info!("Pool balance: {}", report.pool_balance);
    info!("Treasury balance: {}", report.treasury_balance);
    info!("Balances:");
    for (account, balance) in &report.balances {
        info!("  {}: {}", account, balance);
    }
    if report.stats.hook_failures > 0 {
        error!("Loyalty hook failures: {}", report.stats.hook_failures);
    }
}

async fn write_json<T: serde::Serialize>(value: &T, out: Option<PathBuf>) -> Result<()> {
    let json_output = serde_json::to_string_pretty(value)?;

    if let Some(out_path) = out {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&out_path, &json_output).await?;
        info!("");
        info!("Output written to: {}", out_path.display());
    } else {
        println!();
        println!("{}", json_output);
    }
    Ok(())
}
