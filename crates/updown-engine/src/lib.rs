//! Up/Down Round Market Engine
//!
//! Participants stake on whether a reference price will close above or below a
//! strike at the end of a fixed-length round. Winners split the losing side
//! pro-rata, net of a protocol fee.
//!
//! # Components
//! - `ledger`: `RoundLedger` - per-round data and pool totals
//! - `queue`: `BidSparseQueue` - per-user sparse linked list over round indices
//! - `settlement`: `SettlementEngine` - timing gates, fee and winner computation
//! - `claims`: `ClaimProcessor` - bounded, resumable drain of a user's queue
//! - `liquidity`: `MarketMakerGateway` - capped market-maker commitments
//! - `market`: `RoundMarket` - the engine facade that owns all of the above
//! - `external`: collaborator traits (balances, roles, loyalty) with in-memory impls
//! - `scenario`: JSON scenario replay used by the simulator CLI
//!
//! # Arithmetic
//! All amounts are integers. Fees use basis points (implicit denominator 10000)
//! and every division floors.

pub mod claims;
pub mod config;
pub mod error;
pub mod external;
pub mod ledger;
pub mod liquidity;
pub mod market;
pub mod math;
pub mod queue;
pub mod scenario;
pub mod settlement;
pub mod types;

pub use config::{LoyaltyHookPolicy, MarketConfig};
pub use error::{ErrorKind, MarketError, MarketResult};
pub use market::RoundMarket;
pub use math::BasisPoints;
pub use types::*;

/// Basis-point denominator used by every fee computation
pub const BPS_DENOMINATOR: u64 = 10_000;
