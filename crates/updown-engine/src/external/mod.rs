//! Collaborator interfaces consumed by the engine
//!
//! - `BalanceLedger`: settlement-asset custody (users, liquidity pool, treasury)
//! - `AccessControl`: role checks for privileged operations
//! - `LoyaltyHook`: optional per-bid notification
//!
//! Each comes with an in-memory implementation used by tests and the CLI.

pub mod access;
pub mod balances;
pub mod loyalty;

pub use access::{AccessControl, RoleRegistry};
pub use balances::{BalanceLedger, InMemoryLedger};
pub use loyalty::{BidActivityTracker, HookError, LoyaltyHook};
