//! pkd-hardstop
//!
//! The financial risk kill-switch: a two-state (Inactive/Active) latch over
//! the persisted hard-stop singleton.
//!
//! Goals:
//! - Daily loss limit enforcement
//! - Consecutive-loss streak enforcement
//! - Bankroll exposure percent enforcement
//! - Sticky latch: once Active, every decision is HARD_STOP until an
//!   explicit admin reset
//!
//! Deterministic, pure logic. No IO; persistence is the caller's job.

mod tracker;
mod types;

pub use tracker::{apply_reset, HardStopTracker};
pub use types::*;
