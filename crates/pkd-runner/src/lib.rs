//! pkd-runner
//!
//! The per-run orchestrator: sequences hard-stop checks, the fallback
//! chain, and the gate evaluator over one run's pending predictions, in
//! strict FIFO order, with a polled soft timeout and per-prediction failure
//! isolation. Also owns the settlement path that feeds real match results
//! back into the risk tracker.

mod clock;
mod config;
mod orchestrator;
mod settle;

pub use clock::{RunClock, WallClock};
pub use config::RunnerConfig;
pub use orchestrator::{RunOrchestrator, RunOutcome, RunSummary, TIMEOUT_CHECK_INTERVAL};
pub use settle::{settle_prediction, SettleReport};
