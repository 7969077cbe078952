use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk limits (thresholds + stake policy).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HardStopLimits {
    /// Accumulated daily exposure above this triggers the latch.
    pub daily_loss_limit_micros: i64,

    /// Losing streak length that triggers the latch.
    pub consecutive_losses_limit: u32,

    /// Exposure / bankroll ratio above this triggers the latch.
    pub bankroll_pct_limit: f64,

    /// Stake assumed per PICK for exposure accounting.
    pub default_stake_micros: i64,
}

impl HardStopLimits {
    pub fn sane_defaults() -> Self {
        Self {
            daily_loss_limit_micros: 1_000 * pkd_schemas::MICROS_SCALE,
            consecutive_losses_limit: 3,
            bankroll_pct_limit: 0.05,
            default_stake_micros: 50 * pkd_schemas::MICROS_SCALE,
        }
    }
}

/// What tripped the latch. Codes are deterministic strings so audit rows and
/// alerts stay grep-able.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    DailyLossLimit,
    ConsecutiveLosses,
    BankrollPercent,
    Manual,
}

impl TriggerKind {
    pub fn code(&self) -> &'static str {
        match self {
            TriggerKind::DailyLossLimit => "HARD_STOP_DAILY_LOSS_LIMIT",
            TriggerKind::ConsecutiveLosses => "HARD_STOP_CONSECUTIVE_LOSSES",
            TriggerKind::BankrollPercent => "HARD_STOP_BANKROLL_PERCENT",
            TriggerKind::Manual => "HARD_STOP_MANUAL",
        }
    }
}

/// Decision outcome fed back into the tracker after each prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    Pick,
    NoBet,
}

/// `reset` called while the latch is Inactive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotActiveError;

impl fmt::Display for NotActiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hard stop is not active; nothing to reset")
    }
}

impl std::error::Error for NotActiveError {}

/// Read-only projection for external callers (admin API / CLI).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HardStopStatus {
    pub is_active: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub trigger_reason: Option<String>,
    pub daily_loss_micros: i64,
    pub consecutive_losses: u32,
    pub bankroll_pct: f64,
    pub limits: HardStopLimits,
    pub recommended_action: String,
}
