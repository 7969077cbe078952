use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 1e-6 fixed-point scale for money amounts (loss, stake, bankroll).
pub const MICROS_SCALE: i64 = 1_000_000;

/// One machine-generated match prediction awaiting a policy decision.
/// Produced by the external model pipeline; immutable once read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionInput {
    pub prediction_id: Uuid,
    pub run_id: Uuid,
    pub match_id: String,
    pub user_id: Option<String>,
    /// Model win-probability confidence in [0,1]. Out-of-range values are
    /// clamped by the gate evaluator, never rejected.
    pub confidence: f64,
    /// Modeled advantage over the reference market price, in percent.
    pub edge: Option<f64>,
    /// Model output distribution shift versus baseline.
    pub drift_score: Option<f64>,
    pub model_version: String,
    /// Winner / score forecasts are opaque to the policy engine.
    pub winner_forecast: Value,
    pub score_forecast: Value,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a prediction row in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionStatus {
    Pending,
    Decided,
    Cancelled,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Pending => "PENDING",
            PredictionStatus::Decided => "DECIDED",
            PredictionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PredictionStatus::Pending),
            "DECIDED" => Some(PredictionStatus::Decided),
            "CANCELLED" => Some(PredictionStatus::Cancelled),
            _ => None,
        }
    }
}

/// The three actionable recommendations the engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Pick,
    NoBet,
    HardStop,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Pick => "PICK",
            DecisionStatus::NoBet => "NO_BET",
            DecisionStatus::HardStop => "HARD_STOP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PICK" => Some(DecisionStatus::Pick),
            "NO_BET" => Some(DecisionStatus::NoBet),
            "HARD_STOP" => Some(DecisionStatus::HardStop),
            _ => None,
        }
    }
}

/// The four boolean gate results recorded on every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateFlags {
    pub confidence: bool,
    pub edge: bool,
    pub drift: bool,
    /// true = hard stop NOT active (the gate passed).
    pub hard_stop: bool,
}

impl GateFlags {
    pub fn all_passed(&self) -> bool {
        self.confidence && self.edge && self.drift && self.hard_stop
    }
}

/// Audit context describing which fallback level produced a decision.
/// Tagged per level; `None` on the decision means the chain was never run
/// (hard-stop escalation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum FallbackContext {
    Primary {
        model_id: String,
        quality_score: f64,
    },
    Secondary {
        model_id: String,
        quality_score: f64,
    },
    LastValidated {
        model_id: String,
        quality_score: f64,
        validated_at: Option<DateTime<Utc>>,
    },
    ForcedNoBet {
        reason: String,
    },
}

impl FallbackContext {
    pub fn level_str(&self) -> &'static str {
        match self {
            FallbackContext::Primary { .. } => "primary",
            FallbackContext::Secondary { .. } => "secondary",
            FallbackContext::LastValidated { .. } => "last_validated",
            FallbackContext::ForcedNoBet { .. } => "force_no_bet",
        }
    }
}

/// Immutable, append-only record of one policy decision.
/// Exactly one exists per processed prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision_id: Uuid,
    pub prediction_id: Uuid,
    pub run_id: Uuid,
    pub status: DecisionStatus,
    pub rationale: String,
    pub gates: GateFlags,
    pub hard_stop_reason: Option<String>,
    pub recommended_action: String,
    pub fallback: Option<FallbackContext>,
    pub trace_id: Uuid,
    pub executed_at: DateTime<Utc>,
}

/// Persisted status of a daily run aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(RunStatus::Running),
            "COMPLETED" => Some(RunStatus::Completed),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Aggregate counts for one batch run. Written once at run start (RUNNING)
/// and once at completion or early abort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRun {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub total_matches: u32,
    pub picks_count: u32,
    pub no_bet_count: u32,
    pub hard_stop_count: u32,
    pub cancelled_count: u32,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DailyRun {
    pub fn started(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            total_matches: 0,
            picks_count: 0,
            no_bet_count: 0,
            hard_stop_count: 0,
            cancelled_count: 0,
            errors: Vec::new(),
            started_at,
            finished_at: None,
        }
    }
}

/// The one piece of cross-run mutable state: the hard-stop singleton.
/// Created inactive if absent; mutated only through the tracker; never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardStopState {
    pub active: bool,
    pub daily_loss_micros: i64,
    pub consecutive_losses: u32,
    /// Last observed exposure / bankroll ratio.
    pub bankroll_pct: f64,
    pub trigger_reason: Option<String>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub reset_reason: Option<String>,
    pub reset_by: Option<String>,
    pub reset_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl HardStopState {
    /// Default inactive state used when nothing is persisted yet.
    pub fn inactive(now: DateTime<Utc>) -> Self {
        Self {
            active: false,
            daily_loss_micros: 0,
            consecutive_losses: 0,
            bankroll_pct: 0.0,
            trigger_reason: None,
            triggered_at: None,
            reset_reason: None,
            reset_by: None,
            reset_at: None,
            updated_at: now,
        }
    }
}

/// Per-run evaluation context owned by the orchestrator. Not persisted
/// beyond the run except through hard-stop state updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub trace_id: Uuid,
    pub daily_loss_micros: i64,
    pub consecutive_losses: u32,
    pub bankroll_micros: i64,
    pub executed_at: DateTime<Utc>,
}

/// Payload emitted to the alert sink on every hard-stop activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub reason: String,
    pub daily_loss_micros: i64,
    pub consecutive_losses: u32,
    pub bankroll_pct: f64,
    pub trace_id: Uuid,
}

/// Settled result of a match a pick was placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOutcome {
    Win,
    Loss,
}

impl MatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOutcome::Win => "win",
            MatchOutcome::Loss => "loss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "win" => Some(MatchOutcome::Win),
            "loss" => Some(MatchOutcome::Loss),
            _ => None,
        }
    }
}
