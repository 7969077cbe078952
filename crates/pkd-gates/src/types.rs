use pkd_schemas::{DecisionStatus, GateFlags};

/// Gate thresholds. Defaults match the operator-facing configuration keys.
#[derive(Clone, Debug, PartialEq)]
pub struct GateConfig {
    /// Minimum model confidence for a PICK.
    pub confidence_threshold: f64,
    /// Minimum modeled edge (percent) for a PICK. Missing edge counts as 0.
    pub edge_threshold: f64,
    /// Maximum absolute drift score. Missing drift passes the gate.
    pub drift_limit: f64,
}

impl GateConfig {
    pub fn sane_defaults() -> Self {
        Self {
            confidence_threshold: 0.60,
            edge_threshold: 5.0,
            drift_limit: 0.15,
        }
    }
}

/// Hard-stop view the caller supplies. The evaluator never reads risk state
/// itself; the caller passes the current latch so evaluation stays pure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HardStopView {
    pub active: bool,
    pub reason: Option<String>,
}

impl HardStopView {
    pub fn inactive() -> Self {
        Self {
            active: false,
            reason: None,
        }
    }

    pub fn active(reason: impl Into<String>) -> Self {
        Self {
            active: true,
            reason: Some(reason.into()),
        }
    }
}

/// Output of one gate evaluation. The orchestrator merges this with the
/// fallback outcome before persisting a decision.
#[derive(Clone, Debug, PartialEq)]
pub struct GateDecision {
    pub status: DecisionStatus,
    pub gates: GateFlags,
    pub rationale: String,
    pub recommended_action: &'static str,
    pub hard_stop_reason: Option<String>,
}

/// Recommended-action strings, one per status.
pub const ACTION_PICK: &str = "stake per sizing policy";
pub const ACTION_NO_BET: &str = "wait for signal";
pub const ACTION_HARD_STOP: &str = "halt and review risk parameters";

pub fn action_for(status: DecisionStatus) -> &'static str {
    match status {
        DecisionStatus::Pick => ACTION_PICK,
        DecisionStatus::NoBet => ACTION_NO_BET,
        DecisionStatus::HardStop => ACTION_HARD_STOP,
    }
}
