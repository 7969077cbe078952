use pkd_schemas::{DecisionStatus, GateFlags, PredictionInput, RunContext};

use crate::{action_for, GateConfig, GateDecision, HardStopView};

// ---------------------------------------------------------------------------
// Input sanity clamps
// ---------------------------------------------------------------------------

/// Clamp a confidence score into [0,1]. NaN collapses to 0 so a malformed
/// score fails the gate instead of aborting the batch.
fn clamp_confidence(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 1.0)
}

/// Missing edge counts as 0; NaN collapses to 0 for the same reason as above.
fn clamp_edge(v: Option<f64>) -> f64 {
    match v {
        Some(e) if !e.is_nan() => e,
        _ => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Core evaluator
// ---------------------------------------------------------------------------

/// Evaluate one prediction against the gate thresholds.
///
/// Pure and deterministic: same (config, input, context, hard-stop view)
/// always yields the same decision. The hard-stop latch is supplied by the
/// caller; this function never reads shared state.
///
/// Precedence is fixed: active hard stop > failing quality gates > PICK.
pub fn evaluate(
    cfg: &GateConfig,
    input: &PredictionInput,
    _ctx: &RunContext,
    hard_stop: &HardStopView,
) -> GateDecision {
    let confidence = clamp_confidence(input.confidence);
    let edge = clamp_edge(input.edge);

    let confidence_gate = confidence >= cfg.confidence_threshold;
    let edge_gate = edge >= cfg.edge_threshold;
    // Absence of a drift score passes; a NaN score fails the bound check.
    let drift_gate = match input.drift_score {
        None => true,
        Some(d) => d.abs() <= cfg.drift_limit,
    };
    let hard_stop_gate = !hard_stop.active;

    let gates = GateFlags {
        confidence: confidence_gate,
        edge: edge_gate,
        drift: drift_gate,
        hard_stop: hard_stop_gate,
    };

    if !hard_stop_gate {
        let reason = hard_stop
            .reason
            .clone()
            .unwrap_or_else(|| "hard stop active".to_string());
        return GateDecision {
            status: DecisionStatus::HardStop,
            gates,
            rationale: format!("hard stop active: {reason}"),
            recommended_action: action_for(DecisionStatus::HardStop),
            hard_stop_reason: Some(reason),
        };
    }

    let mut failing: Vec<&str> = Vec::new();
    if !confidence_gate {
        failing.push("confidence");
    }
    if !edge_gate {
        failing.push("edge");
    }
    if !drift_gate {
        failing.push("drift");
    }

    if failing.is_empty() {
        GateDecision {
            status: DecisionStatus::Pick,
            gates,
            rationale: format!(
                "all gates passed: confidence {:.2} >= {:.2}, edge {:.2} >= {:.2}",
                confidence, cfg.confidence_threshold, edge, cfg.edge_threshold
            ),
            recommended_action: action_for(DecisionStatus::Pick),
            hard_stop_reason: None,
        }
    } else {
        GateDecision {
            status: DecisionStatus::NoBet,
            gates,
            rationale: format!("gate(s) failed: {}", failing.join(", ")),
            recommended_action: action_for(DecisionStatus::NoBet),
            hard_stop_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pkd_schemas::MICROS_SCALE;
    use serde_json::json;
    use uuid::Uuid;

    fn prediction(confidence: f64, edge: Option<f64>, drift: Option<f64>) -> PredictionInput {
        PredictionInput {
            prediction_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            match_id: "LAL@BOS-2026-02-14".to_string(),
            user_id: None,
            confidence,
            edge,
            drift_score: drift,
            model_version: "v3-2025".to_string(),
            winner_forecast: json!({"winner": "BOS"}),
            score_forecast: json!({"home": 112, "away": 104}),
            created_at: Utc.with_ymd_and_hms(2026, 2, 14, 9, 0, 0).unwrap(),
        }
    }

    fn ctx() -> RunContext {
        RunContext {
            run_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
            daily_loss_micros: 0,
            consecutive_losses: 0,
            bankroll_micros: 10_000 * MICROS_SCALE,
            executed_at: Utc.with_ymd_and_hms(2026, 2, 14, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn passing_gates_yield_pick() {
        let cfg = GateConfig::sane_defaults();
        let d = evaluate(
            &cfg,
            &prediction(0.72, Some(12.5), Some(0.03)),
            &ctx(),
            &HardStopView::inactive(),
        );
        assert_eq!(d.status, DecisionStatus::Pick);
        assert!(d.gates.all_passed());
        assert_eq!(d.recommended_action, "stake per sizing policy");
    }

    #[test]
    fn low_confidence_yields_no_bet_naming_the_gate() {
        let cfg = GateConfig::sane_defaults();
        let d = evaluate(
            &cfg,
            &prediction(0.55, Some(3.1), None),
            &ctx(),
            &HardStopView::inactive(),
        );
        assert_eq!(d.status, DecisionStatus::NoBet);
        assert!(d.rationale.contains("confidence"));
        assert!(d.rationale.contains("edge"));
        assert!(!d.gates.confidence);
        assert!(!d.gates.edge);
        assert_eq!(d.recommended_action, "wait for signal");
    }

    #[test]
    fn active_hard_stop_overrides_passing_gates() {
        let cfg = GateConfig::sane_defaults();
        let d = evaluate(
            &cfg,
            &prediction(0.95, Some(20.0), Some(0.0)),
            &ctx(),
            &HardStopView::active("daily loss limit exceeded"),
        );
        assert_eq!(d.status, DecisionStatus::HardStop);
        assert!(!d.gates.hard_stop);
        // The underlying quality gates still report their true values.
        assert!(d.gates.confidence && d.gates.edge && d.gates.drift);
        assert_eq!(
            d.hard_stop_reason.as_deref(),
            Some("daily loss limit exceeded")
        );
        assert_eq!(d.recommended_action, "halt and review risk parameters");
    }

    #[test]
    fn missing_drift_score_passes_the_drift_gate() {
        let cfg = GateConfig::sane_defaults();
        let d = evaluate(
            &cfg,
            &prediction(0.70, Some(8.0), None),
            &ctx(),
            &HardStopView::inactive(),
        );
        assert!(d.gates.drift);
        assert_eq!(d.status, DecisionStatus::Pick);
    }

    #[test]
    fn drift_beyond_limit_fails_the_gate() {
        let cfg = GateConfig::sane_defaults();
        let d = evaluate(
            &cfg,
            &prediction(0.70, Some(8.0), Some(0.40)),
            &ctx(),
            &HardStopView::inactive(),
        );
        assert!(!d.gates.drift);
        assert_eq!(d.status, DecisionStatus::NoBet);
        assert!(d.rationale.contains("drift"));
    }

    #[test]
    fn out_of_range_confidence_is_clamped_not_rejected() {
        let cfg = GateConfig::sane_defaults();
        // confidence 1.7 clamps to 1.0 and passes
        let d = evaluate(
            &cfg,
            &prediction(1.7, Some(9.0), None),
            &ctx(),
            &HardStopView::inactive(),
        );
        assert!(d.gates.confidence);
        // confidence -0.3 clamps to 0.0 and fails
        let d = evaluate(
            &cfg,
            &prediction(-0.3, Some(9.0), None),
            &ctx(),
            &HardStopView::inactive(),
        );
        assert!(!d.gates.confidence);
        assert_eq!(d.status, DecisionStatus::NoBet);
    }

    #[test]
    fn nan_inputs_fail_closed() {
        let cfg = GateConfig::sane_defaults();
        let d = evaluate(
            &cfg,
            &prediction(f64::NAN, Some(f64::NAN), Some(f64::NAN)),
            &ctx(),
            &HardStopView::inactive(),
        );
        assert!(!d.gates.confidence);
        assert!(!d.gates.edge);
        assert!(!d.gates.drift);
        assert_eq!(d.status, DecisionStatus::NoBet);
    }

    #[test]
    fn missing_edge_counts_as_zero() {
        let cfg = GateConfig::sane_defaults();
        let d = evaluate(
            &cfg,
            &prediction(0.80, None, None),
            &ctx(),
            &HardStopView::inactive(),
        );
        assert!(!d.gates.edge);
        assert_eq!(d.status, DecisionStatus::NoBet);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let cfg = GateConfig::sane_defaults();
        let input = prediction(0.61, Some(5.0), Some(0.15));
        let c = ctx();
        let hs = HardStopView::inactive();
        let first = evaluate(&cfg, &input, &c, &hs);
        for _ in 0..10 {
            assert_eq!(evaluate(&cfg, &input, &c, &hs), first);
        }
    }

    #[test]
    fn thresholds_are_inclusive() {
        let cfg = GateConfig::sane_defaults();
        let d = evaluate(
            &cfg,
            &prediction(0.60, Some(5.0), Some(0.15)),
            &ctx(),
            &HardStopView::inactive(),
        );
        assert_eq!(d.status, DecisionStatus::Pick);
    }
}
