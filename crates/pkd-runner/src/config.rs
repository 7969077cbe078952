use anyhow::Result;
use pkd_fallback::FallbackConfig;
use pkd_gates::GateConfig;
use pkd_hardstop::HardStopLimits;
use pkd_schemas::MICROS_SCALE;
use serde_json::Value;

/// Everything the orchestrator needs for one run, extracted from the layered
/// config JSON. Money keys are expressed in currency units in YAML and
/// converted to micros here.
#[derive(Clone, Debug, PartialEq)]
pub struct RunnerConfig {
    pub gate: GateConfig,
    pub limits: HardStopLimits,
    pub fallback: FallbackConfig,
    /// Current bankroll used for exposure-percent accounting.
    pub bankroll_micros: i64,
    /// Soft run budget, polled between predictions.
    pub run_timeout_ms: u64,
}

impl RunnerConfig {
    pub fn sane_defaults() -> Self {
        Self {
            gate: GateConfig::sane_defaults(),
            limits: HardStopLimits::sane_defaults(),
            fallback: FallbackConfig::sane_defaults(),
            bankroll_micros: 10_000 * MICROS_SCALE,
            run_timeout_ms: 300_000,
        }
    }

    /// Read the runner's config sections from merged layered JSON. Absent
    /// keys fall back to the defaults above; present keys must have the
    /// right shape (a non-numeric threshold is an operator error, not
    /// something to guess around).
    pub fn from_config_json(v: &Value) -> Result<Self> {
        let d = Self::sane_defaults();

        Ok(Self {
            gate: GateConfig {
                confidence_threshold: f64_at(v, "/policy/confidence_threshold")?
                    .unwrap_or(d.gate.confidence_threshold),
                edge_threshold: f64_at(v, "/policy/edge_threshold")?
                    .unwrap_or(d.gate.edge_threshold),
                drift_limit: f64_at(v, "/policy/drift_limit")?.unwrap_or(d.gate.drift_limit),
            },
            limits: HardStopLimits {
                daily_loss_limit_micros: money_at(v, "/risk/daily_loss_limit")?
                    .unwrap_or(d.limits.daily_loss_limit_micros),
                consecutive_losses_limit: u32_at(v, "/risk/consecutive_losses_limit")?
                    .unwrap_or(d.limits.consecutive_losses_limit),
                bankroll_pct_limit: f64_at(v, "/risk/bankroll_pct_limit")?
                    .unwrap_or(d.limits.bankroll_pct_limit),
                default_stake_micros: money_at(v, "/risk/default_stake")?
                    .unwrap_or(d.limits.default_stake_micros),
            },
            fallback: FallbackConfig {
                min_source_availability: f64_at(v, "/fallback/min_source_availability")?
                    .unwrap_or(d.fallback.min_source_availability),
                min_schema_validity: f64_at(v, "/fallback/min_schema_validity")?
                    .unwrap_or(d.fallback.min_schema_validity),
                min_completeness: f64_at(v, "/fallback/min_completeness")?
                    .unwrap_or(d.fallback.min_completeness),
                reliability_threshold: f64_at(v, "/fallback/reliability_threshold")?
                    .unwrap_or(d.fallback.reliability_threshold),
                primary_model_id: str_at(v, "/fallback/primary_model")?
                    .unwrap_or(d.fallback.primary_model_id),
                secondary_model_id: str_at(v, "/fallback/secondary_model")?
                    .unwrap_or(d.fallback.secondary_model_id),
                baseline_model_id: str_at(v, "/fallback/baseline_model")?
                    .unwrap_or(d.fallback.baseline_model_id),
            },
            bankroll_micros: money_at(v, "/risk/bankroll")?.unwrap_or(d.bankroll_micros),
            run_timeout_ms: u64_at(v, "/run/timeout_ms")?.unwrap_or(d.run_timeout_ms),
        })
    }
}

fn f64_at(v: &Value, ptr: &str) -> Result<Option<f64>> {
    match v.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(x) => x
            .as_f64()
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("config key {ptr} must be a number, got {x}")),
    }
}

fn u32_at(v: &Value, ptr: &str) -> Result<Option<u32>> {
    match v.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(x) => x
            .as_u64()
            .map(|n| Some(n as u32))
            .ok_or_else(|| anyhow::anyhow!("config key {ptr} must be a non-negative integer, got {x}")),
    }
}

fn u64_at(v: &Value, ptr: &str) -> Result<Option<u64>> {
    match v.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(x) => x
            .as_u64()
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("config key {ptr} must be a non-negative integer, got {x}")),
    }
}

fn str_at(v: &Value, ptr: &str) -> Result<Option<String>> {
    match v.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(x) => x
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| anyhow::anyhow!("config key {ptr} must be a string, got {x}")),
    }
}

/// Currency units -> integer micros.
fn money_at(v: &Value, ptr: &str) -> Result<Option<i64>> {
    Ok(f64_at(v, ptr)?.map(|units| (units * MICROS_SCALE as f64).round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_the_documented_thresholds() {
        let d = RunnerConfig::sane_defaults();
        assert_eq!(d.gate.confidence_threshold, 0.60);
        assert_eq!(d.gate.edge_threshold, 5.0);
        assert_eq!(d.fallback.reliability_threshold, 0.5);
        assert_eq!(d.run_timeout_ms, 300_000);
    }

    #[test]
    fn empty_json_yields_defaults() {
        let cfg = RunnerConfig::from_config_json(&json!({})).unwrap();
        assert_eq!(cfg, RunnerConfig::sane_defaults());
    }

    #[test]
    fn present_keys_override_and_money_converts_to_micros() {
        let cfg = RunnerConfig::from_config_json(&json!({
            "policy": { "confidence_threshold": 0.65 },
            "risk": { "daily_loss_limit": 1000.0, "default_stake": 25.5, "bankroll": 50000.0 },
            "run": { "timeout_ms": 60000 }
        }))
        .unwrap();
        assert_eq!(cfg.gate.confidence_threshold, 0.65);
        assert_eq!(cfg.limits.daily_loss_limit_micros, 1_000 * MICROS_SCALE);
        assert_eq!(cfg.limits.default_stake_micros, 25_500_000);
        assert_eq!(cfg.bankroll_micros, 50_000 * MICROS_SCALE);
        assert_eq!(cfg.run_timeout_ms, 60_000);
    }

    #[test]
    fn wrong_shape_is_an_error_not_a_default() {
        let err =
            RunnerConfig::from_config_json(&json!({ "policy": { "confidence_threshold": "high" } }))
                .unwrap_err();
        assert!(format!("{err}").contains("/policy/confidence_threshold"));
    }
}
