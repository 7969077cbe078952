use pkd_schemas::{FallbackContext, PredictionInput};
use serde::{Deserialize, Serialize};

use crate::registry::{ModelRegistry, QualitySignals};
use crate::FallbackLevel;

/// Quality thresholds and the model id each real level resolves.
#[derive(Clone, Debug, PartialEq)]
pub struct FallbackConfig {
    pub min_source_availability: f64,
    pub min_schema_validity: f64,
    pub min_completeness: f64,
    /// Composite reliability gate applied after the three named checks.
    pub reliability_threshold: f64,
    pub primary_model_id: String,
    pub secondary_model_id: String,
    pub baseline_model_id: String,
}

impl FallbackConfig {
    pub fn sane_defaults() -> Self {
        Self {
            min_source_availability: 0.8,
            min_schema_validity: 0.8,
            min_completeness: 0.7,
            reliability_threshold: 0.5,
            primary_model_id: "nba-v3-2025".to_string(),
            secondary_model_id: "nba-v3-global".to_string(),
            baseline_model_id: "nba-baseline".to_string(),
        }
    }

    fn model_id_for(&self, level: FallbackLevel) -> &str {
        match level {
            FallbackLevel::Primary => &self.primary_model_id,
            FallbackLevel::Secondary => &self.secondary_model_id,
            FallbackLevel::LastValidated => &self.baseline_model_id,
            FallbackLevel::ForceNoBet => "",
        }
    }
}

/// One attempted level: what was checked and what failed. Embedded in the
/// decision's audit payload, never persisted standalone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataQualityAssessment {
    pub level: String,
    pub model_id: Option<String>,
    pub quality_score: f64,
    pub passed: bool,
    pub failed_checks: Vec<String>,
}

/// Result of walking the chain for one prediction.
#[derive(Clone, Debug, PartialEq)]
pub struct FallbackOutcome {
    pub final_level: FallbackLevel,
    pub was_forced_no_bet: bool,
    pub attempts: Vec<DataQualityAssessment>,
    /// Tagged audit context for the final level.
    pub context: FallbackContext,
    /// Rationale text; on a forced no-bet this replaces the gate rationale.
    pub rationale: String,
}

/// The degrade chain. Holds the thresholds and the registry; evaluation is
/// deterministic given the registry's probe results.
pub struct FallbackChain<R: ModelRegistry> {
    cfg: FallbackConfig,
    registry: R,
}

impl<R: ModelRegistry> FallbackChain<R> {
    pub fn new(cfg: FallbackConfig, registry: R) -> Self {
        Self { cfg, registry }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.cfg
    }

    /// Walk the level order and return the first level whose quality checks
    /// all pass. Level transitions only ever degrade; the chain never
    /// revisits an earlier level and never returns an error.
    pub fn evaluate(&self, input: &PredictionInput) -> FallbackOutcome {
        let mut attempts: Vec<DataQualityAssessment> = Vec::new();

        for level in FallbackLevel::REAL_LEVELS {
            let model_id = self.cfg.model_id_for(level);

            let probe = match self.registry.resolve(model_id) {
                Some(p) => p,
                None => {
                    attempts.push(DataQualityAssessment {
                        level: level.as_str().to_string(),
                        model_id: Some(model_id.to_string()),
                        quality_score: 0.0,
                        passed: false,
                        failed_checks: vec!["model_unresolvable".to_string()],
                    });
                    continue;
                }
            };

            let signals = match probe.probe(input) {
                Ok(s) => s,
                Err(err) => {
                    attempts.push(DataQualityAssessment {
                        level: level.as_str().to_string(),
                        model_id: Some(model_id.to_string()),
                        quality_score: 0.0,
                        passed: false,
                        failed_checks: vec![format!("probe_error: {err}")],
                    });
                    continue;
                }
            };

            let assessment = self.assess(level, model_id, &signals);
            let passed = assessment.passed;
            attempts.push(assessment);

            if passed {
                return FallbackOutcome {
                    final_level: level,
                    was_forced_no_bet: false,
                    context: context_for(level, model_id, &signals),
                    rationale: format!(
                        "data quality passed at level {} (score {:.2})",
                        level.as_str(),
                        signals.composite()
                    ),
                    attempts,
                };
            }
        }

        let reason = format!(
            "all fallback levels failed data quality checks ({} attempts)",
            attempts.len()
        );
        FallbackOutcome {
            final_level: FallbackLevel::ForceNoBet,
            was_forced_no_bet: true,
            context: FallbackContext::ForcedNoBet {
                reason: reason.clone(),
            },
            rationale: reason,
            attempts,
        }
    }

    fn assess(
        &self,
        level: FallbackLevel,
        model_id: &str,
        signals: &QualitySignals,
    ) -> DataQualityAssessment {
        let mut failed: Vec<String> = Vec::new();
        if signals.source_availability < self.cfg.min_source_availability {
            failed.push("source_availability".to_string());
        }
        if signals.schema_validity < self.cfg.min_schema_validity {
            failed.push("schema_validity".to_string());
        }
        if signals.completeness < self.cfg.min_completeness {
            failed.push("completeness".to_string());
        }
        let score = signals.composite();
        if score < self.cfg.reliability_threshold {
            failed.push("reliability".to_string());
        }

        DataQualityAssessment {
            level: level.as_str().to_string(),
            model_id: Some(model_id.to_string()),
            quality_score: score,
            passed: failed.is_empty(),
            failed_checks: failed,
        }
    }
}

fn context_for(level: FallbackLevel, model_id: &str, signals: &QualitySignals) -> FallbackContext {
    match level {
        FallbackLevel::Primary => FallbackContext::Primary {
            model_id: model_id.to_string(),
            quality_score: signals.composite(),
        },
        FallbackLevel::Secondary => FallbackContext::Secondary {
            model_id: model_id.to_string(),
            quality_score: signals.composite(),
        },
        FallbackLevel::LastValidated => FallbackContext::LastValidated {
            model_id: model_id.to_string(),
            quality_score: signals.composite(),
            validated_at: signals.validated_at,
        },
        FallbackLevel::ForceNoBet => FallbackContext::ForcedNoBet {
            reason: "forced no-bet".to_string(),
        },
    }
}
