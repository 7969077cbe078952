//! Model registry boundary for fallback level resolution.
//!
//! This module defines only the probe trait, its signal type, and the three
//! concrete model variants. No chain logic and no thresholds belong here.

use chrono::{DateTime, Utc};
use pkd_schemas::PredictionInput;
use std::fmt;

// ---------------------------------------------------------------------------
// Quality signals
// ---------------------------------------------------------------------------

/// Raw data-quality signals for one model/source, as observed by the
/// ingestion side. All three are ratios in [0,1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySignals {
    pub source_availability: f64,
    pub schema_validity: f64,
    pub completeness: f64,
    /// Set by snapshot-backed models: when the snapshot was last validated.
    pub validated_at: Option<DateTime<Utc>>,
}

impl QualitySignals {
    /// Composite reliability score: the mean of the three signals.
    pub fn composite(&self) -> f64 {
        (self.source_availability + self.schema_validity + self.completeness) / 3.0
    }
}

/// Point-in-time health of an upstream source, supplied by the (out of
/// scope) ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceHealthSnapshot {
    pub source_availability: f64,
    pub schema_validity: f64,
    pub completeness: f64,
    pub captured_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`QualityProbe`] may return. The chain treats every variant
/// identically to a failed quality check.
#[derive(Debug)]
pub enum ProbeError {
    /// The model or its source is temporarily unavailable.
    Unavailable(String),
    /// The probe itself failed (lookup, decode, ...).
    Probe(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Unavailable(msg) => write!(f, "model unavailable: {msg}"),
            ProbeError::Probe(msg) => write!(f, "probe failed: {msg}"),
        }
    }
}

impl std::error::Error for ProbeError {}

// ---------------------------------------------------------------------------
// Probe trait + registry
// ---------------------------------------------------------------------------

/// Quality probe for one registered model. Object-safe so callers can hold
/// `&dyn QualityProbe` without knowing the concrete variant.
pub trait QualityProbe: Send + Sync {
    /// Registry key (e.g. `"nba-v3-2025"`).
    fn model_id(&self) -> &str;

    /// Observe the data-quality signals backing this model for one
    /// prediction. May fail; the chain degrades on failure.
    fn probe(&self, input: &PredictionInput) -> Result<QualitySignals, ProbeError>;
}

/// Lookup keyed on model id.
pub trait ModelRegistry: Send + Sync {
    fn resolve(&self, model_id: &str) -> Option<&dyn QualityProbe>;
}

impl<R: ModelRegistry + ?Sized> ModelRegistry for std::sync::Arc<R> {
    fn resolve(&self, model_id: &str) -> Option<&dyn QualityProbe> {
        (**self).resolve(model_id)
    }
}

/// Registry over a fixed set of boxed probes.
pub struct StaticRegistry {
    models: Vec<Box<dyn QualityProbe>>,
}

impl StaticRegistry {
    pub fn new(models: Vec<Box<dyn QualityProbe>>) -> Self {
        Self { models }
    }
}

impl ModelRegistry for StaticRegistry {
    fn resolve(&self, model_id: &str) -> Option<&dyn QualityProbe> {
        self.models
            .iter()
            .find(|m| m.model_id() == model_id)
            .map(|m| m.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Model variants
// ---------------------------------------------------------------------------

/// The live primary model: probes the current health snapshot of its
/// feature sources.
pub struct PrimaryModel {
    id: String,
    health: SourceHealthSnapshot,
}

impl PrimaryModel {
    pub fn new(id: impl Into<String>, health: SourceHealthSnapshot) -> Self {
        Self {
            id: id.into(),
            health,
        }
    }
}

impl QualityProbe for PrimaryModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn probe(&self, _input: &PredictionInput) -> Result<QualitySignals, ProbeError> {
        Ok(QualitySignals {
            source_availability: self.health.source_availability,
            schema_validity: self.health.schema_validity,
            completeness: self.health.completeness,
            validated_at: None,
        })
    }
}

/// The secondary model: same probe shape over an independent source set.
pub struct SecondaryModel {
    id: String,
    health: SourceHealthSnapshot,
}

impl SecondaryModel {
    pub fn new(id: impl Into<String>, health: SourceHealthSnapshot) -> Self {
        Self {
            id: id.into(),
            health,
        }
    }
}

impl QualityProbe for SecondaryModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn probe(&self, _input: &PredictionInput) -> Result<QualitySignals, ProbeError> {
        Ok(QualitySignals {
            source_availability: self.health.source_availability,
            schema_validity: self.health.schema_validity,
            completeness: self.health.completeness,
            validated_at: None,
        })
    }
}

/// The baseline model backing the last_validated level: serves the most
/// recent snapshot that passed validation, so availability is pinned to 1.0
/// and staleness is carried in `validated_at` for the audit context.
pub struct BaselineModel {
    id: String,
    schema_validity: f64,
    completeness: f64,
    validated_at: DateTime<Utc>,
}

impl BaselineModel {
    pub fn new(
        id: impl Into<String>,
        schema_validity: f64,
        completeness: f64,
        validated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            schema_validity,
            completeness,
            validated_at,
        }
    }
}

impl QualityProbe for BaselineModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn probe(&self, _input: &PredictionInput) -> Result<QualitySignals, ProbeError> {
        Ok(QualitySignals {
            source_availability: 1.0,
            schema_validity: self.schema_validity,
            completeness: self.completeness,
            validated_at: Some(self.validated_at),
        })
    }
}
