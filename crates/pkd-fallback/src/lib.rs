//! pkd-fallback
//!
//! Data-quality degrade chain for prediction inputs. Walks the fixed level
//! order primary -> secondary -> last_validated -> force_no_bet, running a
//! composite quality check per level, and reports the first level that
//! passes. When every real level fails the chain forces a no-bet.
//!
//! The chain never returns an error: an unresolvable model or a probe
//! failure degrades to the next level exactly like a failed check.

mod chain;
mod registry;

pub use chain::{DataQualityAssessment, FallbackChain, FallbackConfig, FallbackOutcome};
pub use registry::{
    BaselineModel, ModelRegistry, PrimaryModel, ProbeError, QualityProbe, QualitySignals,
    SecondaryModel, SourceHealthSnapshot, StaticRegistry,
};

/// The degrade levels, in the only order the chain may walk them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackLevel {
    Primary,
    Secondary,
    LastValidated,
    ForceNoBet,
}

impl FallbackLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackLevel::Primary => "primary",
            FallbackLevel::Secondary => "secondary",
            FallbackLevel::LastValidated => "last_validated",
            FallbackLevel::ForceNoBet => "force_no_bet",
        }
    }

    /// The levels that carry a resolvable model, in degrade order.
    pub const REAL_LEVELS: [FallbackLevel; 3] = [
        FallbackLevel::Primary,
        FallbackLevel::Secondary,
        FallbackLevel::LastValidated,
    ];
}
