//! pkd-gates
//!
//! Gate evaluation for match predictions:
//! - confidence gate (threshold on model confidence)
//! - edge gate (threshold on modeled market advantage)
//! - drift gate (model output shift within bound; absent score passes)
//! - hard-stop gate (caller-supplied; active hard stop overrides everything)
//!
//! Deterministic, pure logic. No IO, no time, no store calls.

mod engine;
mod types;

pub use engine::evaluate;
pub use types::*;
