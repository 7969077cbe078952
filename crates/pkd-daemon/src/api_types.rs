//! Request/response DTOs for the pkd-daemon HTTP API.

use pkd_hardstop::HardStopStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// Returned with 403 when a gate refuses an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRefusedResponse {
    pub error: String,
    pub gate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetRequest {
    pub reason: String,
    pub actor_id: String,
}

/// Structured reset outcome: `{success: false, message}` when the latch was
/// not active, never an exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<HardStopStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartRequest {
    pub run_id: Uuid,
}
