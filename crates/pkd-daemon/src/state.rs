//! Shared runtime state for pkd-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use pkd_alerts::AlertSink;
use pkd_db::PolicyStore;
use pkd_fallback::ModelRegistry;
use pkd_runner::RunnerConfig;
use pkd_schemas::AlertPayload;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    LogLine { level: String, msg: String },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of daemon state, returned by GET /v1/status and
/// carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub active_run_id: Option<Uuid>,
    /// "idle" | "running" | "halted"
    pub state: String,
    pub notes: Option<String>,
    /// Mirror of the persisted hard-stop latch as of the last read.
    pub hard_stop_active: bool,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// Mutable run/status state.
    pub status: Arc<RwLock<StatusSnapshot>>,
    /// Persistence boundary (Postgres in production, MemStore in tests).
    pub store: Arc<dyn PolicyStore>,
    /// Runner configuration extracted from the layered config.
    pub cfg: RunnerConfig,
    /// Model registry backing the fallback chain.
    pub registry: Arc<dyn ModelRegistry>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        cfg: RunnerConfig,
        registry: Arc<dyn ModelRegistry>,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        let initial_status = StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            active_run_id: None,
            state: "idle".to_string(),
            notes: None,
            // The truth lives in the store; handlers refresh this on read.
            hard_stop_active: false,
        };

        Self {
            bus,
            build: BuildInfo {
                service: "pkd-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            status: Arc::new(RwLock::new(initial_status)),
            store,
            cfg,
            registry,
        }
    }
}

// ---------------------------------------------------------------------------
// BusAlertSink
// ---------------------------------------------------------------------------

/// Alert sink that surfaces hard-stop activations as SSE log lines, so a
/// connected dashboard sees the trigger the moment it happens.
pub struct BusAlertSink {
    bus: broadcast::Sender<BusMsg>,
}

impl BusAlertSink {
    pub fn new(bus: broadcast::Sender<BusMsg>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl AlertSink for BusAlertSink {
    fn name(&self) -> &'static str {
        "bus"
    }

    async fn send(&self, alert: &AlertPayload) -> Result<()> {
        let _ = self.bus.send(BusMsg::LogLine {
            level: "WARN".to_string(),
            msg: format!("hard stop alert: {}", alert.reason),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
