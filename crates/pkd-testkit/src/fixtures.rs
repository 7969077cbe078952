use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use pkd_alerts::AlertSink;
use pkd_fallback::{
    BaselineModel, PrimaryModel, SecondaryModel, SourceHealthSnapshot, StaticRegistry,
};
use pkd_runner::RunClock;
use pkd_schemas::{AlertPayload, PredictionInput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Deterministic prediction fixture. `seq` spaces `created_at` one second
/// apart so FIFO ordering in scenario tests is unambiguous.
pub fn prediction(run_id: Uuid, seq: i64, confidence: f64, edge: Option<f64>) -> PredictionInput {
    let base = Utc.with_ymd_and_hms(2026, 2, 14, 9, 0, 0).unwrap();
    PredictionInput {
        prediction_id: Uuid::new_v4(),
        run_id,
        match_id: format!("MATCH-{seq:03}"),
        user_id: None,
        confidence,
        edge,
        drift_score: None,
        model_version: "v3-2025".to_string(),
        winner_forecast: serde_json::json!({"winner": "home"}),
        score_forecast: serde_json::json!({"home": 110, "away": 102}),
        created_at: base + Duration::seconds(seq),
    }
}

fn health(avail: f64, schema: f64, complete: f64) -> SourceHealthSnapshot {
    SourceHealthSnapshot {
        source_availability: avail,
        schema_validity: schema,
        completeness: complete,
        captured_at: Utc.with_ymd_and_hms(2026, 2, 14, 8, 0, 0).unwrap(),
    }
}

/// Registry whose primary model passes every quality check.
pub fn healthy_registry() -> StaticRegistry {
    StaticRegistry::new(vec![
        Box::new(PrimaryModel::new("nba-v3-2025", health(0.99, 0.98, 0.95))),
        Box::new(SecondaryModel::new("nba-v3-global", health(0.97, 0.96, 0.92))),
        Box::new(BaselineModel::new(
            "nba-baseline",
            0.97,
            0.90,
            Utc.with_ymd_and_hms(2026, 2, 13, 22, 0, 0).unwrap(),
        )),
    ])
}

/// Registry where every level fails its checks, forcing a no-bet.
pub fn degraded_registry() -> StaticRegistry {
    StaticRegistry::new(vec![
        Box::new(PrimaryModel::new("nba-v3-2025", health(0.30, 0.40, 0.20))),
        Box::new(SecondaryModel::new("nba-v3-global", health(0.25, 0.35, 0.15))),
        Box::new(BaselineModel::new(
            "nba-baseline",
            0.20,
            0.10,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )),
    ])
}

/// Clock that advances a fixed step on every read. With step 0 it freezes
/// time; with a positive step the run budget burns down deterministically,
/// one tick per poll.
pub struct SteppingClock {
    step_ms: u64,
    ticks: AtomicU64,
}

impl SteppingClock {
    pub fn new(step_ms: u64) -> Self {
        Self {
            step_ms,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn frozen() -> Self {
        Self::new(0)
    }
}

impl RunClock for SteppingClock {
    fn now_ms(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst) * self.step_ms
    }
}

/// Alert sink that records every payload for later assertions. Clone the
/// handle before boxing the sink into the orchestrator.
pub struct CollectingSink {
    alerts: Arc<Mutex<Vec<AlertPayload>>>,
}

impl CollectingSink {
    pub fn new() -> (Self, AlertHandle) {
        let alerts = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                alerts: Arc::clone(&alerts),
            },
            AlertHandle { alerts },
        )
    }
}

#[async_trait]
impl AlertSink for CollectingSink {
    fn name(&self) -> &'static str {
        "collecting"
    }

    async fn send(&self, alert: &AlertPayload) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Read side of a [`CollectingSink`].
pub struct AlertHandle {
    alerts: Arc<Mutex<Vec<AlertPayload>>>,
}

impl AlertHandle {
    pub fn alerts(&self) -> Vec<AlertPayload> {
        self.alerts.lock().unwrap().clone()
    }
}
