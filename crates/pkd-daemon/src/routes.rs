//! Axum router and all HTTP handlers for pkd-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use pkd_db::ResetOutcome;
use pkd_fallback::FallbackChain;
use pkd_hardstop::HardStopTracker;
use pkd_runner::{RunOrchestrator, WallClock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

use crate::{
    api_types::{GateRefusedResponse, HealthResponse, ResetRequest, ResetResponse, RunStartRequest},
    state::{uptime_secs, AppState, BusAlertSink, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/hardstop/status", get(hardstop_status))
        .route("/v1/hardstop/reset", post(hardstop_reset))
        .route("/v1/run/start", post(run_start))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> Response {
    let latch_active = match st.store.load_or_init_hard_stop().await {
        Ok(s) => s.active,
        Err(e) => {
            error!("hard-stop read failed: {e:#}");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "store unavailable"})),
            )
                .into_response();
        }
    };

    let mut snap = st.status.write().await;
    snap.daemon_uptime_secs = uptime_secs();
    snap.hard_stop_active = latch_active;
    let snap = snap.clone();

    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap)).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/hardstop/status
// ---------------------------------------------------------------------------

pub(crate) async fn hardstop_status(State(st): State<Arc<AppState>>) -> Response {
    match st.store.load_or_init_hard_stop().await {
        Ok(state) => {
            let tracker = HardStopTracker::new(st.cfg.limits.clone(), state);
            (StatusCode::OK, Json(tracker.status())).into_response()
        }
        Err(e) => {
            error!("hard-stop read failed: {e:#}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "store unavailable"})),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// POST /v1/hardstop/reset
// ---------------------------------------------------------------------------

/// Admin-only release of the latch. Not-active is a structured failure with
/// 409, not an exception.
pub(crate) async fn hardstop_reset(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ResetRequest>,
) -> Response {
    match st.store.reset_hard_stop(&req.reason, &req.actor_id).await {
        Ok(ResetOutcome::Reset(state)) => {
            info!(actor = %req.actor_id, "hard stop reset");
            let _ = st.bus.send(BusMsg::LogLine {
                level: "WARN".to_string(),
                msg: format!("hard stop reset by {} ({})", req.actor_id, req.reason),
            });
            let tracker = HardStopTracker::new(st.cfg.limits.clone(), state);
            (
                StatusCode::OK,
                Json(ResetResponse {
                    success: true,
                    message: None,
                    status: Some(tracker.status()),
                }),
            )
                .into_response()
        }
        Ok(ResetOutcome::NotActive) => (
            StatusCode::CONFLICT,
            Json(ResetResponse {
                success: false,
                message: Some("hard stop is not active; nothing to reset".to_string()),
                status: None,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("hard-stop reset failed: {e:#}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "store unavailable"})),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// POST /v1/run/start
// ---------------------------------------------------------------------------

/// Start a batch run for the given run id.
///
/// # Gate
/// Returns `403 Forbidden` while the hard-stop latch is active. A run
/// started through the API is refused up front rather than burning a run
/// that the orchestrator would immediately mark blocked.
pub(crate) async fn run_start(
    State(st): State<Arc<AppState>>,
    Json(req): Json<RunStartRequest>,
) -> Response {
    match st.store.load_or_init_hard_stop().await {
        Ok(state) if state.active => {
            return (
                StatusCode::FORBIDDEN,
                Json(GateRefusedResponse {
                    error: "GATE_REFUSED: hard stop active; reset before starting a run"
                        .to_string(),
                    gate: "hard_stop_inactive".to_string(),
                }),
            )
                .into_response();
        }
        Ok(_) => {}
        Err(e) => {
            error!("hard-stop read failed: {e:#}");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "store unavailable"})),
            )
                .into_response();
        }
    }

    {
        let mut s = st.status.write().await;
        if s.state == "running" {
            return (
                StatusCode::CONFLICT,
                Json(serde_json::json!({"error": "a run is already in progress"})),
            )
                .into_response();
        }
        s.state = "running".to_string();
        s.active_run_id = Some(req.run_id);
        s.notes = None;
        s.daemon_uptime_secs = uptime_secs();

        let snap = s.clone();
        drop(s);

        info!(run_id = %req.run_id, "run/start");
        let _ = st.bus.send(BusMsg::Status(snap.clone()));

        spawn_run(Arc::clone(&st), req.run_id);
        (StatusCode::OK, Json(snap)).into_response()
    }
}

/// Drive one orchestrator run on a background task, then settle the daemon
/// status back to idle (or halted, when the run tripped the latch).
fn spawn_run(st: Arc<AppState>, run_id: uuid::Uuid) {
    tokio::spawn(async move {
        let chain = FallbackChain::new(st.cfg.fallback.clone(), Arc::clone(&st.registry));
        let orchestrator = RunOrchestrator::new(
            Arc::clone(&st.store),
            st.cfg.clone(),
            chain,
            Box::new(BusAlertSink::new(st.bus.clone())),
            WallClock::new(),
        );

        let outcome_msg = match orchestrator.execute(run_id).await {
            Ok(summary) => format!(
                "run {run_id} finished: {:?} picks={} no_bets={} hard_stops={} errors={}",
                summary.outcome,
                summary.picks,
                summary.no_bets,
                summary.hard_stops,
                summary.errors.len()
            ),
            Err(e) => {
                error!(%run_id, "run failed: {e:#}");
                format!("run {run_id} failed: {e:#}")
            }
        };

        let latch_active = st
            .store
            .load_or_init_hard_stop()
            .await
            .map(|s| s.active)
            .unwrap_or(false);

        {
            let mut s = st.status.write().await;
            s.state = if latch_active { "halted" } else { "idle" }.to_string();
            s.active_run_id = None;
            s.hard_stop_active = latch_active;
            s.notes = Some(outcome_msg.clone());
            let snap = s.clone();
            drop(s);
            let _ = st.bus.send(BusMsg::Status(snap));
        }

        let _ = st.bus.send(BusMsg::LogLine {
            level: "INFO".to_string(),
            msg: outcome_msg,
        });
    });
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
