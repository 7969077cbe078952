//! In-process scenario tests for pkd-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot`, so no network I/O is required.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use pkd_daemon::{routes, state};
use pkd_db::PolicyStore;
use pkd_runner::RunnerConfig;
use pkd_schemas::{HardStopState, MICROS_SCALE};
use pkd_testkit::{healthy_registry, MemStore};
use tower::ServiceExt; // oneshot
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_state() -> (Arc<MemStore>, Arc<state::AppState>) {
    let mem = Arc::new(MemStore::new());
    let store: Arc<dyn PolicyStore> = Arc::clone(&mem) as Arc<dyn PolicyStore>;
    let app = Arc::new(state::AppState::new(
        store,
        RunnerConfig::sane_defaults(),
        Arc::new(healthy_registry()),
    ));
    (mem, app)
}

fn active_state() -> HardStopState {
    let mut s = HardStopState::inactive(Utc::now());
    s.active = true;
    s.daily_loss_micros = 1_200 * MICROS_SCALE;
    s.trigger_reason = Some("HARD_STOP_DAILY_LOSS_LIMIT: test".to_string());
    s.triggered_at = Some(Utc::now());
    s
}

/// Drive the router with a single request and return (status, body_bytes).
async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (_mem, st) = make_state();
    let (status, body) = call(routes::build_router(st), get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "pkd-daemon");
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reflects_the_persisted_latch() {
    let (mem, st) = make_state();

    let (status, body) = call(routes::build_router(Arc::clone(&st)), get("/v1/status")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["state"], "idle");
    assert_eq!(json["hard_stop_active"], false);
    assert!(json["active_run_id"].is_null());

    mem.seed_hard_stop(active_state());
    let (_, body) = call(routes::build_router(st), get("/v1/status")).await;
    assert_eq!(parse_json(body)["hard_stop_active"], true);
}

// ---------------------------------------------------------------------------
// GET /v1/hardstop/status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hardstop_status_projects_state_and_limits() {
    let (_mem, st) = make_state();
    let (status, body) = call(routes::build_router(st), get("/v1/hardstop/status")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["is_active"], false);
    assert_eq!(json["recommended_action"], "no action required");
    assert_eq!(
        json["limits"]["daily_loss_limit_micros"].as_i64().unwrap(),
        RunnerConfig::sane_defaults().limits.daily_loss_limit_micros
    );
}

#[tokio::test]
async fn hardstop_status_shows_trigger_when_active() {
    let (mem, st) = make_state();
    mem.seed_hard_stop(active_state());

    let (_, body) = call(routes::build_router(st), get("/v1/hardstop/status")).await;
    let json = parse_json(body);
    assert_eq!(json["is_active"], true);
    assert!(json["trigger_reason"]
        .as_str()
        .unwrap()
        .contains("HARD_STOP_DAILY_LOSS_LIMIT"));
    assert_eq!(
        json["recommended_action"],
        "halt and review risk parameters"
    );
}

// ---------------------------------------------------------------------------
// POST /v1/hardstop/reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reset_while_inactive_returns_structured_409() {
    let (_mem, st) = make_state();
    let (status, body) = call(
        routes::build_router(st),
        post_json(
            "/v1/hardstop/reset",
            serde_json::json!({"reason": "noop", "actor_id": "admin-1"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    let json = parse_json(body);
    assert_eq!(json["success"], false);
    assert!(json["message"].as_str().unwrap().contains("not active"));
}

#[tokio::test]
async fn reset_releases_an_active_latch() {
    let (mem, st) = make_state();
    mem.seed_hard_stop(active_state());

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json(
            "/v1/hardstop/reset",
            serde_json::json!({"reason": "reviewed", "actor_id": "admin-1"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["success"], true);
    assert_eq!(json["status"]["is_active"], false);
    assert_eq!(json["status"]["daily_loss_micros"], 0);

    // The store agrees.
    assert!(!mem.hard_stop_snapshot().unwrap().active);
}

// ---------------------------------------------------------------------------
// POST /v1/run/start
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_start_refused_403_when_hard_stop_active() {
    let (mem, st) = make_state();
    mem.seed_hard_stop(active_state());

    let (status, body) = call(
        routes::build_router(st),
        post_json(
            "/v1/run/start",
            serde_json::json!({"run_id": Uuid::new_v4()}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    let json = parse_json(body);
    assert!(json["error"]
        .as_str()
        .unwrap_or("")
        .contains("GATE_REFUSED"));
    assert_eq!(json["gate"], "hard_stop_inactive");
}

#[tokio::test]
async fn run_start_succeeds_after_reset() {
    let (mem, st) = make_state();
    mem.seed_hard_stop(active_state());

    // Refused while active.
    let run_id = Uuid::new_v4();
    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/run/start", serde_json::json!({"run_id": run_id})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Reset, then start.
    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        post_json(
            "/v1/hardstop/reset",
            serde_json::json!({"reason": "reviewed", "actor_id": "admin-1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        routes::build_router(st),
        post_json("/v1/run/start", serde_json::json!({"run_id": run_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["state"], "running");
    assert_eq!(json["active_run_id"], serde_json::json!(run_id));
}

// ---------------------------------------------------------------------------
// Unknown routes return 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let (_mem, st) = make_state();
    let (status, _) = call(routes::build_router(st), get("/v1/does_not_exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
