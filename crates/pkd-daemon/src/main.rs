//! pkd-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads the layered
//! config, connects the store, wires middleware, and starts the HTTP server.
//! All route handlers live in `routes.rs`; all shared state types live in
//! `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use chrono::Utc;
use pkd_daemon::{routes, state};
use pkd_fallback::{BaselineModel, PrimaryModel, SecondaryModel, SourceHealthSnapshot, StaticRegistry};
use pkd_runner::RunnerConfig;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = load_runner_config()?;

    let pool = pkd_db::connect_from_env().await?;
    pkd_db::migrate(&pool).await?;
    let store: Arc<dyn pkd_db::PolicyStore> = Arc::new(pkd_db::PgStore::new(pool));

    let registry = build_registry(&cfg);
    let shared = Arc::new(state::AppState::new(store, cfg, registry));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8484)));
    info!("pkd-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Layered config paths from PKD_CONFIG (comma-separated, merge order).
/// Defaults apply when unset.
fn load_runner_config() -> Result<RunnerConfig> {
    match std::env::var("PKD_CONFIG") {
        Ok(paths) => {
            let parts: Vec<&str> = paths.split(',').map(|s| s.trim()).collect();
            let loaded = pkd_config::load_layered_yaml(&parts)?;
            info!(config_hash = %loaded.config_hash, "config loaded");
            let report = pkd_config::report_unused_keys(
                pkd_config::ConfigMode::Daemon,
                &loaded.config_json,
                pkd_config::UnusedKeyPolicy::Warn,
            )?;
            if !report.is_clean() {
                tracing::warn!(?report.unused_leaf_pointers, "unused config keys");
            }
            RunnerConfig::from_config_json(&loaded.config_json)
        }
        Err(_) => Ok(RunnerConfig::sane_defaults()),
    }
}

/// Registry for the configured model ids. Source health is nominal until an
/// ingestion feed publishes real snapshots; the fallback chain still guards
/// against unresolvable ids and stale baselines.
fn build_registry(cfg: &RunnerConfig) -> Arc<StaticRegistry> {
    let now = Utc::now();
    let nominal = SourceHealthSnapshot {
        source_availability: 1.0,
        schema_validity: 1.0,
        completeness: 1.0,
        captured_at: now,
    };
    Arc::new(StaticRegistry::new(vec![
        Box::new(PrimaryModel::new(cfg.fallback.primary_model_id.clone(), nominal)),
        Box::new(SecondaryModel::new(
            cfg.fallback.secondary_model_id.clone(),
            nominal,
        )),
        Box::new(BaselineModel::new(
            cfg.fallback.baseline_model_id.clone(),
            1.0,
            1.0,
            now,
        )),
    ]))
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("PKD_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins (the dashboard dev servers).
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
