use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pkd_alerts::{AlertSink, ConsoleSink, WebhookSink};
use pkd_db::{PgStore, PolicyStore, ResetOutcome};
use pkd_fallback::{
    BaselineModel, FallbackChain, PrimaryModel, SecondaryModel, SourceHealthSnapshot,
    StaticRegistry,
};
use pkd_hardstop::HardStopTracker;
use pkd_runner::{settle_prediction, RunOrchestrator, RunnerConfig, WallClock};
use pkd_schemas::MatchOutcome;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pkd")]
#[command(about = "PickDesk decision policy CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Run lifecycle commands
    Run {
        #[command(subcommand)]
        cmd: RunCmd,
    },

    /// Hard-stop admin commands
    Hardstop {
        #[command(subcommand)]
        cmd: HardstopCmd,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations. Guardrail: refuses when any run is RUNNING
    /// unless --yes is provided.
    Migrate {
        /// Acknowledge you are migrating a DB that may have a run in flight.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum RunCmd {
    /// Execute the decision policy over all pending predictions of a run.
    Start {
        /// Run id (must match the pending predictions' run_id)
        #[arg(long)]
        run_id: String,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Record a settled match result for a decided prediction.
    Settle {
        /// Prediction id
        #[arg(long)]
        prediction_id: String,

        /// Result: win | loss
        #[arg(long)]
        outcome: String,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum HardstopCmd {
    /// Print the current hard-stop state, limits, and recommended action.
    Status {
        /// Layered config paths in merge order (for the limits section)
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Release an active hard stop (admin-only).
    Reset {
        /// Why the latch is safe to release
        #[arg(long)]
        reason: String,

        /// Who is releasing it
        #[arg(long)]
        actor: String,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of an audit JSONL file.
    Verify {
        /// Path to the audit log
        #[arg(long)]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Db { cmd } => db_cmd(cmd).await,
        Commands::ConfigHash { paths } => config_hash_cmd(&paths),
        Commands::Run { cmd } => run_cmd(cmd).await,
        Commands::Hardstop { cmd } => hardstop_cmd(cmd).await,
        Commands::Audit { cmd } => audit_cmd(cmd),
    }
}

// ---------------------------------------------------------------------------
// db
// ---------------------------------------------------------------------------

async fn db_cmd(cmd: DbCmd) -> Result<()> {
    let pool = pkd_db::connect_from_env().await?;
    match cmd {
        DbCmd::Status => {
            let st = pkd_db::status(&pool).await?;
            println!("ok={} has_runs_table={}", st.ok, st.has_runs_table);
        }
        DbCmd::Migrate { yes } => {
            let running = pkd_db::count_running_runs(&pool).await?;
            if running > 0 && !yes {
                bail!(
                    "refusing to migrate: {running} run(s) currently RUNNING. \
                     Re-run with --yes to proceed anyway."
                );
            }
            pkd_db::migrate(&pool).await?;
            println!("migrations applied");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config-hash
// ---------------------------------------------------------------------------

fn config_hash_cmd(paths: &[String]) -> Result<()> {
    let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = pkd_config::load_layered_yaml(&refs)?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn run_cmd(cmd: RunCmd) -> Result<()> {
    match cmd {
        RunCmd::Start {
            run_id,
            config_paths,
        } => {
            let run_id: Uuid = run_id.parse().context("invalid --run-id")?;
            let cfg = load_runner_config(&config_paths)?;

            let pool = pkd_db::connect_from_env().await?;
            pkd_db::migrate(&pool).await?;
            let store = Arc::new(PgStore::new(pool));

            let audit_path = format!("exports/{run_id}/audit.jsonl");
            let audit = pkd_audit::AuditWriter::new(&audit_path, true)?;

            let chain = FallbackChain::new(cfg.fallback.clone(), build_registry(&cfg));
            let orchestrator = RunOrchestrator::new(
                store,
                cfg.clone(),
                chain,
                alert_sink_from_env(),
                WallClock::new(),
            )
            .with_audit(audit);

            let summary = orchestrator.execute(run_id).await?;
            println!(
                "run {} -> {:?}: total={} picks={} no_bets={} hard_stops={} cancelled={} pending_left={}",
                summary.run_id,
                summary.outcome,
                summary.total_matches,
                summary.picks,
                summary.no_bets,
                summary.hard_stops,
                summary.cancelled,
                summary.pending_left
            );
            for err in &summary.errors {
                eprintln!("error: {err}");
            }
            println!("audit: {audit_path}");
        }

        RunCmd::Settle {
            prediction_id,
            outcome,
            config_paths,
        } => {
            let prediction_id: Uuid = prediction_id.parse().context("invalid --prediction-id")?;
            let outcome = MatchOutcome::parse(&outcome)
                .with_context(|| format!("invalid --outcome '{outcome}' (win|loss)"))?;
            let cfg = load_runner_config(&config_paths)?;

            let pool = pkd_db::connect_from_env().await?;
            let store = PgStore::new(pool);

            let sink = alert_sink_from_env();
            let report = settle_prediction(
                &store,
                &cfg.limits,
                sink.as_ref(),
                cfg.bankroll_micros,
                prediction_id,
                outcome,
            )
            .await?;

            if !report.applied {
                println!("prediction {prediction_id}: no stake was placed; nothing to settle");
            } else {
                println!(
                    "settled {} as {}: consecutive_losses={}",
                    prediction_id,
                    outcome.as_str(),
                    report.consecutive_losses
                );
                if let Some(reason) = report.triggered {
                    println!("HARD STOP TRIGGERED: {reason}");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// hardstop
// ---------------------------------------------------------------------------

async fn hardstop_cmd(cmd: HardstopCmd) -> Result<()> {
    let pool = pkd_db::connect_from_env().await?;
    let store = PgStore::new(pool);

    match cmd {
        HardstopCmd::Status { config_paths } => {
            let cfg = load_runner_config(&config_paths)?;
            let state = store.load_or_init_hard_stop().await?;
            let tracker = HardStopTracker::new(cfg.limits, state);
            let status = tracker.status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        HardstopCmd::Reset { reason, actor } => {
            match store.reset_hard_stop(&reason, &actor).await? {
                ResetOutcome::Reset(state) => {
                    println!(
                        "hard stop reset by {actor}; counters cleared (was triggered: {})",
                        state.reset_reason.as_deref().unwrap_or("-")
                    );
                }
                ResetOutcome::NotActive => {
                    println!("success=false message=\"hard stop is not active; nothing to reset\"");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// audit
// ---------------------------------------------------------------------------

fn audit_cmd(cmd: AuditCmd) -> Result<()> {
    match cmd {
        AuditCmd::Verify { path } => match pkd_audit::verify_hash_chain(&path)? {
            pkd_audit::VerifyResult::Valid { lines } => {
                println!("chain valid ({lines} events)");
            }
            pkd_audit::VerifyResult::Broken { line, reason } => {
                bail!("chain BROKEN at line {line}: {reason}");
            }
        },
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_runner_config(paths: &[String]) -> Result<RunnerConfig> {
    if paths.is_empty() {
        return Ok(RunnerConfig::sane_defaults());
    }
    let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = pkd_config::load_layered_yaml(&refs)?;
    let report = pkd_config::report_unused_keys(
        pkd_config::ConfigMode::Runner,
        &loaded.config_json,
        pkd_config::UnusedKeyPolicy::Warn,
    )?;
    if !report.is_clean() {
        for ptr in &report.unused_leaf_pointers {
            tracing::warn!(%ptr, "unused config key");
        }
    }
    RunnerConfig::from_config_json(&loaded.config_json)
}

/// Console alerts by default; a webhook when PKD_ALERT_WEBHOOK is set.
fn alert_sink_from_env() -> Box<dyn AlertSink> {
    match std::env::var("PKD_ALERT_WEBHOOK") {
        Ok(url) if !url.trim().is_empty() => Box::new(WebhookSink::new(url)),
        _ => Box::new(ConsoleSink),
    }
}

/// Registry for the configured model ids with nominal source health; real
/// health snapshots come from the ingestion side once wired.
fn build_registry(cfg: &RunnerConfig) -> StaticRegistry {
    let now = Utc::now();
    let nominal = SourceHealthSnapshot {
        source_availability: 1.0,
        schema_validity: 1.0,
        completeness: 1.0,
        captured_at: now,
    };
    StaticRegistry::new(vec![
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
    ])
}
