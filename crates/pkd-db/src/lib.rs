use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use pkd_schemas::{
    DailyRun, DecisionStatus, FallbackContext, GateFlags, HardStopState, PolicyDecision,
    PredictionInput, PredictionStatus, RunStatus,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

mod store;

pub use store::{PolicyStore, ResetOutcome};

pub const ENV_DB_URL: &str = "PKD_DATABASE_URL";

/// Connect to Postgres using PKD_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='daily_runs'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_runs_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_runs_table: bool,
}

/// Count runs currently RUNNING. Used by the CLI migrate guardrail so an
/// operator cannot migrate under an in-flight run without `--yes`.
pub async fn count_running_runs(pool: &PgPool) -> Result<i64> {
    // If schema doesn't exist yet, treat as 0 (safe) rather than failing.
    let st = status(pool).await?;
    if !st.has_runs_table {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from daily_runs
        where status = 'RUNNING'
        "#,
    )
    .fetch_one(pool)
    .await
    .context("count_running_runs failed")?;

    Ok(n)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn prediction_from_row(row: &PgRow) -> Result<PredictionInput> {
    Ok(PredictionInput {
        prediction_id: row.try_get("prediction_id")?,
        run_id: row.try_get("run_id")?,
        match_id: row.try_get("match_id")?,
        user_id: row.try_get("user_id")?,
        confidence: row.try_get("confidence")?,
        edge: row.try_get("edge")?,
        drift_score: row.try_get("drift_score")?,
        model_version: row.try_get("model_version")?,
        winner_forecast: row.try_get("winner_forecast")?,
        score_forecast: row.try_get("score_forecast")?,
        created_at: row.try_get("created_at")?,
    })
}

fn decision_from_row(row: &PgRow) -> Result<PolicyDecision> {
    let status_raw: String = row.try_get("status")?;
    let status = DecisionStatus::parse(&status_raw)
        .ok_or_else(|| anyhow!("invalid decision status: {status_raw}"))?;

    let fallback: Option<serde_json::Value> = row.try_get("fallback")?;
    let fallback: Option<FallbackContext> = match fallback {
        Some(v) => Some(serde_json::from_value(v).context("decode fallback context")?),
        None => None,
    };

    Ok(PolicyDecision {
        decision_id: row.try_get("decision_id")?,
        prediction_id: row.try_get("prediction_id")?,
        run_id: row.try_get("run_id")?,
        status,
        rationale: row.try_get("rationale")?,
        gates: GateFlags {
            confidence: row.try_get("gate_confidence")?,
            edge: row.try_get("gate_edge")?,
            drift: row.try_get("gate_drift")?,
            hard_stop: row.try_get("gate_hard_stop")?,
        },
        hard_stop_reason: row.try_get("hard_stop_reason")?,
        recommended_action: row.try_get("recommended_action")?,
        fallback,
        trace_id: row.try_get("trace_id")?,
        executed_at: row.try_get("executed_at")?,
    })
}

fn hard_stop_from_row(row: &PgRow) -> Result<HardStopState> {
    let consecutive: i32 = row.try_get("consecutive_losses")?;
    Ok(HardStopState {
        active: row.try_get("active")?,
        daily_loss_micros: row.try_get("daily_loss_micros")?,
        consecutive_losses: consecutive.max(0) as u32,
        bankroll_pct: row.try_get("bankroll_pct")?,
        trigger_reason: row.try_get("trigger_reason")?,
        triggered_at: row.try_get("triggered_at")?,
        reset_reason: row.try_get("reset_reason")?,
        reset_by: row.try_get("reset_by")?,
        reset_at: row.try_get("reset_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<DailyRun> {
    let status_raw: String = row.try_get("status")?;
    let status =
        RunStatus::parse(&status_raw).ok_or_else(|| anyhow!("invalid run status: {status_raw}"))?;
    let errors: serde_json::Value = row.try_get("errors")?;
    let errors: Vec<String> = serde_json::from_value(errors).context("decode run errors")?;

    let get_u32 = |name: &str| -> Result<u32> {
        let v: i32 = row.try_get(name)?;
        Ok(v.max(0) as u32)
    };

    Ok(DailyRun {
        run_id: row.try_get("run_id")?,
        status,
        total_matches: get_u32("total_matches")?,
        picks_count: get_u32("picks_count")?,
        no_bet_count: get_u32("no_bet_count")?,
        hard_stop_count: get_u32("hard_stop_count")?,
        cancelled_count: get_u32("cancelled_count")?,
        errors,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

// ---------------------------------------------------------------------------
// Postgres store
// ---------------------------------------------------------------------------

/// `PolicyStore` over a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PolicyStore for PgStore {
    async fn insert_prediction(&self, input: &PredictionInput) -> Result<()> {
        sqlx::query(
            r#"
            insert into predictions (
              prediction_id, run_id, match_id, user_id, confidence, edge,
              drift_score, model_version, winner_forecast, score_forecast,
              status, created_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'PENDING', $11
            )
            "#,
        )
        .bind(input.prediction_id)
        .bind(input.run_id)
        .bind(&input.match_id)
        .bind(&input.user_id)
        .bind(input.confidence)
        .bind(input.edge)
        .bind(input.drift_score)
        .bind(&input.model_version)
        .bind(&input.winner_forecast)
        .bind(&input.score_forecast)
        .bind(input.created_at)
        .execute(&self.pool)
        .await
        .context("insert_prediction failed")?;
        Ok(())
    }

    async fn fetch_pending(&self, run_id: Uuid) -> Result<Vec<PredictionInput>> {
        let rows = sqlx::query(
            r#"
            select prediction_id, run_id, match_id, user_id, confidence, edge,
                   drift_score, model_version, winner_forecast, score_forecast,
                   created_at
            from predictions
            where run_id = $1 and status = 'PENDING'
            order by created_at asc, prediction_id asc
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("fetch_pending failed")?;

        rows.iter().map(prediction_from_row).collect()
    }

    async fn insert_decision(&self, decision: &PolicyDecision) -> Result<()> {
        let fallback = match &decision.fallback {
            Some(ctx) => Some(serde_json::to_value(ctx).context("encode fallback context")?),
            None => None,
        };

        let res = sqlx::query(
            r#"
            insert into policy_decisions (
              decision_id, prediction_id, run_id, status, rationale,
              gate_confidence, gate_edge, gate_drift, gate_hard_stop,
              hard_stop_reason, recommended_action, fallback, trace_id,
              executed_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
            )
            "#,
        )
        .bind(decision.decision_id)
        .bind(decision.prediction_id)
        .bind(decision.run_id)
        .bind(decision.status.as_str())
        .bind(&decision.rationale)
        .bind(decision.gates.confidence)
        .bind(decision.gates.edge)
        .bind(decision.gates.drift)
        .bind(decision.gates.hard_stop)
        .bind(&decision.hard_stop_reason)
        .bind(&decision.recommended_action)
        .bind(fallback)
        .bind(decision.trace_id)
        .bind(decision.executed_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) => {
                // One decision per prediction is a hard invariant; surface
                // the true reason instead of a generic insert failure.
                if is_unique_constraint_violation(&e, "uq_decision_per_prediction") {
                    return Err(anyhow!(
                        "decision already exists for prediction {}",
                        decision.prediction_id
                    ));
                }
                Err(anyhow::Error::new(e).context("insert_decision failed"))
            }
        }
    }

    async fn fetch_decision(&self, prediction_id: Uuid) -> Result<Option<PolicyDecision>> {
        let row = sqlx::query(
            r#"
            select decision_id, prediction_id, run_id, status, rationale,
                   gate_confidence, gate_edge, gate_drift, gate_hard_stop,
                   hard_stop_reason, recommended_action, fallback, trace_id,
                   executed_at
            from policy_decisions
            where prediction_id = $1
            "#,
        )
        .bind(prediction_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_decision failed")?;

        row.as_ref().map(decision_from_row).transpose()
    }

    async fn set_prediction_status(
        &self,
        prediction_id: Uuid,
        status: PredictionStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            update predictions
            set status = $2
            where prediction_id = $1
            "#,
        )
        .bind(prediction_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .context("set_prediction_status failed")?;
        Ok(())
    }

    async fn load_or_init_hard_stop(&self) -> Result<HardStopState> {
        sqlx::query("insert into hard_stop_state (id) values (true) on conflict do nothing")
            .execute(&self.pool)
            .await
            .context("hard_stop init failed")?;

        let row = sqlx::query(
            r#"
            select active, daily_loss_micros, consecutive_losses, bankroll_pct,
                   trigger_reason, triggered_at, reset_reason, reset_by,
                   reset_at, updated_at
            from hard_stop_state
            where id = true
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("load hard_stop failed")?;

        hard_stop_from_row(&row)
    }

    async fn save_hard_stop(&self, state: &HardStopState) -> Result<()> {
        sqlx::query(
            r#"
            update hard_stop_state
            set active = $1,
                daily_loss_micros = $2,
                consecutive_losses = $3,
                bankroll_pct = $4,
                trigger_reason = $5,
                triggered_at = $6,
                reset_reason = $7,
                reset_by = $8,
                reset_at = $9,
                updated_at = $10
            where id = true
            "#,
        )
        .bind(state.active)
        .bind(state.daily_loss_micros)
        .bind(state.consecutive_losses as i32)
        .bind(state.bankroll_pct)
        .bind(&state.trigger_reason)
        .bind(state.triggered_at)
        .bind(&state.reset_reason)
        .bind(&state.reset_by)
        .bind(state.reset_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .context("save_hard_stop failed")?;
        Ok(())
    }

    async fn reset_hard_stop(&self, reason: &str, actor_id: &str) -> Result<ResetOutcome> {
        // Atomic read-modify-write: a reset racing a run's activation must
        // observe one consistent row, so the row is locked for the duration.
        let mut tx = self.pool.begin().await.context("reset tx begin failed")?;

        let row = sqlx::query(
            r#"
            select active, daily_loss_micros, consecutive_losses, bankroll_pct,
                   trigger_reason, triggered_at, reset_reason, reset_by,
                   reset_at, updated_at
            from hard_stop_state
            where id = true
            for update
            "#,
        )
        .fetch_one(&mut *tx)
        .await
        .context("reset hard_stop select failed")?;

        let mut state = hard_stop_from_row(&row)?;
        if pkd_hardstop::apply_reset(&mut state, reason, actor_id, Utc::now()).is_err() {
            tx.rollback().await.ok();
            return Ok(ResetOutcome::NotActive);
        }

        sqlx::query(
            r#"
            update hard_stop_state
            set active = false,
                daily_loss_micros = 0,
                consecutive_losses = 0,
                bankroll_pct = 0,
                trigger_reason = null,
                triggered_at = null,
                reset_reason = $1,
                reset_by = $2,
                reset_at = $3,
                updated_at = $3
            where id = true
            "#,
        )
        .bind(&state.reset_reason)
        .bind(&state.reset_by)
        .bind(state.reset_at)
        .execute(&mut *tx)
        .await
        .context("reset hard_stop update failed")?;

        tx.commit().await.context("reset tx commit failed")?;
        Ok(ResetOutcome::Reset(state))
    }

    async fn upsert_run(&self, run: &DailyRun) -> Result<()> {
        let errors = serde_json::to_value(&run.errors).context("encode run errors")?;
        sqlx::query(
            r#"
            insert into daily_runs (
              run_id, status, total_matches, picks_count, no_bet_count,
              hard_stop_count, cancelled_count, errors, started_at, finished_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            )
            on conflict (run_id) do update set
              status = excluded.status,
              total_matches = excluded.total_matches,
              picks_count = excluded.picks_count,
              no_bet_count = excluded.no_bet_count,
              hard_stop_count = excluded.hard_stop_count,
              cancelled_count = excluded.cancelled_count,
              errors = excluded.errors,
              finished_at = excluded.finished_at
            "#,
        )
        .bind(run.run_id)
        .bind(run.status.as_str())
        .bind(run.total_matches as i32)
        .bind(run.picks_count as i32)
        .bind(run.no_bet_count as i32)
        .bind(run.hard_stop_count as i32)
        .bind(run.cancelled_count as i32)
        .bind(errors)
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await
        .context("upsert_run failed")?;
        Ok(())
    }

    async fn fetch_run(&self, run_id: Uuid) -> Result<Option<DailyRun>> {
        let row = sqlx::query(
            r#"
            select run_id, status, total_matches, picks_count, no_bet_count,
                   hard_stop_count, cancelled_count, errors, started_at,
                   finished_at
            from daily_runs
            where run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_run failed")?;

        row.as_ref().map(run_from_row).transpose()
    }
}

/// Detect a Postgres unique constraint violation by name.
fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}
