use anyhow::{bail, Context, Result};
use chrono::Utc;
use pkd_alerts::AlertSink;
use pkd_db::PolicyStore;
use pkd_hardstop::{DecisionOutcome, HardStopLimits, HardStopTracker};
use pkd_schemas::{AlertPayload, DecisionStatus, MatchOutcome};
use tracing::{error, info};
use uuid::Uuid;

/// What settlement did to the risk tracker.
#[derive(Debug, Clone)]
pub struct SettleReport {
    pub prediction_id: Uuid,
    /// false when the decision was not a PICK (nothing was staked).
    pub applied: bool,
    pub consecutive_losses: u32,
    pub triggered: Option<String>,
}

/// Record a real match result for a decided prediction and feed it through
/// the risk tracker. Losses extend the streak; a streak past the limit
/// trips the latch exactly as it would mid-run.
///
/// Match results arrive long after the run loop finished, so in-run streak
/// accounting always sees pending results; this path is where the streak
/// actually moves.
pub async fn settle_prediction<S: PolicyStore + ?Sized>(
    store: &S,
    limits: &HardStopLimits,
    alerts: &dyn AlertSink,
    bankroll_micros: i64,
    prediction_id: Uuid,
    outcome: MatchOutcome,
) -> Result<SettleReport> {
    let decision = match store
        .fetch_decision(prediction_id)
        .await
        .context("fetch decision for settlement")?
    {
        Some(d) => d,
        None => bail!("no decision exists for prediction {prediction_id}"),
    };

    if decision.status != DecisionStatus::Pick {
        // NO_BET and HARD_STOP decisions carried no stake.
        return Ok(SettleReport {
            prediction_id,
            applied: false,
            consecutive_losses: 0,
            triggered: None,
        });
    }

    let state = store
        .load_or_init_hard_stop()
        .await
        .context("load hard-stop state for settlement")?;
    let mut tracker = HardStopTracker::new(limits.clone(), state);

    let triggered = tracker.update_after_decision(
        DecisionOutcome::Pick,
        Some(outcome),
        bankroll_micros,
        Utc::now(),
    );

    store
        .save_hard_stop(tracker.state())
        .await
        .context("persist hard-stop state after settlement")?;

    if let Some(reason) = &triggered {
        let payload = AlertPayload {
            reason: reason.clone(),
            daily_loss_micros: tracker.state().daily_loss_micros,
            consecutive_losses: tracker.state().consecutive_losses,
            bankroll_pct: tracker.state().bankroll_pct,
            trace_id: decision.trace_id,
        };
        if let Err(e) = alerts.send(&payload).await {
            error!("settlement alert delivery failed: {e:#}");
        }
    }

    info!(
        %prediction_id,
        outcome = outcome.as_str(),
        consecutive_losses = tracker.state().consecutive_losses,
        "settled"
    );

    Ok(SettleReport {
        prediction_id,
        applied: true,
        consecutive_losses: tracker.state().consecutive_losses,
        triggered,
    })
}
