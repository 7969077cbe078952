use anyhow::{Context, Result};
use chrono::Utc;
use pkd_alerts::AlertSink;
use pkd_audit::AuditWriter;
use pkd_db::PolicyStore;
use pkd_fallback::{FallbackChain, ModelRegistry};
use pkd_gates::{GateDecision, HardStopView, ACTION_HARD_STOP};
use pkd_hardstop::{DecisionOutcome, HardStopTracker};
use pkd_schemas::{
    AlertPayload, DailyRun, DecisionStatus, GateFlags, PolicyDecision, PredictionInput,
    PredictionStatus, RunContext, RunStatus,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{RunClock, RunnerConfig};

/// The run budget is polled, not preemptive: elapsed time is checked after
/// every block of this many processed predictions.
pub const TIMEOUT_CHECK_INTERVAL: usize = 10;

/// Terminal outcome of one batch run. Distinct from the persisted
/// `DailyRun.status`: a timed-out run still completed its processed prefix,
/// and a hard-stop-blocked entry is a FAILED run with a dedicated marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    HardStopBlocked,
    TimedOut,
    Failed,
}

/// Result summary returned to the caller. Routine partial failures live in
/// `errors`; only programmer errors propagate as `Err` from `execute`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub trace_id: Uuid,
    pub outcome: RunOutcome,
    pub total_matches: u32,
    pub picks: u32,
    pub no_bets: u32,
    pub hard_stops: u32,
    pub cancelled: u32,
    /// Predictions never reached (timeout); still PENDING in the store.
    pub pending_left: u32,
    pub errors: Vec<String>,
}

/// Sequences one daily batch run. Strictly sequential: the hard-stop latch
/// is re-checked before every decision, which is only sound when predictions
/// are evaluated one at a time.
pub struct RunOrchestrator<S, R, C>
where
    S: PolicyStore + ?Sized,
    R: ModelRegistry,
    C: RunClock,
{
    store: Arc<S>,
    chain: FallbackChain<R>,
    alerts: Box<dyn AlertSink>,
    clock: C,
    cfg: RunnerConfig,
    audit: Option<AuditWriter>,
}

impl<S, R, C> RunOrchestrator<S, R, C>
where
    S: PolicyStore + ?Sized,
    R: ModelRegistry,
    C: RunClock,
{
    pub fn new(
        store: Arc<S>,
        cfg: RunnerConfig,
        chain: FallbackChain<R>,
        alerts: Box<dyn AlertSink>,
        clock: C,
    ) -> Self {
        Self {
            store,
            chain,
            alerts,
            clock,
            cfg,
            audit: None,
        }
    }

    /// Attach an audit log; decisions, activations, and the run summary are
    /// appended as they happen.
    pub fn with_audit(mut self, audit: AuditWriter) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Execute the run. See the module docs for the ordering contract.
    pub async fn execute(mut self, run_id: Uuid) -> Result<RunSummary> {
        let trace_id = Uuid::new_v4();
        let start_ms = self.clock.now_ms();
        let mut run = DailyRun::started(run_id, Utc::now());

        // initialize(): the hard-stop singleton becomes this run's tracker.
        let hs_state = self
            .store
            .load_or_init_hard_stop()
            .await
            .context("load hard-stop state")?;
        let mut tracker = HardStopTracker::new(self.cfg.limits.clone(), hs_state);

        // Entry check: an already-active latch is a dedicated terminal
        // outcome. No prediction is touched.
        if tracker.is_active() {
            let reason = tracker
                .trigger_reason()
                .unwrap_or("hard stop active")
                .to_string();
            warn!(%run_id, %reason, "run refused: hard stop already active");
            self.emit_alert(&tracker, &reason, run_id, trace_id).await;

            run.status = RunStatus::Failed;
            run.errors.push("hard-stop already active".to_string());
            run.finished_at = Some(Utc::now());
            self.store
                .upsert_run(&run)
                .await
                .context("persist blocked run")?;

            let summary = RunSummary {
                run_id,
                trace_id,
                outcome: RunOutcome::HardStopBlocked,
                total_matches: 0,
                picks: 0,
                no_bets: 0,
                hard_stops: 0,
                cancelled: 0,
                pending_left: 0,
                errors: run.errors.clone(),
            };
            self.audit_summary(&summary);
            return Ok(summary);
        }

        self.store
            .upsert_run(&run)
            .await
            .context("persist run start")?;

        // FIFO by creation time; no reordering, no priority.
        let predictions = self
            .store
            .fetch_pending(run_id)
            .await
            .context("fetch pending predictions")?;
        run.total_matches = predictions.len() as u32;
        info!(%run_id, count = predictions.len(), "run started");

        let mut picks = 0u32;
        let mut no_bets = 0u32;
        let mut hard_stops = 0u32;
        let mut cancelled = 0u32;
        let mut errors: Vec<String> = Vec::new();
        let mut timed_out = false;
        let mut processed = 0usize;

        let mut idx = 0usize;
        while idx < predictions.len() {
            // a. Re-check the latch before every decision. A trigger from an
            // earlier prediction escalates everything that remains.
            if tracker.is_active() {
                let reason = tracker
                    .trigger_reason()
                    .unwrap_or("hard stop active")
                    .to_string();
                for p in &predictions[idx..] {
                    let decision = hard_stop_decision(p, run_id, trace_id, &reason);
                    if self.persist_decision(&decision, &mut errors).await {
                        hard_stops += 1;
                    } else {
                        cancelled += 1;
                    }
                    self.audit_decision(&decision);
                }
                idx = predictions.len();
                break;
            }

            let p = &predictions[idx];
            let ctx = RunContext {
                run_id,
                trace_id,
                daily_loss_micros: tracker.state().daily_loss_micros,
                consecutive_losses: tracker.state().consecutive_losses,
                bankroll_micros: self.cfg.bankroll_micros,
                executed_at: Utc::now(),
            };

            // b. Fallback chain. Probe failures are absorbed inside the
            // chain; nothing here can abort the run.
            let fallback = self.chain.evaluate(p);

            // c. Gate evaluation with the current latch value.
            let gate = pkd_gates::evaluate(&self.cfg.gate, p, &ctx, &HardStopView::inactive());

            // d. Merge: a fallback-forced no-bet overrides the gate result
            // and takes over the rationale.
            let decision = merge_decision(p, run_id, trace_id, gate, &fallback);

            // e. Persist. One bad write cancels this prediction only; the
            // loop (and its timeout accounting) carries on.
            if self.persist_decision(&decision, &mut errors).await {
                self.audit_decision(&decision);

                // f. Feed the outcome back into the risk tracker.
                let now = Utc::now();
                match decision.status {
                    DecisionStatus::Pick => {
                        picks += 1;
                        if let Some(reason) =
                            tracker.update_daily_loss(self.cfg.limits.default_stake_micros, now)
                        {
                            self.emit_alert(&tracker, &reason, run_id, trace_id).await;
                        }
                        if let Some(reason) = tracker.update_after_decision(
                            DecisionOutcome::Pick,
                            None,
                            self.cfg.bankroll_micros,
                            now,
                        ) {
                            self.emit_alert(&tracker, &reason, run_id, trace_id).await;
                        }
                    }
                    DecisionStatus::NoBet => {
                        no_bets += 1;
                        if let Some(reason) = tracker.update_after_decision(
                            DecisionOutcome::NoBet,
                            None,
                            self.cfg.bankroll_micros,
                            now,
                        ) {
                            self.emit_alert(&tracker, &reason, run_id, trace_id).await;
                        }
                    }
                    DecisionStatus::HardStop => {
                        // Unreachable through the normal path (the latch is
                        // checked in step a), but the contract holds: a
                        // hard-stop decision activates the latch directly.
                        hard_stops += 1;
                        let reason = decision
                            .hard_stop_reason
                            .clone()
                            .unwrap_or_else(|| "hard stop decision".to_string());
                        if tracker.activate(&reason, now) {
                            self.emit_alert(&tracker, &reason, run_id, trace_id).await;
                        }
                    }
                }

                // Flush the singleton so a crash between predictions cannot
                // lose an activation.
                if let Err(e) = self.store.save_hard_stop(tracker.state()).await {
                    errors.push(format!("hard-stop state flush failed: {e:#}"));
                }
            } else {
                cancelled += 1;
            }

            idx += 1;
            processed += 1;

            // Soft, cooperative timeout: polled between predictions only.
            if processed % TIMEOUT_CHECK_INTERVAL == 0 {
                let elapsed = self.clock.now_ms().saturating_sub(start_ms);
                if elapsed > self.cfg.run_timeout_ms {
                    timed_out = true;
                    errors.push(format!(
                        "run timeout: {elapsed} ms elapsed after {processed} predictions \
                         (budget {} ms); remaining predictions left pending",
                        self.cfg.run_timeout_ms
                    ));
                    break;
                }
            }
        }

        let pending_left = (predictions.len() - idx) as u32;
        let outcome = if timed_out {
            RunOutcome::TimedOut
        } else {
            RunOutcome::Completed
        };

        run.status = match outcome {
            RunOutcome::Completed | RunOutcome::TimedOut => RunStatus::Completed,
            RunOutcome::HardStopBlocked | RunOutcome::Failed => RunStatus::Failed,
        };
        run.picks_count = picks;
        run.no_bet_count = no_bets;
        run.hard_stop_count = hard_stops;
        run.cancelled_count = cancelled;
        run.errors = errors.clone();
        run.finished_at = Some(Utc::now());
        self.store
            .upsert_run(&run)
            .await
            .context("persist run summary")?;

        let summary = RunSummary {
            run_id,
            trace_id,
            outcome,
            total_matches: run.total_matches,
            picks,
            no_bets,
            hard_stops,
            cancelled,
            pending_left,
            errors,
        };
        info!(
            %run_id,
            outcome = ?summary.outcome,
            picks = summary.picks,
            no_bets = summary.no_bets,
            hard_stops = summary.hard_stops,
            "run finished"
        );
        self.audit_summary(&summary);
        Ok(summary)
    }

    /// Persist one decision and advance the prediction's lifecycle.
    /// Returns false when the write failed and the prediction was cancelled.
    async fn persist_decision(
        &self,
        decision: &PolicyDecision,
        errors: &mut Vec<String>,
    ) -> bool {
        match self.store.insert_decision(decision).await {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .set_prediction_status(decision.prediction_id, PredictionStatus::Decided)
                    .await
                {
                    errors.push(format!(
                        "prediction {}: status update failed: {e:#}",
                        decision.prediction_id
                    ));
                }
                true
            }
            Err(e) => {
                errors.push(format!(
                    "prediction {}: decision write failed: {e:#}",
                    decision.prediction_id
                ));
                if let Err(e2) = self
                    .store
                    .set_prediction_status(decision.prediction_id, PredictionStatus::Cancelled)
                    .await
                {
                    errors.push(format!(
                        "prediction {}: cancel failed: {e2:#}",
                        decision.prediction_id
                    ));
                }
                false
            }
        }
    }

    async fn emit_alert(
        &mut self,
        tracker: &HardStopTracker,
        reason: &str,
        run_id: Uuid,
        trace_id: Uuid,
    ) {
        let payload = AlertPayload {
            reason: reason.to_string(),
            daily_loss_micros: tracker.state().daily_loss_micros,
            consecutive_losses: tracker.state().consecutive_losses,
            bankroll_pct: tracker.state().bankroll_pct,
            trace_id,
        };
        if let Err(e) = self.alerts.send(&payload).await {
            error!(sink = self.alerts.name(), "alert delivery failed: {e:#}");
        }
        if let Some(audit) = self.audit.as_mut() {
            if let Ok(v) = serde_json::to_value(&payload) {
                if let Err(e) = audit.append(run_id, "policy", "HARD_STOP", v) {
                    error!("audit append failed: {e:#}");
                }
            }
        }
    }

    fn audit_decision(&mut self, decision: &PolicyDecision) {
        if let Some(audit) = self.audit.as_mut() {
            if let Ok(v) = serde_json::to_value(decision) {
                if let Err(e) = audit.append(decision.run_id, "policy", "DECISION", v) {
                    error!("audit append failed: {e:#}");
                }
            }
        }
    }

    fn audit_summary(&mut self, summary: &RunSummary) {
        if let Some(audit) = self.audit.as_mut() {
            let v = serde_json::json!({
                "outcome": format!("{:?}", summary.outcome),
                "total_matches": summary.total_matches,
                "picks": summary.picks,
                "no_bets": summary.no_bets,
                "hard_stops": summary.hard_stops,
                "cancelled": summary.cancelled,
                "pending_left": summary.pending_left,
                "errors": summary.errors,
            });
            if let Err(e) = audit.append(summary.run_id, "policy", "RUN_SUMMARY", v) {
                error!("audit append failed: {e:#}");
            }
        }
    }
}

/// Merge the gate result with the fallback outcome into the final decision.
fn merge_decision(
    input: &PredictionInput,
    run_id: Uuid,
    trace_id: Uuid,
    gate: GateDecision,
    fallback: &pkd_fallback::FallbackOutcome,
) -> PolicyDecision {
    let (status, rationale) = if fallback.was_forced_no_bet
        && gate.status != DecisionStatus::HardStop
    {
        (DecisionStatus::NoBet, fallback.rationale.clone())
    } else {
        (gate.status, gate.rationale)
    };

    PolicyDecision {
        decision_id: Uuid::new_v4(),
        prediction_id: input.prediction_id,
        run_id,
        status,
        rationale,
        gates: gate.gates,
        hard_stop_reason: gate.hard_stop_reason,
        recommended_action: pkd_gates::action_for(status).to_string(),
        fallback: Some(fallback.context.clone()),
        trace_id,
        executed_at: Utc::now(),
    }
}

/// Decision used when escalating the current and remaining predictions
/// after a mid-run trigger. The fallback chain never ran for these, so the
/// audit context is absent.
fn hard_stop_decision(
    input: &PredictionInput,
    run_id: Uuid,
    trace_id: Uuid,
    reason: &str,
) -> PolicyDecision {
    PolicyDecision {
        decision_id: Uuid::new_v4(),
        prediction_id: input.prediction_id,
        run_id,
        status: DecisionStatus::HardStop,
        rationale: format!("hard stop active: {reason}"),
        gates: GateFlags {
            confidence: false,
            edge: false,
            drift: false,
            hard_stop: false,
        },
        hard_stop_reason: Some(reason.to_string()),
        recommended_action: ACTION_HARD_STOP.to_string(),
        fallback: None,
        trace_id,
        executed_at: Utc::now(),
    }
}
