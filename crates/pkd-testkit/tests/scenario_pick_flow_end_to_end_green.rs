use pkd_db::PolicyStore;
use pkd_fallback::FallbackChain;
use pkd_runner::{RunOrchestrator, RunOutcome, RunnerConfig};
use pkd_schemas::{DecisionStatus, PredictionStatus, RunStatus};
use pkd_testkit::{healthy_registry, prediction, CollectingSink, MemStore, SteppingClock};
use std::sync::Arc;
use uuid::Uuid;

/// Happy path: hard stop inactive, fallback passes at primary, all gates
/// pass -> one PICK decision, run completed, no alerts.
#[tokio::test]
async fn pick_flow_end_to_end_green() {
    let run_id = Uuid::new_v4();
    let store = Arc::new(MemStore::new());
    let cfg = RunnerConfig::sane_defaults();

    let p = prediction(run_id, 0, 0.72, Some(12.5));
    store.insert_prediction(&p).await.unwrap();

    let (sink, alerts) = CollectingSink::new();
    let orchestrator = RunOrchestrator::new(
        Arc::clone(&store),
        cfg.clone(),
        FallbackChain::new(cfg.fallback.clone(), healthy_registry()),
        Box::new(sink),
        SteppingClock::frozen(),
    );

    let summary = orchestrator.execute(run_id).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.total_matches, 1);
    assert_eq!(summary.picks, 1);
    assert_eq!(summary.no_bets, 0);
    assert_eq!(summary.hard_stops, 0);
    assert!(summary.errors.is_empty());

    // Exactly one decision, PICK, served from the primary level.
    let decisions = store.decisions();
    assert_eq!(decisions.len(), 1);
    let d = &decisions[0];
    assert_eq!(d.prediction_id, p.prediction_id);
    assert_eq!(d.status, DecisionStatus::Pick);
    assert!(d.gates.all_passed());
    assert_eq!(d.fallback.as_ref().map(|f| f.level_str()), Some("primary"));
    assert_eq!(d.recommended_action, "stake per sizing policy");
    assert_eq!(d.trace_id, summary.trace_id);

    // The prediction advanced out of PENDING; the aggregate closed COMPLETED.
    assert_eq!(
        store.prediction_status(p.prediction_id),
        Some(PredictionStatus::Decided)
    );
    let run = store.run_snapshot(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.picks_count, 1);
    assert!(run.finished_at.is_some());

    // One pick of the default stake stays inside every limit.
    assert!(alerts.alerts().is_empty());
    let hs = store.hard_stop_snapshot().unwrap();
    assert!(!hs.active);
    assert_eq!(
        hs.daily_loss_micros,
        RunnerConfig::sane_defaults().limits.default_stake_micros
    );
}
