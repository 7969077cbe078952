use pkd_db::PolicyStore;
use pkd_fallback::FallbackChain;
use pkd_runner::{RunOrchestrator, RunOutcome, RunnerConfig};
use pkd_schemas::DecisionStatus;
use pkd_testkit::{healthy_registry, prediction, CollectingSink, MemStore, SteppingClock};
use std::sync::Arc;
use uuid::Uuid;

/// Below-threshold confidence (and edge) with healthy data: the decision is
/// NO_BET and the rationale names the failing gates.
#[tokio::test]
async fn confidence_gate_blocks_pick() {
    let run_id = Uuid::new_v4();
    let store = Arc::new(MemStore::new());
    let cfg = RunnerConfig::sane_defaults();

    let p = prediction(run_id, 0, 0.55, Some(3.1));
    store.insert_prediction(&p).await.unwrap();

    let (sink, _alerts) = CollectingSink::new();
    let orchestrator = RunOrchestrator::new(
        Arc::clone(&store),
        cfg.clone(),
        FallbackChain::new(cfg.fallback.clone(), healthy_registry()),
        Box::new(sink),
        SteppingClock::frozen(),
    );

    let summary = orchestrator.execute(run_id).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.no_bets, 1);
    assert_eq!(summary.picks, 0);

    let decisions = store.decisions();
    assert_eq!(decisions.len(), 1);
    let d = &decisions[0];
    assert_eq!(d.status, DecisionStatus::NoBet);
    assert!(d.rationale.contains("confidence"));
    assert!(!d.gates.confidence);
    assert!(!d.gates.edge);
    // Data quality was fine; the gate, not the fallback, said no.
    assert_eq!(d.fallback.as_ref().map(|f| f.level_str()), Some("primary"));
    assert_eq!(d.recommended_action, "wait for signal");
}
