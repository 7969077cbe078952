use pkd_db::PolicyStore;
use pkd_fallback::FallbackChain;
use pkd_runner::{RunOrchestrator, RunOutcome, RunnerConfig};
use pkd_schemas::{DecisionStatus, FallbackContext};
use pkd_testkit::{degraded_registry, prediction, CollectingSink, MemStore, SteppingClock};
use std::sync::Arc;
use uuid::Uuid;

/// Every fallback level fails for a prediction whose gates all pass: the
/// forced no-bet wins the merge and supplies the rationale.
#[tokio::test]
async fn forced_no_bet_overrides_passing_gates() {
    let run_id = Uuid::new_v4();
    let store = Arc::new(MemStore::new());
    let cfg = RunnerConfig::sane_defaults();

    let p = prediction(run_id, 0, 0.80, Some(10.0));
    store.insert_prediction(&p).await.unwrap();

    let (sink, alerts) = CollectingSink::new();
    let orchestrator = RunOrchestrator::new(
        Arc::clone(&store),
        cfg.clone(),
        FallbackChain::new(cfg.fallback.clone(), degraded_registry()),
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

    // Final status is NO_BET even though confidence/edge/drift all passed.
    assert_eq!(d.status, DecisionStatus::NoBet);
    assert!(d.gates.confidence);
    assert!(d.gates.edge);
    assert!(d.gates.drift);

    // The rationale is the fallback's, not the gate evaluator's.
    assert!(d.rationale.contains("fallback levels failed"));
    match d.fallback.as_ref().unwrap() {
        FallbackContext::ForcedNoBet { reason } => {
            assert!(reason.contains("3 attempts"));
        }
        other => panic!("expected forced no-bet context, got {other:?}"),
    }

    // A forced no-bet is conservative, not a risk event: no alert.
    assert!(alerts.alerts().is_empty());
}
