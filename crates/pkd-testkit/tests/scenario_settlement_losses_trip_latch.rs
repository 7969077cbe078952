use pkd_db::PolicyStore;
use pkd_fallback::FallbackChain;
use pkd_runner::{settle_prediction, RunOrchestrator, RunnerConfig};
use pkd_schemas::MatchOutcome;
use pkd_testkit::{healthy_registry, prediction, CollectingSink, MemStore, SteppingClock};
use std::sync::Arc;
use uuid::Uuid;

/// Streak accounting lives on the settlement path: three settled losses in
/// a row trip the consecutive-losses latch, with an alert.
#[tokio::test]
async fn settlement_losses_trip_latch() {
    let run_id = Uuid::new_v4();
    let store = Arc::new(MemStore::new());
    let cfg = RunnerConfig::sane_defaults();
    assert_eq!(cfg.limits.consecutive_losses_limit, 3);

    let preds: Vec<_> = (0..3)
        .map(|i| prediction(run_id, i, 0.72, Some(12.5)))
        .collect();
    for p in &preds {
        store.insert_prediction(p).await.unwrap();
    }

    let (run_sink, _run_alerts) = CollectingSink::new();
    let summary = RunOrchestrator::new(
        Arc::clone(&store),
        cfg.clone(),
        FallbackChain::new(cfg.fallback.clone(), healthy_registry()),
        Box::new(run_sink),
        SteppingClock::frozen(),
    )
    .execute(run_id)
    .await
    .unwrap();
    assert_eq!(summary.picks, 3);

    // Matches resolve hours later; settle them one by one as losses.
    let (sink, alerts) = CollectingSink::new();
    for (i, p) in preds.iter().enumerate() {
        let report = settle_prediction(
            store.as_ref(),
            &cfg.limits,
            &sink,
            cfg.bankroll_micros,
            p.prediction_id,
            MatchOutcome::Loss,
        )
        .await
        .unwrap();
        assert!(report.applied);
        assert_eq!(report.consecutive_losses, (i + 1) as u32);
        if i < 2 {
            assert!(report.triggered.is_none());
        } else {
            assert!(report
                .triggered
                .as_deref()
                .unwrap()
                .contains("HARD_STOP_CONSECUTIVE_LOSSES"));
        }
    }

    let hs = store.hard_stop_snapshot().unwrap();
    assert!(hs.active);
    assert_eq!(hs.consecutive_losses, 3);

    let sent = alerts.alerts();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].consecutive_losses, 3);
}

/// Settling a win resets the streak; settling a non-PICK decision is a
/// no-op report.
#[tokio::test]
async fn settlement_win_resets_streak_and_no_bet_is_inert() {
    let run_id = Uuid::new_v4();
    let store = Arc::new(MemStore::new());
    let cfg = RunnerConfig::sane_defaults();

    let pick = prediction(run_id, 0, 0.72, Some(12.5));
    let no_bet = prediction(run_id, 1, 0.20, Some(1.0));
    store.insert_prediction(&pick).await.unwrap();
    store.insert_prediction(&no_bet).await.unwrap();

    let (run_sink, _a) = CollectingSink::new();
    RunOrchestrator::new(
        Arc::clone(&store),
        cfg.clone(),
        FallbackChain::new(cfg.fallback.clone(), healthy_registry()),
        Box::new(run_sink),
        SteppingClock::frozen(),
    )
    .execute(run_id)
    .await
    .unwrap();

    let (sink, _alerts) = CollectingSink::new();

    // Two losses then a win: the streak collapses back to zero.
    for _ in 0..2 {
        settle_prediction(
            store.as_ref(),
            &cfg.limits,
            &sink,
            cfg.bankroll_micros,
            pick.prediction_id,
            MatchOutcome::Loss,
        )
        .await
        .unwrap();
    }
    let report = settle_prediction(
        store.as_ref(),
        &cfg.limits,
        &sink,
        cfg.bankroll_micros,
        pick.prediction_id,
        MatchOutcome::Win,
    )
    .await
    .unwrap();
    assert_eq!(report.consecutive_losses, 0);
    assert!(!store.hard_stop_snapshot().unwrap().active);

    // The NO_BET decision carried no stake.
    let report = settle_prediction(
        store.as_ref(),
        &cfg.limits,
        &sink,
        cfg.bankroll_micros,
        no_bet.prediction_id,
        MatchOutcome::Loss,
    )
    .await
    .unwrap();
    assert!(!report.applied);

    // Settling an unknown prediction is a real error.
    let err = settle_prediction(
        store.as_ref(),
        &cfg.limits,
        &sink,
        cfg.bankroll_micros,
        Uuid::new_v4(),
        MatchOutcome::Loss,
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("no decision exists"));
}
