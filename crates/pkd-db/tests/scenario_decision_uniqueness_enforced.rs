use chrono::Utc;
use pkd_db::{PgStore, PolicyStore};
use pkd_schemas::{
    DecisionStatus, FallbackContext, GateFlags, PolicyDecision, PredictionInput,
};
use serde_json::json;
use uuid::Uuid;

fn prediction(run_id: Uuid) -> PredictionInput {
    PredictionInput {
        prediction_id: Uuid::new_v4(),
        run_id,
        match_id: format!("TEST-{}", Uuid::new_v4()),
        user_id: None,
        confidence: 0.72,
        edge: Some(12.5),
        drift_score: None,
        model_version: "v3-2025".to_string(),
        winner_forecast: json!({"winner": "BOS"}),
        score_forecast: json!({"home": 110, "away": 101}),
        created_at: Utc::now(),
    }
}

fn decision(prediction_id: Uuid, run_id: Uuid) -> PolicyDecision {
    PolicyDecision {
        decision_id: Uuid::new_v4(),
        prediction_id,
        run_id,
        status: DecisionStatus::Pick,
        rationale: "all gates passed".to_string(),
        gates: GateFlags {
            confidence: true,
            edge: true,
            drift: true,
            hard_stop: true,
        },
        hard_stop_reason: None,
        recommended_action: "stake per sizing policy".to_string(),
        fallback: Some(FallbackContext::Primary {
            model_id: "nba-v3-2025".to_string(),
            quality_score: 0.97,
        }),
        trace_id: Uuid::new_v4(),
        executed_at: Utc::now(),
    }
}

/// Exactly one decision may exist per prediction; a second insert must fail
/// with the uniqueness reason, not silently overwrite the audit trail.
///
/// DB-backed test. Skips if PKD_DATABASE_URL is not set.
#[tokio::test]
async fn decision_uniqueness_enforced() -> anyhow::Result<()> {
    let url = match std::env::var(pkd_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: PKD_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;
    pkd_db::migrate(&pool).await?;

    let store = PgStore::new(pool);
    let run_id = Uuid::new_v4();
    let p = prediction(run_id);
    store.insert_prediction(&p).await?;

    // Pending list sees the prediction.
    let pending = store.fetch_pending(run_id).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].prediction_id, p.prediction_id);

    // First decision lands; second is refused.
    let d1 = decision(p.prediction_id, run_id);
    store.insert_decision(&d1).await?;

    let d2 = decision(p.prediction_id, run_id);
    let err = store.insert_decision(&d2).await.unwrap_err();
    assert!(format!("{err:#}").contains("decision already exists"));

    // Round trip preserves the fallback context tag.
    let fetched = store.fetch_decision(p.prediction_id).await?.unwrap();
    assert_eq!(fetched.decision_id, d1.decision_id);
    assert_eq!(
        fetched.fallback.as_ref().map(|f| f.level_str()),
        Some("primary")
    );

    Ok(())
}
