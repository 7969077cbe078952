use anyhow::Result;
use async_trait::async_trait;
use pkd_schemas::{DailyRun, HardStopState, PolicyDecision, PredictionInput, PredictionStatus};
use uuid::Uuid;

/// Outcome of an admin hard-stop reset.
#[derive(Debug, Clone, PartialEq)]
pub enum ResetOutcome {
    /// The latch was released; the post-reset state is returned.
    Reset(HardStopState),
    /// The latch was not active. Returned as data, not as an error: callers
    /// surface `{success: false, message}` rather than catching exceptions.
    NotActive,
}

/// Abstract persistence boundary for the policy engine. The Postgres
/// implementation lives in this crate; the in-memory one in pkd-testkit.
///
/// Object-safe so the orchestrator can run against `Arc<dyn PolicyStore>`.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Insert one prediction in PENDING status (ingestion boundary).
    async fn insert_prediction(&self, input: &PredictionInput) -> Result<()>;

    /// All PENDING predictions for a run, FIFO by creation time.
    async fn fetch_pending(&self, run_id: Uuid) -> Result<Vec<PredictionInput>>;

    /// Append one immutable decision. Fails if the prediction already has one.
    async fn insert_decision(&self, decision: &PolicyDecision) -> Result<()>;

    /// Fetch the decision for a prediction, if any (settlement path).
    async fn fetch_decision(&self, prediction_id: Uuid) -> Result<Option<PolicyDecision>>;

    /// Move a prediction out of PENDING.
    async fn set_prediction_status(
        &self,
        prediction_id: Uuid,
        status: PredictionStatus,
    ) -> Result<()>;

    /// Load the hard-stop singleton, creating the default inactive row when
    /// nothing is persisted yet. Idempotent.
    async fn load_or_init_hard_stop(&self) -> Result<HardStopState>;

    /// Persist the hard-stop singleton.
    async fn save_hard_stop(&self, state: &HardStopState) -> Result<()>;

    /// Admin reset as one atomic read-modify-write.
    async fn reset_hard_stop(&self, reason: &str, actor_id: &str) -> Result<ResetOutcome>;

    /// Insert or replace the run aggregate.
    async fn upsert_run(&self, run: &DailyRun) -> Result<()>;

    /// Fetch a run aggregate.
    async fn fetch_run(&self, run_id: Uuid) -> Result<Option<DailyRun>>;
}
