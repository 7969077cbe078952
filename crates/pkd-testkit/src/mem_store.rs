use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use pkd_db::{PolicyStore, ResetOutcome};
use pkd_schemas::{
    DailyRun, HardStopState, PolicyDecision, PredictionInput, PredictionStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    predictions: Vec<(PredictionInput, PredictionStatus)>,
    decisions: Vec<PolicyDecision>,
    hard_stop: Option<HardStopState>,
    runs: HashMap<Uuid, DailyRun>,
    fail_decision_writes_for: HashSet<Uuid>,
}

/// Full in-memory `PolicyStore` for scenario tests, with a failure-injection
/// knob for the persistence-isolation scenarios. Same contract as the
/// Postgres store, including the one-decision-per-prediction refusal.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `insert_decision` fail for this prediction id.
    pub fn fail_decision_write_for(&self, prediction_id: Uuid) {
        self.inner
            .lock()
            .unwrap()
            .fail_decision_writes_for
            .insert(prediction_id);
    }

    /// Snapshot of all decisions, in insertion order.
    pub fn decisions(&self) -> Vec<PolicyDecision> {
        self.inner.lock().unwrap().decisions.clone()
    }

    pub fn prediction_status(&self, prediction_id: Uuid) -> Option<PredictionStatus> {
        self.inner
            .lock()
            .unwrap()
            .predictions
            .iter()
            .find(|(p, _)| p.prediction_id == prediction_id)
            .map(|(_, s)| *s)
    }

    pub fn hard_stop_snapshot(&self) -> Option<HardStopState> {
        self.inner.lock().unwrap().hard_stop.clone()
    }

    /// Seed a pre-existing hard-stop state (e.g. active from a prior run).
    pub fn seed_hard_stop(&self, state: HardStopState) {
        self.inner.lock().unwrap().hard_stop = Some(state);
    }

    pub fn run_snapshot(&self, run_id: Uuid) -> Option<DailyRun> {
        self.inner.lock().unwrap().runs.get(&run_id).cloned()
    }
}

#[async_trait]
impl PolicyStore for MemStore {
    async fn insert_prediction(&self, input: &PredictionInput) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .predictions
            .iter()
            .any(|(p, _)| p.prediction_id == input.prediction_id)
        {
            bail!("prediction {} already exists", input.prediction_id);
        }
        inner
            .predictions
            .push((input.clone(), PredictionStatus::Pending));
        Ok(())
    }

    async fn fetch_pending(&self, run_id: Uuid) -> Result<Vec<PredictionInput>> {
        let inner = self.inner.lock().unwrap();
        let mut pending: Vec<PredictionInput> = inner
            .predictions
            .iter()
            .filter(|(p, s)| p.run_id == run_id && *s == PredictionStatus::Pending)
            .map(|(p, _)| p.clone())
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.prediction_id.cmp(&b.prediction_id))
        });
        Ok(pending)
    }

    async fn insert_decision(&self, decision: &PolicyDecision) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .fail_decision_writes_for
            .contains(&decision.prediction_id)
        {
            bail!("injected write failure for {}", decision.prediction_id);
        }
        if inner
            .decisions
            .iter()
            .any(|d| d.prediction_id == decision.prediction_id)
        {
            bail!(
                "decision already exists for prediction {}",
                decision.prediction_id
            );
        }
        inner.decisions.push(decision.clone());
        Ok(())
    }

    async fn fetch_decision(&self, prediction_id: Uuid) -> Result<Option<PolicyDecision>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .decisions
            .iter()
            .find(|d| d.prediction_id == prediction_id)
            .cloned())
    }

    async fn set_prediction_status(
        &self,
        prediction_id: Uuid,
        status: PredictionStatus,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .predictions
            .iter_mut()
            .find(|(p, _)| p.prediction_id == prediction_id)
            .ok_or_else(|| anyhow!("unknown prediction {prediction_id}"))?;
        entry.1 = status;
        Ok(())
    }

    async fn load_or_init_hard_stop(&self) -> Result<HardStopState> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner
            .hard_stop
            .get_or_insert_with(|| HardStopState::inactive(Utc::now()))
            .clone())
    }

    async fn save_hard_stop(&self, state: &HardStopState) -> Result<()> {
        self.inner.lock().unwrap().hard_stop = Some(state.clone());
        Ok(())
    }

    async fn reset_hard_stop(&self, reason: &str, actor_id: &str) -> Result<ResetOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .hard_stop
            .get_or_insert_with(|| HardStopState::inactive(Utc::now()));
        match pkd_hardstop::apply_reset(state, reason, actor_id, Utc::now()) {
            Ok(()) => Ok(ResetOutcome::Reset(state.clone())),
            Err(_) => Ok(ResetOutcome::NotActive),
        }
    }

    async fn upsert_run(&self, run: &DailyRun) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .runs
            .insert(run.run_id, run.clone());
        Ok(())
    }

    async fn fetch_run(&self, run_id: Uuid) -> Result<Option<DailyRun>> {
        Ok(self.inner.lock().unwrap().runs.get(&run_id).cloned())
    }
}
