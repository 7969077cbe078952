use chrono::{DateTime, Utc};
use pkd_schemas::{HardStopState, MatchOutcome};

use crate::{DecisionOutcome, HardStopLimits, HardStopStatus, NotActiveError, TriggerKind};

/// Pure reset transition, shared by the tracker and the store's transactional
/// admin path. Active -> Inactive; counters and trigger metadata are cleared
/// (an operator reset is a declared fresh start; preserving the counters
/// would re-trip the latch on the next stake).
pub fn apply_reset(
    state: &mut HardStopState,
    reason: &str,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<(), NotActiveError> {
    if !state.active {
        return Err(NotActiveError);
    }
    state.active = false;
    state.daily_loss_micros = 0;
    state.consecutive_losses = 0;
    state.bankroll_pct = 0.0;
    state.trigger_reason = None;
    state.triggered_at = None;
    state.reset_reason = Some(reason.to_string());
    state.reset_by = Some(actor_id.to_string());
    state.reset_at = Some(now);
    state.updated_at = now;
    Ok(())
}

/// The hard-stop risk state machine. Constructed once per run (or per admin
/// call) from the persisted singleton; every mutation leaves the state ready
/// to be written straight back to the store.
///
/// All time is caller-supplied so transitions stay deterministic.
pub struct HardStopTracker {
    limits: HardStopLimits,
    state: HardStopState,
}

impl HardStopTracker {
    /// `initialize()`: wrap the loaded (or freshly defaulted) singleton.
    pub fn new(limits: HardStopLimits, state: HardStopState) -> Self {
        Self { limits, state }
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn state(&self) -> &HardStopState {
        &self.state
    }

    pub fn limits(&self) -> &HardStopLimits {
        &self.limits
    }

    pub fn trigger_reason(&self) -> Option<&str> {
        self.state.trigger_reason.as_deref()
    }

    /// Inactive -> Active. Returns true when this call flipped the latch.
    /// A second activation is a no-op: the first trigger's reason wins.
    pub fn activate(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if self.state.active {
            return false;
        }
        self.state.active = true;
        self.state.trigger_reason = Some(reason.to_string());
        self.state.triggered_at = Some(now);
        self.state.updated_at = now;
        true
    }

    /// Active -> Inactive (admin-only).
    pub fn reset(
        &mut self,
        reason: &str,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), NotActiveError> {
        apply_reset(&mut self.state, reason, actor_id, now)
    }

    /// Accumulate exposure into the daily loss counter. When the new total
    /// exceeds the limit the latch trips; the trigger reason is returned so
    /// the caller can alert.
    pub fn update_daily_loss(
        &mut self,
        stake_micros: i64,
        now: DateTime<Utc>,
    ) -> Option<String> {
        self.state.daily_loss_micros = self.state.daily_loss_micros.saturating_add(stake_micros);
        self.state.updated_at = now;

        if self.limits.daily_loss_limit_micros > 0
            && self.state.daily_loss_micros > self.limits.daily_loss_limit_micros
        {
            let reason = format!(
                "{}: daily loss {} exceeds limit {}",
                TriggerKind::DailyLossLimit.code(),
                self.state.daily_loss_micros,
                self.limits.daily_loss_limit_micros
            );
            if self.activate(&reason, now) {
                return Some(reason);
            }
        }
        None
    }

    /// Update streak and exposure-ratio counters after a decision. The match
    /// result is usually still pending inside a run (`result == None`), in
    /// which case the streak is untouched; the settlement path replays this
    /// with the real outcome.
    pub fn update_after_decision(
        &mut self,
        outcome: DecisionOutcome,
        result: Option<MatchOutcome>,
        bankroll_micros: i64,
        now: DateTime<Utc>,
    ) -> Option<String> {
        match result {
            Some(MatchOutcome::Loss) => {
                self.state.consecutive_losses = self.state.consecutive_losses.saturating_add(1);
            }
            Some(MatchOutcome::Win) => {
                self.state.consecutive_losses = 0;
            }
            None => {}
        }

        let exposure = match outcome {
            DecisionOutcome::Pick => self.limits.default_stake_micros,
            DecisionOutcome::NoBet => 0,
        };
        self.state.bankroll_pct = if bankroll_micros > 0 {
            exposure as f64 / bankroll_micros as f64
        } else {
            0.0
        };
        self.state.updated_at = now;

        if self.limits.consecutive_losses_limit > 0
            && self.state.consecutive_losses >= self.limits.consecutive_losses_limit
        {
            let reason = format!(
                "{}: {} consecutive losses (limit {})",
                TriggerKind::ConsecutiveLosses.code(),
                self.state.consecutive_losses,
                self.limits.consecutive_losses_limit
            );
            if self.activate(&reason, now) {
                return Some(reason);
            }
            return None;
        }

        if self.limits.bankroll_pct_limit > 0.0
            && self.state.bankroll_pct > self.limits.bankroll_pct_limit
        {
            let reason = format!(
                "{}: exposure {:.4} of bankroll exceeds limit {:.4}",
                TriggerKind::BankrollPercent.code(),
                self.state.bankroll_pct,
                self.limits.bankroll_pct_limit
            );
            if self.activate(&reason, now) {
                return Some(reason);
            }
        }
        None
    }

    pub fn recommended_action(&self) -> &'static str {
        if self.state.active {
            "halt and review risk parameters"
        } else {
            "no action required"
        }
    }

    /// Read-only projection for the admin API and CLI.
    pub fn status(&self) -> HardStopStatus {
        HardStopStatus {
            is_active: self.state.active,
            triggered_at: self.state.triggered_at,
            trigger_reason: self.state.trigger_reason.clone(),
            daily_loss_micros: self.state.daily_loss_micros,
            consecutive_losses: self.state.consecutive_losses,
            bankroll_pct: self.state.bankroll_pct,
            limits: self.limits.clone(),
            recommended_action: self.recommended_action().to_string(),
        }
    }

    /// Surrender the state for persistence.
    pub fn into_state(self) -> HardStopState {
        self.state
    }
}
