//! In-process validator state. Nothing here is persisted.

use tourney_api::EvaluationPhase;
use tracing::info;

use super::period::Period;

/// Running evaluation totals for the current tournament.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationStats {
    pub evaluated: u64,
    pub failed: u64,
}

impl EvaluationStats {
    pub fn total(&self) -> u64 {
        self.evaluated + self.failed
    }
}

/// What the control loop remembers between iterations.
#[derive(Debug, Default)]
pub struct ValidatorState {
    tournament_id: Option<String>,
    setup_phase: Option<EvaluationPhase>,
    last_period: Option<Period>,
}

impl ValidatorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tournament_id(&self) -> Option<&str> {
        self.tournament_id.as_deref()
    }

    /// Record the observed tournament. Returns `true` when it replaced a
    /// different one, in which case all cycle state has been reset.
    pub fn observe_tournament(&mut self, tournament_id: &str) -> bool {
        let changed = self
            .tournament_id
            .as_deref()
            .is_some_and(|current| current != tournament_id);
        if changed {
            info!(tournament_id, "Tournament changed");
            self.reset();
        }
        self.tournament_id = Some(tournament_id.to_string());
        changed
    }

    /// Record the classified period, returning the previous one on change.
    pub fn observe_period(&mut self, period: Period) -> Option<Period> {
        let previous = self.last_period.replace(period);
        match previous {
            Some(prev) if prev != period => {
                info!(from = %prev, to = %period, "Period transition");
                Some(prev)
            }
            _ => None,
        }
    }

    /// Setup has run for this tournament and matches `phase`.
    pub fn is_setup_complete(&self, phase: EvaluationPhase) -> bool {
        self.setup_phase == Some(phase)
    }

    pub fn mark_setup_complete(&mut self, phase: EvaluationPhase) {
        info!(tournament_id = ?self.tournament_id, %phase, "Setup marked complete");
        self.setup_phase = Some(phase);
    }

    /// Forget setup so the next evaluation period prepares again.
    pub fn discard_setup(&mut self) {
        self.setup_phase = None;
    }

    pub fn reset(&mut self) {
        self.tournament_id = None;
        self.setup_phase = None;
        self.last_period = None;
    }
}
