//! Cooperative cancellation for long-running loops.
//!
//! Loops never get a cancel signal. Between units of work they ask a
//! [`PeriodGuard`] whether they should keep going.

use std::sync::Arc;

use async_trait::async_trait;
use tourney_api::{ApiError, TournamentBackend};
use tracing::{debug, warn};

use crate::domain::{classify, Clock, Period};

#[async_trait]
pub trait PeriodGuard: Send + Sync {
    /// Whether the enclosing period still holds. `Err` means the check
    /// could not be answered.
    async fn check(&self) -> Result<bool, ApiError>;

    /// `true` while the enclosing period still holds. An unanswered check
    /// counts as ended, so a loop cannot outlive a backend that stopped
    /// answering.
    async fn holds(&self) -> bool {
        match self.check().await {
            Ok(holds) => holds,
            Err(e) => {
                warn!(error = %e, "Period check failed");
                false
            }
        }
    }
}

/// Re-fetches the tournament and classifies it on every check.
pub struct LivePeriodGuard {
    backend: Arc<dyn TournamentBackend>,
    clock: Arc<dyn Clock>,
    tournament_id: String,
    expected: Period,
}

impl LivePeriodGuard {
    pub fn new(
        backend: Arc<dyn TournamentBackend>,
        clock: Arc<dyn Clock>,
        tournament_id: impl Into<String>,
        expected: Period,
    ) -> Self {
        Self {
            backend,
            clock,
            tournament_id: tournament_id.into(),
            expected,
        }
    }
}

#[async_trait]
impl PeriodGuard for LivePeriodGuard {
    async fn check(&self) -> Result<bool, ApiError> {
        let tournament = self.backend.tournament(&self.tournament_id).await?;
        let period = classify(Some(&tournament), self.clock.now());
        if period != self.expected {
            debug!(
                tournament_id = %self.tournament_id,
                expected = %self.expected,
                observed = %period,
                "Period no longer holds"
            );
        }
        Ok(period == self.expected)
    }
}
