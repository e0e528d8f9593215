//! Reward settlement: put all weight on the approved winner, fall back to
//! the burn uid whenever that is not possible, and burn again once the
//! reward period closes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tourney_api::TournamentBackend;
use tracing::{error, info, warn};

use crate::domain::{Result, WeightError};
use crate::guard::PeriodGuard;
use crate::obs;
use crate::weights::{WeightPublisher, WeightSnapshot};

/// Why the burn uid was chosen over a winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurnReason {
    NoWinnerApproved,
    WinnerNotRegistered,
    WinnerLookupFailed,
}

impl BurnReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BurnReason::NoWinnerApproved => "no_winner_approved",
            BurnReason::WinnerNotRegistered => "winner_not_registered",
            BurnReason::WinnerLookupFailed => "winner_lookup_failed",
        }
    }
}

/// Where the weight goes for this tournament.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardTarget {
    Winner { uid: u16, hotkey: String },
    Burn(BurnReason),
}

impl RewardTarget {
    pub fn uid(&self, burn_uid: u16) -> u16 {
        match self {
            RewardTarget::Winner { uid, .. } => *uid,
            RewardTarget::Burn(_) => burn_uid,
        }
    }
}

impl fmt::Display for RewardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardTarget::Winner { .. } => f.write_str("winner"),
            RewardTarget::Burn(reason) => f.write_str(reason.as_str()),
        }
    }
}

/// Attempt count and backoff for weight publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(5),
        }
    }
}

pub struct RewardSettler {
    backend: Arc<dyn TournamentBackend>,
    publisher: Arc<dyn WeightPublisher>,
    burn_uid: u16,
    policy: PublishPolicy,
    idle_interval: Duration,
}

impl RewardSettler {
    pub fn new(
        backend: Arc<dyn TournamentBackend>,
        publisher: Arc<dyn WeightPublisher>,
        burn_uid: u16,
        policy: PublishPolicy,
        idle_interval: Duration,
    ) -> Self {
        Self {
            backend,
            publisher,
            burn_uid,
            policy,
            idle_interval,
        }
    }

    pub fn burn_uid(&self) -> u16 {
        self.burn_uid
    }

    /// Run the reward period for `tournament_id` to its end.
    ///
    /// Only a snapshot failure before the first publish is returned;
    /// publish failures are logged.
    pub async fn settle(&self, tournament_id: &str, guard: &dyn PeriodGuard) -> Result<()> {
        info!(tournament_id, "Starting reward settlement");

        let snapshot = self.publisher.snapshot().await?;
        info!(participants = snapshot.len(), "Loaded weight snapshot");

        let target = self.resolve_target(tournament_id, &snapshot).await;
        let uid = target.uid(self.burn_uid);
        obs::emit_target_resolved(tournament_id, uid, &target.to_string());
        self.publish_with_fallback(&snapshot, uid).await;

        info!("Waiting for reward period to end");
        loop {
            match guard.check().await {
                Ok(true) => {}
                Ok(false) => break,
                // Only a confirmed period change may trigger the burn.
                Err(e) => warn!(error = %e, "Reward period check failed, still waiting"),
            }
            tokio::time::sleep(self.idle_interval).await;
        }

        info!(burn_uid = self.burn_uid, "Reward period ended, burning");
        self.burn().await;
        Ok(())
    }

    /// The approved winner's uid, or the burn target with its reason.
    pub async fn resolve_target(&self, tournament_id: &str, snapshot: &WeightSnapshot) -> RewardTarget {
        let info = match self.backend.winner(tournament_id).await {
            Ok(info) => info,
            Err(e) => {
                error!(tournament_id, error = %e, "Winner lookup failed");
                return RewardTarget::Burn(BurnReason::WinnerLookupFailed);
            }
        };

        let Some(hotkey) = info.approved_hotkey() else {
            info!(tournament_id, "No winner approved");
            return RewardTarget::Burn(BurnReason::NoWinnerApproved);
        };

        match snapshot.uid_of(hotkey) {
            Some(uid) => {
                info!(tournament_id, uid, "Winner resolved");
                RewardTarget::Winner {
                    uid,
                    hotkey: hotkey.to_string(),
                }
            }
            None => {
                warn!(tournament_id, hotkey, "Winner not registered on the subnet");
                RewardTarget::Burn(BurnReason::WinnerNotRegistered)
            }
        }
    }

    /// Publish full weight on `uid` with backoff. If every attempt fails and
    /// `uid` is not the burn uid, try the burn uid once. Returns whether
    /// any publish landed.
    pub async fn publish_with_fallback(&self, snapshot: &WeightSnapshot, uid: u16) -> bool {
        if self.publish(snapshot, uid).await {
            return true;
        }
        error!(uid, attempts = self.policy.max_attempts, "Failed to set weights");
        if uid == self.burn_uid {
            return false;
        }

        warn!(burn_uid = self.burn_uid, "Falling back to burn");
        match self.publish_once(snapshot, self.burn_uid).await {
            Ok(()) => {
                obs::emit_weights_published(self.burn_uid, 1);
                true
            }
            Err(e) => {
                obs::emit_weights_publish_failed(self.burn_uid, 1, &e);
                false
            }
        }
    }

    /// Publish full weight on the burn uid against a fresh snapshot.
    pub async fn burn(&self) -> bool {
        match self.publisher.snapshot().await {
            Ok(snapshot) => self.publish(&snapshot, self.burn_uid).await,
            Err(e) => {
                error!(error = %e, "Burn skipped, snapshot unavailable");
                false
            }
        }
    }

    async fn publish(&self, snapshot: &WeightSnapshot, uid: u16) -> bool {
        let attempts = self.policy.max_attempts.max(1);
        let mut delay = self.policy.initial_delay;

        for attempt in 1..=attempts {
            match self.publish_once(snapshot, uid).await {
                Ok(()) => {
                    obs::emit_weights_published(uid, attempt);
                    return true;
                }
                Err(e) => {
                    obs::emit_weights_publish_failed(uid, attempt, &e);
                    if matches!(e, WeightError::TargetOutOfRange { .. }) {
                        return false;
                    }
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }
        false
    }

    async fn publish_once(&self, snapshot: &WeightSnapshot, uid: u16) -> std::result::Result<(), WeightError> {
        let (uids, weights) = snapshot.single_target(uid)?;
        self.publisher.set_weights(&uids, &weights).await
    }
}
