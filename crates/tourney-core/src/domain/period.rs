//! Period classification.
//!
//! The period is never stored. It is recomputed from the freshest
//! [`Tournament`] and the current time on every check.

use std::fmt;

use serde::{Deserialize, Serialize};
use tourney_api::{EvaluationPhase, Tournament};

/// Stage of a tournament as seen by a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Period {
    NoTournament,
    Contest,
    SubmitWindow,
    PublicEvaluation,
    QuietZone,
    Evaluation,
    Review,
    Reward,
    Completed,
}

impl Period {
    pub const ALL: [Period; 9] = [
        Period::NoTournament,
        Period::Contest,
        Period::SubmitWindow,
        Period::PublicEvaluation,
        Period::QuietZone,
        Period::Evaluation,
        Period::Review,
        Period::Reward,
        Period::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::NoTournament => "NO_TOURNAMENT",
            Period::Contest => "CONTEST",
            Period::SubmitWindow => "SUBMIT_WINDOW",
            Period::PublicEvaluation => "PUBLIC_EVALUATION",
            Period::QuietZone => "QUIET_ZONE",
            Period::Evaluation => "EVALUATION",
            Period::Review => "REVIEW",
            Period::Reward => "REWARD",
            Period::Completed => "COMPLETED",
        }
    }

    /// The evaluation phase run during this period, if any.
    pub fn evaluation_phase(&self) -> Option<EvaluationPhase> {
        match self {
            Period::PublicEvaluation => Some(EvaluationPhase::Public),
            Period::Evaluation => Some(EvaluationPhase::Private),
            _ => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `now` (Unix seconds) against the tournament schedule.
///
/// Boundaries are compared in schedule order and the first interval `now`
/// falls in wins. A missing boundary skips the interval it closes, so a
/// tournament without a public split goes straight from the submit window
/// to `Evaluation`.
pub fn classify(tournament: Option<&Tournament>, now: i64) -> Period {
    let Some(t) = tournament else {
        return Period::NoTournament;
    };
    if t.status.is_terminal() {
        return Period::Completed;
    }

    let before = |boundary: Option<i64>| boundary.is_some_and(|b| now < b);

    if before(t.contest_start_time) {
        return Period::NoTournament;
    }
    if before(t.submit_window_start_time) {
        return Period::Contest;
    }
    if before(t.contest_end_time) {
        return Period::SubmitWindow;
    }
    if before(t.public_evaluation_end_time) {
        return Period::PublicEvaluation;
    }
    if t.has_public_split() && before(t.evaluation_start_time) {
        return Period::QuietZone;
    }
    if before(t.evaluation_end_time) {
        return Period::Evaluation;
    }
    if before(t.reward_start_time) {
        return Period::Review;
    }
    if before(t.reward_end_time) {
        return Period::Reward;
    }
    Period::Completed
}

/// Source of the current time, in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourney_api::TournamentStatus;

    fn scheduled() -> Tournament {
        let mut t = Tournament::new("t-1", TournamentStatus::Active);
        t.contest_start_time = Some(100);
        t.submit_window_start_time = Some(900);
        t.contest_end_time = Some(1000);
        t.evaluation_end_time = Some(1400);
        t.reward_start_time = Some(1450);
        t.reward_end_time = Some(1600);
        t
    }

    #[test]
    fn test_absent_and_terminal() {
        assert_eq!(classify(None, 0), Period::NoTournament);

        let mut t = scheduled();
        t.status = TournamentStatus::Cancelled;
        assert_eq!(classify(Some(&t), 950), Period::Completed);
        t.status = TournamentStatus::Done;
        assert_eq!(classify(Some(&t), 50), Period::Completed);
    }

    #[test]
    fn test_walk_without_public_split() {
        let t = scheduled();
        let cases = [
            (50, Period::NoTournament),
            (100, Period::Contest),
            (899, Period::Contest),
            (900, Period::SubmitWindow),
            (1000, Period::Evaluation),
            (1399, Period::Evaluation),
            (1400, Period::Review),
            (1450, Period::Reward),
            (1599, Period::Reward),
            (1600, Period::Completed),
        ];
        for (now, expected) in cases {
            assert_eq!(classify(Some(&t), now), expected, "now={now}");
        }
    }

    #[test]
    fn test_public_split_and_quiet_zone() {
        let mut t = scheduled();
        t.public_evaluation_end_time = Some(1100);
        t.evaluation_start_time = Some(1200);

        assert_eq!(classify(Some(&t), 1000), Period::PublicEvaluation);
        assert_eq!(classify(Some(&t), 1100), Period::QuietZone);
        assert_eq!(classify(Some(&t), 1199), Period::QuietZone);
        assert_eq!(classify(Some(&t), 1200), Period::Evaluation);
    }

    #[test]
    fn test_missing_reward_start_skips_review() {
        let mut t = scheduled();
        t.reward_start_time = None;
        assert_eq!(classify(Some(&t), 1420), Period::Reward);
    }

    #[test]
    fn test_evaluation_phase_mapping() {
        assert_eq!(
            Period::PublicEvaluation.evaluation_phase(),
            Some(EvaluationPhase::Public)
        );
        assert_eq!(
            Period::Evaluation.evaluation_phase(),
            Some(EvaluationPhase::Private)
        );
        assert_eq!(Period::QuietZone.evaluation_phase(), None);
        assert_eq!(Period::QuietZone.to_string(), "QUIET_ZONE");
    }
}
