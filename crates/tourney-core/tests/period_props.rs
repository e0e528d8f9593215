//! Period classification over generated schedules.

use proptest::prelude::*;
use tourney_api::{Tournament, TournamentStatus};
use tourney_core::{classify, Period};

fn ordinal(period: Period) -> usize {
    Period::ALL
        .iter()
        .position(|p| *p == period)
        .unwrap()
}

/// Boundaries in schedule order, built from a start and non-negative gaps.
/// A zero gap makes the period between two boundaries empty.
fn schedule(start: i64, gaps: &[i64; 7], public_split: bool) -> Tournament {
    let mut at = start;
    let mut next = |gap: i64| {
        at += gap;
        at
    };
    let mut t = Tournament::new("t-prop", TournamentStatus::Active);
    t.contest_start_time = Some(start);
    t.submit_window_start_time = Some(next(gaps[0]));
    t.contest_end_time = Some(next(gaps[1]));
    let public_end = next(gaps[2]);
    let eval_start = next(gaps[3]);
    if public_split {
        t.public_evaluation_end_time = Some(public_end);
        t.evaluation_start_time = Some(eval_start);
    }
    t.evaluation_end_time = Some(next(gaps[4]));
    t.reward_start_time = Some(next(gaps[5]));
    t.reward_end_time = Some(next(gaps[6]));
    t
}

fn gaps() -> impl Strategy<Value = [i64; 7]> {
    prop::array::uniform7(0i64..10_000)
}

proptest! {
    #[test]
    fn periods_never_move_backwards(
        start in 0i64..1_000_000,
        gaps in gaps(),
        public_split in any::<bool>(),
        a in 0i64..1_100_000,
        b in 0i64..1_100_000,
    ) {
        let t = schedule(start, &gaps, public_split);
        let (early, late) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(ordinal(classify(Some(&t), early)) <= ordinal(classify(Some(&t), late)));
    }

    #[test]
    fn no_public_tier_without_split(
        start in 0i64..1_000_000,
        gaps in gaps(),
        now in 0i64..1_100_000,
    ) {
        let t = schedule(start, &gaps, false);
        let period = classify(Some(&t), now);
        prop_assert_ne!(period, Period::PublicEvaluation);
        prop_assert_ne!(period, Period::QuietZone);
    }

    #[test]
    fn terminal_status_is_always_completed(
        start in 0i64..1_000_000,
        gaps in gaps(),
        now in 0i64..1_100_000,
        cancelled in any::<bool>(),
    ) {
        let mut t = schedule(start, &gaps, true);
        t.status = if cancelled { TournamentStatus::Cancelled } else { TournamentStatus::Done };
        prop_assert_eq!(classify(Some(&t), now), Period::Completed);
    }

    #[test]
    fn boundaries_belong_to_the_later_period(
        start in 0i64..1_000_000,
        gaps in gaps(),
    ) {
        let t = schedule(start, &gaps, true);
        let cases = [
            (t.submit_window_start_time, Period::SubmitWindow),
            (t.contest_end_time, Period::PublicEvaluation),
            (t.public_evaluation_end_time, Period::QuietZone),
            (t.evaluation_start_time, Period::Evaluation),
            (t.evaluation_end_time, Period::Review),
            (t.reward_start_time, Period::Reward),
            (t.reward_end_time, Period::Completed),
        ];
        // Coinciding boundaries open empty periods; the last one opened wins.
        for (boundary, _) in &cases {
            let at = boundary.unwrap();
            let expected = cases
                .iter()
                .rev()
                .find(|(b, _)| *b == Some(at))
                .map(|(_, p)| *p)
                .unwrap();
            prop_assert_eq!(classify(Some(&t), at), expected);
        }
    }
}

#[test]
fn single_tier_schedule_walkthrough() {
    let mut t = Tournament::new("t-1", TournamentStatus::Active);
    t.submit_window_start_time = Some(900);
    t.contest_end_time = Some(1000);
    t.evaluation_end_time = Some(1400);
    t.reward_start_time = Some(1450);
    t.reward_end_time = Some(1600);

    assert_eq!(classify(Some(&t), 500), Period::Contest);
    assert_eq!(classify(Some(&t), 950), Period::SubmitWindow);
    assert_eq!(classify(Some(&t), 1200), Period::Evaluation);
    assert_eq!(classify(Some(&t), 1420), Period::Review);
    assert_eq!(classify(Some(&t), 1500), Period::Reward);
    assert_eq!(classify(Some(&t), 1600), Period::Completed);
}

#[test]
fn empty_submit_window_is_skipped() {
    let mut t = Tournament::new("t-1", TournamentStatus::Active);
    t.submit_window_start_time = Some(1000);
    t.contest_end_time = Some(1000);
    t.evaluation_end_time = Some(1400);

    assert_eq!(classify(Some(&t), 999), Period::Contest);
    assert_eq!(classify(Some(&t), 1000), Period::Evaluation);
}

#[test]
fn missing_tournament_is_no_tournament() {
    assert_eq!(classify(None, 0), Period::NoTournament);
}
