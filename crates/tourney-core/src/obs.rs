//! Structured lifecycle events for the validator.
//!
//! Every event carries an `event=` field so log pipelines can filter on it
//! independently of the message text.

use tourney_api::EvaluationPhase;
use tracing::{info, warn, Span};

use crate::domain::{EvaluationStats, Period};

/// Span wrapping one control-loop iteration for a tournament.
///
/// Attach it with `tracing::Instrument` so it survives `.await` points.
pub fn cycle_span(tournament_id: &str, iteration: u64) -> Span {
    tracing::info_span!("tourney.cycle", tournament_id = %tournament_id, iteration)
}

/// Span wrapping one agent pipeline run.
pub fn agent_span(tournament_id: &str, agent_id: &str) -> Span {
    tracing::info_span!("tourney.agent", tournament_id = %tournament_id, agent_id = %agent_id)
}

pub fn emit_period_observed(tournament_id: &str, period: Period, status: &str) {
    info!(
        event = "period.observed",
        tournament_id = %tournament_id,
        period = %period,
        status = %status,
    );
}

pub fn emit_evaluation_started(agent_id: &str, phase: EvaluationPhase) {
    info!(event = "agent.evaluation_started", agent_id = %agent_id, phase = %phase);
}

/// `outcome` is one of `submitted`, `failed`, `aborted`.
pub fn emit_evaluation_finished(agent_id: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "agent.evaluation_finished",
        agent_id = %agent_id,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

pub fn emit_stage(agent_id: &str, stage: &str) {
    tracing::debug!(event = "agent.stage", agent_id = %agent_id, stage = %stage);
}

pub fn emit_pass_finished(phase: EvaluationPhase, stats: EvaluationStats) {
    info!(
        event = "evaluation.pass_finished",
        phase = %phase,
        evaluated = stats.evaluated,
        failed = stats.failed,
        total = stats.total(),
    );
}

pub fn emit_target_resolved(tournament_id: &str, uid: u16, reason: &str) {
    info!(
        event = "reward.target_resolved",
        tournament_id = %tournament_id,
        uid = uid,
        reason = %reason,
    );
}

pub fn emit_weights_published(uid: u16, attempt: u32) {
    info!(event = "weights.published", uid = uid, attempt = attempt);
}

pub fn emit_weights_publish_failed(uid: u16, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "weights.publish_failed",
        uid = uid,
        attempt = attempt,
        error = %error,
    );
}
