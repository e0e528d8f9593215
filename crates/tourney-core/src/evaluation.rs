//! Evaluation loop: poll for pending agents and run each through the
//! pipeline, one at a time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tourney_api::{Agent, EvaluationPhase, EvaluationSubmission, Page, TournamentBackend};
use tracing::{debug, error, info, warn, Instrument};

use crate::domain::{EvaluationStats, Result, TaskConfig, TourneyError};
use crate::guard::PeriodGuard;
use crate::obs;
use crate::pipeline::AgentEvaluationPipeline;

/// Agent outcome as reported in lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    Submitted,
    Failed,
    Aborted,
}

impl AgentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentOutcome::Submitted => "submitted",
            AgentOutcome::Failed => "failed",
            AgentOutcome::Aborted => "aborted",
        }
    }
}

/// Drives [`AgentEvaluationPipeline`] over the pending-work listing.
///
/// Agents whose result (or failure report) was accepted in a phase are
/// remembered, so a stale listing never causes a second submission.
pub struct EvaluationOrchestrator {
    backend: Arc<dyn TournamentBackend>,
    pipeline: AgentEvaluationPipeline,
    poll_interval: Duration,
    agent_delay: Duration,
    stats: EvaluationStats,
    handled: HashSet<(String, EvaluationPhase, String)>,
}

impl EvaluationOrchestrator {
    pub fn new(
        backend: Arc<dyn TournamentBackend>,
        pipeline: AgentEvaluationPipeline,
        poll_interval: Duration,
        agent_delay: Duration,
    ) -> Self {
        Self {
            backend,
            pipeline,
            poll_interval,
            agent_delay,
            stats: EvaluationStats::default(),
            handled: HashSet::new(),
        }
    }

    pub fn stats(&self) -> EvaluationStats {
        self.stats
    }

    /// Whether a result for `agent_id` was already accepted in `phase`.
    pub fn is_handled(&self, tournament_id: &str, phase: EvaluationPhase, agent_id: &str) -> bool {
        self.handled
            .contains(&(tournament_id.to_string(), phase, agent_id.to_string()))
    }

    /// Forget counters and handled agents. Called on tournament change.
    pub fn reset(&mut self) {
        self.stats = EvaluationStats::default();
        self.handled.clear();
    }

    /// Evaluate pending agents while `guard` holds.
    ///
    /// Returns early with the error on a quiet-zone conflict or a fatal
    /// evaluation error. Anything else is logged and the loop polls again.
    pub async fn run_loop(
        &mut self,
        tournament_id: &str,
        phase: EvaluationPhase,
        task: Option<&TaskConfig>,
        guard: &dyn PeriodGuard,
    ) -> Result<EvaluationStats> {
        info!(tournament_id, %phase, "Starting evaluation loop");

        while guard.holds().await {
            match self.run_batch(tournament_id, phase, task, guard).await {
                Ok(0) => {
                    debug!(
                        poll_secs = self.poll_interval.as_secs(),
                        "No pending agents, waiting"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(processed) => debug!(processed, "Batch finished"),
                Err(e) if e.is_quiet_zone() => {
                    warn!(tournament_id, error = %e, "Quiet zone started, stopping evaluation");
                    obs::emit_pass_finished(phase, self.stats);
                    return Err(e);
                }
                Err(TourneyError::Evaluation(e)) if !e.recoverable => {
                    error!(tournament_id, error = %e, "Fatal evaluation error, aborting pass");
                    obs::emit_pass_finished(phase, self.stats);
                    return Err(TourneyError::Evaluation(e));
                }
                Err(e) => {
                    error!(tournament_id, error = %e, "Evaluation loop error");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        obs::emit_pass_finished(phase, self.stats);
        Ok(self.stats)
    }

    /// Fetch one page of pending agents and evaluate each. Returns how
    /// many agents were run.
    pub async fn run_batch(
        &mut self,
        tournament_id: &str,
        phase: EvaluationPhase,
        task: Option<&TaskConfig>,
        guard: &dyn PeriodGuard,
    ) -> Result<usize> {
        let listing = self
            .backend
            .pending_agents(tournament_id, Some(phase), Page::default())
            .await?;
        if !listing.agents.is_empty() {
            info!(count = listing.agents.len(), total = listing.total, "Pending agents");
        }

        let mut processed = 0;
        for agent in &listing.agents {
            if self.is_handled(tournament_id, phase, &agent.id) {
                debug!(agent_id = %agent.id, "Already submitted in this phase, skipping");
                continue;
            }
            if processed > 0 && !guard.holds().await {
                info!("Period ended mid-batch");
                break;
            }

            processed += 1;
            self.evaluate_agent(tournament_id, phase, agent, task).await?;
            tokio::time::sleep(self.agent_delay).await;
        }
        Ok(processed)
    }

    async fn evaluate_agent(
        &mut self,
        tournament_id: &str,
        phase: EvaluationPhase,
        agent: &Agent,
        task: Option<&TaskConfig>,
    ) -> Result<()> {
        obs::emit_evaluation_started(&agent.id, phase);
        let start = Instant::now();

        let outcome = self
            .pipeline
            .evaluate(tournament_id, agent, task)
            .instrument(obs::agent_span(tournament_id, &agent.id))
            .await;

        let (result, reported) = match outcome {
            Ok(_) => {
                self.stats.evaluated += 1;
                self.mark_handled(tournament_id, phase, agent);
                (Ok(()), AgentOutcome::Submitted)
            }
            Err(e) if e.is_quiet_zone() => (Err(e), AgentOutcome::Aborted),
            Err(TourneyError::Evaluation(e)) if e.recoverable => {
                self.stats.failed += 1;
                match self.report_failure(tournament_id, phase, agent, &e.message).await {
                    Ok(()) => (Ok(()), AgentOutcome::Failed),
                    Err(e) => (Err(e), AgentOutcome::Aborted),
                }
            }
            Err(TourneyError::Evaluation(e)) => {
                self.stats.failed += 1;
                (Err(TourneyError::Evaluation(e)), AgentOutcome::Aborted)
            }
            Err(e) => {
                self.stats.failed += 1;
                error!(agent_id = %agent.id, error = %e, "Unexpected error evaluating agent");
                (Ok(()), AgentOutcome::Failed)
            }
        };

        obs::emit_evaluation_finished(
            &agent.id,
            reported.as_str(),
            start.elapsed().as_millis() as u64,
        );
        result
    }

    /// Submit a zero-score record. Only a quiet-zone conflict escapes.
    async fn report_failure(
        &mut self,
        tournament_id: &str,
        phase: EvaluationPhase,
        agent: &Agent,
        reason: &str,
    ) -> Result<()> {
        let submission = EvaluationSubmission::failed(reason);
        match self
            .backend
            .submit_evaluation(tournament_id, &agent.id, &submission)
            .await
        {
            Ok(_) => {
                info!(agent_id = %agent.id, reason, "Reported failed evaluation");
                self.mark_handled(tournament_id, phase, agent);
                Ok(())
            }
            Err(e) if e.is_quiet_zone() => Err(e.into()),
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "Could not report failed evaluation");
                Ok(())
            }
        }
    }

    fn mark_handled(&mut self, tournament_id: &str, phase: EvaluationPhase, agent: &Agent) {
        self.handled
            .insert((tournament_id.to_string(), phase, agent.id.clone()));
    }
}
