//! Top-level validator control loop.
//!
//! Each iteration fetches the active tournament, classifies the period and
//! dispatches. Iterations never end the loop: errors are logged and the
//! loop backs off.

use std::sync::Arc;
use std::time::Duration;

use tourney_api::{EvaluationPhase, Tournament, TournamentBackend};
use tracing::{error, info, warn, Instrument};

use crate::config::{IntervalsConfig, RunMode, ValidatorConfig};
use crate::domain::{classify, Clock, Period, Result, TaskConfig, ValidatorState};
use crate::engine::{PipInstaller, ScriptEngine};
use crate::evaluation::EvaluationOrchestrator;
use crate::guard::LivePeriodGuard;
use crate::obs;
use crate::pipeline::AgentEvaluationPipeline;
use crate::reward::{PublishPolicy, RewardSettler};
use crate::setup::{CycleSetup, WorkspaceSetup};
use crate::weights::CommandWeightPublisher;

/// Pause after an evaluation or reward pass ends, before re-classifying.
const TRANSITION_DELAY: Duration = Duration::from_secs(5);

/// Sleep durations used by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub no_tournament: Duration,
    pub contest: Duration,
    pub review: Duration,
    pub completed: Duration,
    pub error: Duration,
    pub burn: Duration,
}

impl From<&IntervalsConfig> for Intervals {
    fn from(c: &IntervalsConfig) -> Self {
        Self {
            no_tournament: Duration::from_secs(c.no_tournament),
            contest: Duration::from_secs(c.contest),
            review: Duration::from_secs(c.review),
            completed: Duration::from_secs(c.completed),
            error: Duration::from_secs(c.error),
            burn: Duration::from_secs(c.burn),
        }
    }
}

impl Default for Intervals {
    fn default() -> Self {
        Self::from(&IntervalsConfig::default())
    }
}

pub struct TournamentOrchestrator {
    backend: Arc<dyn TournamentBackend>,
    clock: Arc<dyn Clock>,
    setup: Arc<dyn CycleSetup>,
    evaluation: EvaluationOrchestrator,
    reward: RewardSettler,
    mode: RunMode,
    intervals: Intervals,
    state: ValidatorState,
    task: Option<TaskConfig>,
    iteration: u64,
}

impl TournamentOrchestrator {
    pub fn new(
        backend: Arc<dyn TournamentBackend>,
        clock: Arc<dyn Clock>,
        setup: Arc<dyn CycleSetup>,
        evaluation: EvaluationOrchestrator,
        reward: RewardSettler,
        mode: RunMode,
        intervals: Intervals,
    ) -> Self {
        Self {
            backend,
            clock,
            setup,
            evaluation,
            reward,
            mode,
            intervals,
            state: ValidatorState::new(),
            task: None,
            iteration: 0,
        }
    }

    /// Wire the production collaborators from a validator config.
    pub fn from_config(
        config: &ValidatorConfig,
        backend: Arc<dyn TournamentBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let installer = Arc::new(PipInstaller::new(&config.python));
        let engine = Arc::new(ScriptEngine::new(&config.python, &config.paths.eval_repo));
        let intervals = &config.intervals;

        let pipeline = AgentEvaluationPipeline::new(
            backend.clone(),
            installer.clone(),
            engine,
            &config.paths.workspace,
            config.retry.evaluation_timeout(),
        );
        let evaluation = EvaluationOrchestrator::new(
            backend.clone(),
            pipeline,
            Duration::from_secs(intervals.evaluation_poll),
            Duration::from_secs(intervals.agent_delay),
        );

        let publisher = Arc::new(CommandWeightPublisher::new(
            config.weights.snapshot_command.clone(),
            config.weights.publish_command.clone(),
            config.subnet.subnet_uid,
        ));
        let reward = RewardSettler::new(
            backend.clone(),
            publisher,
            config.weights.burn_uid,
            PublishPolicy {
                max_attempts: config.retry.weight_setting_max_attempts,
                initial_delay: config.retry.weight_initial_delay(),
            },
            Duration::from_secs(intervals.reward_idle),
        );

        let setup = Arc::new(
            WorkspaceSetup::new(
                backend.clone(),
                installer,
                &config.paths.workspace,
                &config.paths.eval_repo,
                &config.paths.eval_repo_url,
            )
            .with_required_env(config.setup.required_env.clone()),
        );

        Self::new(
            backend,
            clock,
            setup,
            evaluation,
            reward,
            config.mode,
            Intervals::from(intervals),
        )
    }

    pub fn state(&self) -> &ValidatorState {
        &self.state
    }

    pub fn evaluation(&self) -> &EvaluationOrchestrator {
        &self.evaluation
    }

    /// Run forever.
    pub async fn run(&mut self) {
        info!(mode = ?self.mode, "Validator control loop started");
        loop {
            let wait = self.tick().await;
            tokio::time::sleep(wait).await;
        }
    }

    /// One iteration with errors absorbed. Returns how long to sleep.
    pub async fn tick(&mut self) -> Duration {
        match self.run_iteration().await {
            Ok(wait) => wait,
            Err(e) => {
                error!(error = %e, backoff_secs = self.intervals.error.as_secs(), "Iteration failed");
                self.intervals.error
            }
        }
    }

    /// One iteration. Returns how long to sleep before the next one.
    pub async fn run_iteration(&mut self) -> Result<Duration> {
        self.iteration += 1;

        let Some(tournament) = self.backend.active_tournament().await? else {
            obs::emit_period_observed("-", Period::NoTournament, "none");
            self.reset_cycle();
            return Ok(self.intervals.no_tournament);
        };

        if self.state.observe_tournament(&tournament.id) {
            self.evaluation.reset();
            self.task = None;
        }
        let period = classify(Some(&tournament), self.clock.now());
        self.state.observe_period(period);
        obs::emit_period_observed(&tournament.id, period, tournament.status.as_str());

        let span = obs::cycle_span(&tournament.id, self.iteration);
        self.dispatch(&tournament, period).instrument(span).await
    }

    async fn dispatch(&mut self, tournament: &Tournament, period: Period) -> Result<Duration> {
        match period {
            Period::NoTournament => {
                self.reset_cycle();
                Ok(self.intervals.no_tournament)
            }
            Period::Completed => {
                self.reset_cycle();
                Ok(self.intervals.completed)
            }
            Period::Reward => {
                let guard = self.guard(tournament, Period::Reward);
                self.reward.settle(&tournament.id, &guard).await?;
                Ok(TRANSITION_DELAY)
            }
            _ if self.mode == RunMode::Cpu => {
                info!(%period, "CPU mode, burning");
                self.reward.burn().await;
                Ok(self.intervals.burn)
            }
            Period::Contest | Period::SubmitWindow => Ok(self.intervals.contest),
            Period::Review => Ok(self.intervals.review),
            Period::QuietZone => {
                if self.task.is_some() {
                    info!("Quiet zone, discarding public-phase setup");
                }
                self.discard_setup();
                Ok(self.intervals.contest)
            }
            Period::PublicEvaluation => {
                self.evaluate(tournament, period, EvaluationPhase::Public)
                    .await
            }
            Period::Evaluation => {
                self.evaluate(tournament, period, EvaluationPhase::Private)
                    .await
            }
        }
    }

    async fn evaluate(
        &mut self,
        tournament: &Tournament,
        period: Period,
        phase: EvaluationPhase,
    ) -> Result<Duration> {
        if !self.state.is_setup_complete(phase) || self.task.is_none() {
            let task = self.setup.prepare(&tournament.id, phase).await?;
            self.task = Some(task);
            self.state.mark_setup_complete(phase);
        }

        let guard = self.guard(tournament, period);
        match self
            .evaluation
            .run_loop(&tournament.id, phase, self.task.as_ref(), &guard)
            .await
        {
            Ok(stats) => {
                info!(
                    %phase,
                    evaluated = stats.evaluated,
                    failed = stats.failed,
                    "Evaluation period left"
                );
                Ok(TRANSITION_DELAY)
            }
            Err(e) if e.is_quiet_zone() => {
                warn!(%phase, "Submissions closed, discarding setup");
                self.discard_setup();
                Ok(TRANSITION_DELAY)
            }
            Err(e) => Err(e),
        }
    }

    fn guard(&self, tournament: &Tournament, period: Period) -> LivePeriodGuard {
        LivePeriodGuard::new(
            self.backend.clone(),
            self.clock.clone(),
            tournament.id.clone(),
            period,
        )
    }

    fn discard_setup(&mut self) {
        self.state.discard_setup();
        self.task = None;
    }

    fn reset_cycle(&mut self) {
        self.state.reset();
        self.evaluation.reset();
        self.task = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intervals_from_config() {
        let intervals = Intervals::default();
        assert_eq!(intervals.no_tournament, Duration::from_secs(300));
        assert_eq!(intervals.contest, Duration::from_secs(60));
        assert_eq!(intervals.burn, Duration::from_secs(3600));
        assert_eq!(intervals.error, Duration::from_secs(60));
    }
}
