//! Tourney Core Library
//!
//! Validator orchestration for time-boxed agent tournaments. The control
//! loop classifies the active tournament's period, evaluates pending agents
//! one at a time through an isolated pipeline, and settles rewards by
//! publishing chain weights.
//!
//! The backend, installer, engine, weight publisher and clock are traits so
//! the whole loop can run against the in-memory [`fakes`].

pub mod archive;
pub mod config;
pub mod domain;
pub mod engine;
pub mod evaluation;
pub mod fakes;
pub mod guard;
pub mod obs;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod reward;
pub mod setup;
pub mod submit;
pub mod telemetry;
pub mod weights;

pub use domain::{
    classify, Clock, ConfigError, EnvScene, EvaluationError, EvaluationStats, Period, Result,
    SetupError, SystemClock, TaskConfig, TourneyError, ValidatorState, WeightError,
};

pub use config::{
    load_miner_config, load_validator_config, MinerConfig, RunMode, ValidatorConfig,
};
pub use engine::{EvaluationEngine, ModuleInstaller, PipInstaller, ScriptEngine};
pub use evaluation::{AgentOutcome, EvaluationOrchestrator};
pub use guard::{LivePeriodGuard, PeriodGuard};
pub use orchestrator::{Intervals, TournamentOrchestrator};
pub use pipeline::{AgentEvaluationPipeline, PipelineStage};
pub use reward::{BurnReason, PublishPolicy, RewardSettler, RewardTarget};
pub use setup::{CycleSetup, WorkspaceSetup};
pub use submit::{submit_agent, validate_agent_dir, SubmitReport};
pub use telemetry::{init_tracing, LogFormat};
pub use weights::{CommandWeightPublisher, WeightPublisher, WeightSnapshot};
