//! Error taxonomy for the validator core.

use std::path::PathBuf;

use tourney_api::ApiError;

/// A per-agent evaluation failure.
///
/// Recoverable failures are reported to the backend as a failed evaluation
/// and the batch moves on. Anything else aborts the current evaluation pass.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct EvaluationError {
    pub message: String,
    pub recoverable: bool,
}

impl EvaluationError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }
}

/// Failures while preparing a cycle for evaluation.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("required environment variable {0} is not set")]
    MissingEnv(String),

    #[error("{name} points to a missing path: {path}")]
    EnvPathMissing { name: String, path: PathBuf },

    #[error("invalid task configuration: {0}")]
    TaskConfig(String),

    #[error("git clone of {url} failed: {stderr}")]
    Clone { url: String, stderr: String },

    #[error("engine install failed: {0}")]
    Install(String),

    #[error("cannot save {path}: {message}")]
    Save { path: PathBuf, message: String },

    #[error("config download failed: {0}")]
    Api(#[from] ApiError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the weight-publishing oracle.
#[derive(Debug, thiserror::Error)]
pub enum WeightError {
    #[error("weight snapshot unavailable: {0}")]
    Snapshot(String),

    #[error("target uid {uid} outside snapshot of {size}")]
    TargetOutOfRange { uid: u16, size: usize },

    #[error("weight publish rejected: {0}")]
    Publish(String),
}

/// Failures loading validator or miner configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("environment variable '{0}' is not set and has no default")]
    MissingVar(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level error for tourney-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TourneyError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("weights: {0}")]
    Weights(#[from] WeightError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid agent directory: {}", .0.join("; "))]
    InvalidAgent(Vec<String>),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TourneyError {
    /// The backend refused a submission because the quiet zone started.
    /// Every loop that sees this must stop.
    pub fn is_quiet_zone(&self) -> bool {
        matches!(self, TourneyError::Api(e) if e.is_quiet_zone())
    }

    /// The evaluation error carried by this error, if any.
    pub fn as_evaluation(&self) -> Option<&EvaluationError> {
        match self {
            TourneyError::Evaluation(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for tourney-core operations.
pub type Result<T> = std::result::Result<T, TourneyError>;
