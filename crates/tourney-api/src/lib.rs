//! Tourney API: client side of the tournament backend.
//!
//! Signed two-step submissions for agents and evaluation results, the
//! error taxonomy every caller branches on, and the retry policy applied to
//! safe-to-repeat calls.
//!
//! ## Seams
//!
//! The orchestration core only talks to [`TournamentBackend`] and
//! [`Signer`]; [`TournamentApi`] and [`Sr25519Signer`] are the production
//! implementations.

pub mod backend;
pub mod client;
pub mod error;
pub mod messages;
pub mod models;
pub mod retry;
pub mod signer;

pub use backend::{Page, TournamentBackend};
pub use client::{ApiConfig, TournamentApi};
pub use error::ApiError;
pub use models::{
    Agent, AgentListResponse, AgentStatus, ConfigDocument, ConfigKind, Evaluation, EvaluationPhase,
    EvaluationResult, EvaluationStatus, EvaluationSubmission, EvaluationToken, Tournament,
    TournamentStatus, UploadToken, WinnerInfo,
};
pub use retry::{with_retry, RetryPolicy, Retryable};
pub use signer::{verify_signature, Signer, Sr25519Signer};

/// Result type for tourney-api operations
pub type Result<T> = std::result::Result<T, ApiError>;
