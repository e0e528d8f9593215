//! The backend seam the orchestration core depends on.

use std::path::Path;

use async_trait::async_trait;

use crate::models::{
    Agent, AgentListResponse, ConfigDocument, ConfigKind, EvaluationPhase, EvaluationSubmission,
    EvaluationToken, Tournament, UploadToken, WinnerInfo,
};
use crate::Result;

/// Pagination for the pending-work listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Every call the validator and miner make against the system of record.
///
/// Implementations sign evaluation assertions with their own identity, so
/// callers never see key material.
#[async_trait]
pub trait TournamentBackend: Send + Sync {
    /// Identity used in signed assertions and pending-work queries.
    fn hotkey(&self) -> String;

    /// The active tournament, `None` when the backend has none.
    async fn active_tournament(&self) -> Result<Option<Tournament>>;

    async fn tournament(&self, tournament_id: &str) -> Result<Tournament>;

    async fn config(&self, tournament_id: &str, kind: ConfigKind) -> Result<ConfigDocument>;

    async fn winner(&self, tournament_id: &str) -> Result<WinnerInfo>;

    /// Agents this validator has neither completed nor claimed in `phase`.
    async fn pending_agents(
        &self,
        tournament_id: &str,
        phase: Option<EvaluationPhase>,
        page: Page,
    ) -> Result<AgentListResponse>;

    /// Stream the agent archive into `dest`.
    async fn download_agent(&self, agent_id: &str, dest: &Path) -> Result<()>;

    /// Claim `agent_id`, or clear this validator's claim with `None`.
    async fn set_in_progress(&self, tournament_id: &str, agent_id: Option<&str>) -> Result<()>;

    /// Verify then submit. Returns the token the backend locked the
    /// submission to.
    async fn submit_evaluation(
        &self,
        tournament_id: &str,
        agent_id: &str,
        submission: &EvaluationSubmission,
    ) -> Result<EvaluationToken>;

    /// Agent upload, verify step.
    async fn request_upload_token(&self, content_hash: &str, file_size: u64)
        -> Result<UploadToken>;

    /// Agent upload, transfer step.
    async fn upload_agent(
        &self,
        token: &UploadToken,
        content_hash: &str,
        archive: &Path,
    ) -> Result<Agent>;
}
