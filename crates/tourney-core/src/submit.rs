//! Miner side: validate an agent directory and upload it.

use std::path::Path;

use tourney_api::{Agent, TournamentBackend};
use tracing::info;

use crate::archive::{self, ARCHIVE_EXCLUDES};
use crate::domain::{Result, TourneyError};

/// What a successful submission produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReport {
    pub agent: Agent,
    pub tournament_id: String,
    pub content_hash: String,
    pub file_size: u64,
}

/// Check the agent layout, listing every problem found.
pub fn validate_agent_dir(dir: &Path) -> Result<()> {
    let problems = archive::validate_agent_structure(dir);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(TourneyError::InvalidAgent(problems))
    }
}

/// Validate, pack, hash and upload the agent at `dir`.
///
/// The archive lives in a temporary directory that is removed on return.
pub async fn submit_agent(backend: &dyn TournamentBackend, dir: &Path) -> Result<SubmitReport> {
    validate_agent_dir(dir)?;

    let scratch = tempfile::tempdir()?;
    let archive_path = scratch.path().join("agent.zip");
    let (src, dst) = (dir.to_path_buf(), archive_path.clone());
    tokio::task::spawn_blocking(move || archive::zip_directory(&src, &dst, ARCHIVE_EXCLUDES))
        .await
        .map_err(std::io::Error::other)??;

    let content_hash = archive::sha256_file(&archive_path)?;
    let file_size = tokio::fs::metadata(&archive_path).await?.len();
    info!(
        hotkey = %backend.hotkey(),
        file_size,
        checksum = %&content_hash[..16.min(content_hash.len())],
        "Created submission archive"
    );

    let token = backend.request_upload_token(&content_hash, file_size).await?;
    if let Some(max) = token.max_file_size {
        if file_size > max {
            return Err(TourneyError::InvalidAgent(vec![format!(
                "archive is {file_size} bytes, backend accepts at most {max}"
            )]));
        }
    }

    info!(tournament_id = %token.tournament_id, agent_id = ?token.agent_id, "Uploading agent");
    let agent = backend
        .upload_agent(&token, &content_hash, &archive_path)
        .await?;
    info!(agent_id = %agent.id, tournament_id = %token.tournament_id, "Agent submitted");

    Ok(SubmitReport {
        agent,
        tournament_id: token.tournament_id,
        content_hash,
        file_size,
    })
}
