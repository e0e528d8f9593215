//! Wire models exchanged with the tournament backend.
//!
//! Unknown fields are ignored everywhere so backend additions never break
//! a running validator.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Administrative status of a tournament.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Pending,
    Active,
    Review,
    Reward,
    Done,
    Cancelled,
    /// A status this validator does not know yet. Never terminal, so the
    /// schedule alone decides the period.
    #[serde(other)]
    Unknown,
}

impl TournamentStatus {
    /// `done` and `cancelled` tournaments never leave their final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TournamentStatus::Done | TournamentStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentStatus::Pending => "pending",
            TournamentStatus::Active => "active",
            TournamentStatus::Review => "review",
            TournamentStatus::Reward => "reward",
            TournamentStatus::Done => "done",
            TournamentStatus::Cancelled => "cancelled",
            TournamentStatus::Unknown => "unknown",
        }
    }
}

/// One timed competition cycle.
///
/// Boundaries are Unix seconds and are expected to be non-decreasing in
/// declaration order. The public/quiet-zone split is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: String,
    pub status: TournamentStatus,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub subnet_uid: Option<u16>,

    #[serde(default)]
    pub contest_start_time: Option<i64>,
    #[serde(default, alias = "grace_window_start_time")]
    pub submit_window_start_time: Option<i64>,
    #[serde(default)]
    pub contest_end_time: Option<i64>,
    #[serde(default)]
    pub public_evaluation_end_time: Option<i64>,
    #[serde(default)]
    pub evaluation_start_time: Option<i64>,
    #[serde(default)]
    pub evaluation_end_time: Option<i64>,
    #[serde(default)]
    pub reward_start_time: Option<i64>,
    #[serde(default)]
    pub reward_end_time: Option<i64>,
}

impl Tournament {
    /// A tournament with only identity and status set, boundaries absent.
    pub fn new(id: impl Into<String>, status: TournamentStatus) -> Self {
        Self {
            id: id.into(),
            status,
            name: None,
            network: None,
            subnet_uid: None,
            contest_start_time: None,
            submit_window_start_time: None,
            contest_end_time: None,
            public_evaluation_end_time: None,
            evaluation_start_time: None,
            evaluation_end_time: None,
            reward_start_time: None,
            reward_end_time: None,
        }
    }

    /// Whether a public evaluation tier precedes the private one.
    pub fn has_public_split(&self) -> bool {
        self.public_evaluation_end_time.is_some()
    }
}

/// Lifecycle status of a submitted agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Evaluating,
    Evaluated,
    Failed,
    #[serde(other)]
    Unknown,
}

/// A submitted candidate artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(alias = "agent_id")]
    pub id: String,
    #[serde(default)]
    pub tournament_id: Option<String>,
    #[serde(default)]
    pub miner_hotkey: Option<String>,
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Agent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tournament_id: None,
            miner_hotkey: None,
            status: None,
            name: None,
            checksum: None,
            file_size: None,
            message: None,
        }
    }
}

/// Page of agents returned by the pending-work listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentListResponse {
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

/// Evaluation tier. One result per (agent, validator, phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPhase {
    Public,
    Private,
}

impl EvaluationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationPhase::Public => "public",
            EvaluationPhase::Private => "private",
        }
    }
}

impl fmt::Display for EvaluationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(EvaluationPhase::Public),
            "private" => Ok(EvaluationPhase::Private),
            other => Err(format!("unknown evaluation phase: {other}")),
        }
    }
}

/// Status of an evaluation record held by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    InProgress,
    Done,
    Failed,
}

/// Backend-side evaluation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub validator_hotkey: Option<String>,
    #[serde(default)]
    pub phase: Option<EvaluationPhase>,
    #[serde(default)]
    pub status: Option<EvaluationStatus>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Approved winner of a tournament, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WinnerInfo {
    #[serde(default)]
    pub winner_approved: bool,
    #[serde(default)]
    pub winner_hotkey: Option<String>,
    #[serde(default)]
    pub winner_agent_id: Option<String>,
    #[serde(default)]
    pub winner_score: Option<f64>,
}

impl WinnerInfo {
    /// The winner hotkey, only when approval has been granted.
    pub fn approved_hotkey(&self) -> Option<&str> {
        if self.winner_approved {
            self.winner_hotkey.as_deref().filter(|h| !h.is_empty())
        } else {
            None
        }
    }
}

/// Capability returned by the agent upload verify step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadToken {
    pub upload_token: String,
    pub tournament_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_file_size: Option<u64>,
}

/// Capability returned by the evaluation submit verify step.
///
/// `tournament_id` and `phase` are what the backend locked the submission
/// to; they take precedence over whatever the validator believes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationToken {
    pub upload_token: String,
    #[serde(default)]
    pub tournament_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub phase: Option<EvaluationPhase>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Which config document to download for a tournament.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Subnet,
    Eval,
    ActiveEval,
}

impl ConfigKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            ConfigKind::Subnet => "subnet_config",
            ConfigKind::Eval => "eval_config",
            ConfigKind::ActiveEval => "active_eval_config",
        }
    }
}

/// A downloaded config document plus the phase it applies to, when the
/// backend says so.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    pub phase: Option<EvaluationPhase>,
    pub content: serde_json::Value,
}

/// Result artifact written by the evaluation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub score: f64,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// A finished evaluation ready for the two-step submission.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSubmission {
    pub score: f64,
    pub metadata: serde_json::Value,
    pub summary: String,
    /// Zipped engine logs, hashed into the signed assertion when present.
    pub log_archive: Option<PathBuf>,
}

impl EvaluationSubmission {
    /// Zero-score record for an agent that could not be evaluated.
    pub fn failed(reason: &str) -> Self {
        Self {
            score: 0.0,
            metadata: serde_json::Value::Null,
            summary: format!("[FAILED] {reason}"),
            log_archive: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tournament_ignores_unknown_fields_and_alias() {
        let json = r#"{
            "id": "t-1",
            "status": "active",
            "grace_window_start_time": 900,
            "contest_end_time": 1000,
            "statistics": {"agents": 3}
        }"#;
        let t: Tournament = serde_json::from_str(json).unwrap();
        assert_eq!(t.id, "t-1");
        assert_eq!(t.status, TournamentStatus::Active);
        assert_eq!(t.submit_window_start_time, Some(900));
        assert_eq!(t.contest_end_time, Some(1000));
        assert!(t.reward_end_time.is_none());
        assert!(!t.has_public_split());
    }

    #[test]
    fn test_agent_accepts_agent_id_alias() {
        let a: Agent = serde_json::from_str(r#"{"agent_id": "a-9", "status": "pending"}"#).unwrap();
        assert_eq!(a.id, "a-9");
        assert_eq!(a.status, Some(AgentStatus::Pending));
    }

    #[test]
    fn test_unrecognised_statuses_do_not_break_decoding() {
        let t: Tournament = serde_json::from_str(r#"{"id": "t-1", "status": "paused"}"#).unwrap();
        assert_eq!(t.status, TournamentStatus::Unknown);
        assert!(!t.status.is_terminal());

        let list: AgentListResponse = serde_json::from_str(
            r#"{"agents": [
                {"id": "a-1", "status": "pending"},
                {"id": "a-2", "status": "quarantined"}
            ], "total": 2}"#,
        )
        .unwrap();
        assert_eq!(list.agents.len(), 2);
        assert_eq!(list.agents[1].status, Some(AgentStatus::Unknown));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TournamentStatus::Done.is_terminal());
        assert!(TournamentStatus::Cancelled.is_terminal());
        assert!(!TournamentStatus::Reward.is_terminal());
    }

    #[test]
    fn test_winner_requires_approval() {
        let unapproved = WinnerInfo {
            winner_approved: false,
            winner_hotkey: Some("5Grw".into()),
            ..Default::default()
        };
        assert!(unapproved.approved_hotkey().is_none());

        let approved = WinnerInfo {
            winner_approved: true,
            winner_hotkey: Some("5Grw".into()),
            ..Default::default()
        };
        assert_eq!(approved.approved_hotkey(), Some("5Grw"));
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!(
            "PUBLIC".parse::<EvaluationPhase>().unwrap(),
            EvaluationPhase::Public
        );
        assert_eq!(
            " private ".parse::<EvaluationPhase>().unwrap(),
            EvaluationPhase::Private
        );
        assert!("quiet".parse::<EvaluationPhase>().is_err());
    }

    #[test]
    fn test_evaluation_result_defaults() {
        let r: EvaluationResult = serde_json::from_str(r#"{"score": 0.75}"#).unwrap();
        assert_eq!(r.score, 0.75);
        assert!(r.metadata.as_object().unwrap().is_empty());
        assert_eq!(r.summary, "");
        assert!(r.log_dir.is_none());
    }

    #[test]
    fn test_failed_submission_summary() {
        let s = EvaluationSubmission::failed("install failed");
        assert_eq!(s.score, 0.0);
        assert_eq!(s.summary, "[FAILED] install failed");
        assert!(s.log_archive.is_none());
    }
}
