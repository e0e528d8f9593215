//! In-memory fakes for the validator seams (testing only)
//!
//! Provides `MemoryBackend`, `StaticSigner`, `ScriptedInstaller`,
//! `ScriptedEngine`, `RecordingWeightPublisher`, `ManualClock`,
//! `VirtualClock`, `StaticSetup` and `CountdownGuard`. Each one records what it was asked
//! to do and can be told to fail.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tourney_api::messages::{eval_info, file_info};
use tourney_api::{
    Agent, AgentListResponse, ApiError, ConfigDocument, ConfigKind, EvaluationPhase,
    EvaluationSubmission, EvaluationToken, Page, Signer, Tournament, TournamentBackend,
    UploadToken, WinnerInfo,
};

use crate::domain::{Clock, SetupError, TaskConfig, WeightError};
use crate::engine::{EvaluationEngine, ModuleInstaller};
use crate::guard::PeriodGuard;
use crate::process::CommandOutput;
use crate::setup::CycleSetup;
use crate::weights::{WeightPublisher, WeightSnapshot};

fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(exit_code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        duration_ms: 0,
        timed_out: false,
    }
}

// ---------------------------------------------------------------------------
// StaticSigner
// ---------------------------------------------------------------------------

/// Deterministic signer: the signature is the hex SHA-256 of
/// `hotkey:message`.
#[derive(Debug, Clone)]
pub struct StaticSigner {
    hotkey: String,
}

impl StaticSigner {
    pub fn new(hotkey: impl Into<String>) -> Self {
        Self {
            hotkey: hotkey.into(),
        }
    }

    pub fn expected_signature(&self, message: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hotkey.as_bytes());
        hasher.update(b":");
        hasher.update(message);
        hex::encode(hasher.finalize())
    }
}

impl Signer for StaticSigner {
    fn hotkey(&self) -> String {
        self.hotkey.clone()
    }

    fn public_key_hex(&self) -> String {
        hex::encode(self.hotkey.as_bytes())
    }

    fn sign(&self, message: &[u8]) -> String {
        self.expected_signature(message)
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// Backend calls that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    ActiveTournament,
    Tournament,
    Config,
    Winner,
    PendingAgents,
    Download,
    MarkInProgress,
    ClearInProgress,
    SubmitEvaluation,
    RequestUploadToken,
    UploadAgent,
}

/// Error to inject for a [`BackendOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transport,
    Validation,
    NotFound,
    QuietZone,
    Server,
}

impl Fault {
    fn to_error(self, op: BackendOp) -> ApiError {
        let message = format!("injected fault on {op:?}");
        match self {
            Fault::Transport => ApiError::Transport(message),
            Fault::Validation => ApiError::Validation {
                status: 422,
                message,
            },
            Fault::NotFound => ApiError::NotFound(message),
            Fault::QuietZone => ApiError::QuietZoneConflict(message),
            Fault::Server => ApiError::Server {
                status: 500,
                message,
            },
        }
    }
}

/// One accepted evaluation submission.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSubmission {
    pub tournament_id: String,
    pub agent_id: String,
    pub score: f64,
    pub summary: String,
    pub log_hash: Option<String>,
    pub signature: String,
}

impl RecordedSubmission {
    pub fn is_failure_report(&self) -> bool {
        self.summary.starts_with("[FAILED]")
    }
}

#[derive(Debug, Clone, Copy)]
struct InjectedFault {
    fault: Fault,
    /// `None` fails every call.
    remaining: Option<u32>,
}

/// In-memory system of record.
///
/// The pending listing is fixed unless [`MemoryBackend::exclude_submitted`]
/// is turned on, which mimics the real backend dropping agents this
/// validator already evaluated.
#[derive(Debug)]
pub struct MemoryBackend {
    signer: StaticSigner,
    active: Mutex<Option<Tournament>>,
    tournaments: Mutex<HashMap<String, Tournament>>,
    configs: Mutex<HashMap<&'static str, ConfigDocument>>,
    winner: Mutex<WinnerInfo>,
    pending: Mutex<Vec<Agent>>,
    archives: Mutex<HashMap<String, Vec<u8>>>,
    exclude_submitted: AtomicBool,
    in_progress: Mutex<Option<String>>,
    claims: Mutex<Vec<Option<String>>>,
    submissions: Mutex<Vec<RecordedSubmission>>,
    uploads: Mutex<Vec<(String, u64)>>,
    faults: Mutex<HashMap<BackendOp, InjectedFault>>,
    calls: Mutex<HashMap<BackendOp, usize>>,
}

impl MemoryBackend {
    pub fn new(hotkey: impl Into<String>) -> Self {
        Self {
            signer: StaticSigner::new(hotkey),
            active: Mutex::new(None),
            tournaments: Mutex::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
            winner: Mutex::new(WinnerInfo::default()),
            pending: Mutex::new(Vec::new()),
            archives: Mutex::new(HashMap::new()),
            exclude_submitted: AtomicBool::new(false),
            in_progress: Mutex::new(None),
            claims: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Make `tournament` the active one and fetchable by id.
    pub fn set_active(&self, tournament: Option<Tournament>) {
        if let Some(t) = &tournament {
            self.tournaments
                .lock()
                .unwrap()
                .insert(t.id.clone(), t.clone());
        }
        *self.active.lock().unwrap() = tournament;
    }

    pub fn set_config(&self, kind: ConfigKind, doc: ConfigDocument) {
        self.configs
            .lock()
            .unwrap()
            .insert(kind.path_segment(), doc);
    }

    pub fn set_winner(&self, winner: WinnerInfo) {
        *self.winner.lock().unwrap() = winner;
    }

    pub fn set_pending(&self, agents: Vec<Agent>) {
        *self.pending.lock().unwrap() = agents;
    }

    /// Bytes served by `download_agent` for `agent_id`.
    pub fn set_archive(&self, agent_id: &str, bytes: Vec<u8>) {
        self.archives
            .lock()
            .unwrap()
            .insert(agent_id.to_string(), bytes);
    }

    pub fn exclude_submitted(&self, on: bool) {
        self.exclude_submitted.store(on, Ordering::SeqCst);
    }

    /// Fail the next `times` calls to `op`.
    pub fn fail_next(&self, op: BackendOp, fault: Fault, times: u32) {
        self.faults.lock().unwrap().insert(
            op,
            InjectedFault {
                fault,
                remaining: Some(times),
            },
        );
    }

    /// Fail every call to `op` until [`MemoryBackend::heal`].
    pub fn fail_always(&self, op: BackendOp, fault: Fault) {
        self.faults.lock().unwrap().insert(
            op,
            InjectedFault {
                fault,
                remaining: None,
            },
        );
    }

    pub fn heal(&self, op: BackendOp) {
        self.faults.lock().unwrap().remove(&op);
    }

    pub fn calls(&self, op: BackendOp) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// The agent this validator currently has claimed.
    pub fn in_progress(&self) -> Option<String> {
        self.in_progress.lock().unwrap().clone()
    }

    /// Every claim and clear, in order.
    pub fn claims(&self) -> Vec<Option<String>> {
        self.claims.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submissions_for(&self, agent_id: &str) -> usize {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.agent_id == agent_id)
            .count()
    }

    pub fn uploads(&self) -> Vec<(String, u64)> {
        self.uploads.lock().unwrap().clone()
    }

    fn enter(&self, op: BackendOp) -> tourney_api::Result<()> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;

        let mut faults = self.faults.lock().unwrap();
        let Some(injected) = faults.get_mut(&op) else {
            return Ok(());
        };
        let fault = injected.fault;
        match injected.remaining {
            None => {}
            Some(0) => {
                faults.remove(&op);
                return Ok(());
            }
            Some(1) => {
                faults.remove(&op);
            }
            Some(n) => injected.remaining = Some(n - 1),
        }
        Err(fault.to_error(op))
    }
}

#[async_trait]
impl TournamentBackend for MemoryBackend {
    fn hotkey(&self) -> String {
        self.signer.hotkey()
    }

    async fn active_tournament(&self) -> tourney_api::Result<Option<Tournament>> {
        self.enter(BackendOp::ActiveTournament)?;
        Ok(self.active.lock().unwrap().clone())
    }

    async fn tournament(&self, tournament_id: &str) -> tourney_api::Result<Tournament> {
        self.enter(BackendOp::Tournament)?;
        self.tournaments
            .lock()
            .unwrap()
            .get(tournament_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("tournament {tournament_id}")))
    }

    async fn config(
        &self,
        tournament_id: &str,
        kind: ConfigKind,
    ) -> tourney_api::Result<ConfigDocument> {
        self.enter(BackendOp::Config)?;
        self.configs
            .lock()
            .unwrap()
            .get(kind.path_segment())
            .cloned()
            .ok_or_else(|| {
                ApiError::NotFound(format!("{} for {tournament_id}", kind.path_segment()))
            })
    }

    async fn winner(&self, _tournament_id: &str) -> tourney_api::Result<WinnerInfo> {
        self.enter(BackendOp::Winner)?;
        Ok(self.winner.lock().unwrap().clone())
    }

    async fn pending_agents(
        &self,
        _tournament_id: &str,
        _phase: Option<EvaluationPhase>,
        _page: Page,
    ) -> tourney_api::Result<AgentListResponse> {
        self.enter(BackendOp::PendingAgents)?;
        let mut agents = self.pending.lock().unwrap().clone();
        if self.exclude_submitted.load(Ordering::SeqCst) {
            let done: HashSet<String> = self
                .submissions
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.agent_id.clone())
                .collect();
            agents.retain(|a| !done.contains(&a.id));
        }
        Ok(AgentListResponse {
            total: agents.len() as u64,
            limit: agents.len() as u64,
            offset: 0,
            agents,
        })
    }

    async fn download_agent(&self, agent_id: &str, dest: &Path) -> tourney_api::Result<()> {
        self.enter(BackendOp::Download)?;
        let bytes = self
            .archives
            .lock()
            .unwrap()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("agent {agent_id}")))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    async fn set_in_progress(
        &self,
        tournament_id: &str,
        agent_id: Option<&str>,
    ) -> tourney_api::Result<()> {
        let op = match agent_id {
            Some(_) => BackendOp::MarkInProgress,
            None => BackendOp::ClearInProgress,
        };
        self.enter(op)?;
        // Signed exactly like the real client so a broken message builder
        // shows up here too.
        let message = eval_info(&self.hotkey(), tournament_id, agent_id, 0, None);
        let _signature = self.signer.sign(message.as_bytes());

        *self.in_progress.lock().unwrap() = agent_id.map(str::to_string);
        self.claims
            .lock()
            .unwrap()
            .push(agent_id.map(str::to_string));
        Ok(())
    }

    async fn submit_evaluation(
        &self,
        tournament_id: &str,
        agent_id: &str,
        submission: &EvaluationSubmission,
    ) -> tourney_api::Result<EvaluationToken> {
        self.enter(BackendOp::SubmitEvaluation)?;
        let log_hash = match &submission.log_archive {
            Some(path) => {
                let bytes = tokio::fs::read(path).await?;
                Some(hex::encode(Sha256::digest(&bytes)))
            }
            None => None,
        };
        let message = eval_info(
            &self.hotkey(),
            tournament_id,
            Some(agent_id),
            0,
            log_hash.as_deref(),
        );
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(RecordedSubmission {
            tournament_id: tournament_id.to_string(),
            agent_id: agent_id.to_string(),
            score: submission.score,
            summary: submission.summary.clone(),
            log_hash,
            signature: self.signer.sign(message.as_bytes()),
        });
        Ok(EvaluationToken {
            upload_token: format!("eval-token-{}", submissions.len()),
            tournament_id: Some(tournament_id.to_string()),
            agent_id: Some(agent_id.to_string()),
            phase: None,
            expires_at: None,
        })
    }

    async fn request_upload_token(
        &self,
        content_hash: &str,
        file_size: u64,
    ) -> tourney_api::Result<UploadToken> {
        self.enter(BackendOp::RequestUploadToken)?;
        let message = file_info(&self.hotkey(), content_hash, 0);
        let _signature = self.signer.sign(message.as_bytes());
        let tournament_id = self
            .active
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.id.clone())
            .ok_or_else(|| ApiError::Validation {
                status: 400,
                message: "no active tournament".into(),
            })?;
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((content_hash.to_string(), file_size));
        Ok(UploadToken {
            upload_token: format!("upload-token-{}", uploads.len()),
            tournament_id,
            agent_id: Some(format!("agent-{}", uploads.len())),
            expires_at: None,
            max_file_size: None,
        })
    }

    async fn upload_agent(
        &self,
        token: &UploadToken,
        _content_hash: &str,
        archive: &Path,
    ) -> tourney_api::Result<Agent> {
        self.enter(BackendOp::UploadAgent)?;
        let bytes = tokio::fs::read(archive).await?;
        let id = token
            .agent_id
            .clone()
            .unwrap_or_else(|| format!("agent-{}", bytes.len()));
        self.set_archive(&id, bytes);
        let mut agent = Agent::new(id);
        agent.tournament_id = Some(token.tournament_id.clone());
        agent.miner_hotkey = Some(self.hotkey());
        Ok(agent)
    }
}

// ---------------------------------------------------------------------------
// ScriptedInstaller
// ---------------------------------------------------------------------------

/// Installer that tracks installed module names (the source directory's
/// name) in memory.
#[derive(Debug, Default)]
pub struct ScriptedInstaller {
    installed: Mutex<HashSet<String>>,
    installs: Mutex<Vec<PathBuf>>,
    uninstalls: Mutex<Vec<String>>,
    fail_install: Mutex<Option<String>>,
}

impl ScriptedInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `module` is already installed.
    pub fn preinstall(&self, module: &str) {
        self.installed.lock().unwrap().insert(module.to_string());
    }

    /// Every install from now on exits 1 with `stderr`.
    pub fn fail_install(&self, stderr: &str) {
        *self.fail_install.lock().unwrap() = Some(stderr.to_string());
    }

    pub fn installed(&self) -> HashSet<String> {
        self.installed.lock().unwrap().clone()
    }

    pub fn installs(&self) -> Vec<PathBuf> {
        self.installs.lock().unwrap().clone()
    }

    pub fn uninstalls(&self) -> Vec<String> {
        self.uninstalls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModuleInstaller for ScriptedInstaller {
    async fn is_installed(&self, module: &str) -> bool {
        self.installed.lock().unwrap().contains(module)
    }

    async fn install(&self, source: &Path) -> std::io::Result<CommandOutput> {
        self.installs.lock().unwrap().push(source.to_path_buf());
        if let Some(stderr) = self.fail_install.lock().unwrap().clone() {
            return Ok(output(1, "", &stderr));
        }
        let module = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.installed.lock().unwrap().insert(module);
        Ok(output(0, "installed", ""))
    }

    async fn uninstall(&self, module: &str) -> std::io::Result<CommandOutput> {
        self.uninstalls.lock().unwrap().push(module.to_string());
        self.installed.lock().unwrap().remove(module);
        Ok(output(0, "", ""))
    }

    async fn probe(&self, _script: &Path) -> std::io::Result<CommandOutput> {
        Ok(output(0, "nav-v0", ""))
    }
}

// ---------------------------------------------------------------------------
// ScriptedEngine
// ---------------------------------------------------------------------------

/// What the fake engine does on one run.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineStep {
    /// Exit 0 and write a result into the working directory, optionally
    /// with a log directory next to it.
    Score { score: f64, with_logs: bool },
    /// Exit non-zero with `stderr`.
    Fail { exit_code: i32, stderr: String },
    Timeout,
    /// Exit 0 without writing a result.
    NoResult,
}

/// Engine fake that plays queued [`EngineStep`]s, then a default step.
#[derive(Debug)]
pub struct ScriptedEngine {
    working_dir: PathBuf,
    entrypoint: AtomicBool,
    steps: Mutex<VecDeque<EngineStep>>,
    default_step: EngineStep,
    configs: Mutex<Vec<serde_json::Value>>,
}

impl ScriptedEngine {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            entrypoint: AtomicBool::new(true),
            steps: Mutex::new(VecDeque::new()),
            default_step: EngineStep::Score {
                score: 0.5,
                with_logs: false,
            },
            configs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(mut self, step: EngineStep) -> Self {
        self.default_step = step;
        self
    }

    pub fn push(&self, step: EngineStep) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn remove_entrypoint(&self) {
        self.entrypoint.store(false, Ordering::SeqCst);
    }

    /// Run configs the engine was handed, parsed from YAML.
    pub fn configs(&self) -> Vec<serde_json::Value> {
        self.configs.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvaluationEngine for ScriptedEngine {
    fn entrypoint_exists(&self) -> bool {
        self.entrypoint.load(Ordering::SeqCst)
    }

    fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn run(&self, config_path: &Path, timeout: Duration) -> std::io::Result<CommandOutput> {
        let text = tokio::fs::read_to_string(config_path).await?;
        let config: serde_json::Value = serde_yaml::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.configs.lock().unwrap().push(config);

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_step.clone());
        match step {
            EngineStep::Score { score, with_logs } => {
                tokio::fs::create_dir_all(&self.working_dir).await?;
                let mut result = serde_json::json!({
                    "score": score,
                    "metadata": {"episodes": 10},
                    "summary": format!("score {score}"),
                });
                if with_logs {
                    let logs = self.working_dir.join("logs");
                    tokio::fs::create_dir_all(&logs).await?;
                    tokio::fs::write(logs.join("episode_0.txt"), "reward=1.0\n").await?;
                    result["log_dir"] = serde_json::json!("logs");
                }
                tokio::fs::write(
                    self.working_dir.join("evaluation_result.json"),
                    result.to_string(),
                )
                .await?;
                Ok(output(0, "evaluation finished", ""))
            }
            EngineStep::Fail { exit_code, stderr } => Ok(output(exit_code, "", &stderr)),
            EngineStep::Timeout => Ok(CommandOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("timed out after {}s", timeout.as_secs()),
                duration_ms: timeout.as_millis() as u64,
                timed_out: true,
            }),
            EngineStep::NoResult => Ok(output(0, "nothing written", "")),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingWeightPublisher
// ---------------------------------------------------------------------------

/// Weight publisher that records every attempt. Uids in the failing set
/// are rejected.
#[derive(Debug, Default)]
pub struct RecordingWeightPublisher {
    snapshot: Mutex<WeightSnapshot>,
    snapshot_fails: AtomicBool,
    failing: Mutex<HashSet<u16>>,
    fail_all: AtomicBool,
    attempts: Mutex<Vec<u16>>,
    published: Mutex<Vec<(Vec<u16>, Vec<f32>)>>,
}

impl RecordingWeightPublisher {
    pub fn new(hotkeys: &[&str]) -> Self {
        let publisher = Self::default();
        *publisher.snapshot.lock().unwrap() =
            WeightSnapshot::new(hotkeys.iter().map(|h| h.to_string()).collect());
        publisher
    }

    pub fn fail_uid(&self, uid: u16) {
        self.failing.lock().unwrap().insert(uid);
    }

    pub fn fail_all(&self, on: bool) {
        self.fail_all.store(on, Ordering::SeqCst);
    }

    pub fn fail_snapshot(&self, on: bool) {
        self.snapshot_fails.store(on, Ordering::SeqCst);
    }

    /// Target uid of every publish attempt, successful or not.
    pub fn attempts(&self) -> Vec<u16> {
        self.attempts.lock().unwrap().clone()
    }

    /// Target uid of every accepted publish.
    pub fn published_targets(&self) -> Vec<u16> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(uids, weights)| {
                weights
                    .iter()
                    .position(|w| *w > 0.0)
                    .map(|i| uids[i])
            })
            .collect()
    }

    pub fn published(&self) -> Vec<(Vec<u16>, Vec<f32>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl WeightPublisher for RecordingWeightPublisher {
    async fn snapshot(&self) -> Result<WeightSnapshot, WeightError> {
        if self.snapshot_fails.load(Ordering::SeqCst) {
            return Err(WeightError::Snapshot("injected snapshot failure".into()));
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn set_weights(&self, uids: &[u16], weights: &[f32]) -> Result<(), WeightError> {
        let target = weights
            .iter()
            .position(|w| *w > 0.0)
            .map(|i| uids[i])
            .unwrap_or_default();
        self.attempts.lock().unwrap().push(target);

        if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&target) {
            return Err(WeightError::Publish(format!("injected failure for uid {target}")));
        }
        self.published
            .lock()
            .unwrap()
            .push((uids.to_vec(), weights.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn at(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Clock driven by tokio's timer. Under a paused runtime the schedule
/// advances exactly as far as the code under test sleeps.
#[derive(Debug)]
pub struct VirtualClock {
    base: i64,
    origin: tokio::time::Instant,
}

impl VirtualClock {
    /// Must be called inside a runtime.
    pub fn starting_at(base: i64) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> i64 {
        self.base + self.origin.elapsed().as_secs() as i64
    }
}

// ---------------------------------------------------------------------------
// StaticSetup
// ---------------------------------------------------------------------------

/// Setup that hands back a fixed task, or fails while told to.
#[derive(Debug)]
pub struct StaticSetup {
    task: TaskConfig,
    failing: AtomicBool,
    calls: Mutex<Vec<(String, EvaluationPhase)>>,
}

impl StaticSetup {
    pub fn new(task: TaskConfig) -> Self {
        Self {
            task,
            failing: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, EvaluationPhase)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CycleSetup for StaticSetup {
    async fn prepare(
        &self,
        tournament_id: &str,
        phase: EvaluationPhase,
    ) -> Result<TaskConfig, SetupError> {
        self.calls
            .lock()
            .unwrap()
            .push((tournament_id.to_string(), phase));
        if self.failing.load(Ordering::SeqCst) {
            return Err(SetupError::Install("injected setup failure".into()));
        }
        Ok(self.task.clone())
    }
}

// ---------------------------------------------------------------------------
// CountdownGuard
// ---------------------------------------------------------------------------

/// Guard that holds for a fixed number of checks, then releases.
#[derive(Debug)]
pub struct CountdownGuard {
    remaining: AtomicUsize,
    checks: AtomicUsize,
}

impl CountdownGuard {
    pub fn new(holds: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(holds),
            checks: AtomicUsize::new(0),
        })
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeriodGuard for CountdownGuard {
    async fn check(&self) -> Result<bool, ApiError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok())
    }
}

// ---------------------------------------------------------------------------
// Builders shared by tests
// ---------------------------------------------------------------------------

/// A minimal task for module `nav_task`.
pub fn sample_task() -> TaskConfig {
    TaskConfig::from_value(&serde_json::json!({
        "task_name": "navigation",
        "task_module": "nav_task",
        "env_scenes": [{"env_id": "warehouse", "scene": 1}],
        "num_episodes": 2,
    }))
    .expect("sample task config is valid")
}

/// Zip bytes of a well-formed agent providing `module`.
pub fn agent_archive(module: &str) -> Vec<u8> {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = tmp.path().join("agent");
    let write = |rel: &str, body: &[u8]| {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, body).expect("write");
    };
    write("best_policy/best_policy.pt", b"weights");
    write(&format!("source/{module}/__init__.py"), b"");
    write("scripts/list_envs.py", b"print('nav-v0')");

    let zip = tmp.path().join("agent.zip");
    crate::archive::zip_directory(&dir, &zip, crate::archive::ARCHIVE_EXCLUDES).expect("zip");
    std::fs::read(zip).expect("read zip")
}

/// Zip bytes with no policy checkpoint.
pub fn malformed_archive() -> Vec<u8> {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = tmp.path().join("agent");
    std::fs::create_dir_all(dir.join("source")).expect("mkdir");
    std::fs::write(dir.join("README.md"), b"no policy here").expect("write");
    let zip = tmp.path().join("agent.zip");
    crate::archive::zip_directory(&dir, &zip, &[]).expect("zip");
    std::fs::read(zip).expect("read zip")
}
