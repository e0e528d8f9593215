//! Single-agent evaluation pipeline.
//!
//! Stages run strictly in order and cleanup runs whatever happened before
//! it. Engine and installer failures become [`EvaluationError`]s; backend
//! errors pass through untouched so a quiet-zone conflict still reaches
//! the enclosing loops.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tourney_api::{Agent, EvaluationResult, EvaluationSubmission, EvaluationToken, TournamentBackend};
use tracing::{debug, info, warn};

use crate::archive::{self, LIST_ENVS_SCRIPT, LOG_EXCLUDES};
use crate::domain::{EvaluationError, Result, TaskConfig};
use crate::engine::{EvaluationEngine, ModuleInstaller};
use crate::obs;
use crate::process::{tail, CommandOutput};

pub const REGISTRY_DIR: &str = "agent_registry";
pub const RESULT_FILE: &str = "evaluation_result.json";
pub const RUN_CONFIG_FILE: &str = "run_config.yaml";

const OUTPUT_TAIL: usize = 2000;
const REASON_TAIL: usize = 500;

/// Stages of one agent evaluation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    CleanPrevious,
    DownloadExtract,
    MarkInProgress,
    Install,
    Run,
    Collect,
    Submit,
    Cleanup,
}

impl PipelineStage {
    pub const ORDER: [PipelineStage; 8] = [
        PipelineStage::CleanPrevious,
        PipelineStage::DownloadExtract,
        PipelineStage::MarkInProgress,
        PipelineStage::Install,
        PipelineStage::Run,
        PipelineStage::Collect,
        PipelineStage::Submit,
        PipelineStage::Cleanup,
    ];

    /// The stage that follows this one. `Cleanup` is terminal.
    pub fn next(self) -> Option<PipelineStage> {
        match self {
            PipelineStage::CleanPrevious => Some(PipelineStage::DownloadExtract),
            PipelineStage::DownloadExtract => Some(PipelineStage::MarkInProgress),
            PipelineStage::MarkInProgress => Some(PipelineStage::Install),
            PipelineStage::Install => Some(PipelineStage::Run),
            PipelineStage::Run => Some(PipelineStage::Collect),
            PipelineStage::Collect => Some(PipelineStage::Submit),
            PipelineStage::Submit => Some(PipelineStage::Cleanup),
            PipelineStage::Cleanup => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::CleanPrevious => "clean_previous",
            PipelineStage::DownloadExtract => "download_extract",
            PipelineStage::MarkInProgress => "mark_in_progress",
            PipelineStage::Install => "install",
            PipelineStage::Run => "run",
            PipelineStage::Collect => "collect",
            PipelineStage::Submit => "submit",
            PipelineStage::Cleanup => "cleanup",
        }
    }
}

/// Scratch locations inside the validator workspace.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub workspace: PathBuf,
    /// Extracted agent tree.
    pub registry: PathBuf,
    pub result: PathBuf,
    pub run_config: PathBuf,
}

impl PipelinePaths {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            registry: workspace.join(REGISTRY_DIR),
            result: workspace.join(RESULT_FILE),
            run_config: workspace.join(RUN_CONFIG_FILE),
            workspace,
        }
    }
}

/// Runs one agent through download, install, engine run and submission.
pub struct AgentEvaluationPipeline {
    backend: Arc<dyn TournamentBackend>,
    installer: Arc<dyn ModuleInstaller>,
    engine: Arc<dyn EvaluationEngine>,
    paths: PipelinePaths,
    timeout: Duration,
}

impl AgentEvaluationPipeline {
    pub fn new(
        backend: Arc<dyn TournamentBackend>,
        installer: Arc<dyn ModuleInstaller>,
        engine: Arc<dyn EvaluationEngine>,
        workspace: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            installer,
            engine,
            paths: PipelinePaths::new(workspace),
            timeout,
        }
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    /// Evaluate `agent` and submit its result.
    ///
    /// Cleanup runs on every path once the task is known. A missing task
    /// configuration is fatal and touches nothing.
    pub async fn evaluate(
        &self,
        tournament_id: &str,
        agent: &Agent,
        task: Option<&TaskConfig>,
    ) -> Result<EvaluationToken> {
        let task = task.ok_or_else(|| EvaluationError::fatal("task configuration not loaded"))?;

        let outcome = self.run_stages(tournament_id, agent, task).await;
        if let Err(e) = &outcome {
            warn!(agent_id = %agent.id, error = %e, "Agent evaluation failed");
        }

        obs::emit_stage(&agent.id, PipelineStage::Cleanup.as_str());
        self.cleanup(tournament_id, &task.task_module).await;
        outcome
    }

    async fn run_stages(
        &self,
        tournament_id: &str,
        agent: &Agent,
        task: &TaskConfig,
    ) -> Result<EvaluationToken> {
        obs::emit_stage(&agent.id, PipelineStage::CleanPrevious.as_str());
        self.clean_previous(&task.task_module).await?;

        obs::emit_stage(&agent.id, PipelineStage::DownloadExtract.as_str());
        self.download_extract(agent).await?;

        obs::emit_stage(&agent.id, PipelineStage::MarkInProgress.as_str());
        self.backend
            .set_in_progress(tournament_id, Some(&agent.id))
            .await?;

        obs::emit_stage(&agent.id, PipelineStage::Install.as_str());
        self.install(task).await?;

        obs::emit_stage(&agent.id, PipelineStage::Run.as_str());
        self.run_engine(task).await?;

        obs::emit_stage(&agent.id, PipelineStage::Collect.as_str());
        let result = self.collect().await?;

        obs::emit_stage(&agent.id, PipelineStage::Submit.as_str());
        self.submit(tournament_id, agent, result).await
    }

    fn result_candidates(&self) -> [PathBuf; 2] {
        [
            self.paths.result.clone(),
            self.engine.working_dir().join(RESULT_FILE),
        ]
    }

    async fn uninstall_if_present(&self, module: &str) {
        if !self.installer.is_installed(module).await {
            return;
        }
        debug!(module, "Uninstalling module");
        match self.installer.uninstall(module).await {
            Ok(out) if out.success() => {}
            Ok(out) => warn!(module, stderr = %out.stderr_tail(REASON_TAIL), "Uninstall failed"),
            Err(e) => warn!(module, error = %e, "Uninstall could not start"),
        }
    }

    async fn clean_previous(&self, module: &str) -> Result<()> {
        self.uninstall_if_present(module).await;
        archive::clean_directory(&self.paths.registry).map_err(|e| {
            EvaluationError::recoverable(format!("cannot clean agent registry: {e}"))
        })?;
        for path in self.result_candidates() {
            archive::remove_file_if_exists(&path)?;
        }
        archive::remove_file_if_exists(&self.paths.run_config)?;
        Ok(())
    }

    async fn download_extract(&self, agent: &Agent) -> Result<()> {
        tokio::fs::create_dir_all(&self.paths.workspace).await?;
        let download = tempfile::Builder::new()
            .prefix("agent-")
            .suffix(".zip")
            .tempfile_in(&self.paths.workspace)?;

        info!(agent_id = %agent.id, "Downloading agent");
        self.backend
            .download_agent(&agent.id, download.path())
            .await?;

        let (zip_path, dest) = (download.path().to_path_buf(), self.paths.registry.clone());
        tokio::task::spawn_blocking(move || archive::unzip_file(&zip_path, &dest))
            .await
            .map_err(std::io::Error::other)?
            .map_err(|e| {
                EvaluationError::recoverable(format!("agent archive could not be extracted: {e}"))
            })?;

        let problems = archive::validate_agent_structure(&self.paths.registry);
        if !problems.is_empty() {
            return Err(EvaluationError::recoverable(format!(
                "invalid agent archive: {}",
                problems.join("; ")
            ))
            .into());
        }
        debug!(registry = %self.paths.registry.display(), "Agent extracted");
        Ok(())
    }

    async fn install(&self, task: &TaskConfig) -> Result<()> {
        let source = archive::resolve_module_source(&self.paths.registry, &task.task_module)
            .ok_or_else(|| {
                EvaluationError::recoverable(format!(
                    "task module not found: source/{}",
                    task.task_module
                ))
            })?;

        info!(module = %task.task_module, source = %source.display(), "Installing agent module");
        let out = self.installer.install(&source).await.map_err(|e| {
            EvaluationError::fatal(format!("package installer could not start: {e}"))
        })?;
        if !out.success() {
            return Err(EvaluationError::recoverable(format!(
                "module installation failed: {}",
                out.stderr_tail(REASON_TAIL).trim()
            ))
            .into());
        }

        let probe = self.paths.registry.join(LIST_ENVS_SCRIPT);
        if probe.is_file() {
            match self.installer.probe(&probe).await {
                Ok(out) if out.success() => {
                    debug!(envs = %tail(&out.stdout, 200), "Registered environments")
                }
                Ok(out) => warn!(stderr = %out.stderr_tail(REASON_TAIL), "list_envs.py failed"),
                Err(e) => warn!(error = %e, "list_envs.py could not start"),
            }
        }
        Ok(())
    }

    async fn run_engine(&self, task: &TaskConfig) -> Result<()> {
        if !self.engine.entrypoint_exists() {
            return Err(EvaluationError::fatal(format!(
                "evaluation engine entrypoint not found in {}",
                self.engine.working_dir().display()
            ))
            .into());
        }

        let run_config = task.run_config(&archive::policy_path(&self.paths.registry));
        tokio::fs::write(&self.paths.run_config, serde_yaml::to_string(&run_config)?).await?;

        info!(timeout_secs = self.timeout.as_secs(), "Running evaluation");
        let out = self
            .engine
            .run(&self.paths.run_config, self.timeout)
            .await
            .map_err(|e| EvaluationError::fatal(format!("evaluation engine could not start: {e}")))?;
        log_engine_output(&out);

        if out.timed_out {
            return Err(EvaluationError::recoverable(format!(
                "evaluation timed out after {}s",
                self.timeout.as_secs()
            ))
            .into());
        }
        if !out.success() {
            let code = out
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(EvaluationError::recoverable(format!(
                "evaluation script failed (exit={code}): {}",
                out.stderr_tail(REASON_TAIL).trim()
            ))
            .into());
        }
        Ok(())
    }

    async fn collect(&self) -> Result<EvaluationResult> {
        let Some(path) = self.result_candidates().into_iter().find(|p| p.is_file()) else {
            return Err(EvaluationError::fatal(format!(
                "{RESULT_FILE} not generated by the evaluation engine"
            ))
            .into());
        };

        let text = tokio::fs::read_to_string(&path).await?;
        let mut result: EvaluationResult = serde_json::from_str(&text).map_err(|e| {
            EvaluationError::recoverable(format!("malformed evaluation result: {e}"))
        })?;
        if let Some(dir) = &result.log_dir {
            if dir.is_relative() {
                result.log_dir = Some(self.engine.working_dir().join(dir));
            }
        }
        info!(score = result.score, source = %path.display(), "Evaluation score");
        Ok(result)
    }

    async fn submit(
        &self,
        tournament_id: &str,
        agent: &Agent,
        result: EvaluationResult,
    ) -> Result<EvaluationToken> {
        let log_archive = match result.log_dir.as_deref() {
            Some(dir) if dir.is_dir() => Some(self.archive_logs(dir).await?),
            Some(dir) => {
                warn!(log_dir = %dir.display(), "Log directory missing, submitting without logs");
                None
            }
            None => None,
        };

        let submission = EvaluationSubmission {
            score: result.score,
            metadata: result.metadata,
            summary: result.summary,
            log_archive: log_archive.as_ref().map(|f| f.path().to_path_buf()),
        };
        let outcome = self
            .backend
            .submit_evaluation(tournament_id, &agent.id, &submission)
            .await;
        // Deletes the temporary archive.
        drop(log_archive);

        let token = outcome?;
        info!(agent_id = %agent.id, phase = ?token.phase, "Evaluation submitted");
        Ok(token)
    }

    async fn archive_logs(&self, dir: &Path) -> Result<tempfile::NamedTempFile> {
        let file = tempfile::Builder::new()
            .prefix("eval-logs-")
            .suffix(".zip")
            .tempfile_in(&self.paths.workspace)?;
        let (src, dst) = (dir.to_path_buf(), file.path().to_path_buf());
        tokio::task::spawn_blocking(move || archive::zip_directory(&src, &dst, LOG_EXCLUDES))
            .await
            .map_err(std::io::Error::other)??;
        Ok(file)
    }

    async fn cleanup(&self, tournament_id: &str, module: &str) {
        self.uninstall_if_present(module).await;

        for path in self.result_candidates() {
            if let Err(e) = archive::remove_file_if_exists(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove result file");
            }
        }
        if let Err(e) = archive::remove_file_if_exists(&self.paths.run_config) {
            warn!(error = %e, "Failed to remove run config");
        }
        if let Err(e) = archive::clean_directory(&self.paths.registry) {
            warn!(error = %e, "Failed to clean agent registry");
        }
        if let Err(e) = self.backend.set_in_progress(tournament_id, None).await {
            warn!(error = %e, "Failed to clear in-progress status");
        }
    }
}

fn log_engine_output(out: &CommandOutput) {
    if !out.stdout.is_empty() {
        info!(
            exit_code = ?out.exit_code,
            duration_ms = out.duration_ms,
            "Engine stdout (tail):\n{}",
            out.stdout_tail(OUTPUT_TAIL)
        );
    }
    if !out.stderr.is_empty() {
        warn!(
            exit_code = ?out.exit_code,
            "Engine stderr (tail):\n{}",
            out.stderr_tail(OUTPUT_TAIL)
        );
    }
}
