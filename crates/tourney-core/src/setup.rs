//! Per-tournament, per-phase preparation before evaluation can start.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tourney_api::{ApiError, ConfigDocument, ConfigKind, EvaluationPhase, TournamentBackend};
use tracing::{info, warn};

use crate::config;
use crate::domain::{SetupError, TaskConfig};
use crate::engine::ModuleInstaller;
use crate::process::{run_command, CommandSpec};

pub const SUBNET_CONFIG_FILE: &str = "subnet_config.yaml";
pub const TASK_CONFIG_FILE: &str = "task_config.yaml";

const PULL_TIMEOUT: Duration = Duration::from_secs(120);
const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// Prepares a cycle and returns the task the engine will run.
#[async_trait]
pub trait CycleSetup: Send + Sync {
    async fn prepare(
        &self,
        tournament_id: &str,
        phase: EvaluationPhase,
    ) -> Result<TaskConfig, SetupError>;
}

/// Check that each named variable is set and points at an existing path.
pub fn check_required_env<F>(names: &[String], lookup: F) -> Result<(), SetupError>
where
    F: Fn(&str) -> Option<String>,
{
    for name in names {
        let value = lookup(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SetupError::MissingEnv(name.clone()))?;
        let path = PathBuf::from(&value);
        if !path.exists() {
            return Err(SetupError::EnvPathMissing {
                name: name.clone(),
                path,
            });
        }
        info!(name = %name, path = %value, "Environment path verified");
    }
    Ok(())
}

/// Downloads configs into the workspace and keeps the engine repository
/// cloned and installed.
pub struct WorkspaceSetup {
    backend: Arc<dyn TournamentBackend>,
    installer: Arc<dyn ModuleInstaller>,
    workspace: PathBuf,
    eval_repo: PathBuf,
    eval_repo_url: String,
    required_env: Vec<String>,
}

impl WorkspaceSetup {
    pub fn new(
        backend: Arc<dyn TournamentBackend>,
        installer: Arc<dyn ModuleInstaller>,
        workspace: impl Into<PathBuf>,
        eval_repo: impl Into<PathBuf>,
        eval_repo_url: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            installer,
            workspace: workspace.into(),
            eval_repo: eval_repo.into(),
            eval_repo_url: eval_repo_url.into(),
            required_env: Vec::new(),
        }
    }

    pub fn with_required_env(mut self, names: Vec<String>) -> Self {
        self.required_env = names;
        self
    }

    fn save(&self, doc: &serde_json::Value, file: &str) -> Result<PathBuf, SetupError> {
        let path = self.workspace.join(file);
        config::save_yaml(doc, &path).map_err(|e| SetupError::Save {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(path)
    }

    /// Phase-appropriate eval config, falling back to the plain one on
    /// backends that do not serve `active_eval_config`.
    async fn eval_config(&self, tournament_id: &str) -> Result<ConfigDocument, SetupError> {
        match self
            .backend
            .config(tournament_id, ConfigKind::ActiveEval)
            .await
        {
            Err(ApiError::NotFound(_)) => {
                warn!(tournament_id, "active_eval_config not served, using eval_config");
                Ok(self.backend.config(tournament_id, ConfigKind::Eval).await?)
            }
            other => Ok(other?),
        }
    }

    async fn download_configs(
        &self,
        tournament_id: &str,
        phase: EvaluationPhase,
    ) -> Result<TaskConfig, SetupError> {
        tokio::fs::create_dir_all(&self.workspace).await?;

        let subnet = self
            .backend
            .config(tournament_id, ConfigKind::Subnet)
            .await?;
        self.save(&subnet.content, SUBNET_CONFIG_FILE)?;

        let eval = self.eval_config(tournament_id).await?;
        if let Some(served) = eval.phase {
            if served != phase {
                warn!(requested = %phase, served = %served, "Backend served a different evaluation phase");
            }
        }
        let task = TaskConfig::from_value(&eval.content)?;
        let path = self.save(&eval.content, TASK_CONFIG_FILE)?;
        info!(
            task = %task.task_name,
            module = %task.task_module,
            envs = ?task.env_ids(),
            path = %path.display(),
            "Task configuration downloaded"
        );
        Ok(task)
    }

    async fn sync_eval_repo(&self) -> Result<(), SetupError> {
        if self.eval_repo.exists() {
            info!(repo = %self.eval_repo.display(), "Updating evaluation repository");
            let spec = CommandSpec::new("git", PULL_TIMEOUT)
                .arg("-C")
                .arg(self.eval_repo.to_string_lossy())
                .arg("pull");
            match run_command(&spec).await {
                Ok(out) if out.success() => {}
                Ok(out) => warn!(stderr = %out.stderr_tail(500).trim(), "git pull failed"),
                Err(e) => warn!(error = %e, "git pull could not start"),
            }
        } else {
            if self.eval_repo_url.is_empty() {
                return Err(SetupError::Clone {
                    url: String::new(),
                    stderr: "no evaluation repository url configured".into(),
                });
            }
            info!(url = %self.eval_repo_url, repo = %self.eval_repo.display(), "Cloning evaluation repository");
            let spec = CommandSpec::new("git", CLONE_TIMEOUT)
                .arg("clone")
                .arg(&self.eval_repo_url)
                .arg(self.eval_repo.to_string_lossy());
            let out = run_command(&spec).await.map_err(|e| SetupError::Clone {
                url: self.eval_repo_url.clone(),
                stderr: e.to_string(),
            })?;
            if !out.success() {
                return Err(SetupError::Clone {
                    url: self.eval_repo_url.clone(),
                    stderr: out.stderr_tail(500).trim().to_string(),
                });
            }
        }

        install_repo(self.installer.as_ref(), &self.eval_repo).await
    }
}

async fn install_repo(installer: &dyn ModuleInstaller, repo: &Path) -> Result<(), SetupError> {
    info!(repo = %repo.display(), "Installing evaluation repository");
    let out = installer
        .install(repo)
        .await
        .map_err(|e| SetupError::Install(e.to_string()))?;
    if !out.success() {
        return Err(SetupError::Install(out.stderr_tail(500).trim().to_string()));
    }
    Ok(())
}

#[async_trait]
impl CycleSetup for WorkspaceSetup {
    async fn prepare(
        &self,
        tournament_id: &str,
        phase: EvaluationPhase,
    ) -> Result<TaskConfig, SetupError> {
        info!(tournament_id, %phase, "Starting setup");
        check_required_env(&self.required_env, |name| std::env::var(name).ok())?;
        let task = self.download_configs(tournament_id, phase).await?;
        self.sync_eval_repo().await?;
        info!(tournament_id, %phase, "Setup complete");
        Ok(task)
    }
}
