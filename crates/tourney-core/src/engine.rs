//! Subprocess seams for agent installation and the evaluation engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::process::{run_command, CommandOutput, CommandSpec};

pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
pub const UNINSTALL_TIMEOUT: Duration = Duration::from_secs(60);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Installs and removes the agent's Python module.
///
/// `Err` means the command could not be started at all. A command that ran
/// and failed comes back as an unsuccessful [`CommandOutput`].
#[async_trait]
pub trait ModuleInstaller: Send + Sync {
    async fn is_installed(&self, module: &str) -> bool;

    /// Editable install of the module tree at `source`.
    async fn install(&self, source: &Path) -> std::io::Result<CommandOutput>;

    async fn uninstall(&self, module: &str) -> std::io::Result<CommandOutput>;

    /// Run an agent-provided probe script after install.
    async fn probe(&self, script: &Path) -> std::io::Result<CommandOutput>;
}

/// `<python> -m pip ...`
#[derive(Debug, Clone)]
pub struct PipInstaller {
    python: String,
}

impl PipInstaller {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    fn pip(&self, timeout: Duration) -> CommandSpec {
        CommandSpec::new(&self.python, timeout).args(["-m", "pip"])
    }
}

#[async_trait]
impl ModuleInstaller for PipInstaller {
    async fn is_installed(&self, module: &str) -> bool {
        let spec = self.pip(UNINSTALL_TIMEOUT).args(["show", "-q", module]);
        matches!(run_command(&spec).await, Ok(out) if out.success())
    }

    async fn install(&self, source: &Path) -> std::io::Result<CommandOutput> {
        let spec = self
            .pip(INSTALL_TIMEOUT)
            .args(["install", "-e"])
            .arg(source.to_string_lossy());
        run_command(&spec).await
    }

    async fn uninstall(&self, module: &str) -> std::io::Result<CommandOutput> {
        let spec = self.pip(UNINSTALL_TIMEOUT).args(["uninstall", "-y", module]);
        run_command(&spec).await
    }

    async fn probe(&self, script: &Path) -> std::io::Result<CommandOutput> {
        let spec = CommandSpec::new(&self.python, PROBE_TIMEOUT).arg(script.to_string_lossy());
        run_command(&spec).await
    }
}

/// The external evaluation engine: consumes a config file, writes
/// `evaluation_result.json`.
#[async_trait]
pub trait EvaluationEngine: Send + Sync {
    fn entrypoint_exists(&self) -> bool;

    /// Directory the engine runs in. It may leave its result file here.
    fn working_dir(&self) -> &Path;

    async fn run(&self, config_path: &Path, timeout: Duration) -> std::io::Result<CommandOutput>;
}

/// `<python> <repo>/scripts/evaluate.py --config <path> --headless`, run
/// inside the engine repository.
#[derive(Debug, Clone)]
pub struct ScriptEngine {
    python: String,
    repo: PathBuf,
}

impl ScriptEngine {
    pub fn new(python: impl Into<String>, repo: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            repo: repo.into(),
        }
    }

    pub fn entrypoint(&self) -> PathBuf {
        self.repo.join("scripts").join("evaluate.py")
    }
}

#[async_trait]
impl EvaluationEngine for ScriptEngine {
    fn entrypoint_exists(&self) -> bool {
        self.entrypoint().is_file()
    }

    fn working_dir(&self) -> &Path {
        &self.repo
    }

    async fn run(&self, config_path: &Path, timeout: Duration) -> std::io::Result<CommandOutput> {
        let spec = CommandSpec::new(&self.python, timeout)
            .arg(self.entrypoint().to_string_lossy())
            .arg("--config")
            .arg(config_path.to_string_lossy())
            .arg("--headless")
            .current_dir(&self.repo);
        run_command(&spec).await
    }
}
