//! Subprocess execution with captured output and a hard timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A command to run: program, arguments, working directory and time limit.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of a finished or timed-out command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn stdout_tail(&self, max_chars: usize) -> &str {
        tail(&self.stdout, max_chars)
    }

    pub fn stderr_tail(&self, max_chars: usize) -> &str {
        tail(&self.stderr, max_chars)
    }
}

/// Last `max_chars` characters of `s`, on a char boundary.
pub fn tail(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

/// How long to keep reading a pipe once the process is gone. A detached
/// grandchild can hold it open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Background reader that copies a pipe into a shared buffer.
struct PipeDrain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl PipeDrain {
    fn spawn<R>(mut pipe: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let handle = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                }
            }
        });
        Self { buf, handle }
    }

    /// Everything read so far, after giving the reader [`DRAIN_GRACE`] to
    /// reach end of stream.
    async fn finish(self) -> String {
        let mut handle = self.handle;
        if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
            handle.abort();
        }
        let bytes = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

async fn finish(drain: Option<PipeDrain>) -> String {
    match drain {
        Some(drain) => drain.finish().await,
        None => String::new(),
    }
}

/// Run the command to completion or until its timeout elapses.
///
/// Output is drained while the process runs, so whatever it wrote before a
/// timeout is kept. A timeout kills the child and is reported through
/// [`CommandOutput::timed_out`]. Spawn failures (missing program) are
/// returned as errors.
pub async fn run_command(spec: &CommandSpec) -> std::io::Result<CommandOutput> {
    let start = Instant::now();
    debug!(command = %spec.display(), cwd = ?spec.cwd, "Running command");

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    let stdout = child.stdout.take().map(PipeDrain::spawn);
    let stderr = child.stderr.take().map(PipeDrain::spawn);

    let (exit_code, timed_out) = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(status) => (status?.code(), false),
        Err(_) => {
            warn!(
                command = %spec.display(),
                timeout_secs = spec.timeout.as_secs(),
                "Command timed out, killing"
            );
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed-out command");
            }
            (None, true)
        }
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    let stdout = finish(stdout).await;
    let mut stderr = finish(stderr).await;
    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!("timed out after {}s", spec.timeout.as_secs()));
    }

    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
        duration_ms,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("hello", 3), "llo");
        assert_eq!(tail("héllo wörld", 5), "wörld");
        assert_eq!(tail("abc", 0), "");
    }

    #[test]
    fn test_display() {
        let spec = CommandSpec::new("python3", Duration::from_secs(1))
            .args(["-m", "pip"])
            .arg("show");
        assert_eq!(spec.display(), "python3 -m pip show");
    }

    #[tokio::test]
    async fn test_run_echo() {
        let spec = CommandSpec::new("echo", Duration::from_secs(10)).arg("hello");
        let out = run_command(&spec).await.unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let spec = CommandSpec::new("false", Duration::from_secs(10));
        let out = run_command(&spec).await.unwrap();
        assert!(!out.success());
        assert!(!out.timed_out);
        assert_ne!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_timeout_kills() {
        let spec = CommandSpec::new("sleep", Duration::from_millis(100)).arg("5");
        let out = run_command(&spec).await.unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.duration_ms < 5000);
    }

    #[tokio::test]
    async fn test_timeout_keeps_output_written_before_it() {
        let spec = CommandSpec::new("sh", Duration::from_secs(1))
            .arg("-c")
            .arg("echo progress-line; echo err-line >&2; exec sleep 5");
        let out = run_command(&spec).await.unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
        assert!(out.stdout.contains("progress-line"), "stdout: {:?}", out.stdout);
        assert!(out.stderr.contains("err-line"), "stderr: {:?}", out.stderr);
        assert!(out.stderr.ends_with("timed out after 1s"));
    }

    #[tokio::test]
    async fn test_large_output_does_not_block() {
        let spec = CommandSpec::new("sh", Duration::from_secs(10))
            .arg("-c")
            .arg("head -c 200000 /dev/zero | tr '\\0' x");
        let out = run_command(&spec).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.len(), 200_000);
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz", Duration::from_secs(1));
        assert!(run_command(&spec).await.is_err());
    }
}
