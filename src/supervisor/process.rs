//! External process spawning and control.
//!
//! This module launches the supervised command with piped standard streams
//! and provides the termination sequence used during shutdown.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

/// Error type for process launch.
#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    /// The command has no program to run.
    #[error("Empty command")]
    EmptyCommand,
    /// The binary was not found.
    #[error("Executable not found: {program}")]
    NotFound { program: String },
    /// Permission denied when spawning.
    #[error("Permission denied: {program}")]
    PermissionDenied { program: String },
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    /// Create a `LaunchError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error, program: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                program: program.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                program: program.to_string(),
            },
            _ => Self::Io(err),
        }
    }
}

/// Command to run, either directly or through the platform shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// Program followed by its arguments.
    Argv(Vec<String>),
    /// A command line interpreted by `sh -c` (`cmd /C` on Windows).
    Shell(String),
}

impl CommandSpec {
    /// Build an argument-vector command.
    #[must_use]
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Argv(args.into_iter().map(Into::into).collect())
    }

    /// Build a shell command.
    #[must_use]
    pub fn shell(line: impl Into<String>) -> Self {
        Self::Shell(line.into())
    }

    /// Name of the program that will be executed.
    #[must_use]
    pub fn program(&self) -> &str {
        match self {
            Self::Argv(args) => args.first().map_or("", String::as_str),
            Self::Shell(_) => shell_program(),
        }
    }

    /// Command line suitable for logs, with arguments shell-escaped.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Argv(args) => args
                .iter()
                .map(|a| shell_escape::escape(a.as_str().into()).into_owned())
                .collect::<Vec<_>>()
                .join(" "),
            Self::Shell(line) => line.clone(),
        }
    }

    fn to_command(&self) -> Result<Command, LaunchError> {
        match self {
            Self::Argv(args) => {
                let (program, rest) = args.split_first().ok_or(LaunchError::EmptyCommand)?;
                let mut cmd = Command::new(program);
                cmd.args(rest);
                Ok(cmd)
            }
            Self::Shell(line) if line.trim().is_empty() => Err(LaunchError::EmptyCommand),
            Self::Shell(line) => {
                let mut cmd = Command::new(shell_program());
                cmd.arg(shell_flag()).arg(line);
                Ok(cmd)
            }
        }
    }
}

#[cfg(unix)]
fn shell_program() -> &'static str {
    "sh"
}

#[cfg(unix)]
fn shell_flag() -> &'static str {
    "-c"
}

#[cfg(not(unix))]
fn shell_program() -> &'static str {
    "cmd"
}

#[cfg(not(unix))]
fn shell_flag() -> &'static str {
    "/C"
}

/// Standard streams of a freshly spawned process.
#[derive(Debug)]
pub struct ProcessPipes {
    pub stdin: Option<ChildStdin>,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// How the process ended during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub status: ExitStatus,
    /// The process outlived the grace period and was killed.
    pub forced: bool,
}

/// A running supervised process.
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    status: Option<ExitStatus>,
}

impl ManagedProcess {
    /// Spawn `spec` in `cwd` with all three standard streams piped.
    ///
    /// On Unix the process leads its own process group so that shutdown
    /// signals reach anything it spawned.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError` if the process fails to spawn.
    pub fn spawn(spec: &CommandSpec, cwd: &Path) -> Result<(Self, ProcessPipes), LaunchError> {
        let mut cmd = spec.to_command()?;
        cmd.current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::from_io(e, spec.program()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            return Err(LaunchError::Io(std::io::Error::other(
                "process output streams not available",
            )));
        };
        let pipes = ProcessPipes {
            stdin: child.stdin.take(),
            stdout,
            stderr,
        };

        Ok((
            Self {
                child,
                status: None,
            },
            pipes,
        ))
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status, if the process is known to have exited.
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.status = Some(status);
        Ok(status)
    }

    /// Terminate the process, escalating to a kill after `grace`.
    ///
    /// On Unix, sends SIGTERM to the process group first, then SIGKILL after
    /// the timeout. On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be signalled or reaped.
    pub async fn terminate(&mut self, grace: Duration) -> std::io::Result<Termination> {
        if let Some(status) = self.try_wait()? {
            return Ok(Termination {
                status,
                forced: false,
            });
        }

        self.send_terminate();

        if let Ok(result) = tokio::time::timeout(grace, self.wait()).await {
            return result.map(|status| Termination {
                status,
                forced: false,
            });
        }

        tracing::warn!(
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "Process did not terminate in time, killing"
        );
        self.send_kill();
        let status = self.wait().await?;
        Ok(Termination {
            status,
            forced: true,
        })
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.id() {
            let pgid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                tracing::debug!(error = %e, "SIGTERM to process group failed");
            }
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "Terminate failed");
        }
    }

    #[cfg(unix)]
    fn send_kill(&mut self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.id() {
            let pgid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            if killpg(pgid, Signal::SIGKILL).is_ok() {
                return;
            }
        }
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "Kill failed");
        }
    }

    #[cfg(not(unix))]
    fn send_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "Kill failed");
        }
    }
}

/// Numeric return code of an exit status.
///
/// A process killed by a signal gets the negated signal number, so SIGTERM
/// reads as `-15`.
#[must_use]
pub fn return_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}

/// Shared handle to the process's standard input.
///
/// Both the caller and the output-reading task write to it; once closed,
/// writes are silently dropped.
#[derive(Debug, Clone, Default)]
pub struct StdinHandle {
    inner: Arc<Mutex<Option<ChildStdin>>>,
}

impl StdinHandle {
    #[must_use]
    pub fn new(stdin: Option<ChildStdin>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stdin)),
        }
    }

    /// Write `text` and a newline.
    ///
    /// Returns `false` if the stream is closed or the write failed, which
    /// usually means the process already exited. This waits for as long as
    /// the pipe is full; see [`send_line_within`](Self::send_line_within).
    pub async fn send_line(&self, text: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let Some(stdin) = guard.as_mut() else {
            tracing::debug!(text, "Input stream closed, not sending");
            return false;
        };
        write_line(stdin, text).await
    }

    /// Write `text` and a newline, giving up after `limit`.
    ///
    /// A process that never reads its input leaves the pipe full, and a plain
    /// write would then never complete. The limit covers waiting for other
    /// writers too.
    pub async fn send_line_within(&self, text: &str, limit: Duration) -> bool {
        if let Ok(sent) = tokio::time::timeout(limit, self.send_line(text)).await {
            sent
        } else {
            tracing::debug!(text, "Timed out sending line to process");
            false
        }
    }

    /// Write `text` and a newline unless another writer holds the stream.
    ///
    /// The write itself is bounded by `limit`.
    pub async fn try_send_line(&self, text: &str, limit: Duration) -> bool {
        let Ok(mut guard) = self.inner.try_lock() else {
            tracing::debug!(text, "Input stream busy, not sending");
            return false;
        };
        let Some(stdin) = guard.as_mut() else {
            tracing::debug!(text, "Input stream closed, not sending");
            return false;
        };
        if let Ok(sent) = tokio::time::timeout(limit, write_line(stdin, text)).await {
            sent
        } else {
            tracing::debug!(text, "Timed out sending line to process");
            false
        }
    }

    /// Close the input stream so the process sees end of input.
    pub async fn close(&self) {
        if let Some(mut stdin) = self.inner.lock().await.take() {
            let _ = stdin.shutdown().await;
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

async fn write_line(stdin: &mut ChildStdin, text: &str) -> bool {
    let line = format!("{text}\n");
    let result = match stdin.write_all(line.as_bytes()).await {
        Ok(()) => stdin.flush().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            tracing::debug!(text, "Sent line to process");
            true
        }
        Err(e) => {
            tracing::debug!(text, error = %e, "Failed to send line to process");
            false
        }
    }
}
