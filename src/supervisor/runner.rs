//! Supervisor for one external process lifecycle.
//!
//! This module connects the working area, the spawned process, the
//! output-reading task and the readiness gate, and implements the ordered
//! shutdown sequence.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::classifier::{OutputClassifier, ProtocolPatterns};
use crate::workdir::{validate_target, InputSource, StagedInputs, WorkdirError, WorkingArea};

use super::{
    combined_lines, return_code, CommandSpec, ConnectHook, GateState, GateWaiter, LaunchError,
    LifecycleMachine, ManagedProcess, OutputObserver, OutputReader, ReadinessGate, ReleaseReason,
    RunReport, StdinHandle, SupervisorState, WaitPolicy,
};

/// Default timeout for graceful process termination.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Environment variable that, when non-empty, keeps working directories.
pub const KEEP_WORKING_DIR_ENV: &str = "COMMAND_RUNNER_KEEP_WORKING_DIR";

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// Operation not allowed in the current lifecycle state.
    #[error("Invalid state: expected {expected}, was {actual}")]
    InvalidState {
        expected: SupervisorState,
        actual: SupervisorState,
    },
    /// The supervisor was configured inconsistently.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Inputs could not be staged.
    #[error("Failed to stage inputs: {0}")]
    Staging(#[from] WorkdirError),
    /// The process could not be launched.
    #[error("Failed to launch process: {0}")]
    Launch(#[from] LaunchError),
    /// The process reported a critical error.
    #[error("Critical process error: {message}")]
    Critical { message: String },
    /// The process exited unsuccessfully where success was required.
    #[error("Process exited with code {code}")]
    ExitStatus { code: i32 },
}

/// Builder for configuring a [`ProcessSupervisor`].
#[derive(Default)]
pub struct SupervisorBuilder {
    inputs: StagedInputs,
    command: Option<CommandSpec>,
    working_dir: Option<PathBuf>,
    patterns: ProtocolPatterns,
    wait: WaitPolicy,
    timeout: Option<Duration>,
    grace: Option<Duration>,
    quit_token: Option<String>,
    wait_before_stop: bool,
    keep_working_dir: bool,
    observer: Option<OutputObserver>,
    connect: Option<Arc<dyn ConnectHook>>,
}

impl SupervisorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `source` at `target` inside the working directory.
    #[must_use]
    pub fn input(mut self, target: impl Into<PathBuf>, source: impl Into<InputSource>) -> Self {
        self.inputs.insert(target.into(), source.into());
        self
    }

    /// Stage several inputs.
    #[must_use]
    pub fn inputs(mut self, inputs: impl IntoIterator<Item = (PathBuf, InputSource)>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    /// Set the command to launch. Without one, only staging happens.
    #[must_use]
    pub fn command(mut self, command: CommandSpec) -> Self {
        self.command = Some(command);
        self
    }

    /// Run in `dir` instead of a fresh temporary directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the output classification rules.
    #[must_use]
    pub fn patterns(mut self, patterns: ProtocolPatterns) -> Self {
        self.patterns = patterns;
        self
    }

    #[must_use]
    pub fn wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Bound soft waits. Without a timeout they wait indefinitely.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// How long to wait after SIGTERM before killing.
    #[must_use]
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    /// Line sent to the process to ask it to quit.
    #[must_use]
    pub fn quit_token(mut self, token: impl Into<String>) -> Self {
        self.quit_token = Some(token.into());
        self
    }

    /// Let the process finish by itself before `stop()` terminates it.
    #[must_use]
    pub fn wait_before_stop(mut self, wait: bool) -> Self {
        self.wait_before_stop = wait;
        self
    }

    /// Keep an automatically created working directory after `stop()`.
    #[must_use]
    pub fn keep_working_dir(mut self, keep: bool) -> Self {
        self.keep_working_dir = keep;
        self
    }

    /// Receive every raw output line.
    #[must_use]
    pub fn observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Called with the identifier captured by the readiness signal.
    #[must_use]
    pub fn connect_hook(mut self, hook: Arc<dyn ConnectHook>) -> Self {
        self.connect = Some(hook);
        self
    }

    /// Validate the configuration and prepare the working directory.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Configuration` for invalid input targets or a
    /// readiness wait without a readiness pattern, and
    /// `SupervisorError::Staging` if the working directory cannot be created.
    pub fn build(self) -> Result<ProcessSupervisor, SupervisorError> {
        self.build_with_env(|key| std::env::var_os(key))
    }

    fn build_with_env<F>(self, var: F) -> Result<ProcessSupervisor, SupervisorError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        for target in self.inputs.keys() {
            validate_target(target).map_err(|e| SupervisorError::Configuration(e.to_string()))?;
        }
        if self.wait == WaitPolicy::Ready && self.patterns.readiness.is_none() {
            return Err(SupervisorError::Configuration(
                "wait policy 'ready' requires a readiness pattern".to_string(),
            ));
        }

        let mut area = WorkingArea::create(self.working_dir.as_deref())?;
        if self.keep_working_dir || keep_working_dir_from(var) {
            area.keep();
        }

        let (gate, waiter) = ReadinessGate::new();
        let (report_tx, report_rx) = watch::channel(RunReport::default());

        Ok(ProcessSupervisor {
            area,
            inputs: self.inputs,
            command: self.command,
            patterns: self.patterns,
            wait: self.wait,
            timeout: self.timeout,
            grace: self.grace.unwrap_or(DEFAULT_GRACE_PERIOD),
            quit_token: self.quit_token,
            wait_before_stop: self.wait_before_stop,
            observer: self.observer,
            connect: self.connect,
            lifecycle: LifecycleMachine::new(),
            process: None,
            stdin: StdinHandle::default(),
            reader: None,
            gate: Some(gate),
            waiter,
            report_tx: Some(report_tx),
            report_rx,
        })
    }
}

fn log_exit(code: i32) {
    match code {
        0 => tracing::info!("Process exited cleanly"),
        c if c > 0 => tracing::error!(code, "Error running command"),
        _ => tracing::warn!(code, "Process was killed"),
    }
}

/// Whether the keep-working-directory override is set. Empty values are
/// ignored.
pub fn keep_working_dir_from<F>(var: F) -> bool
where
    F: Fn(&str) -> Option<OsString>,
{
    var(KEEP_WORKING_DIR_ENV).is_some_and(|v| !v.is_empty())
}

/// Supervises a single run of an external command.
///
/// One instance manages exactly one process lifecycle:
/// `NotStarted → Staged → Running → Stopping → Stopped`.
pub struct ProcessSupervisor {
    area: WorkingArea,
    inputs: StagedInputs,
    command: Option<CommandSpec>,
    patterns: ProtocolPatterns,
    wait: WaitPolicy,
    timeout: Option<Duration>,
    grace: Duration,
    quit_token: Option<String>,
    wait_before_stop: bool,
    observer: Option<OutputObserver>,
    connect: Option<Arc<dyn ConnectHook>>,
    lifecycle: LifecycleMachine,
    process: Option<ManagedProcess>,
    stdin: StdinHandle,
    reader: Option<JoinHandle<RunReport>>,
    gate: Option<ReadinessGate>,
    waiter: GateWaiter,
    report_tx: Option<watch::Sender<RunReport>>,
    report_rx: watch::Receiver<RunReport>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.lifecycle.state()
    }

    /// Root of the working directory.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        self.area.path()
    }

    #[must_use]
    pub fn working_area(&self) -> &WorkingArea {
        &self.area
    }

    /// Path of `rel` inside the working directory.
    #[must_use]
    pub fn files(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.area.resolve(rel)
    }

    /// A handle for waiting on the readiness gate.
    #[must_use]
    pub fn readiness(&self) -> GateWaiter {
        self.waiter.clone()
    }

    /// Snapshot of the diagnostics collected so far.
    #[must_use]
    pub fn report(&self) -> RunReport {
        self.report_rx.borrow().clone()
    }

    /// Logged errors collected so far.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.report_rx.borrow().errors.clone()
    }

    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.report_rx.borrow().critical
    }

    /// Whether the process announced it stopped because of an error.
    #[must_use]
    pub fn stopped_on_error(&self) -> bool {
        self.report_rx.borrow().stopped_on_error
    }

    /// Return code once the process has exited.
    ///
    /// Negative values are signal numbers, e.g. `-15` after SIGTERM.
    #[must_use]
    pub fn returncode(&self) -> Option<i32> {
        self.process
            .as_ref()
            .and_then(ManagedProcess::exit_status)
            .map(return_code)
    }

    /// Process ID while running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.process.as_ref().and_then(ManagedProcess::id)
    }

    /// Stage inputs, launch the command and apply the wait policy.
    ///
    /// If this fails after launching, the process is still running and
    /// `stop()` should be called.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::InvalidState` if already started,
    /// `SupervisorError::Staging` or `SupervisorError::Launch` on setup
    /// failures, and `SupervisorError::Critical` if the process reported a
    /// critical error while being waited on.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        let state = self.lifecycle.state();
        if state != SupervisorState::NotStarted {
            return Err(SupervisorError::InvalidState {
                expected: SupervisorState::NotStarted,
                actual: state,
            });
        }

        tracing::info!(
            path = %self.area.path().display(),
            inputs = self.inputs.len(),
            "Setting up working directory"
        );
        self.area.stage_all(&self.inputs)?;
        self.lifecycle.transition(SupervisorState::Staged);

        let Some(command) = self.command.clone() else {
            self.release_gate();
            return Ok(());
        };

        self.launch(&command)?;
        self.lifecycle.transition(SupervisorState::Running);

        match self.wait {
            WaitPolicy::Ready => {
                self.wait_ready().await;
                self.raise_for_errors()
            }
            WaitPolicy::Exit => {
                self.wait(self.timeout).await;
                self.raise_for_errors()
            }
            WaitPolicy::None => Ok(()),
        }
    }

    fn launch(&mut self, command: &CommandSpec) -> Result<(), SupervisorError> {
        let (Some(gate), Some(report)) = (self.gate.take(), self.report_tx.take()) else {
            return Err(SupervisorError::InvalidState {
                expected: SupervisorState::NotStarted,
                actual: self.lifecycle.state(),
            });
        };

        tracing::info!(
            command = %command.display(),
            cwd = %self.area.path().display(),
            "Running command"
        );
        let (process, pipes) = ManagedProcess::spawn(command, self.area.path())?;
        self.stdin = StdinHandle::new(pipes.stdin);

        let reader = OutputReader {
            classifier: OutputClassifier::new(self.patterns.clone()),
            gate,
            report,
            stdin: self.stdin.clone(),
            quit_token: self.quit_token.clone(),
            quit_timeout: self.grace,
            observer: self.observer.clone(),
            connect: self.connect.clone(),
        };
        self.reader = Some(tokio::spawn(
            reader.run(combined_lines(pipes.stdout, pipes.stderr)),
        ));
        self.process = Some(process);

        tracing::debug!(pid = ?self.id(), "Process started");
        Ok(())
    }

    /// Block until the readiness gate opens.
    ///
    /// The gate opens on a readiness signal, on a stop request from the
    /// process, or when its output ends. A configured timeout bounds the
    /// wait; elapsing only logs a warning.
    pub async fn wait_ready(&mut self) -> GateState {
        let mut waiter = self.waiter.clone();
        let state = match self.timeout {
            Some(limit) => {
                if let Ok(state) = tokio::time::timeout(limit, waiter.wait()).await {
                    state
                } else {
                    tracing::warn!("Process did not signal readiness in time, continuing");
                    waiter.state()
                }
            }
            None => waiter.wait().await,
        };

        match &state {
            GateState::Ready(id) => tracing::info!(identifier = %id, "Process is ready"),
            GateState::Released(ReleaseReason::StopRequested) => {
                tracing::warn!("Process stopped on error before becoming ready");
            }
            GateState::Released(ReleaseReason::StreamClosed) => {
                tracing::warn!("Process output ended before it became ready");
            }
            GateState::Pending => {}
        }
        state
    }

    /// Wait for the process to exit, up to `timeout`.
    ///
    /// This is a soft wait: if the timeout elapses a warning is logged and
    /// `None` is returned, but the process keeps running. Once the process
    /// has exited, remaining output is drained before returning so the
    /// report is complete.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Option<i32> {
        let process = self.process.as_mut()?;

        let result = match timeout {
            Some(limit) => {
                tracing::debug!(timeout_ms = duration_ms(limit), "Waiting for process to finish");
                tokio::time::timeout(limit, process.wait()).await.ok()
            }
            None => {
                tracing::debug!("Waiting indefinitely for process to finish");
                Some(process.wait().await)
            }
        };

        match result {
            None => {
                tracing::warn!("Process did not terminate in time when waiting, continuing");
                return None;
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Failed to wait for process");
                return None;
            }
            Some(Ok(status)) => log_exit(return_code(status)),
        }

        self.drain_output().await;
        self.returncode()
    }

    /// Write `text` and a newline to the process's input.
    ///
    /// Returns `false` if the input is closed; this is not an error since the
    /// process may simply have exited.
    pub async fn send_line(&self, text: &str) -> bool {
        self.stdin.send_line(text).await
    }

    /// Shut down the process and clean up.
    ///
    /// The sequence is: send the quit token, close input, SIGTERM, wait for
    /// the grace period, SIGKILL if still alive, drain remaining output, log
    /// the exit status and remove an owned working directory. Calling this
    /// again, or before `start()`, does nothing.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Critical` if the process reported a critical
    /// error. Cleanup has completed by then.
    pub async fn stop(&mut self) -> Result<Option<i32>, SupervisorError> {
        match self.lifecycle.state() {
            SupervisorState::NotStarted => {
                tracing::debug!("Stop called before start, nothing to do");
                return Ok(None);
            }
            SupervisorState::Stopping | SupervisorState::Stopped => {
                return Ok(self.returncode());
            }
            SupervisorState::Staged | SupervisorState::Running => {}
        }

        if self.wait_before_stop && self.process.is_some() {
            self.wait(self.timeout).await;
        }

        self.lifecycle.transition(SupervisorState::Stopping);
        if self.process.is_some() {
            self.shutdown_process().await;
        }
        self.release_gate();

        if self.area.is_owned() {
            self.area.teardown();
        }
        self.lifecycle.transition(SupervisorState::Stopped);

        self.raise_for_errors()?;
        Ok(self.returncode())
    }

    async fn shutdown_process(&mut self) {
        if let Some(token) = &self.quit_token {
            self.stdin.send_line_within(token, self.grace).await;
        }
        if tokio::time::timeout(self.grace, self.stdin.close())
            .await
            .is_err()
        {
            tracing::warn!("Timed out closing process input");
        }

        if let Some(process) = self.process.as_mut() {
            tracing::debug!("Terminating process");
            match process.terminate(self.grace).await {
                Ok(termination) if termination.forced => {
                    tracing::warn!("Process was killed after the grace period");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to terminate process"),
            }
        }

        if !self.drain_output().await {
            if let Some(handle) = self.reader.take() {
                tracing::warn!("Process output still open after exit, abandoning reader");
                handle.abort();
            }
        }

        if let Some(code) = self.returncode() {
            log_exit(code);
        }
    }

    /// Join the output reader, bounded by the grace period.
    ///
    /// Returns `false` if the output is still open when the bound elapses.
    async fn drain_output(&mut self) -> bool {
        let Some(handle) = self.reader.as_mut() else {
            return true;
        };

        match tokio::time::timeout(self.grace, handle).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Output reader task failed"),
            Err(_) => return false,
        }
        self.reader = None;
        true
    }

    fn release_gate(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.fire(GateState::Released(ReleaseReason::StreamClosed));
        }
    }

    /// Fail if the process reported a critical error.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Critical` carrying the critical message.
    pub fn raise_for_errors(&self) -> Result<(), SupervisorError> {
        let report = self.report_rx.borrow();
        if report.critical {
            return Err(SupervisorError::Critical {
                message: report.critical_message.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("state", &self.lifecycle.state())
            .field("working_dir", &self.area.path())
            .field("command", &self.command)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
