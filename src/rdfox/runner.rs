//! Run RDFox with staged inputs and a generated master script.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::{ConfigError, RunnerConfig};
use crate::supervisor::{
    OutputObserver, ProcessSupervisor, RunReport, SupervisorBuilder, SupervisorError,
    SupervisorState, WaitPolicy,
};
use crate::workdir::{InputSource, StagedInputs};

use super::{
    infer_wait_policy, master_script, rdfox_command, rdfox_patterns, Endpoint, EndpointConnector,
    EndpointError, RestEndpoint, MASTER_SCRIPT,
};

/// Errors from running RDFox.
#[derive(thiserror::Error, Debug)]
pub enum RdfoxError {
    #[error("Input name '{0}' is reserved for the master script")]
    ReservedName(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Builder for an [`RdfoxRunner`].
pub struct RdfoxRunnerBuilder<E = RestEndpoint> {
    inputs: StagedInputs,
    script: Vec<String>,
    endpoint: E,
    config: RunnerConfig,
    executable: Option<String>,
    wait: Option<WaitPolicy>,
    working_dir: Option<PathBuf>,
    observer: Option<OutputObserver>,
}

impl RdfoxRunnerBuilder<RestEndpoint> {
    /// Start building a run of `script`, one RDFox shell command per line.
    pub fn new<I, S>(script: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: StagedInputs::new(),
            script: script.into_iter().map(Into::into).collect(),
            endpoint: RestEndpoint::new(),
            config: RunnerConfig::default(),
            executable: None,
            wait: None,
            working_dir: None,
            observer: None,
        }
    }
}

impl<E: Endpoint> RdfoxRunnerBuilder<E> {
    #[must_use]
    pub fn input(mut self, target: impl Into<PathBuf>, source: impl Into<InputSource>) -> Self {
        self.inputs.insert(target.into(), source.into());
        self
    }

    #[must_use]
    pub fn inputs(mut self, inputs: impl IntoIterator<Item = (PathBuf, InputSource)>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    /// Use a different client for the REST endpoint.
    pub fn endpoint<F: Endpoint>(self, endpoint: F) -> RdfoxRunnerBuilder<F> {
        RdfoxRunnerBuilder {
            inputs: self.inputs,
            script: self.script,
            endpoint,
            config: self.config,
            executable: self.executable,
            wait: self.wait,
            working_dir: self.working_dir,
            observer: self.observer,
        }
    }

    #[must_use]
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the RDFox executable from the configuration.
    #[must_use]
    pub fn executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Override the wait policy inferred from the script.
    #[must_use]
    pub fn wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = Some(wait);
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Receive every raw line RDFox prints.
    #[must_use]
    pub fn observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Prepare the working directory and supervisor.
    ///
    /// # Errors
    ///
    /// Returns `RdfoxError::ReservedName` if an input is named like the master
    /// script, `RdfoxError::Config` for invalid pattern overrides, and any
    /// error from building the supervisor.
    pub fn build(self) -> Result<RdfoxRunner<E>, RdfoxError> {
        let reserved = Path::new(MASTER_SCRIPT);
        if self.inputs.keys().any(|target| {
            target
                .components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect::<PathBuf>()
                == reserved
        }) {
            return Err(RdfoxError::ReservedName(MASTER_SCRIPT.to_string()));
        }

        let wait = self
            .wait
            .or(self.config.rdfox.wait)
            .unwrap_or_else(|| infer_wait_policy(&self.script));
        let patterns = rdfox_patterns().map_err(ConfigError::from)?;
        let patterns = self
            .config
            .patterns
            .apply(patterns)
            .map_err(ConfigError::from)?;
        let executable = self
            .executable
            .unwrap_or_else(|| self.config.rdfox.executable.clone());
        let quit_token = self.config.rdfox.quit_token.clone();
        let script = master_script(&self.script, wait, &quit_token);

        tracing::debug!(%wait, executable = %executable, "Preparing RDFox run");

        let endpoint = Arc::new(self.endpoint);
        let mut builder = self
            .config
            .configure(SupervisorBuilder::new())
            .inputs(self.inputs)
            .input(MASTER_SCRIPT, InputSource::text(script))
            .command(rdfox_command(&executable))
            .patterns(patterns)
            .wait_policy(wait)
            .quit_token(quit_token)
            .connect_hook(Arc::new(EndpointConnector::new(Arc::clone(&endpoint))));
        if let Some(dir) = self.working_dir {
            builder = builder.working_dir(dir);
        }
        if let Some(observer) = self.observer {
            builder = builder.observer(move |line: &str| observer(line));
        }

        Ok(RdfoxRunner {
            supervisor: builder.build()?,
            endpoint,
            wait,
        })
    }
}

/// A single RDFox run.
///
/// When the script starts the REST endpoint, `start()` returns once RDFox
/// reports it and [`RdfoxRunner::endpoint`] is connected. Otherwise it
/// returns after RDFox has worked through the script and exited.
#[derive(Debug)]
pub struct RdfoxRunner<E = RestEndpoint> {
    supervisor: ProcessSupervisor,
    endpoint: Arc<E>,
    wait: WaitPolicy,
}

impl RdfoxRunner<RestEndpoint> {
    pub fn builder<I, S>(script: I) -> RdfoxRunnerBuilder<RestEndpoint>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RdfoxRunnerBuilder::new(script)
    }
}

impl<E: Endpoint> RdfoxRunner<E> {
    /// Stage inputs, launch RDFox and wait according to the wait policy.
    ///
    /// # Errors
    ///
    /// Returns `RdfoxError::Supervisor` if staging or launching fails, or if
    /// RDFox reports a critical error while starting.
    pub async fn start(&mut self) -> Result<(), RdfoxError> {
        self.supervisor.start().await?;
        Ok(())
    }

    /// Shut RDFox down and clean up.
    ///
    /// # Errors
    ///
    /// Returns `RdfoxError::Supervisor` if RDFox reported a critical error.
    pub async fn stop(&mut self) -> Result<Option<i32>, RdfoxError> {
        Ok(self.supervisor.stop().await?)
    }

    /// Send one shell command to RDFox.
    pub async fn send_command(&self, command: &str) -> bool {
        self.supervisor.send_line(command).await
    }

    #[must_use]
    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    #[must_use]
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    #[must_use]
    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.supervisor.state()
    }

    /// Path of `rel` inside the working directory.
    #[must_use]
    pub fn files(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.supervisor.files(rel)
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        self.supervisor.working_dir()
    }

    #[must_use]
    pub fn report(&self) -> RunReport {
        self.supervisor.report()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.supervisor.errors()
    }

    /// Whether RDFox gave up on the script because of an error.
    #[must_use]
    pub fn stopped_on_error(&self) -> bool {
        self.supervisor.stopped_on_error()
    }

    /// # Errors
    ///
    /// Returns `RdfoxError::Supervisor` if RDFox reported a critical error.
    pub fn raise_for_errors(&self) -> Result<(), RdfoxError> {
        Ok(self.supervisor.raise_for_errors()?)
    }
}

/// Run `script` over `inputs` until RDFox exits and read back `outputs`.
///
/// `outputs` maps labels to paths relative to the working directory.
/// Errors RDFox prints are logged, not returned; only a critical error fails
/// the run.
///
/// # Errors
///
/// Returns an error if RDFox cannot be run, reports a critical error, or an
/// output file cannot be read.
pub async fn run_rdfox_collecting_output<K, P, I, S>(
    inputs: StagedInputs,
    script: I,
    outputs: &BTreeMap<K, P>,
    config: RunnerConfig,
) -> Result<BTreeMap<K, String>, RdfoxError>
where
    K: Ord + Clone,
    P: AsRef<Path>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut runner = RdfoxRunner::builder(script)
        .inputs(inputs)
        .config(config)
        .wait_policy(WaitPolicy::Exit)
        .build()?;

    if let Err(e) = runner.start().await {
        let _ = runner.stop().await;
        return Err(e);
    }

    let collected = runner.supervisor().working_area().read_files(outputs);
    runner.stop().await?;
    collected.map_err(|e| RdfoxError::Supervisor(SupervisorError::Staging(e)))
}
