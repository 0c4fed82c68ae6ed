//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::{PatternError, ProtocolPatterns};
use crate::supervisor::{SupervisorBuilder, WaitPolicy};

/// Top-level runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Seconds between SIGTERM and SIGKILL during shutdown.
    pub grace_period_secs: u64,
    /// Bound on soft waits. Unset means wait indefinitely.
    pub wait_timeout_secs: Option<u64>,
    /// Keep automatically created working directories.
    pub keep_working_dir: bool,
    /// Fixed working directory instead of a temporary one.
    pub working_dir: Option<PathBuf>,
    /// RDFox controller settings.
    pub rdfox: RdfoxConfig,
    /// Overrides for the output classification rules.
    pub patterns: PatternConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
            wait_timeout_secs: None,
            keep_working_dir: false,
            working_dir: None,
            rdfox: RdfoxConfig::default(),
            patterns: PatternConfig::default(),
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }

    /// Apply the process-level settings to a supervisor builder.
    #[must_use]
    pub fn configure(&self, builder: SupervisorBuilder) -> SupervisorBuilder {
        let mut builder = builder
            .grace_period(self.grace_period())
            .keep_working_dir(self.keep_working_dir);
        if let Some(timeout) = self.wait_timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(dir) = &self.working_dir {
            builder = builder.working_dir(dir);
        }
        builder
    }
}

/// Settings for running RDFox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RdfoxConfig {
    /// Path or name of the RDFox executable.
    pub executable: String,
    /// Command that makes RDFox exit.
    pub quit_token: String,
    /// Wait policy; inferred from the script when unset.
    pub wait: Option<WaitPolicy>,
}

impl Default for RdfoxConfig {
    fn default() -> Self {
        Self {
            executable: "RDFox".to_string(),
            quit_token: "quit".to_string(),
            wait: None,
        }
    }
}

/// Regex overrides for individual classification rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub readiness: Option<String>,
    pub line_error: Option<String>,
    pub block_start: Option<String>,
    pub critical_marker: Option<String>,
    pub critical_preamble: Option<String>,
    pub stop_requested: Option<String>,
}

impl PatternConfig {
    /// Replace the rules of `base` that are set here.
    ///
    /// # Errors
    ///
    /// Returns `PatternError` if an override does not compile.
    pub fn apply(&self, base: ProtocolPatterns) -> Result<ProtocolPatterns, PatternError> {
        let mut patterns = base;
        if let Some(p) = &self.readiness {
            patterns = patterns.with_readiness(p)?;
        }
        if let Some(p) = &self.line_error {
            patterns = patterns.with_line_error(p)?;
        }
        if let Some(p) = &self.block_start {
            patterns = patterns.with_block_start(p)?;
        }
        if let Some(p) = &self.critical_marker {
            patterns = patterns.with_critical_marker(p)?;
        }
        if let Some(p) = &self.critical_preamble {
            patterns = patterns.with_critical_preamble(p)?;
        }
        if let Some(p) = &self.stop_requested {
            patterns = patterns.with_stop_requested(p)?;
        }
        Ok(patterns)
    }
}
