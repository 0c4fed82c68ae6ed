//! Configuration file discovery and loading.

use std::path::{Path, PathBuf};

use crate::classifier::{PatternError, ProtocolPatterns};
use crate::supervisor::{InvalidWaitPolicy, WaitPolicy};

use super::RunnerConfig;

/// File name looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = ".command-runner.toml";

/// Environment variable naming a config file to use before all others.
pub const CONFIG_ENV: &str = "COMMAND_RUNNER_CONFIG";

/// Environment variable overriding `rdfox.executable`.
pub const RDFOX_EXECUTABLE_ENV: &str = "COMMAND_RUNNER_RDFOX";

/// Environment variable overriding `rdfox.wait`.
pub const RDFOX_WAIT_ENV: &str = "COMMAND_RUNNER_RDFOX_WAIT";

/// Finds the runner configuration and applies environment overrides.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Candidate files, first existing one wins.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Search `$COMMAND_RUNNER_CONFIG`, then `./.command-runner.toml`, then
    /// `<config dir>/command-runner/config.toml`.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            search_paths.push(PathBuf::from(path));
        }
        search_paths.push(PathBuf::from(LOCAL_CONFIG_FILE));
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("command-runner").join("config.toml"));
        }
        Self { search_paths }
    }

    /// Only consider `path`.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// First candidate that exists on disk.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }

    /// Load the first config file found, falling back to defaults, then apply
    /// environment overrides and check that pattern overrides compile.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a config file cannot be read or parsed, an
    /// override has an invalid value, or a pattern does not compile.
    pub fn load(&self) -> Result<RunnerConfig, ConfigError> {
        let config = match self.find_config_file() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading config file");
                Self::load_from_path(&path)?
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                RunnerConfig::default()
            }
        };

        let config = apply_env_overrides(config, |key| std::env::var(key).ok())?;
        config.patterns.apply(ProtocolPatterns::new())?;
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<RunnerConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply overrides looked up through `var`. Empty values are ignored.
///
/// # Errors
///
/// Returns `ConfigError::InvalidWaitPolicy` for an unknown wait policy.
pub fn apply_env_overrides<F>(mut config: RunnerConfig, var: F) -> Result<RunnerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| var(key).filter(|v| !v.is_empty());

    if let Some(executable) = var(RDFOX_EXECUTABLE_ENV) {
        tracing::debug!(executable = %executable, "RDFox executable set from environment");
        config.rdfox.executable = executable;
    }
    if let Some(wait) = var(RDFOX_WAIT_ENV) {
        config.rdfox.wait = Some(wait.parse::<WaitPolicy>()?);
    }
    Ok(config)
}

/// Errors that can occur while loading or applying configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    InvalidWaitPolicy(#[from] InvalidWaitPolicy),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] PatternError),
}
