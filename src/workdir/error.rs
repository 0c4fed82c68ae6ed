//! Working directory error types.

use std::path::PathBuf;

/// Errors that can occur while preparing or reading a working directory.
#[derive(thiserror::Error, Debug)]
pub enum WorkdirError {
    /// Filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Source of a staged input does not exist.
    #[error("Input source not found: {0}")]
    MissingSource(PathBuf),

    /// Target path is absolute or escapes the working directory.
    #[error("Invalid target path: {0}")]
    InvalidTarget(PathBuf),
}

impl WorkdirError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
