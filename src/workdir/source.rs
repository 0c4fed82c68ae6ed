//! Input sources that can be staged into a working directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::WorkdirError;

/// Content to place at a target path inside the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Existing file or directory on disk. Directories are copied recursively.
    Path(PathBuf),
    /// In-memory text written as a new file.
    Text(String),
}

impl InputSource {
    /// Create an in-memory text source.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    /// Create a source from an existing file or directory.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Copy or write this source to `dst`.
    ///
    /// Parent directories of `dst` are created as needed. A directory source
    /// replaces any existing directory at `dst` rather than merging into it.
    ///
    /// # Errors
    ///
    /// Returns `WorkdirError::MissingSource` if a path source does not exist,
    /// or `WorkdirError::Io` if copying fails.
    pub fn copy_to(&self, dst: &Path) -> Result<(), WorkdirError> {
        match self {
            Self::Path(src) if src.is_dir() => {
                if dst.exists() {
                    fs::remove_dir_all(dst).map_err(|e| WorkdirError::io(dst, e))?;
                }
                tracing::debug!(src = %src.display(), dst = %dst.display(), "Copying directory");
                copy_dir_all(src, dst)
            }
            Self::Path(src) => {
                if !src.exists() {
                    return Err(WorkdirError::MissingSource(src.clone()));
                }
                create_parent(dst)?;
                tracing::debug!(src = %src.display(), dst = %dst.display(), "Copying file");
                fs::copy(src, dst).map_err(|e| WorkdirError::io(src, e))?;
                Ok(())
            }
            Self::Text(content) => {
                create_parent(dst)?;
                tracing::debug!(dst = %dst.display(), bytes = content.len(), "Writing data");
                fs::write(dst, content).map_err(|e| WorkdirError::io(dst, e))
            }
        }
    }
}

impl From<PathBuf> for InputSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for InputSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

/// Inputs keyed by their target path relative to the working directory.
pub type StagedInputs = BTreeMap<PathBuf, InputSource>;

/// Check that a target stays inside the working directory.
///
/// # Errors
///
/// Returns `WorkdirError::InvalidTarget` for absolute paths, empty paths or
/// paths containing `..`.
pub fn validate_target(target: &Path) -> Result<(), WorkdirError> {
    let escapes = target.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || target.as_os_str().is_empty() {
        return Err(WorkdirError::InvalidTarget(target.to_path_buf()));
    }
    Ok(())
}

fn create_parent(dst: &Path) -> Result<(), WorkdirError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| WorkdirError::io(parent, e))?;
    }
    Ok(())
}

fn copy_dir_all(src: &Path, dst: &Path) -> Result<(), WorkdirError> {
    fs::create_dir_all(dst).map_err(|e| WorkdirError::io(dst, e))?;
    let entries = fs::read_dir(src).map_err(|e| WorkdirError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| WorkdirError::io(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| WorkdirError::io(&from, e))?;
        if file_type.is_dir() {
            copy_dir_all(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| WorkdirError::io(&from, e))?;
        }
    }
    Ok(())
}
