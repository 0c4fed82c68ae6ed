//! Ephemeral or caller-supplied working directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::{validate_target, InputSource, WorkdirError};

/// Prefix for automatically created working directories.
const TEMP_PREFIX: &str = "command-runner-";

/// Directory a supervised command runs in.
///
/// An area created without an explicit path is *owned*: it is a private
/// temporary directory that is removed on [`teardown`](Self::teardown) or
/// drop. A caller-supplied directory is never removed.
#[derive(Debug)]
pub struct WorkingArea {
    path: PathBuf,
    temp: Option<TempDir>,
    owned: bool,
    keep: bool,
    removed: bool,
}

impl WorkingArea {
    /// Create a working area.
    ///
    /// With `explicit_path`, the directory is created if absent. An existing
    /// non-empty directory is accepted with a warning. Without a path, a fresh
    /// directory readable only by the current user is allocated under the
    /// system temp directory.
    ///
    /// # Errors
    ///
    /// Returns `WorkdirError::Io` if the directory cannot be created.
    pub fn create(explicit_path: Option<&Path>) -> Result<Self, WorkdirError> {
        if let Some(path) = explicit_path {
            if path.exists() && !is_empty_dir(path)? {
                tracing::warn!(path = %path.display(), "Existing working directory not empty");
            }
            fs::create_dir_all(path).map_err(|e| WorkdirError::io(path, e))?;
            tracing::debug!(path = %path.display(), "Using working directory");
            return Ok(Self {
                path: path.to_path_buf(),
                temp: None,
                owned: false,
                keep: false,
                removed: false,
            });
        }

        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir()
            .map_err(|e| WorkdirError::io(std::env::temp_dir(), e))?;
        let path = temp.path().to_path_buf();
        tracing::debug!(path = %path.display(), "Created temporary working directory");
        Ok(Self {
            path,
            temp: Some(temp),
            owned: true,
            keep: false,
            removed: false,
        })
    }

    /// Root of the working area.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this area was created here and may be removed.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Whether the directory has been torn down.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Keep the directory on teardown and drop, for debugging.
    pub fn keep(&mut self) {
        self.keep = true;
        if let Some(temp) = self.temp.take() {
            let _ = temp.keep();
        }
    }

    /// Stage a single input at `target`, relative to the area root.
    ///
    /// # Errors
    ///
    /// Returns `WorkdirError::InvalidTarget` if `target` is not a plain
    /// relative path, or any error from copying the source.
    pub fn stage(&self, target: &Path, source: &InputSource) -> Result<(), WorkdirError> {
        validate_target(target)?;
        source.copy_to(&self.path.join(target))
    }

    /// Stage every input in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing input and returns its error.
    pub fn stage_all<'a>(
        &self,
        inputs: impl IntoIterator<Item = (&'a PathBuf, &'a InputSource)>,
    ) -> Result<(), WorkdirError> {
        for (target, source) in inputs {
            self.stage(target, source)?;
        }
        Ok(())
    }

    /// Absolute path of `target` inside the area. No I/O is performed.
    #[must_use]
    pub fn resolve(&self, target: impl AsRef<Path>) -> PathBuf {
        self.path.join(target)
    }

    /// Read the contents of output files.
    ///
    /// `outputs` maps a caller-chosen label to a path relative to the area.
    ///
    /// # Errors
    ///
    /// Returns `WorkdirError::Io` for the first file that cannot be read.
    pub fn read_files<K, P>(
        &self,
        outputs: &BTreeMap<K, P>,
    ) -> Result<BTreeMap<K, String>, WorkdirError>
    where
        K: Ord + Clone,
        P: AsRef<Path>,
    {
        outputs
            .iter()
            .map(|(label, rel)| {
                let path = self.resolve(rel);
                fs::read_to_string(&path)
                    .map(|content| (label.clone(), content))
                    .map_err(|e| WorkdirError::io(path, e))
            })
            .collect()
    }

    /// Remove the directory if it is owned.
    ///
    /// Returns `true` if the directory was removed by this call. Calling this
    /// on a caller-supplied area logs a warning and does nothing; calling it
    /// again after removal is a no-op.
    pub fn teardown(&mut self) -> bool {
        if !self.owned {
            tracing::warn!(path = %self.path.display(), "Not removing working directory that wasn't created here");
            return false;
        }
        if self.removed {
            tracing::debug!(path = %self.path.display(), "Working directory already removed");
            return false;
        }
        if self.keep {
            tracing::info!(path = %self.path.display(), "Keeping working directory");
            return false;
        }

        let result = match self.temp.take() {
            Some(temp) => temp.close(),
            None => fs::remove_dir_all(&self.path),
        };
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove working directory");
        } else {
            tracing::debug!(path = %self.path.display(), "Removed temporary working directory");
        }
        self.removed = true;
        true
    }
}

fn is_empty_dir(path: &Path) -> Result<bool, WorkdirError> {
    let mut entries = fs::read_dir(path).map_err(|e| WorkdirError::io(path, e))?;
    Ok(entries.next().is_none())
}
