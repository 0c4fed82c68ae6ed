//! Accumulated diagnostics of a supervised run.

use serde::Serialize;

/// Errors and flags collected from the process output.
///
/// Written only by the output-reading task. Callers get snapshots, which are
/// complete once the readiness gate fires, `wait()` returns or `stop()`
/// returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Logged errors in output order; multi-line blocks are one entry.
    pub errors: Vec<String>,
    /// A critical condition was detected.
    pub critical: bool,
    /// Message of the critical condition.
    pub critical_message: Option<String>,
    /// The process announced it was stopping because of an error.
    pub stopped_on_error: bool,
    /// Identifier captured by the readiness signal.
    pub ready: Option<String>,
    /// Number of output lines seen.
    pub lines: usize,
}

impl RunReport {
    /// Whether nothing went wrong.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.critical && !self.stopped_on_error
    }
}
