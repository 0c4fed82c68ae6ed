//! Line patterns describing an external process's output protocol.

use regex::Regex;

/// Error type for pattern construction.
#[derive(thiserror::Error, Debug)]
pub enum PatternError {
    /// Invalid regex pattern.
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    /// Readiness pattern has nothing to capture.
    #[error("Readiness pattern must contain a capture group: {0}")]
    MissingCapture(String),
}

/// A regex matched against the start of a line.
#[derive(Debug, Clone)]
pub struct LinePattern {
    source: String,
    regex: Regex,
}

impl LinePattern {
    /// Compile a pattern. The match is anchored at the start of the line.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::InvalidPattern` if the regex is invalid.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(&format!("^(?:{pattern})"))?,
        })
    }

    /// Check if the line starts with a match.
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// First capture group of a match, if the line matches.
    #[must_use]
    pub fn capture<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.regex
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// Get the pattern as written (for debugging/display).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// The rules an [`OutputClassifier`](super::OutputClassifier) applies.
///
/// Every rule is optional; a classifier with no rules passes every line
/// through without events.
#[derive(Debug, Clone, Default)]
pub struct ProtocolPatterns {
    /// Announces readiness; the first capture group is the identifier.
    pub readiness: Option<LinePattern>,
    /// A complete error on one line.
    pub line_error: Option<LinePattern>,
    /// Header of a multi-line error whose body lines are indented.
    pub block_start: Option<LinePattern>,
    /// Inside a block, marks the block as critical.
    pub critical_marker: Option<LinePattern>,
    /// Preamble whose following line is a critical error message.
    pub critical_preamble: Option<LinePattern>,
    /// The process is halting by its own error policy.
    pub stop_requested: Option<LinePattern>,
}

impl ProtocolPatterns {
    /// Create an empty pattern set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the readiness pattern.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::MissingCapture` if the pattern has no capture
    /// group, or `PatternError::InvalidPattern` if it does not compile.
    pub fn with_readiness(mut self, pattern: &str) -> Result<Self, PatternError> {
        let compiled = LinePattern::new(pattern)?;
        if compiled.regex.captures_len() < 2 {
            return Err(PatternError::MissingCapture(pattern.to_string()));
        }
        self.readiness = Some(compiled);
        Ok(self)
    }

    /// Set the single-line error pattern.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::InvalidPattern` if the regex is invalid.
    pub fn with_line_error(mut self, pattern: &str) -> Result<Self, PatternError> {
        self.line_error = Some(LinePattern::new(pattern)?);
        Ok(self)
    }

    /// Set the multi-line error header pattern.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::InvalidPattern` if the regex is invalid.
    pub fn with_block_start(mut self, pattern: &str) -> Result<Self, PatternError> {
        self.block_start = Some(LinePattern::new(pattern)?);
        Ok(self)
    }

    /// Set the in-block critical marker.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::InvalidPattern` if the regex is invalid.
    pub fn with_critical_marker(mut self, pattern: &str) -> Result<Self, PatternError> {
        self.critical_marker = Some(LinePattern::new(pattern)?);
        Ok(self)
    }

    /// Set the critical preamble pattern.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::InvalidPattern` if the regex is invalid.
    pub fn with_critical_preamble(mut self, pattern: &str) -> Result<Self, PatternError> {
        self.critical_preamble = Some(LinePattern::new(pattern)?);
        Ok(self)
    }

    /// Set the stop-requested pattern.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::InvalidPattern` if the regex is invalid.
    pub fn with_stop_requested(mut self, pattern: &str) -> Result<Self, PatternError> {
        self.stop_requested = Some(LinePattern::new(pattern)?);
        Ok(self)
    }
}
