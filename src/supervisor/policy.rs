//! Wait policy applied at the end of `start()`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What `start()` waits for after launching the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitPolicy {
    /// Wait until the process signals readiness (or stops early).
    Ready,
    /// Wait until the process exits.
    Exit,
    /// Return as soon as the process is launched.
    #[default]
    None,
}

/// Error for an unrecognised wait policy name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid wait policy '{0}', expected one of: ready, exit, none")]
pub struct InvalidWaitPolicy(pub String);

impl FromStr for WaitPolicy {
    type Err = InvalidWaitPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ready" => Ok(Self::Ready),
            "exit" => Ok(Self::Exit),
            "none" => Ok(Self::None),
            _ => Err(InvalidWaitPolicy(s.to_string())),
        }
    }
}

impl std::fmt::Display for WaitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Exit => "exit",
            Self::None => "none",
        })
    }
}
