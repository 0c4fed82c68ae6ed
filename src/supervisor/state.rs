//! Supervisor lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a process supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    #[default]
    NotStarted,
    /// Inputs are in place but no process was launched.
    Staged,
    Running,
    Stopping,
    Stopped,
}

impl SupervisorState {
    /// Whether `next` directly follows this state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Staged)
                | (Self::Staged, Self::Running | Self::Stopping)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Staged => "staged",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Tracks the lifecycle of one supervised process.
#[derive(Debug, Clone, Default)]
pub struct LifecycleMachine {
    state: SupervisorState,
}

impl LifecycleMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Move to `next`.
    ///
    /// Returns `false` and leaves the state unchanged if `next` would skip a
    /// state or go backwards.
    pub fn transition(&mut self, next: SupervisorState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "Rejected state transition");
            return false;
        }
        tracing::debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        true
    }
}
