//! One-shot readiness gate.

use tokio::sync::watch;

/// Why a gate opened without a readiness signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The process announced it is stopping on error.
    StopRequested,
    /// Output ended before readiness was announced.
    StreamClosed,
}

/// State of a readiness gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Pending,
    /// Readiness was announced with this identifier.
    Ready(String),
    /// Opened early so waiters do not hang.
    Released(ReleaseReason),
}

impl GateState {
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Identifier carried by a readiness signal.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Ready(id) => Some(id),
            _ => None,
        }
    }
}

/// Writer side of the gate. Held by the output-reading task.
#[derive(Debug)]
pub struct ReadinessGate {
    tx: watch::Sender<GateState>,
}

/// Reader side of the gate. Any number of clones may wait on it.
#[derive(Debug, Clone)]
pub struct GateWaiter {
    rx: watch::Receiver<GateState>,
}

impl ReadinessGate {
    /// Create a pending gate and its waiter.
    #[must_use]
    pub fn new() -> (Self, GateWaiter) {
        let (tx, rx) = watch::channel(GateState::Pending);
        (Self { tx }, GateWaiter { rx })
    }

    /// Open the gate with `state`.
    ///
    /// Returns `false` without changing anything if the gate already fired.
    pub fn fire(&self, state: GateState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_open() || !state.is_open() {
                return false;
            }
            tracing::debug!(?state, "Readiness gate fired");
            *current = state;
            true
        })
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_open()
    }
}

impl GateWaiter {
    /// Current state without waiting.
    #[must_use]
    pub fn state(&self) -> GateState {
        self.rx.borrow().clone()
    }

    /// Wait until the gate opens.
    ///
    /// If the writer is dropped without firing, this returns
    /// `Released(StreamClosed)`.
    pub async fn wait(&mut self) -> GateState {
        match self.rx.wait_for(GateState::is_open).await {
            Ok(state) => state.clone(),
            Err(_) => GateState::Released(ReleaseReason::StreamClosed),
        }
    }
}
