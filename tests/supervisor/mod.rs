//! Supervisor tests against real `sh` processes.

mod lifecycle_test;
mod oneshot_test;
mod shutdown_test;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use command_runner::classifier::ProtocolPatterns;
use command_runner::supervisor::{CommandSpec, SupervisorBuilder};

/// Run `script` with `sh -c`.
pub fn sh(script: &str) -> CommandSpec {
    CommandSpec::argv(["sh", "-c", script])
}

/// Patterns for the toy protocol the test scripts speak.
pub fn toy_patterns() -> ProtocolPatterns {
    ProtocolPatterns::new()
        .with_readiness(r"listening on (\d+)")
        .unwrap()
        .with_line_error("Error: .*")
        .unwrap()
        .with_block_start("Failure:")
        .unwrap()
        .with_critical_marker("out of memory")
        .unwrap()
        .with_critical_preamble("CRITICAL")
        .unwrap()
        .with_stop_requested("stopping on error")
        .unwrap()
}

/// Builder with the toy patterns and a short grace period.
pub fn builder(script: &str) -> SupervisorBuilder {
    SupervisorBuilder::new()
        .command(sh(script))
        .patterns(toy_patterns())
        .grace_period(Duration::from_millis(500))
}

/// Observer that records every line it sees.
pub fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync + 'static) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    (lines, move |line: &str| {
        sink.lock().unwrap().push(line.to_string());
    })
}
