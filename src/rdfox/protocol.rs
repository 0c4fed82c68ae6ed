//! RDFox shell output protocol and script generation.

use crate::classifier::{PatternError, ProtocolPatterns};
use crate::supervisor::{CommandSpec, WaitPolicy};

/// Input name reserved for the generated master script.
pub const MASTER_SCRIPT: &str = "__master.rdfox";

/// Script command that starts the REST endpoint.
pub const ENDPOINT_START: &str = "endpoint start";

/// Announces the REST endpoint; captures the port or service name.
pub const READINESS_PATTERN: &str =
    r"The REST endpoint was successfully started at port number/service name (\S+)";

/// Single-line errors.
pub const LINE_ERROR_PATTERN: &str = concat!(
    r"Error: .*|",
    r"File with name '.*' cannot be found|",
    r"The server could not start listening"
);

/// Header of an indented multi-line error.
pub const BLOCK_START_PATTERN: &str = r"An error occurred while executing the command:";

/// Inside an error block, marks it as critical.
pub const CRITICAL_MARKER_PATTERN: &str = r"The server is out of memory";

/// Preamble followed by a critical error message on the next line.
pub const CRITICAL_PREAMBLE_PATTERN: &str = r"A critical error occurred";

/// RDFox gives up on the script because `on-error` is `stop`.
pub const STOP_REQUESTED_PATTERN: &str =
    r"Script execution was stopped because 'on-error' is set to 'stop'";

/// Classification rules for the RDFox shell.
///
/// # Errors
///
/// Returns `PatternError` if a built-in pattern fails to compile.
pub fn rdfox_patterns() -> Result<ProtocolPatterns, PatternError> {
    ProtocolPatterns::new()
        .with_readiness(READINESS_PATTERN)?
        .with_line_error(LINE_ERROR_PATTERN)?
        .with_block_start(BLOCK_START_PATTERN)?
        .with_critical_marker(CRITICAL_MARKER_PATTERN)?
        .with_critical_preamble(CRITICAL_PREAMBLE_PATTERN)?
        .with_stop_requested(STOP_REQUESTED_PATTERN)
}

/// Wait for readiness if the script starts the endpoint, otherwise for exit.
#[must_use]
pub fn infer_wait_policy<S: AsRef<str>>(script: &[S]) -> WaitPolicy {
    if script
        .iter()
        .any(|line| line.as_ref().contains(ENDPOINT_START))
    {
        WaitPolicy::Ready
    } else {
        WaitPolicy::Exit
    }
}

/// Contents of the master script.
///
/// When RDFox is expected to exit by itself, `quit_token` is appended so
/// the shell does not sit waiting for more input.
#[must_use]
pub fn master_script<S: AsRef<str>>(script: &[S], wait: WaitPolicy, quit_token: &str) -> String {
    let mut lines: Vec<&str> = script.iter().map(AsRef::as_ref).collect();
    let ends_with_quit = lines.last().is_some_and(|l| l.trim() == quit_token);
    if wait == WaitPolicy::Exit && !ends_with_quit {
        lines.push(quit_token);
    }
    lines.join("\n")
}

/// Command running the master script in a sandboxed RDFox shell.
#[must_use]
pub fn rdfox_command(executable: &str) -> CommandSpec {
    CommandSpec::argv([
        executable.to_string(),
        "sandbox".to_string(),
        ".".to_string(),
        format!("exec {MASTER_SCRIPT}"),
    ])
}
