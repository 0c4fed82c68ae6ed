//! Run a command to completion and collect its output files.

use std::collections::BTreeMap;
use std::path::Path;

use super::{SupervisorBuilder, SupervisorError, WaitPolicy};

/// Stage inputs, run the command until it exits, and read back `outputs`.
///
/// `outputs` maps labels to paths relative to the working directory. The
/// builder's wait policy is replaced by [`WaitPolicy::Exit`].
///
/// # Errors
///
/// Returns `SupervisorError::ExitStatus` if the command exits unsuccessfully,
/// `SupervisorError::Staging` if an output file cannot be read, or any error
/// from starting and stopping the supervisor.
pub async fn run_in_dir<K, P>(
    builder: SupervisorBuilder,
    outputs: &BTreeMap<K, P>,
) -> Result<BTreeMap<K, String>, SupervisorError>
where
    K: Ord + Clone,
    P: AsRef<Path>,
{
    let mut supervisor = builder.wait_policy(WaitPolicy::Exit).build()?;

    if let Err(e) = supervisor.start().await {
        let _ = supervisor.stop().await;
        return Err(e);
    }

    if let Some(code) = supervisor.returncode().filter(|code| *code != 0) {
        tracing::error!(code, "Error running command");
        let _ = supervisor.stop().await;
        return Err(SupervisorError::ExitStatus { code });
    }

    let collected = supervisor.working_area().read_files(outputs);
    supervisor.stop().await?;
    Ok(collected?)
}
