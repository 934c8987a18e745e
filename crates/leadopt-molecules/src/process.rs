//! Subprocess plumbing shared by the external tool wrappers.

use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use leadopt_common::{LeadOptError, Result};

/// Runs `command` to completion; a non-zero exit becomes a
/// [`LeadOptError::Subprocess`] carrying both captured streams.
pub(crate) async fn run_checked(program: &str, command: &mut Command) -> Result<Output> {
    debug!(program, command = ?command.as_std(), "Spawning external tool");
    let output = command.output().await.map_err(|e| LeadOptError::Subprocess {
        program: program.to_string(),
        status: "failed to start".to_string(),
        stdout: String::new(),
        stderr: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(LeadOptError::Subprocess {
            program: program.to_string(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}
