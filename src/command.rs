//! External command execution: `failover_command`, `pg_start_command`,
//! `pg_stop_command`, `over_warning_limit_command` are all shell command
//! lines invoked through this single helper.

use std::process::ExitStatus;

/// Runs `command` through `/bin/sh -c`, logging and returning the exit
/// status rather than propagating failures — per the error-handling design,
/// a non-zero exit is logged by the caller, never retried within the tick.
///
/// # Errors
///
/// Returns an error if the shell itself could not be spawned.
pub async fn run(command: &str) -> std::io::Result<ExitStatus> {
    tracing::warn!(command, "executing external command");
    let status = tokio::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .status()
        .await?;
    tracing::warn!(command, success = status.success(), code = ?status.code(), "executed external command");
    Ok(status)
}
