//! Host-process fallback execution.
//!
//! Used when no container runtime is available or containers are disabled
//! by configuration. Isolation is reduced to a separate process; timeouts
//! are still enforced and expired processes are killed.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::Result;

/// Raw process outcome shared by the local and container paths.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawOutcome {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code (-1 when killed by signal).
    pub exit_code: i32,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Whether the wall-clock budget expired.
    pub timed_out: bool,
    /// The budget in seconds, for timeout messages.
    pub budget_secs: u64,
    /// Set when the process could not be started at all.
    pub spawn_error: Option<String>,
}

/// Run the inline-code driver with the host Python interpreter.
pub(crate) async fn run_python(scratch: &Path, timeout: Duration) -> Result<RawOutcome> {
    let mut command = Command::new("python3");
    command.arg("runner.py").current_dir(scratch);
    run_with_timeout(command, timeout).await
}

/// Run a substituted shell command with the host shell.
pub(crate) async fn run_shell(command_line: &str, timeout: Duration) -> Result<RawOutcome> {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    run_with_timeout(command, timeout).await
}

/// Spawn `command`, wait up to `timeout`, kill on expiry.
pub(crate) async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<RawOutcome> {
    let started = Instant::now();
    let budget_secs = timeout.as_secs();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            return Ok(RawOutcome {
                exit_code: -1,
                budget_secs,
                spawn_error: Some(format!("failed to start process: {source}")),
                ..RawOutcome::default()
            });
        }
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(RawOutcome {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                timed_out: false,
                budget_secs,
                spawn_error: None,
            })
        }
        // kill_on_drop reaps the expired child when the future is dropped.
        Err(_) => Ok(RawOutcome {
            exit_code: -1,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            timed_out: true,
            budget_secs,
            ..RawOutcome::default()
        }),
    }
}
