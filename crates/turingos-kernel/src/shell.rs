//! Bounded subprocess execution shared by the manifold and the halt verifier.
//!
//! Commands never return an error: spawn failures, non-zero exits and
//! timeouts are all captured in a [`ShellOutput`] so callers can render them
//! as observations instead of aborting a tick.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Exit code reported for a command killed by the timeout, as `timeout(1)` does.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when the process could not be spawned or waited on.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Set when the process never ran.
    pub spawn_error: Option<String>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && self.spawn_error.is_none()
    }

    fn failed_to_spawn(err: impl std::fmt::Display) -> Self {
        Self {
            exit_code: SPAWN_FAILURE_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            spawn_error: Some(err.to_string()),
        }
    }

    fn timed_out() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
            spawn_error: None,
        }
    }
}

/// Run `cmd` through `sh -c` in `cwd`.
pub async fn run_shell(cmd: &str, cwd: &Path, limit: Duration) -> ShellOutput {
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    };
    #[cfg(not(target_os = "windows"))]
    let mut command = {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };
    command.current_dir(cwd);
    run(command, cmd, limit).await
}

/// Run `program` with explicit arguments (no shell interpolation).
pub async fn run_program(program: &str, args: &[String], cwd: &Path, limit: Duration) -> ShellOutput {
    let mut command = Command::new(program);
    command.args(args).current_dir(cwd);
    run(command, program, limit).await
}

async fn run(mut command: Command, label: &str, limit: Duration) -> ShellOutput {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the wait future on timeout must take the child with it.
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(command = %label, error = %e, "failed to spawn");
            return ShellOutput::failed_to_spawn(e);
        }
    };

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(SPAWN_FAILURE_EXIT_CODE);
            debug!(command = %label, exit_code, "command finished");
            ShellOutput {
                exit_code,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
                spawn_error: None,
            }
        }
        Ok(Err(e)) => {
            warn!(command = %label, error = %e, "failed to wait for command");
            ShellOutput::failed_to_spawn(e)
        }
        Err(_) => {
            warn!(command = %label, timeout_ms = limit.as_millis() as u64, "command timed out");
            ShellOutput::timed_out()
        }
    }
}
