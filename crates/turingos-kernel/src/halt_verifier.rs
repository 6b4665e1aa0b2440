//! [`HaltVerifier`] – arbitrates whether a process may terminate.
//!
//! The acceptance command is captured once into a lock file inside the
//! workspace (`.halt-standard.lock.json` by default) and reused verbatim from
//! then on.  Agents can rewrite workspace files but the lock is only ever
//! created, never replaced, so an agent cannot relax its own halt standard by
//! changing the environment mid-run.
//!
//! [`HaltVerifier::verify`] never returns an error.  Every failure mode (a
//! corrupt lock, a missing shell, a timeout) becomes a FAIL verdict whose
//! feedback is shown to the process on its next tick.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::shell::run_shell;

pub const DEFAULT_LOCK_FILE: &str = ".halt-standard.lock.json";

/// Maximum characters of verifier feedback kept.
pub const FEEDBACK_LIMIT: usize = 4000;

const LOCK_VERSION: u32 = 1;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// On-disk lock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HaltLock {
    pub version: u32,
    pub command: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum HaltError {
    #[error("halt lock I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("halt lock at {path} is corrupt: {details}")]
    Corrupt { path: PathBuf, details: String },
}

/// Outcome of one verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HaltVerdict {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub feedback: String,
    /// The command that was run, if any.
    pub command: Option<String>,
}

impl HaltVerdict {
    fn fail(feedback: impl Into<String>, command: Option<String>, exit_code: Option<i32>) -> Self {
        Self {
            passed: false,
            exit_code,
            feedback: truncate(feedback.into()),
            command,
        }
    }
}

pub struct HaltVerifier {
    workspace: PathBuf,
    lock_path: PathBuf,
    initializer: Option<String>,
    timeout: Duration,
}

impl HaltVerifier {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let lock_path = workspace.join(DEFAULT_LOCK_FILE);
        Self {
            workspace,
            lock_path,
            initializer: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Relative paths are resolved against the workspace.
    pub fn with_lock_path(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.lock_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        };
        self
    }

    /// Command captured into the lock when no lock exists yet.  Ignored once
    /// a lock is present.  Blank commands are treated as absent.
    pub fn with_initializer(mut self, command: Option<String>) -> Self {
        self.initializer = command.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// The locked command, creating the lock from the initializer on first use.
    pub fn locked_command(&self) -> Result<Option<String>, HaltError> {
        if self.lock_path.exists() {
            let raw = std::fs::read_to_string(&self.lock_path).map_err(|source| HaltError::Io {
                path: self.lock_path.clone(),
                source,
            })?;
            let lock: HaltLock =
                serde_json::from_str(&raw).map_err(|e| HaltError::Corrupt {
                    path: self.lock_path.clone(),
                    details: e.to_string(),
                })?;
            if lock.command.trim().is_empty() {
                return Err(HaltError::Corrupt {
                    path: self.lock_path.clone(),
                    details: "empty command".into(),
                });
            }
            return Ok(Some(lock.command));
        }

        let Some(command) = &self.initializer else {
            return Ok(None);
        };
        let lock = HaltLock {
            version: LOCK_VERSION,
            command: command.trim().to_string(),
            created_at: Utc::now(),
        };
        self.write_lock(&lock)?;
        info!(path = %self.lock_path.display(), command = %lock.command, "halt standard locked");
        Ok(Some(lock.command))
    }

    fn write_lock(&self, lock: &HaltLock) -> Result<(), HaltError> {
        let io_err = |source| HaltError::Io {
            path: self.lock_path.clone(),
            source,
        };
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(lock).map_err(|e| HaltError::Corrupt {
            path: self.lock_path.clone(),
            details: e.to_string(),
        })?;
        std::fs::write(&self.lock_path, json).map_err(io_err)
    }

    /// Run the locked acceptance command.
    pub async fn verify(&self) -> HaltVerdict {
        let command = match self.locked_command() {
            Ok(Some(command)) => command,
            Ok(None) => {
                return HaltVerdict {
                    passed: true,
                    exit_code: None,
                    feedback: "[NO_HALT_STANDARD] no acceptance command configured".into(),
                    command: None,
                };
            }
            Err(e) => {
                warn!(error = %e, "halt standard unavailable");
                return HaltVerdict::fail(format!("[HALT_STANDARD_ERROR] {e}"), None, None);
            }
        };

        let out = run_shell(&command, &self.workspace, self.timeout).await;
        if out.success() {
            info!(command = %command, "halt verification passed");
            return HaltVerdict {
                passed: true,
                exit_code: Some(out.exit_code),
                feedback: truncate(out.stdout),
                command: Some(command),
            };
        }

        let mut feedback = format!("exit_code={}", out.exit_code);
        if out.timed_out {
            feedback.push_str("\n[FATAL] PROCESS_TIMEOUT");
        }
        if !out.stdout.trim().is_empty() {
            feedback.push_str(&format!("\n[STDOUT]\n{}", out.stdout.trim_end()));
        }
        if !out.stderr.trim().is_empty() {
            feedback.push_str(&format!("\n[STDERR]\n{}", out.stderr.trim_end()));
        }
        if let Some(err) = &out.spawn_error {
            feedback.push_str(&format!("\n[ERROR] {err}"));
        }
        info!(command = %command, exit_code = out.exit_code, "halt verification failed");
        HaltVerdict::fail(feedback, Some(command), Some(out.exit_code))
    }
}

fn truncate(text: String) -> String {
    if text.chars().count() <= FEEDBACK_LIMIT {
        return text;
    }
    text.chars().take(FEEDBACK_LIMIT).collect()
}
