//! [`ExecutionContract`] – run-level acceptance rules consulted by the tick engine.
//!
//! The contract answers "may this process stop now?" before the halt
//! verifier ever runs, and supplies progress hints that are attached to the
//! observation.  [`OpenContract`] never objects; [`RequiredFilesContract`]
//! gates halting on an ordered list of workspace files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContractError {
    #[error("contract I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one contract check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractVerdict {
    pub ok: bool,
    pub feedback: Option<String>,
}

impl ContractVerdict {
    pub fn ok() -> Self {
        Self {
            ok: true,
            feedback: None,
        }
    }

    pub fn ok_with(feedback: impl Into<String>) -> Self {
        Self {
            ok: true,
            feedback: Some(feedback.into()),
        }
    }

    pub fn refuse(feedback: impl Into<String>) -> Self {
        Self {
            ok: false,
            feedback: Some(feedback.into()),
        }
    }
}

#[async_trait]
pub trait ExecutionContract: Send + Sync {
    /// Progress so far; `feedback` is shown to the oracle when present.
    async fn check_progress(&self) -> Result<ContractVerdict, ContractError>;

    /// Whether a `SYS_HALT` may proceed to halt arbitration.
    async fn check_halt(&self) -> Result<ContractVerdict, ContractError>;

    /// Whether the next required step can be worked on now.
    async fn check_next_required_step_ready(&self) -> Result<ContractVerdict, ContractError>;

    /// Human-readable description of the next required step.
    async fn next_required_step(&self) -> Result<Option<String>, ContractError>;

    /// Workspace-relative file where progress is tracked, if any.
    async fn progress_path(&self) -> Option<String>;

    /// Workspace-relative path of the next file the contract expects.
    async fn next_required_file_hint(&self) -> Result<Option<String>, ContractError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenContract
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts everything.  Halting is then decided by the halt verifier alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenContract;

#[async_trait]
impl ExecutionContract for OpenContract {
    async fn check_progress(&self) -> Result<ContractVerdict, ContractError> {
        Ok(ContractVerdict::ok())
    }

    async fn check_halt(&self) -> Result<ContractVerdict, ContractError> {
        Ok(ContractVerdict::ok())
    }

    async fn check_next_required_step_ready(&self) -> Result<ContractVerdict, ContractError> {
        Ok(ContractVerdict::ok())
    }

    async fn next_required_step(&self) -> Result<Option<String>, ContractError> {
        Ok(None)
    }

    async fn progress_path(&self) -> Option<String> {
        None
    }

    async fn next_required_file_hint(&self) -> Result<Option<String>, ContractError> {
        Ok(None)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RequiredFilesContract
// ─────────────────────────────────────────────────────────────────────────────

/// Halting requires every listed file to exist.  Files are expected in list
/// order: producing a later file while an earlier one is missing is reported
/// as not ready.
#[derive(Debug, Clone)]
pub struct RequiredFilesContract {
    workspace: PathBuf,
    required: Vec<String>,
    progress_file: Option<String>,
}

impl RequiredFilesContract {
    pub fn new(workspace: impl Into<PathBuf>, required: Vec<String>) -> Self {
        Self {
            workspace: workspace.into(),
            required,
            progress_file: None,
        }
    }

    pub fn with_progress_file(mut self, path: impl Into<String>) -> Self {
        self.progress_file = Some(path.into());
        self
    }

    async fn exists(&self, rel: &str) -> Result<bool, ContractError> {
        let path = self.workspace.join(rel);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| ContractError::Io { path, source })
    }

    /// `(present, missing)` in list order.
    async fn partition(&self) -> Result<(Vec<&str>, Vec<&str>), ContractError> {
        let mut present = Vec::new();
        let mut missing = Vec::new();
        for rel in &self.required {
            if self.exists(rel).await? {
                present.push(rel.as_str());
            } else {
                missing.push(rel.as_str());
            }
        }
        Ok((present, missing))
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

#[async_trait]
impl ExecutionContract for RequiredFilesContract {
    async fn check_progress(&self) -> Result<ContractVerdict, ContractError> {
        let (present, _) = self.partition().await?;
        Ok(ContractVerdict::ok_with(format!(
            "[PROGRESS] {}/{} required files present",
            present.len(),
            self.required.len()
        )))
    }

    async fn check_halt(&self) -> Result<ContractVerdict, ContractError> {
        let (_, missing) = self.partition().await?;
        if missing.is_empty() {
            Ok(ContractVerdict::ok())
        } else {
            Ok(ContractVerdict::refuse(format!(
                "[CONTRACT] missing required files: {}",
                missing.join(", ")
            )))
        }
    }

    async fn check_next_required_step_ready(&self) -> Result<ContractVerdict, ContractError> {
        let Some(next) = self.next_required_file_hint().await? else {
            return Ok(ContractVerdict::ok());
        };
        let position = self.required.iter().position(|r| *r == next).unwrap_or(0);
        for later in &self.required[position + 1..] {
            if self.exists(later).await? {
                return Ok(ContractVerdict::refuse(format!(
                    "[CONTRACT] {later} exists but {next} is still missing"
                )));
            }
        }
        Ok(ContractVerdict::ok())
    }

    async fn next_required_step(&self) -> Result<Option<String>, ContractError> {
        Ok(self
            .next_required_file_hint()
            .await?
            .map(|path| format!("create {path}")))
    }

    async fn progress_path(&self) -> Option<String> {
        self.progress_file.clone()
    }

    async fn next_required_file_hint(&self) -> Result<Option<String>, ContractError> {
        for rel in &self.required {
            if !self.exists(rel).await? {
                return Ok(Some(rel.clone()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn open_contract_accepts_everything() {
        let contract = OpenContract;
        assert!(contract.check_halt().await.unwrap().ok);
        assert!(contract.check_progress().await.unwrap().feedback.is_none());
        assert!(contract.next_required_step().await.unwrap().is_none());
        assert!(contract.progress_path().await.is_none());
    }

    #[tokio::test]
    async fn required_files_gate_halt() {
        let dir = TempDir::new().unwrap();
        let contract = RequiredFilesContract::new(
            dir.path(),
            vec!["result.txt".into(), "proof.txt".into()],
        )
        .with_progress_file("progress.md");

        let verdict = contract.check_halt().await.unwrap();
        assert!(!verdict.ok);
        assert_eq!(
            verdict.feedback.as_deref(),
            Some("[CONTRACT] missing required files: result.txt, proof.txt")
        );
        assert_eq!(
            contract.next_required_step().await.unwrap().as_deref(),
            Some("create result.txt")
        );
        assert_eq!(contract.progress_path().await.as_deref(), Some("progress.md"));

        std::fs::write(dir.path().join("result.txt"), "42").unwrap();
        assert_eq!(
            contract.check_progress().await.unwrap().feedback.as_deref(),
            Some("[PROGRESS] 1/2 required files present")
        );
        assert_eq!(
            contract.next_required_file_hint().await.unwrap().as_deref(),
            Some("proof.txt")
        );

        std::fs::write(dir.path().join("proof.txt"), "qed").unwrap();
        assert!(contract.check_halt().await.unwrap().ok);
        assert!(contract.next_required_file_hint().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn out_of_order_files_are_not_ready() {
        let dir = TempDir::new().unwrap();
        let contract =
            RequiredFilesContract::new(dir.path(), vec!["a.txt".into(), "b.txt".into()]);
        assert!(contract.check_next_required_step_ready().await.unwrap().ok);
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        let verdict = contract.check_next_required_step_ready().await.unwrap();
        assert!(!verdict.ok);
        assert!(verdict.feedback.unwrap().contains("a.txt is still missing"));
    }
}
