//! `turingos-journal` – durable, tamper-evident run history.
//!
//! - [`journal`] – [`Journal`]: plain log plus SHA-256 hash chain, replay markers.
//! - [`store`] – the [`JournalStore`] port with file and in-memory backends.
//! - [`task_stack`] – [`TaskStack`]: the per-process mind-op queue.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod journal;
pub mod store;
pub mod task_stack;

pub use journal::{ChainReport, GENESIS, Journal, MerkleRecord, ReplayCursor};
pub use store::{FileJournalStore, JournalStore, MemoryJournalStore};
pub use task_stack::{Task, TaskStack, TaskStackError};

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("journal I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt ledger line {line}: {details}")]
    Corrupt { line: usize, details: String },
    #[error("hash chain broken at record {index}: {reason}")]
    Broken { index: usize, reason: String },
}

impl JournalError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        JournalError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
