//! Storage port for the journal.
//!
//! The journal itself only computes hashes and formats lines; where the two
//! streams live is decided by the injected [`JournalStore`].

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::journal::MerkleRecord;
use crate::JournalError;

pub const LOG_FILE: &str = "journal.log";
pub const LEDGER_FILE: &str = "journal.merkle.jsonl";

pub trait JournalStore: Send {
    /// Append one plain-text line to the human-readable log.
    fn append_log(&mut self, line: &str) -> Result<(), JournalError>;

    /// Append one record to the hash-chained ledger.
    fn append_record(&mut self, record: &MerkleRecord) -> Result<(), JournalError>;

    fn read_log(&self) -> Result<Vec<String>, JournalError>;

    fn read_records(&self) -> Result<Vec<MerkleRecord>, JournalError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// File store
// ─────────────────────────────────────────────────────────────────────────────

/// `<dir>/journal.log` plus `<dir>/journal.merkle.jsonl`, both append-only.
#[derive(Debug)]
pub struct FileJournalStore {
    log_path: PathBuf,
    ledger_path: PathBuf,
}

impl FileJournalStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, JournalError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| JournalError::io(dir, e))?;
        Ok(Self {
            log_path: dir.join(LOG_FILE),
            ledger_path: dir.join(LEDGER_FILE),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    fn append_line(path: &Path, line: &str) -> Result<(), JournalError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| JournalError::io(path, e))?;
        writeln!(file, "{line}").map_err(|e| JournalError::io(path, e))
    }

    fn read_lines(path: &Path) -> Result<Vec<String>, JournalError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path).map_err(|e| JournalError::io(path, e))?;
        BufReader::new(file)
            .lines()
            .map(|line| line.map_err(|e| JournalError::io(path, e)))
            .collect()
    }
}

impl JournalStore for FileJournalStore {
    fn append_log(&mut self, line: &str) -> Result<(), JournalError> {
        Self::append_line(&self.log_path, line)
    }

    fn append_record(&mut self, record: &MerkleRecord) -> Result<(), JournalError> {
        let json = serde_json::to_string(record).map_err(|e| JournalError::Corrupt {
            line: 0,
            details: e.to_string(),
        })?;
        Self::append_line(&self.ledger_path, &json)
    }

    fn read_log(&self) -> Result<Vec<String>, JournalError> {
        Self::read_lines(&self.log_path)
    }

    fn read_records(&self) -> Result<Vec<MerkleRecord>, JournalError> {
        Self::read_lines(&self.ledger_path)?
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| JournalError::Corrupt {
                    line: i + 1,
                    details: e.to_string(),
                })
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct MemoryJournalStore {
    log: Vec<String>,
    records: Vec<MerkleRecord>,
}

impl MemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JournalStore for MemoryJournalStore {
    fn append_log(&mut self, line: &str) -> Result<(), JournalError> {
        self.log.push(line.to_string());
        Ok(())
    }

    fn append_record(&mut self, record: &MerkleRecord) -> Result<(), JournalError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn read_log(&self) -> Result<Vec<String>, JournalError> {
        Ok(self.log.clone())
    }

    fn read_records(&self) -> Result<Vec<MerkleRecord>, JournalError> {
        Ok(self.records.clone())
    }
}
