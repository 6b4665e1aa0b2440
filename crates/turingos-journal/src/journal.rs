//! [`Journal`] – append-only event log with a parallel Merkle ledger.
//!
//! Every [`Journal::engrave`] writes two things:
//!
//! - `[<ts>] <entry>` to the plain log, for humans and `grep`;
//! - a [`MerkleRecord`] to the ledger, where
//!   `hash = hex(SHA-256(ts ∥ entry ∥ prev_hash))` and the first record's
//!   `prev_hash` is `GENESIS`.
//!
//! The ledger is the record of truth and is written first.  If the ledger
//! append fails nothing was engraved.  If only the plain log append fails,
//! the record stands, the chain head advances and the error is returned.
//!
//! Reopening a journal resumes the chain from the last ledger record, so a
//! chain spanning several runs verifies as one.
//!
//! # Example
//!
//! ```
//! use turingos_journal::Journal;
//!
//! let mut journal = Journal::in_memory();
//! journal.engrave("[BOOT] pid=1").unwrap();
//! journal.mark_replay(1).unwrap();
//! let report = journal.verify_chain().unwrap();
//! assert_eq!(report.records, 2);
//! assert_eq!(journal.read_replay_cursor().unwrap().unwrap().tick_seq, 1);
//! ```

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use turingos_middleware::{EventBus, Topic};
use turingos_types::{Event, EventPayload};

use crate::JournalError;
use crate::store::{FileJournalStore, JournalStore, MemoryJournalStore};

pub const GENESIS: &str = "GENESIS";
const REPLAY_MARKER: &str = "[REPLAY] ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleRecord {
    pub ts: String,
    pub entry: String,
    pub prev_hash: String,
    pub hash: String,
}

pub fn record_hash(ts: &str, entry: &str, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ts.as_bytes());
    hasher.update(entry.as_bytes());
    hasher.update(prev_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Result of a successful [`Journal::verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub records: usize,
    pub head: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayCursor {
    pub tick_seq: u64,
    /// Chain head at the time the marker was written.
    pub root: String,
}

pub struct Journal {
    store: Box<dyn JournalStore>,
    head: String,
    bus: Option<EventBus>,
}

impl Journal {
    /// Open over `store`, resuming the chain from its last record.
    pub fn open(store: Box<dyn JournalStore>) -> Result<Self, JournalError> {
        let head = store
            .read_records()?
            .last()
            .map(|r| r.hash.clone())
            .unwrap_or_else(|| GENESIS.to_string());
        debug!(head = %head, "journal opened");
        Ok(Self {
            store,
            head,
            bus: None,
        })
    }

    /// File-backed journal in `dir`.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self, JournalError> {
        Self::open(Box::new(FileJournalStore::open(dir)?))
    }

    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryJournalStore::new()),
            head: GENESIS.to_string(),
            bus: None,
        }
    }

    /// Mirror every engraved line onto `bus` ([`Topic::Journal`]).
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    /// Append `entry`.  Newlines are escaped so every entry stays one line.
    pub fn engrave(&mut self, entry: &str) -> Result<MerkleRecord, JournalError> {
        let entry = entry.replace('\r', "").replace('\n', "\\n");
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let hash = record_hash(&ts, &entry, &self.head);
        let record = MerkleRecord {
            ts: ts.clone(),
            entry: entry.clone(),
            prev_hash: self.head.clone(),
            hash: hash.clone(),
        };
        let line = format!("[{ts}] {entry}");
        self.store.append_record(&record)?;
        self.head = hash;
        if let Err(err) = self.store.append_log(&line) {
            warn!(error = %err, hash = %record.hash, "plain log append failed; ledger record kept");
            return Err(err);
        }

        if let Some(bus) = &self.bus {
            let event = Event::new("turingos-journal", EventPayload::JournalLine(line));
            // Nobody listening is fine.
            let _ = bus.publish_to(Topic::Journal, event);
        }
        Ok(record)
    }

    /// Check linkage and recompute every hash.
    pub fn verify_chain(&self) -> Result<ChainReport, JournalError> {
        let records = self.store.read_records()?;
        let mut expected_prev = GENESIS.to_string();
        for (index, record) in records.iter().enumerate() {
            if record.prev_hash != expected_prev {
                warn!(index, "journal chain linkage broken");
                return Err(JournalError::Broken {
                    index,
                    reason: format!(
                        "prev_hash {} does not match previous hash {expected_prev}",
                        record.prev_hash
                    ),
                });
            }
            let recomputed = record_hash(&record.ts, &record.entry, &record.prev_hash);
            if recomputed != record.hash {
                warn!(index, "journal record hash mismatch");
                return Err(JournalError::Broken {
                    index,
                    reason: "hash does not match record contents".into(),
                });
            }
            expected_prev = record.hash.clone();
        }
        Ok(ChainReport {
            records: records.len(),
            head: expected_prev,
        })
    }

    /// Engrave a `[REPLAY] tick_seq=<n> root=<hash>` marker.
    pub fn mark_replay(&mut self, tick_seq: u64) -> Result<MerkleRecord, JournalError> {
        let root = self.head.clone();
        self.engrave(&format!("{REPLAY_MARKER}tick_seq={tick_seq} root={root}"))
    }

    /// The most recent replay marker, if any.
    pub fn read_replay_cursor(&self) -> Result<Option<ReplayCursor>, JournalError> {
        let records = self.store.read_records()?;
        Ok(records
            .iter()
            .rev()
            .find_map(|r| parse_replay_marker(&r.entry)))
    }

    /// Plain log lines, oldest first.
    pub fn lines(&self) -> Result<Vec<String>, JournalError> {
        self.store.read_log()
    }

    pub fn records(&self) -> Result<Vec<MerkleRecord>, JournalError> {
        self.store.read_records()
    }
}

fn parse_replay_marker(entry: &str) -> Option<ReplayCursor> {
    let rest = entry.strip_prefix(REPLAY_MARKER)?;
    let mut tick_seq = None;
    let mut root = None;
    for part in rest.split_whitespace() {
        if let Some(v) = part.strip_prefix("tick_seq=") {
            tick_seq = v.parse().ok();
        } else if let Some(v) = part.strip_prefix("root=") {
            root = Some(v.to_string());
        }
    }
    Some(ReplayCursor {
        tick_seq: tick_seq?,
        root: root?,
    })
}
