//! [`CapabilityStore`] – persisted `vfd://` handles.
//!
//! A handle is an opaque alias for a workspace path plus an access mode.
//! Reads are allowed through any handle; writes only through `rw` handles.
//! Every issue rewrites the whole JSON file, which holds a map
//! `handle -> {target, access, issuedAt}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use turingos_types::Access;
use turingos_types::pointer::HANDLE_PREFIX;
use uuid::Uuid;

use crate::error::ManifoldError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRecord {
    pub target: String,
    pub access: Access,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CapabilityStore {
    path: PathBuf,
    handles: BTreeMap<String, CapabilityRecord>,
}

impl CapabilityStore {
    /// Load the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ManifoldError> {
        let path = path.into();
        let handles = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| ManifoldError::CapabilityStore {
                path: path.clone(),
                details: e.to_string(),
            })?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| ManifoldError::CapabilityStore {
                    path: path.clone(),
                    details: e.to_string(),
                })?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, handles })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Issue and persist a new handle for `target`.
    pub fn issue(&mut self, target: &str, access: Access) -> Result<String, ManifoldError> {
        let handle = format!("{HANDLE_PREFIX}{}", Uuid::new_v4());
        self.handles.insert(
            handle.clone(),
            CapabilityRecord {
                target: target.to_string(),
                access,
                issued_at: Utc::now(),
            },
        );
        self.persist()?;
        info!(handle = %handle, target, access = access.as_str(), "capability issued");
        Ok(handle)
    }

    pub fn resolve(&self, handle: &str) -> Result<&CapabilityRecord, ManifoldError> {
        self.handles
            .get(handle.trim())
            .ok_or_else(|| ManifoldError::UnknownHandle(handle.to_string()))
    }

    /// Resolve `handle` for writing; `r` handles are refused with `EACCES`.
    pub fn resolve_writable(&self, handle: &str) -> Result<&CapabilityRecord, ManifoldError> {
        let record = self.resolve(handle)?;
        if !record.access.can_write() {
            return Err(ManifoldError::AccessDenied {
                pointer: handle.to_string(),
                reason: format!("handle grants `{}` only", record.access.as_str()),
            });
        }
        Ok(record)
    }

    fn persist(&self) -> Result<(), ManifoldError> {
        let err = |details: String| ManifoldError::CapabilityStore {
            path: self.path.clone(),
            details,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| err(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(&self.handles).map_err(|e| err(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| err(e.to_string()))
    }
}
