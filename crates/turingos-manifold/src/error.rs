use std::path::PathBuf;

use thiserror::Error;
use turingos_types::PointerError;

/// Failures of a single manifold operation.  The tick engine renders these
/// as observations or page faults; none of them is fatal to a run.
#[derive(Error, Debug)]
pub enum ManifoldError {
    #[error("invalid pointer: {0}")]
    InvalidPointer(#[from] PointerError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("EACCES: {pointer}: {reason}")]
    AccessDenied { pointer: String, reason: String },

    #[error("pointer `{0}` is not writable")]
    NotWritable(String),

    #[error("unknown capability handle {0}")]
    UnknownHandle(String),

    #[error("unknown page token {0}")]
    PageNotFound(String),

    #[error("page {page} out of range for token {token} (1..={total})")]
    PageOutOfRange { token: String, page: u32, total: u32 },

    #[error("call stack: {0}")]
    CallStack(String),

    #[error("git log failed: {0}")]
    Git(String),

    #[error("capability store {path}: {details}")]
    CapabilityStore { path: PathBuf, details: String },

    #[error("I/O error on {pointer}: {source}")]
    Io {
        pointer: String,
        #[source]
        source: std::io::Error,
    },
}

impl ManifoldError {
    pub(crate) fn io(pointer: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return ManifoldError::NotFound(pointer.to_string());
        }
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return ManifoldError::AccessDenied {
                pointer: pointer.to_string(),
                reason: source.to_string(),
            };
        }
        ManifoldError::Io {
            pointer: pointer.to_string(),
            source,
        }
    }
}
