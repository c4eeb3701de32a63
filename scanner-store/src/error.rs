//! Error types for the analysis store.

use std::path::PathBuf;

use scanner_primitives::{KeyId, RunId};
use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by analysis stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A run with the same identifier was already stored for the key.
    #[error("run {run_id} already stored for composition {key_id}")]
    DuplicateRun {
        /// Composition identity.
        key_id: KeyId,
        /// Conflicting run identifier.
        run_id: RunId,
    },
    /// Underlying I/O failure while reading or writing run files.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
    /// A stored record does not belong where it was found.
    #[error("corrupt run record at {}: {reason}", path.display())]
    Corrupt {
        /// File holding the record.
        path: PathBuf,
        /// Human-readable reason describing the mismatch.
        reason: String,
    },
}

impl StoreError {
    /// Helper to construct corruption errors from string-like values.
    #[must_use]
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
