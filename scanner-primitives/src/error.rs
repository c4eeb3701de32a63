//! Shared error definitions for composition primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the scanner.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing or parsing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided run identifier could not be parsed.
    #[error("invalid run id: {source}")]
    InvalidRunId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// A key identifier was not a lowercase SHA-256 hex digest.
    #[error("invalid key id `{id}`")]
    InvalidKeyId {
        /// The offending identifier string.
        id: String,
    },

    /// Server name failed validation.
    #[error("invalid server name `{name}`: {reason}")]
    InvalidServerName {
        /// The offending name.
        name: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool declaration failed validation.
    #[error("invalid tool declaration: {reason}")]
    InvalidTool {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Composition key did not span enough distinct servers.
    #[error("composition must span at least 2 distinct servers, found {found}")]
    InsufficientServers {
        /// Number of distinct servers supplied.
        found: usize,
    },

    /// Finding failed validation.
    #[error("invalid finding: {reason}")]
    InvalidFinding {
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl Error {
    /// Convenience constructor for tool validation failures.
    #[must_use]
    pub fn invalid_tool(reason: impl Into<String>) -> Self {
        Self::InvalidTool {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for finding validation failures.
    #[must_use]
    pub fn invalid_finding(reason: impl Into<String>) -> Self {
        Self::InvalidFinding {
            reason: reason.into(),
        }
    }
}
