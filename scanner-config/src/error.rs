use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider failed or the merged document did not match the schema.
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),

    /// An explicitly requested file does not exist.
    #[error("configuration file {} does not exist", path.display())]
    MissingFile {
        /// Requested path.
        path: PathBuf,
    },

    /// A value is out of range or inconsistent.
    #[error("invalid configuration at `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// Description of the problem.
        reason: String,
    },
}

impl ConfigError {
    /// Helper to construct validation errors.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
