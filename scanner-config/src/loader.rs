//! Layered loading: defaults, then the TOML file, then the environment.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::schema::ScannerConfig;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "composition-scanner.toml";

/// Prefix of environment overrides; nested keys are separated by `__`, as in
/// `SCANNER_SEARCH__MAX_GROUPS=32`.
pub const ENV_PREFIX: &str = "SCANNER_";

impl ScannerConfig {
    /// Builds the provider stack without extracting it.
    ///
    /// An explicit `path` must exist; the default file is optional.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingFile`] when an explicit path is absent.
    pub fn figment(path: Option<&Path>) -> ConfigResult<Figment> {
        let file = match path {
            Some(path) if !path.exists() => {
                return Err(ConfigError::MissingFile {
                    path: path.to_path_buf(),
                });
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };
        debug!(file = %file.display(), exists = file.exists(), "configuration sources");

        Ok(Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Loads and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a provider fails, a value does not match
    /// the schema, or validation rejects the result.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let config: Self = Self::figment(path)?.extract()?;
        config.validate()?;
        Ok(config)
    }
}
