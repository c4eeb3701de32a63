//! Configuration for the composition scanner.
//!
//! Values are layered with `figment`: built-in defaults, then
//! [`DEFAULT_CONFIG_FILE`] (or an explicit path), then `SCANNER_`-prefixed
//! environment variables.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{DEFAULT_CONFIG_FILE, ENV_PREFIX};
pub use schema::{
    CollectionSettings, LoggingSettings, OracleProvider, OracleSettings, ScannerConfig,
    SearchSettings, ServerEntry, ServerSettings, StoreBackend, StoreSettings,
};
