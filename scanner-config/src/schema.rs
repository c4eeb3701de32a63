//! Strongly typed configuration sections.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use scanner_kernel::{
    BatchStrategy, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_GROUPS, PipelineOptions, SchedulerConfig,
    SearchConfig, SearchMode, ServerSource,
};
use scanner_policy::RiskPolicy;
use scanner_primitives::ServerName;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Root configuration document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Control-plane listener.
    pub server: ServerSettings,
    /// Reasoning oracle selection and call budget.
    pub oracle: OracleSettings,
    /// Search space and fan-out.
    pub search: SearchSettings,
    /// Risk policy applied to merged findings.
    pub scoring: RiskPolicy,
    /// Where analysis runs are persisted.
    pub store: StoreSettings,
    /// Tracing output.
    pub logging: LoggingSettings,
    /// Bulk declaration sources.
    pub collection: CollectionSettings,
    /// Known servers by name.
    pub servers: BTreeMap<String, ServerEntry>,
}

/// Control-plane listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Socket address the HTTP API binds to.
    pub bind: SocketAddr,
    /// How long shutdown waits for in-flight analyses, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            shutdown_grace_secs: 30,
        }
    }
}

impl ServerSettings {
    /// Grace period for in-flight analyses at shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Which oracle implementation answers group evaluations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleProvider {
    /// Deterministic capability-pair rules; needs no network access.
    #[default]
    RuleBased,
    /// `OpenAI`-compatible chat completions with JSON-schema output.
    Openai,
    /// Local Ollama server with schema-constrained output.
    Ollama,
}

/// Oracle settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    /// Implementation to use.
    pub provider: OracleProvider,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Fixed decoding temperature.
    pub temperature: f32,
    /// Deadline for a single oracle call, in seconds.
    pub timeout_secs: u64,
    /// Retries after a contract violation.
    pub max_retries: u32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: Option<u32>,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            provider: OracleProvider::RuleBased,
            model: "gpt-4o-mini".to_owned(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_owned(),
            temperature: 0.0,
            timeout_secs: 120,
            max_retries: 2,
            max_output_tokens: Some(8_192),
        }
    }
}

impl OracleSettings {
    /// Per-call deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Search-space and fan-out settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Pair enumeration mode.
    pub mode: SearchMode,
    /// Upper bound on candidate groups per run.
    pub max_groups: usize,
    /// Oracle call granularity.
    pub batching: BatchStrategy,
    /// Concurrent oracle calls per process.
    pub max_concurrency: usize,
    /// Classify tools through the oracle before evaluating groups.
    pub pre_classify: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            max_groups: DEFAULT_MAX_GROUPS,
            batching: BatchStrategy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            pre_classify: true,
        }
    }
}

impl SearchSettings {
    /// Search generator settings.
    #[must_use]
    pub const fn search_config(&self) -> SearchConfig {
        SearchConfig {
            mode: self.mode,
            max_groups: self.max_groups,
        }
    }

    /// Run-level pipeline switches.
    #[must_use]
    pub const fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            batching: self.batching,
            pre_classify: self.pre_classify,
        }
    }

    /// Scheduler settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `max_concurrency` is zero.
    pub fn scheduler_config(&self) -> ConfigResult<SchedulerConfig> {
        NonZeroUsize::new(self.max_concurrency)
            .map(SchedulerConfig::new)
            .ok_or_else(|| ConfigError::invalid("search.max_concurrency", "must be at least 1"))
    }
}

/// Persistence backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process memory; lost on restart.
    Memory,
    /// One JSON file per run.
    #[default]
    File,
}

/// Store settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Backend to use.
    pub backend: StoreBackend,
    /// Root directory of the file backend.
    pub path: PathBuf,
    /// Directory of the file backend's per-server assessment archive.
    pub assessments_path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from("composition-results"),
            assessments_path: PathBuf::from("results"),
        }
    }
}

/// Tracing settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Include the event target.
    pub with_target: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            json: false,
            with_target: true,
        }
    }
}

/// Bulk sources of declaration files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSettings {
    /// Directory of `<server>.json` declaration files.
    pub declarations_dir: Option<PathBuf>,
    /// `mcp.json`-style server list.
    pub mcp_json: Option<PathBuf>,
    /// Directory that submitted `declaration_files` are confined to.
    /// Defaults to `declarations_dir`.
    pub declarations_root: Option<PathBuf>,
}

impl CollectionSettings {
    /// Directory submitted declaration files resolve against, if any.
    #[must_use]
    pub fn submission_root(&self) -> Option<&PathBuf> {
        self.declarations_root
            .as_ref()
            .or(self.declarations_dir.as_ref())
    }
}

/// Where one server's declarations come from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEntry {
    /// Declaration file on disk.
    pub declarations_file: Option<PathBuf>,
    /// Live MCP endpoint.
    pub url: Option<String>,
}

impl ScannerConfig {
    /// Checks ranges and cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        let oracle = &self.oracle;
        if !(0.0..=2.0).contains(&oracle.temperature) {
            return Err(ConfigError::invalid(
                "oracle.temperature",
                format!("{} is outside [0, 2]", oracle.temperature),
            ));
        }
        if oracle.timeout_secs == 0 {
            return Err(ConfigError::invalid("oracle.timeout_secs", "must be at least 1"));
        }
        if oracle.provider != OracleProvider::RuleBased && oracle.model.trim().is_empty() {
            return Err(ConfigError::invalid("oracle.model", "must not be empty"));
        }
        if oracle.max_output_tokens == Some(0) {
            return Err(ConfigError::invalid("oracle.max_output_tokens", "must be at least 1"));
        }

        if self.search.max_groups == 0 {
            return Err(ConfigError::invalid("search.max_groups", "must be at least 1"));
        }
        self.search.scheduler_config()?;
        self.scoring
            .validate()
            .map_err(|err| ConfigError::invalid("scoring", err.to_string()))?;

        if self.store.backend == StoreBackend::File && self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("store.path", "must not be empty"));
        }
        if self.store.backend == StoreBackend::File
            && (self.store.assessments_path.as_os_str().is_empty()
                || self.store.assessments_path == self.store.path)
        {
            return Err(ConfigError::invalid(
                "store.assessments_path",
                "must be set and differ from store.path",
            ));
        }
        self.server_sources().map(|_| ())
    }

    /// Resolves the `servers` table into collector sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for invalid names or entries that set
    /// neither or both of `declarations_file` and `url`.
    pub fn server_sources(&self) -> ConfigResult<BTreeMap<ServerName, ServerSource>> {
        self.servers
            .iter()
            .map(|(name, entry)| {
                let field = format!("servers.{name}");
                let server =
                    ServerName::new(name.as_str()).map_err(|err| ConfigError::invalid(&field, err.to_string()))?;
                let source = match (&entry.declarations_file, &entry.url) {
                    (Some(path), None) => ServerSource::File(path.clone()),
                    (None, Some(url)) => ServerSource::Url(url.clone()),
                    _ => {
                        return Err(ConfigError::invalid(
                            field,
                            "set exactly one of `declarations_file` and `url`",
                        ));
                    }
                };
                Ok((server, source))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ScannerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.search.max_groups, DEFAULT_MAX_GROUPS);
        assert_eq!(config.scoring, RiskPolicy::MaxSeverity);
        assert_eq!(config.oracle.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = ScannerConfig::default();
        config.oracle.temperature = 2.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "oracle.temperature"
        ));

        let mut config = ScannerConfig::default();
        config.search.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = ScannerConfig::default();
        config.oracle.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ScannerConfig::default();
        config.store.assessments_path = config.store.path.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "store.assessments_path"
        ));
    }

    #[test]
    fn server_entries_need_exactly_one_source() {
        let mut config = ScannerConfig::default();
        config.servers.insert(
            "ServerA".to_owned(),
            ServerEntry {
                declarations_file: Some(PathBuf::from("a.json")),
                url: None,
            },
        );
        let sources = config.server_sources().unwrap();
        assert_eq!(
            sources.get(&ServerName::new("ServerA").unwrap()),
            Some(&ServerSource::File(PathBuf::from("a.json")))
        );

        config.servers.insert("ServerB".to_owned(), ServerEntry::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn submission_root_falls_back_to_the_declarations_dir() {
        let mut collection = CollectionSettings::default();
        assert!(collection.submission_root().is_none());

        collection.declarations_dir = Some(PathBuf::from("declarations"));
        assert_eq!(collection.submission_root(), Some(&PathBuf::from("declarations")));

        collection.declarations_root = Some(PathBuf::from("uploads"));
        assert_eq!(collection.submission_root(), Some(&PathBuf::from("uploads")));
        assert_eq!(ScannerConfig::default().server.shutdown_grace(), Duration::from_secs(30));
    }
}
