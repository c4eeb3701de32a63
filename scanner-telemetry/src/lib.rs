//! Observability utilities for the composition scanner.
//!
//! Library crates only emit `tracing` events; the binary installs the
//! subscriber once through [`tracing_support::init_tracing`].

#![warn(missing_docs, clippy::pedantic)]

pub mod tracing_support {
    //! Structured tracing setup.

    use scanner_config::LoggingSettings;
    use thiserror::Error;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    /// Errors raised while installing the subscriber.
    #[derive(Debug, Error)]
    pub enum TelemetryError {
        /// The filter directive did not parse.
        #[error("invalid log filter `{filter}`: {reason}")]
        InvalidFilter {
            /// Directive as configured.
            filter: String,
            /// Parser message.
            reason: String,
        },
        /// A global subscriber was already installed.
        #[error("tracing subscriber already installed: {reason}")]
        AlreadyInstalled {
            /// Underlying error.
            reason: String,
        },
    }

    /// Result alias for telemetry setup.
    pub type TelemetryResult<T> = Result<T, TelemetryError>;

    /// Builds the filter: `RUST_LOG` when set, the configured directive
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidFilter`] if the configured directive
    /// does not parse.
    pub fn env_filter(settings: &LoggingSettings) -> TelemetryResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&settings.filter).map_err(|err| TelemetryError::InvalidFilter {
            filter: settings.filter.clone(),
            reason: err.to_string(),
        })
    }

    /// Installs the global subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError`] if the filter is invalid or a subscriber
    /// is already installed.
    pub fn init_tracing(settings: &LoggingSettings) -> TelemetryResult<()> {
        let filter = env_filter(settings)?;
        let registry = tracing_subscriber::registry().with(filter);
        let result = if settings.json {
            registry
                .with(fmt::layer().json().with_target(settings.with_target))
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_target(settings.with_target))
                .try_init()
        };
        result.map_err(|err| TelemetryError::AlreadyInstalled {
            reason: err.to_string(),
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn bad_directives_are_reported() {
            let settings = LoggingSettings {
                filter: "scanner=notalevel".to_owned(),
                ..LoggingSettings::default()
            };
            if std::env::var_os("RUST_LOG").is_none() {
                assert!(matches!(
                    env_filter(&settings),
                    Err(TelemetryError::InvalidFilter { .. })
                ));
            }
            assert!(env_filter(&LoggingSettings::default()).is_ok());
        }
    }
}

pub mod health {
    //! Health reporting.

    use chrono::{DateTime, Utc};
    use serde::Serialize;

    /// Overall service condition.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum HealthStatus {
        /// Accepting submissions.
        Ok,
        /// Shutting down; new submissions are refused.
        Draining,
    }

    /// Point-in-time view of the service.
    #[derive(Clone, Debug, PartialEq, Serialize)]
    pub struct HealthSnapshot {
        /// Service name.
        pub service: &'static str,
        /// Crate version.
        pub version: &'static str,
        /// Overall condition.
        pub status: HealthStatus,
        /// When the process started.
        pub started_at: DateTime<Utc>,
        /// Seconds since start.
        pub uptime_secs: i64,
        /// Oracle answering group evaluations, as `provider/model`.
        pub oracle: String,
        /// Runs currently in flight.
        pub in_flight: usize,
    }

    /// Tracks process start and produces snapshots.
    #[derive(Clone, Debug)]
    pub struct HealthReporter {
        service: &'static str,
        started_at: DateTime<Utc>,
    }

    impl HealthReporter {
        /// Starts the uptime clock.
        #[must_use]
        pub fn new(service: &'static str) -> Self {
            Self {
                service,
                started_at: Utc::now(),
            }
        }

        /// Builds a snapshot.
        #[must_use]
        pub fn snapshot(&self, status: HealthStatus, oracle: String, in_flight: usize) -> HealthSnapshot {
            HealthSnapshot {
                service: self.service,
                version: env!("CARGO_PKG_VERSION"),
                status,
                started_at: self.started_at,
                uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0),
                oracle,
                in_flight,
            }
        }
    }

}
