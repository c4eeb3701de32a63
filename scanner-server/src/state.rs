//! Shared handler state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use scanner_kernel::{AnalysisService, ServerAssessor};
use scanner_telemetry::health::{HealthReporter, HealthSnapshot, HealthStatus};

/// Name reported by the service-info endpoint.
pub const SERVICE_NAME: &str = "composition-scanner";

/// State cloned into every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    service: AnalysisService,
    assessor: ServerAssessor,
    oracle: String,
    health: HealthReporter,
    draining: Arc<AtomicBool>,
}

impl AppState {
    /// Wraps the composition service and the per-server assessor; `oracle`
    /// is reported as `provider/model`.
    #[must_use]
    pub fn new(
        service: AnalysisService,
        assessor: ServerAssessor,
        oracle: impl Into<String>,
    ) -> Self {
        Self {
            service,
            assessor,
            oracle: oracle.into(),
            health: HealthReporter::new(SERVICE_NAME),
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Analysis service.
    #[must_use]
    pub fn service(&self) -> &AnalysisService {
        &self.service
    }

    /// Per-server assessor.
    #[must_use]
    pub fn assessor(&self) -> &ServerAssessor {
        &self.assessor
    }

    /// Refuses new submissions from now on.
    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once shutdown has begun.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Current health snapshot.
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        let status = if self.is_draining() {
            HealthStatus::Draining
        } else {
            HealthStatus::Ok
        };
        self.health
            .snapshot(status, self.oracle.clone(), self.service.registry().len())
    }
}
