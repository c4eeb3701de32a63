//! Per-server intent assessments, processed one at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scanner_oracle::OracleGateway;
use scanner_policy::score_server;
use scanner_primitives::{AssessmentSummary, ServerAssessment, ServerName};
use scanner_store::AssessmentStore;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collector::ToolCollector;
use crate::error::{PipelineError, PipelineResult};

/// An assessment accepted for background processing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueuedAssessment {
    /// Opaque identifier of the request.
    pub request_id: String,
    /// Server to assess.
    pub server: ServerName,
}

/// A completed, archived assessment.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SavedAssessment {
    /// Record name in the archive.
    pub filename: String,
    /// The assessment itself.
    pub assessment: ServerAssessment,
}

/// Reviews single servers through the oracle and archives the results.
///
/// Assessments run one after another on a single lane, whether awaited or
/// queued; the queue depth is observable for status reporting.
#[derive(Clone)]
pub struct ServerAssessor {
    gateway: OracleGateway,
    collector: Arc<dyn ToolCollector>,
    store: Arc<dyn AssessmentStore>,
    lane: Arc<Mutex<()>>,
    pending: Arc<watch::Sender<usize>>,
}

impl std::fmt::Debug for ServerAssessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerAssessor")
            .field("gateway", &self.gateway)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl ServerAssessor {
    /// Creates an assessor.
    #[must_use]
    pub fn new(
        gateway: OracleGateway,
        collector: Arc<dyn ToolCollector>,
        store: Arc<dyn AssessmentStore>,
    ) -> Self {
        Self {
            gateway,
            collector,
            store,
            lane: Arc::new(Mutex::new(())),
            pending: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Returns the number of queued assessments not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Returns `true` while an assessment holds the lane.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.lane.try_lock().is_err()
    }

    /// Assesses one server and archives the result.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Collection`] if the server's declarations
    /// cannot be collected, [`PipelineError::Oracle`] if the oracle fails, or
    /// a store error.
    pub async fn assess(&self, server: &ServerName) -> PipelineResult<SavedAssessment> {
        let _lane = self.lane.lock().await;
        let tools = self.collector.collect(server).await?;
        let findings = self.gateway.assess(server, &tools).await?;
        let (overall_risk_score, action) = score_server(&findings);
        let assessment = ServerAssessment {
            server: server.clone(),
            overall_risk_score,
            action,
            findings,
            assessed_at: Utc::now(),
            oracle_model: self.gateway.descriptor().to_string(),
        };
        let filename = self.store.save(&assessment).await?;
        info!(
            %server,
            tools = tools.len(),
            risk = %overall_risk_score,
            %action,
            record = %filename,
            "server assessed"
        );
        Ok(SavedAssessment {
            filename,
            assessment,
        })
    }

    /// Queues assessments of `servers` and returns immediately.
    ///
    /// Must be called from within a Tokio runtime. Failures are logged.
    pub fn enqueue(&self, servers: Vec<ServerName>) -> Vec<QueuedAssessment> {
        servers
            .into_iter()
            .map(|server| {
                let queued = QueuedAssessment {
                    request_id: format!("req_{}", Uuid::new_v4().simple()),
                    server,
                };
                self.pending.send_modify(|pending| *pending += 1);
                let assessor = self.clone();
                let job = queued.clone();
                tokio::spawn(async move {
                    if let Err(err) = assessor.assess(&job.server).await {
                        warn!(
                            server = %job.server,
                            request_id = %job.request_id,
                            error = %err,
                            "server assessment failed"
                        );
                    }
                    assessor
                        .pending
                        .send_modify(|pending| *pending = pending.saturating_sub(1));
                });
                queued
            })
            .collect()
    }

    /// Queues an assessment of every server the collector knows.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoServers`] if the collector knows none.
    pub fn enqueue_all(&self) -> PipelineResult<Vec<QueuedAssessment>> {
        let servers = self.collector.known_servers();
        if servers.is_empty() {
            return Err(PipelineError::NoServers);
        }
        Ok(self.enqueue(servers))
    }

    /// Lists archived assessments, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn list(&self) -> PipelineResult<Vec<AssessmentSummary>> {
        Ok(self.store.list_assessments().await?)
    }

    /// Waits up to `grace` for queued assessments to finish and returns how
    /// many were still pending.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut pending = self.pending.subscribe();
        if tokio::time::timeout(grace, pending.wait_for(|count| *count == 0))
            .await
            .is_ok()
        {
            return 0;
        }
        let left = self.pending();
        warn!(pending = left, "abandoning queued server assessments at shutdown");
        left
    }
}
