//! Errors surfaced by the analysis pipeline and control-plane service.

use scanner_oracle::OracleError;
use scanner_primitives::{FailureKind, GroupFailure, KeyId, RunId};
use scanner_store::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::collector::CollectionError;
use crate::lifecycle::LifecycleError;
use crate::scheduler::SchedulerError;
use crate::search::SearchError;

/// Coarse error classification exposed to control-plane clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Declarations could not be collected.
    Collection,
    /// The candidate search space exceeded its bound or was unusable.
    SearchSpace,
    /// The oracle kept violating its output contract.
    ContractViolation,
    /// Oracle calls exceeded their deadline.
    Timeout,
    /// The oracle could not be reached.
    Unavailable,
    /// The request was malformed.
    InvalidRequest,
    /// The requested composition has no stored run, or there is nothing to
    /// assess.
    NotFound,
    /// Persistence failed.
    Store,
    /// The run was cancelled.
    Cancelled,
    /// Unexpected internal failure.
    Internal,
}

/// Errors produced while running an analysis.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Declarations could not be collected.
    #[error(transparent)]
    Collection(#[from] CollectionError),
    /// The search space could not be generated.
    #[error(transparent)]
    Search(#[from] SearchError),
    /// The submission was malformed.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Description of the problem.
        reason: String,
    },
    /// The oracle violated its contract; remaining groups were cancelled.
    #[error(
        "oracle contract violated for {group} after {attempts} attempt(s): {reason}"
    )]
    ContractViolation {
        /// Group whose call failed.
        group: String,
        /// Attempts made.
        attempts: u32,
        /// Last violation.
        reason: String,
        /// Aborted run persisted with the partial findings, if any group had
        /// completed.
        partial_run: Option<RunId>,
    },
    /// No candidate group produced a result.
    #[error("all {} candidate group(s) failed", failures.len())]
    AllGroupsFailed {
        /// Every failure, in group order.
        failures: Vec<GroupFailure>,
    },
    /// The oracle rejected a request outright.
    #[error(transparent)]
    Oracle(#[from] OracleError),
    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The lifecycle rejected a transition.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The scheduler refused work.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// No stored run exists for the composition.
    #[error("no analysis stored for composition {key_id}")]
    NotFound {
        /// Requested composition.
        key_id: KeyId,
    },
    /// The collector knows no servers to assess.
    #[error("no servers are configured")]
    NoServers,
    /// The run was cancelled before completion.
    #[error("analysis cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Helper to construct invalid-request errors from string-like values.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Returns the client-facing classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Collection(_) => ErrorKind::Collection,
            Self::Search(SearchError::SearchSpaceTooLarge { .. } | SearchError::InsufficientServers { .. }) => {
                ErrorKind::SearchSpace
            }
            Self::Search(_) | Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::ContractViolation { .. } => ErrorKind::ContractViolation,
            Self::AllGroupsFailed { failures } => {
                if failures.iter().all(|failure| failure.kind == FailureKind::Timeout) {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Unavailable
                }
            }
            Self::Oracle(err) => match err {
                OracleError::Timeout { .. } => ErrorKind::Timeout,
                OracleError::Unavailable { .. } => ErrorKind::Unavailable,
                OracleError::ContractViolation { .. } => ErrorKind::ContractViolation,
                OracleError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            },
            Self::Store(_) => ErrorKind::Store,
            Self::NotFound { .. } | Self::NoServers => ErrorKind::NotFound,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Lifecycle(_) | Self::Scheduler(_) => ErrorKind::Internal,
        }
    }
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
