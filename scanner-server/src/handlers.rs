//! Request handlers.
//!
//! POST   /analyze-composition            start (or join) an analysis
//! POST   /analyze-composition/batch      start several independent analyses
//! DELETE /analyze-composition/:key_id    cancel the run in flight
//! GET    /composition-results            latest run per composition
//! GET    /composition-results/:key_id    latest full run
//! GET    /composition-results/:key_id/history
//! POST   /analyze                        assess one server
//! POST   /analyze-all                    queue every configured server
//! GET    /results                        archived server assessments
//! GET    /status                         runs in flight, assessment queue
//! GET    /                               service info

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use scanner_kernel::{
    ErrorKind, InFlightRun, QueuedAssessment, RunState, Submission, SubmitRequest,
};
use scanner_primitives::{AnalysisRun, AssessmentSummary, KeyId, RunId, RunSummary, ServerName};
use scanner_telemetry::health::HealthSnapshot;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// Query string of `POST /analyze-composition` and `POST /analyze`.
#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeQuery {
    /// Block until the run finishes and return it.
    #[serde(default)]
    pub wait: bool,
}

/// Body of `POST /analyze-composition/batch`.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    /// Independent submissions.
    pub submissions: Vec<SubmitRequest>,
}

/// Body of `POST /analyze`.
#[derive(Debug, Deserialize)]
pub struct AssessRequest {
    /// Server resolved through the configured collector.
    pub server_name: String,
}

#[derive(Debug, Serialize)]
struct QueuedBody {
    request_id: String,
    status: &'static str,
    server: ServerName,
    message: String,
}

impl From<QueuedAssessment> for QueuedBody {
    fn from(queued: QueuedAssessment) -> Self {
        Self {
            message: format!("assessment of {} has been queued", queued.server),
            request_id: queued.request_id,
            status: "queued",
            server: queued.server,
        }
    }
}

#[derive(Debug, Serialize)]
struct QueuedListBody {
    results: Vec<QueuedBody>,
}

#[derive(Debug, Serialize)]
struct AssessmentsBody {
    results: Vec<AssessmentSummary>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum SubmissionStatus {
    Started,
    InProgress,
}

#[derive(Debug, Serialize)]
struct SubmissionBody {
    status: SubmissionStatus,
    key_id: KeyId,
    run_id: RunId,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<RunState>,
}

impl From<&Submission> for SubmissionBody {
    fn from(submission: &Submission) -> Self {
        Self {
            status: if submission.is_in_progress() {
                SubmissionStatus::InProgress
            } else {
                SubmissionStatus::Started
            },
            key_id: submission.key_id().clone(),
            run_id: submission.run_id(),
            state: submission.handle().state(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum BatchEntry {
    Accepted(SubmissionBody),
    Rejected(ErrorBody),
}

#[derive(Debug, Serialize)]
struct BatchBody {
    results: Vec<BatchEntry>,
}

#[derive(Debug, Serialize)]
struct ResultsBody {
    results: Vec<RunSummary>,
}

#[derive(Debug, Serialize)]
struct HistoryBody {
    key_id: KeyId,
    runs: Vec<AnalysisRun>,
}

#[derive(Debug, Serialize)]
struct CancelBody {
    status: &'static str,
    key_id: KeyId,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    in_flight: usize,
    runs: Vec<InFlightRun>,
    assessments_queued: usize,
    assessing: bool,
}

fn parse_key_id(raw: &str) -> Result<KeyId, ApiError> {
    raw.parse::<KeyId>()
        .map_err(|err| ApiError::invalid_request(err.to_string()))
}

fn ensure_accepting(state: &AppState) -> Result<(), ApiError> {
    if state.is_draining() {
        return Err(ApiError::new(ErrorKind::Unavailable, "service is shutting down"));
    }
    Ok(())
}

/// `POST /analyze-composition`
pub async fn analyze(
    State(state): State<AppState>,
    query: Result<Query<AnalyzeQuery>, QueryRejection>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let Json(request) = payload?;
    ensure_accepting(&state)?;

    let submission = state.service().submit(request).await?;
    if query.wait {
        let run = submission.into_handle().wait().await?;
        return Ok((StatusCode::OK, Json(run)).into_response());
    }
    let status = if submission.is_in_progress() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(SubmissionBody::from(&submission))).into_response())
}

/// `POST /analyze-composition/batch`
pub async fn analyze_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(batch) = payload?;
    ensure_accepting(&state)?;
    if batch.submissions.is_empty() {
        return Err(ApiError::invalid_request("batch contains no submissions"));
    }

    let results = state
        .service()
        .submit_batch(batch.submissions)
        .await
        .iter()
        .map(|result| match result {
            Ok(submission) => BatchEntry::Accepted(SubmissionBody::from(submission)),
            Err(err) => BatchEntry::Rejected(ApiError::from(err).body()),
        })
        .collect();
    Ok((StatusCode::OK, Json(BatchBody { results })).into_response())
}

/// `DELETE /analyze-composition/:key_id`
pub async fn cancel(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
) -> Result<Response, ApiError> {
    let key_id = parse_key_id(&key_id)?;
    if !state.service().cancel(&key_id) {
        return Err(ApiError::new(
            ErrorKind::NotFound,
            format!("no analysis in flight for composition {key_id}"),
        ));
    }
    info!(key_id = %key_id.short(), "cancellation accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelBody {
            status: "cancelling",
            key_id,
        }),
    )
        .into_response())
}

/// `GET /composition-results`
pub async fn list_results(State(state): State<AppState>) -> Result<Response, ApiError> {
    let results = state.service().list().await?;
    Ok(Json(ResultsBody { results }).into_response())
}

/// `GET /composition-results/:key_id`
pub async fn latest_result(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
) -> Result<Json<AnalysisRun>, ApiError> {
    let key_id = parse_key_id(&key_id)?;
    Ok(Json(state.service().get(&key_id).await?))
}

/// `GET /composition-results/:key_id/history`
pub async fn result_history(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
) -> Result<Response, ApiError> {
    let key_id = parse_key_id(&key_id)?;
    let runs = state.service().history(&key_id).await?;
    Ok(Json(HistoryBody { key_id, runs }).into_response())
}

/// `POST /analyze`
pub async fn assess(
    State(state): State<AppState>,
    query: Result<Query<AnalyzeQuery>, QueryRejection>,
    payload: Result<Json<AssessRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let Json(request) = payload?;
    ensure_accepting(&state)?;
    let server = ServerName::new(request.server_name)
        .map_err(|err| ApiError::invalid_request(err.to_string()))?;

    if query.wait {
        let saved = state.assessor().assess(&server).await?;
        return Ok((StatusCode::OK, Json(saved)).into_response());
    }
    let mut queued = state.assessor().enqueue(vec![server]);
    let Some(queued) = queued.pop() else {
        return Err(ApiError::new(ErrorKind::Internal, "assessment was not queued"));
    };
    Ok((StatusCode::ACCEPTED, Json(QueuedBody::from(queued))).into_response())
}

/// `POST /analyze-all`
pub async fn assess_all(State(state): State<AppState>) -> Result<Response, ApiError> {
    ensure_accepting(&state)?;
    let results = state
        .assessor()
        .enqueue_all()?
        .into_iter()
        .map(QueuedBody::from)
        .collect();
    Ok((StatusCode::ACCEPTED, Json(QueuedListBody { results })).into_response())
}

/// `GET /results`
pub async fn list_assessments(State(state): State<AppState>) -> Result<Response, ApiError> {
    let results = state.assessor().list().await?;
    Ok(Json(AssessmentsBody { results }).into_response())
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Response {
    let runs = state.service().status();
    let assessor = state.assessor();
    Json(StatusBody {
        in_flight: runs.len(),
        runs,
        assessments_queued: assessor.pending(),
        assessing: assessor.is_processing(),
    })
    .into_response()
}

/// `GET /`
pub async fn info(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.health())
}
