//! Router construction.

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the control-plane router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::info))
        .route("/status", get(handlers::status))
        .route("/analyze", post(handlers::assess))
        .route("/analyze-all", post(handlers::assess_all))
        .route("/results", get(handlers::list_assessments))
        .route("/analyze-composition", post(handlers::analyze))
        .route("/analyze-composition/batch", post(handlers::analyze_batch))
        .route("/analyze-composition/:key_id", delete(handlers::cancel))
        .route("/composition-results", get(handlers::list_results))
        .route("/composition-results/:key_id", get(handlers::latest_result))
        .route(
            "/composition-results/:key_id/history",
            get(handlers::result_history),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
