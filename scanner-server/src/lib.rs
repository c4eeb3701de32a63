//! HTTP control plane for the composition scanner.
//!
//! The binary wires configuration, tracing, the oracle, the store, and the
//! analysis service together; this library holds the router so it can be
//! exercised in-process.

#![warn(missing_docs, clippy::pedantic)]

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::{ApiError, ErrorBody, ErrorDetail, status_for};
pub use router::build_router;
pub use state::{AppState, SERVICE_NAME};
