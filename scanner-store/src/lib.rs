//! Persistence for composition analysis runs and per-server assessments.
//!
//! Every backend implements [`AnalysisStore`]. [`VolatileStore`] keeps runs in
//! memory; [`FileStore`] writes one JSON document per run. Assessments go
//! through [`AssessmentStore`], backed by [`AssessmentArchive`] on disk.

#![warn(missing_docs, clippy::pedantic)]

mod archive;
mod error;
mod file;
mod store;
mod volatile;

pub use archive::AssessmentArchive;
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use store::{AnalysisStore, AssessmentStore};
pub use volatile::VolatileStore;
