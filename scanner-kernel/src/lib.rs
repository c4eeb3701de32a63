//! Composition analysis pipeline and control-plane service.
//!
//! A submission names the servers of a composition. The service collects
//! their tool declarations, derives the composition key, and either joins the
//! run already in flight for that key or starts a new one. A run classifies
//! the tools, enumerates candidate groups, fans the groups out to the
//! reasoning oracle under a bounded scheduler, merges the fragments, and
//! persists the scored analysis.
//!
//! [`ServerAssessor`] reviews single servers for manipulative declarations,
//! one at a time, and archives each assessment.

#![warn(missing_docs, clippy::pedantic)]

mod assess;
mod collector;
mod error;
mod lifecycle;
mod pipeline;
mod registry;
mod scheduler;
mod search;
mod service;

pub use assess::{QueuedAssessment, SavedAssessment, ServerAssessor};
pub use collector::{
    CollectionError, CollectionResult, DirectoryCollector, FileCollector, ServerSource,
    ToolCollector, parse_declarations, server_name_for,
};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use lifecycle::{LifecycleError, LifecycleResult, RunEvent, RunLifecycle, RunState};
pub use pipeline::{AnalysisPipeline, BatchStrategy, PipelineOptions, RunInput};
pub use registry::{
    Begin, InFlightRegistry, InFlightRun, RunGuard, RunHandle, RunOutcome, RunProgress,
};
pub use scheduler::{
    DEFAULT_MAX_CONCURRENCY, SchedulerConfig, SchedulerError, SchedulerResult, TaskScheduler,
};
pub use search::{
    CandidateGroup, ClassifiedOnly, DEFAULT_MAX_GROUPS, SearchConfig, SearchError,
    SearchGenerator, SearchMode, SearchPrefilter, SearchResult, SearchSpace, pair_count,
};
pub use service::{AnalysisService, Submission, SubmitRequest};
