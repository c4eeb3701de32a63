//! Core shared types for composition analysis.
//!
//! Everything that crosses a crate boundary in the scanner lives here: tool
//! declarations, capability classes, composition keys, findings, per-server
//! assessments, and the persisted shape of an analysis run.

#![warn(missing_docs, clippy::pedantic)]

mod analysis;
mod assessment;
mod capability;
mod composition;
mod error;
mod finding;
mod ids;
mod tool;

/// Merged analyses, runs, and listing summaries.
pub use analysis::{
    AnalysisFragment, AnalysisRun, CapabilityMap, CompositionAnalysis, FailureKind,
    GovernanceAction, GroupFailure, Provenance, RunStatus, RunSummary, SeverityHistogram,
    ToolCapabilities,
};
/// Per-server intent assessments.
pub use assessment::{
    AssessmentSummary, AttackPath, IssueCategory, OverlappingFunctionality, PredictedPrecedence,
    ServerAssessment, ServerFindings, ToolAssessment,
};
/// Capability taxonomy.
pub use capability::{CapabilityClass, CapabilityVector, Confidence};
/// Composition identity.
pub use composition::{CompositionKey, ServerSet};
/// Error type and result alias shared across the scanner.
pub use error::{Error, Result};
/// Surpluses, attack chains, and severities.
pub use finding::{
    AttackChain, AttackStep, CompositionSurplus, RiskScore, Severity, SurplusBuilder, union_lines,
};
/// Identifiers.
pub use ids::{KeyId, RunId};
/// Tool declarations.
pub use tool::{McpTool, ServerName, ToolDeclaration, ToolRef};
