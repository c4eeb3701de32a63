//! Aggregation and governance policy for composition findings.
//!
//! [`Aggregator`] unions per-group fragments into one deduplicated analysis
//! and scores it with a [`RiskPolicy`]. [`decide`] maps the surviving
//! surpluses onto a governance action plus constraint recommendations;
//! [`score_server`] does the same for a single server's assessment.

#![warn(missing_docs, clippy::pedantic)]

mod aggregate;
mod constraints;
mod decision;
mod risk;

pub use aggregate::{Aggregator, merge_fragments};
pub use constraints::recommend_constraints;
pub use decision::{GovernanceDecision, decide, score_server};
pub use risk::{PolicyError, PolicyResult, RiskPolicy};
