//! Reasoning oracle boundary for composition analysis.
//!
//! The [`ReasoningOracle`] trait is the pluggable capability set
//! (`classify`, `detect_surpluses`, `assess_server`). [`OracleGateway`] wraps
//! any oracle with a per-call deadline, bounded retries on contract
//! violations, and a semantic check of every answer. [`LlmOracle`] speaks to a language model through a
//! model adapter; [`RuleBasedOracle`] is a deterministic stand-in.

#![warn(missing_docs, clippy::pedantic)]

pub mod contract;
mod error;
mod gateway;
mod intent;
mod llm;
mod mapper;
mod oracle;
pub mod prompt;
mod rule_based;
pub mod template;

pub use error::{OracleError, OracleResult};
pub use gateway::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RETRIES, GatewayConfig, OracleGateway};
pub use llm::{LlmOracle, LlmOracleConfig};
pub use intent::review_declarations;
pub use mapper::HeuristicMapper;
pub use oracle::{OracleDescriptor, OracleRequest, ReasoningOracle};
pub use rule_based::{RuleBasedOracle, SurplusRule, default_rules};
