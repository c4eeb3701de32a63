//! The pluggable reasoning oracle boundary.

use std::fmt;

use async_trait::async_trait;
use scanner_primitives::{
    AnalysisFragment, CapabilityMap, CompositionKey, ServerFindings, ServerName, ToolDeclaration,
    ToolRef,
};
use serde::Serialize;

use crate::error::{OracleError, OracleResult};
use crate::intent::review_declarations;

/// Identifies the reasoning service behind an oracle, for run provenance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OracleDescriptor {
    /// Provider identifier, e.g. `openai` or `rule-based`.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature the oracle is pinned to.
    pub temperature: f32,
}

impl OracleDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature,
        }
    }
}

impl fmt::Display for OracleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// One candidate group of a composition, as handed to the oracle.
///
/// `tools` is the group under evaluation and always a subset of `key`; the key
/// names the whole composition the group belongs to.
#[derive(Clone, Debug)]
pub struct OracleRequest {
    key: CompositionKey,
    tools: Vec<ToolDeclaration>,
    capability_vectors: Option<CapabilityMap>,
}

impl OracleRequest {
    /// Builds a request for `tools` within `key`.
    ///
    /// Tools are sorted by reference and deduplicated.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::InvalidRequest`] when fewer than two distinct
    /// tools are supplied or a tool lies outside the composition.
    pub fn new(key: CompositionKey, mut tools: Vec<ToolDeclaration>) -> OracleResult<Self> {
        tools.sort_by(|a, b| a.tool_ref().cmp(b.tool_ref()));
        tools.dedup_by(|a, b| a.tool_ref() == b.tool_ref());
        if tools.len() < 2 {
            return Err(OracleError::invalid_request(
                "a candidate group needs at least two tools",
            ));
        }
        if let Some(stray) = tools.iter().find(|tool| !key.contains(tool.tool_ref())) {
            return Err(OracleError::invalid_request(format!(
                "tool {} is not part of composition {}",
                stray.tool_ref(),
                key.id().short()
            )));
        }
        Ok(Self {
            key,
            tools,
            capability_vectors: None,
        })
    }

    /// Attaches precomputed capability vectors, keeping only this group's tools.
    #[must_use]
    pub fn with_capability_vectors(mut self, vectors: &CapabilityMap) -> Self {
        let scoped = vectors
            .iter()
            .filter(|(tool, _)| self.contains(tool))
            .map(|(tool, classes)| (tool.clone(), classes.clone()))
            .collect();
        self.capability_vectors = Some(scoped);
        self
    }

    /// Returns the composition this group belongs to.
    #[must_use]
    pub fn key(&self) -> &CompositionKey {
        &self.key
    }

    /// Returns the group's declarations in canonical order.
    #[must_use]
    pub fn tools(&self) -> &[ToolDeclaration] {
        &self.tools
    }

    /// Returns the precomputed capability vectors, if any.
    #[must_use]
    pub fn capability_vectors(&self) -> Option<&CapabilityMap> {
        self.capability_vectors.as_ref()
    }

    /// Returns `true` if the group contains `tool`.
    #[must_use]
    pub fn contains(&self, tool: &ToolRef) -> bool {
        self.tools.iter().any(|decl| decl.tool_ref() == tool)
    }

    /// Returns the distinct servers of the group, in order.
    #[must_use]
    pub fn servers(&self) -> Vec<&ServerName> {
        let mut servers: Vec<&ServerName> =
            self.tools.iter().map(ToolDeclaration::server_name).collect();
        servers.dedup();
        servers
    }

    /// Returns the group's tool references.
    #[must_use]
    pub fn tool_refs(&self) -> Vec<ToolRef> {
        self.tools.iter().map(|decl| decl.tool_ref().clone()).collect()
    }
}

/// Capability set every reasoning oracle offers.
///
/// Implementations may be backed by a language model or by deterministic
/// rules; the gateway treats both the same way.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Describes the backing service.
    fn descriptor(&self) -> OracleDescriptor;

    /// Assigns capability classes to each tool.
    async fn classify(&self, tools: &[ToolDeclaration]) -> OracleResult<CapabilityMap>;

    /// Detects composition surpluses within one candidate group.
    async fn detect_surpluses(&self, request: &OracleRequest) -> OracleResult<AnalysisFragment>;

    /// Reviews the declarations of a single server for manipulation and
    /// dangerous affordances.
    ///
    /// The default classifies the tools and applies the keyword review.
    async fn assess_server(
        &self,
        _server: &ServerName,
        tools: &[ToolDeclaration],
    ) -> OracleResult<ServerFindings> {
        let classes = self.classify(tools).await?;
        Ok(review_declarations(tools, &classes))
    }
}
