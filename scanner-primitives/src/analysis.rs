//! Analysis results and persisted runs.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityClass, CapabilityVector, Confidence};
use crate::composition::{CompositionKey, ServerSet};
use crate::finding::{AttackChain, CompositionSurplus, RiskScore, Severity};
use crate::ids::{KeyId, RunId};
use crate::tool::ToolRef;

/// Governance action recommended for a composition.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceAction {
    /// No surplus found; the composition may be authorized as-is.
    Allow,
    /// At least one Critical surplus; the composition must not be authorized.
    Block,
    /// Authorize only with the recommended constraints in force.
    AllowWithConstraints,
}

impl Display for GovernanceAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "ALLOW",
            Self::Block => "BLOCK",
            Self::AllowWithConstraints => "ALLOW_WITH_CONSTRAINTS",
        })
    }
}

/// Capability vectors keyed by tool, with optional per-class confidence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ToolCapabilities>", into = "Vec<ToolCapabilities>")]
pub struct CapabilityMap {
    classes: BTreeMap<ToolRef, CapabilityVector>,
    confidence: BTreeMap<ToolRef, BTreeMap<CapabilityClass, Confidence>>,
}

impl CapabilityMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges classes into the tool's vector.
    pub fn merge(&mut self, tool: ToolRef, classes: &CapabilityVector) {
        self.classes.entry(tool).or_default().union_with(classes);
    }

    /// Adds a class with a confidence; the higher confidence is kept.
    pub fn merge_rated(&mut self, tool: ToolRef, class: CapabilityClass, confidence: Confidence) {
        self.classes.entry(tool.clone()).or_default().insert(class.clone());
        let rated = self.confidence.entry(tool).or_default().entry(class).or_insert(confidence);
        *rated = (*rated).max(confidence);
    }

    /// Merges every entry of `other`.
    pub fn merge_all(&mut self, other: &Self) {
        for (tool, classes) in &other.classes {
            self.merge(tool.clone(), classes);
        }
        for (tool, rated) in &other.confidence {
            for (class, confidence) in rated {
                self.merge_rated(tool.clone(), class.clone(), *confidence);
            }
        }
    }

    /// Returns the vector assigned to a tool.
    #[must_use]
    pub fn get(&self, tool: &ToolRef) -> Option<&CapabilityVector> {
        self.classes.get(tool)
    }

    /// Returns the confidence recorded for a tool's class, if any.
    #[must_use]
    pub fn confidence(&self, tool: &ToolRef, class: &CapabilityClass) -> Option<Confidence> {
        self.confidence.get(tool)?.get(class).copied()
    }

    /// Iterates over entries in tool order.
    pub fn iter(&self) -> impl Iterator<Item = (&ToolRef, &CapabilityVector)> {
        self.classes.iter()
    }

    /// Number of tools with an entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if no tool has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl FromIterator<(ToolRef, CapabilityVector)> for CapabilityMap {
    fn from_iter<I: IntoIterator<Item = (ToolRef, CapabilityVector)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (tool, classes) in iter {
            map.merge(tool, &classes);
        }
        map
    }
}

/// Wire entry of a [`CapabilityMap`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCapabilities {
    /// Tool the classes belong to.
    #[serde(flatten)]
    pub tool: ToolRef,
    /// Assigned classes.
    pub classes: CapabilityVector,
    /// Confidence per class, where the oracle gave one.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub confidence: BTreeMap<CapabilityClass, Confidence>,
}

impl From<Vec<ToolCapabilities>> for CapabilityMap {
    fn from(value: Vec<ToolCapabilities>) -> Self {
        let mut map = Self::new();
        for entry in value {
            map.merge(entry.tool.clone(), &entry.classes);
            for (class, confidence) in entry.confidence {
                map.merge_rated(entry.tool.clone(), class, confidence);
            }
        }
        map
    }
}

impl From<CapabilityMap> for Vec<ToolCapabilities> {
    fn from(value: CapabilityMap) -> Self {
        let CapabilityMap {
            classes,
            mut confidence,
        } = value;
        classes
            .into_iter()
            .map(|(tool, classes)| ToolCapabilities {
                confidence: confidence.remove(&tool).unwrap_or_default(),
                tool,
                classes,
            })
            .collect()
    }
}

/// Unscored findings produced by one oracle call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFragment {
    /// Capability vectors per tool.
    #[serde(default)]
    pub capability_vectors: CapabilityMap,
    /// Emergent capabilities found.
    #[serde(default)]
    pub surpluses: Vec<CompositionSurplus>,
    /// Attack chains realizing the surpluses.
    #[serde(default)]
    pub attack_chains: Vec<AttackChain>,
    /// What a per-tool or per-server review would miss.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub governance_blind_spots: Vec<String>,
    /// Risks that arise specifically from crossing server boundaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_server_risk_summary: Option<String>,
}

/// Severity counts across a surplus set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityHistogram {
    /// Number of Low surpluses.
    pub low: usize,
    /// Number of Medium surpluses.
    pub medium: usize,
    /// Number of High surpluses.
    pub high: usize,
    /// Number of Critical surpluses.
    pub critical: usize,
    /// Number of surpluses spanning at least two servers.
    pub cross_server: usize,
}

impl SeverityHistogram {
    /// Counts the supplied surpluses.
    pub fn from_surpluses<'a, I>(surpluses: I) -> Self
    where
        I: IntoIterator<Item = &'a CompositionSurplus>,
    {
        let mut histogram = Self::default();
        for surplus in surpluses {
            match surplus.severity() {
                Severity::Low => histogram.low += 1,
                Severity::Medium => histogram.medium += 1,
                Severity::High => histogram.high += 1,
                Severity::Critical => histogram.critical += 1,
            }
            if surplus.is_cross_server() {
                histogram.cross_server += 1;
            }
        }
        histogram
    }

    /// Returns the count for a severity.
    #[must_use]
    pub const fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }

    /// Total number of surpluses.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.low + self.medium + self.high + self.critical
    }
}

/// Scored, merged analysis of one composition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionAnalysis {
    capability_vectors: CapabilityMap,
    surpluses: Vec<CompositionSurplus>,
    attack_chains: Vec<AttackChain>,
    risk_score: RiskScore,
    recommended_action: GovernanceAction,
    constraints: Vec<String>,
    histogram: SeverityHistogram,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    governance_blind_spots: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cross_server_risk_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rationale: Option<String>,
}

impl CompositionAnalysis {
    /// Assembles an analysis from merged findings and their scoring.
    #[must_use]
    pub fn new(
        findings: AnalysisFragment,
        risk_score: RiskScore,
        recommended_action: GovernanceAction,
        constraints: Vec<String>,
    ) -> Self {
        let histogram = SeverityHistogram::from_surpluses(&findings.surpluses);
        Self {
            capability_vectors: findings.capability_vectors,
            surpluses: findings.surpluses,
            attack_chains: findings.attack_chains,
            risk_score,
            recommended_action,
            constraints,
            histogram,
            governance_blind_spots: findings.governance_blind_spots,
            cross_server_risk_summary: findings.cross_server_risk_summary,
            rationale: None,
        }
    }

    /// Attaches the reason behind the recommended action.
    #[must_use]
    pub fn with_rationale(mut self, rationale: Option<String>) -> Self {
        self.rationale = rationale;
        self
    }

    /// Capability vectors per tool.
    #[must_use]
    pub fn capability_vectors(&self) -> &CapabilityMap {
        &self.capability_vectors
    }

    /// Deduplicated surpluses.
    #[must_use]
    pub fn surpluses(&self) -> &[CompositionSurplus] {
        &self.surpluses
    }

    /// Deduplicated attack chains.
    #[must_use]
    pub fn attack_chains(&self) -> &[AttackChain] {
        &self.attack_chains
    }

    /// Aggregate risk.
    #[must_use]
    pub const fn risk_score(&self) -> RiskScore {
        self.risk_score
    }

    /// Recommended governance action.
    #[must_use]
    pub const fn recommended_action(&self) -> GovernanceAction {
        self.recommended_action
    }

    /// Constraint recommendations, one or more per surplus, deduplicated.
    #[must_use]
    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }

    /// Severity counts.
    #[must_use]
    pub const fn histogram(&self) -> SeverityHistogram {
        self.histogram
    }

    /// Governance blind spots, sorted and deduplicated.
    #[must_use]
    pub fn governance_blind_spots(&self) -> &[String] {
        &self.governance_blind_spots
    }

    /// Summary of cross-server risk, if the oracle gave one.
    #[must_use]
    pub fn cross_server_risk_summary(&self) -> Option<&str> {
        self.cross_server_risk_summary.as_deref()
    }

    /// Why the recommended action was chosen.
    #[must_use]
    pub fn rationale(&self) -> Option<&str> {
        self.rationale.as_deref()
    }

    /// Returns the unscored findings, for re-merging.
    #[must_use]
    pub fn to_fragment(&self) -> AnalysisFragment {
        AnalysisFragment {
            capability_vectors: self.capability_vectors.clone(),
            surpluses: self.surpluses.clone(),
            attack_chains: self.attack_chains.clone(),
            governance_blind_spots: self.governance_blind_spots.clone(),
            cross_server_risk_summary: self.cross_server_risk_summary.clone(),
        }
    }
}

/// Why a candidate group produced no result.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The oracle call exceeded its deadline.
    Timeout,
    /// The oracle could not be reached.
    Unavailable,
    /// The oracle kept returning output that violates the contract.
    ContractViolation,
    /// The provider refused the request outright.
    Rejected,
    /// The group was cancelled after another group aborted the run.
    Cancelled,
}

/// Candidate group whose oracle call did not produce a result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFailure {
    /// Tools in the failed group.
    pub tools: Vec<ToolRef>,
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
}

/// Completeness of a persisted run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every candidate group was evaluated.
    Complete,
    /// Some groups failed; the analysis covers the rest.
    Incomplete,
    /// The run was aborted after a contract violation; partial findings only.
    Aborted,
}

/// How and when a run was produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
    /// Number of tool declarations analysed.
    pub tool_count: usize,
    /// Number of candidate groups in the search space.
    pub groups_enumerated: usize,
    /// Number of candidate groups whose oracle call succeeded.
    pub groups_evaluated: usize,
    /// Oracle identifier, `provider/model`.
    pub oracle_model: String,
    /// Sampling temperature the oracle was configured with.
    pub temperature: f32,
}

/// Immutable record of one analysis of a composition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    run_id: RunId,
    key_id: KeyId,
    key: CompositionKey,
    servers: ServerSet,
    status: RunStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    failed_groups: Vec<GroupFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    abort_reason: Option<String>,
    analysis: CompositionAnalysis,
    provenance: Provenance,
}

impl AnalysisRun {
    /// Creates a complete run.
    #[must_use]
    pub fn new(key: CompositionKey, analysis: CompositionAnalysis, provenance: Provenance) -> Self {
        Self {
            run_id: RunId::random(),
            key_id: key.id().clone(),
            servers: key.servers(),
            key,
            status: RunStatus::Complete,
            failed_groups: Vec::new(),
            abort_reason: None,
            analysis,
            provenance,
        }
    }

    /// Marks the run incomplete because of the supplied failed groups.
    #[must_use]
    pub fn with_failures(mut self, failed_groups: Vec<GroupFailure>) -> Self {
        if !failed_groups.is_empty() && self.status == RunStatus::Complete {
            self.status = RunStatus::Incomplete;
        }
        self.failed_groups = failed_groups;
        self
    }

    /// Marks the run aborted with a reason.
    #[must_use]
    pub fn aborted(mut self, reason: impl Into<String>) -> Self {
        self.status = RunStatus::Aborted;
        self.abort_reason = Some(reason.into());
        self
    }

    /// Overrides the run identifier.
    #[must_use]
    pub const fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Run identifier.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Identity of the analysed composition.
    #[must_use]
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Analysed composition.
    #[must_use]
    pub fn key(&self) -> &CompositionKey {
        &self.key
    }

    /// Servers spanned by the composition.
    #[must_use]
    pub fn servers(&self) -> &ServerSet {
        &self.servers
    }

    /// Run completeness.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// `true` unless every candidate group was evaluated.
    #[must_use]
    pub fn incomplete(&self) -> bool {
        self.status != RunStatus::Complete
    }

    /// Groups that produced no result.
    #[must_use]
    pub fn failed_groups(&self) -> &[GroupFailure] {
        &self.failed_groups
    }

    /// Why the run was aborted, if it was.
    #[must_use]
    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Merged, scored analysis.
    #[must_use]
    pub fn analysis(&self) -> &CompositionAnalysis {
        &self.analysis
    }

    /// Provenance fields.
    #[must_use]
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Returns the listing summary for this run.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            key_id: self.key_id.clone(),
            run_id: self.run_id,
            servers: self.servers.clone(),
            risk_score: self.analysis.risk_score(),
            recommended_action: self.analysis.recommended_action(),
            surpluses: self.analysis.surpluses().len(),
            cross_server: self.analysis.histogram().cross_server,
            status: self.status,
            completed_at: self.provenance.completed_at,
        }
    }
}

/// Listing entry for a stored run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Composition identity.
    pub key_id: KeyId,
    /// Run identifier.
    pub run_id: RunId,
    /// Servers spanned.
    pub servers: ServerSet,
    /// Aggregate risk.
    pub risk_score: RiskScore,
    /// Recommended action.
    pub recommended_action: GovernanceAction,
    /// Number of surpluses.
    pub surpluses: usize,
    /// Number of cross-server surpluses.
    pub cross_server: usize,
    /// Run completeness.
    pub status: RunStatus,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
}
