//! Findings reported for a composition: surpluses and attack chains.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityClass;
use crate::error::{Error, Result};
use crate::tool::ToolRef;

/// Ordered severity of a single finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Minor emergent capability.
    Low,
    /// Noticeable emergent capability that warrants monitoring.
    Medium,
    /// Serious emergent capability.
    High,
    /// Emergent capability that must not be co-authorized.
    Critical,
}

impl Severity {
    /// All severities from lowest to highest.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate risk of a composition.
///
/// `None` is reserved for analyses without surpluses under the default policy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum RiskScore {
    /// No surplus was found.
    #[default]
    None,
    /// Highest finding is Low.
    Low,
    /// Highest finding is Medium.
    Medium,
    /// Highest finding is High.
    High,
    /// At least one Critical finding.
    Critical,
}

impl RiskScore {
    /// Returns the maximum severity of the supplied findings, or `None`.
    pub fn max_of<I>(severities: I) -> Self
    where
        I: IntoIterator<Item = Severity>,
    {
        severities.into_iter().max().map_or(Self::None, Self::from)
    }
}

impl From<Severity> for RiskScore {
    fn from(value: Severity) -> Self {
        match value {
            Severity::Low => Self::Low,
            Severity::Medium => Self::Medium,
            Severity::High => Self::High,
            Severity::Critical => Self::Critical,
        }
    }
}

impl Display for RiskScore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Low => f.write_str("Low"),
            Self::Medium => f.write_str("Medium"),
            Self::High => f.write_str("High"),
            Self::Critical => f.write_str("Critical"),
        }
    }
}

/// Emergent capability present only when the involved tools are composed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSurplus")]
pub struct CompositionSurplus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    involved_tools: BTreeSet<ToolRef>,
    severity: Severity,
    emergent_capability: String,
    capability_class: CapabilityClass,
    governance_gap: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    environment_conditions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reasoning: Option<String>,
    cross_server: bool,
}

impl CompositionSurplus {
    /// Starts building a surplus for the supplied tools and capability class.
    pub fn builder<I>(involved_tools: I, capability_class: CapabilityClass) -> SurplusBuilder
    where
        I: IntoIterator<Item = ToolRef>,
    {
        SurplusBuilder {
            label: None,
            involved_tools: involved_tools.into_iter().collect(),
            capability_class,
            severity: Severity::Low,
            emergent_capability: None,
            governance_gap: String::new(),
            environment_conditions: None,
            reasoning: None,
        }
    }

    /// Oracle-assigned label such as `S1`, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Tools whose composition produces the surplus.
    pub fn involved_tools(&self) -> impl Iterator<Item = &ToolRef> {
        self.involved_tools.iter()
    }

    /// Returns the involved tools as a set.
    #[must_use]
    pub fn involved_set(&self) -> &BTreeSet<ToolRef> {
        &self.involved_tools
    }

    /// Finding severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Description of the emergent capability.
    #[must_use]
    pub fn emergent_capability(&self) -> &str {
        &self.emergent_capability
    }

    /// Taxonomy tag of the emergent capability.
    #[must_use]
    pub fn capability_class(&self) -> &CapabilityClass {
        &self.capability_class
    }

    /// Why per-tool or per-server review misses this surplus.
    #[must_use]
    pub fn governance_gap(&self) -> &str {
        &self.governance_gap
    }

    /// Environment conditions under which the surplus materializes.
    #[must_use]
    pub fn environment_conditions(&self) -> Option<&str> {
        self.environment_conditions.as_deref()
    }

    /// How a model would chain the involved tools, if the oracle said.
    #[must_use]
    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    /// `true` iff the involved tools span at least two servers.
    #[must_use]
    pub const fn is_cross_server(&self) -> bool {
        self.cross_server
    }

    /// Returns `true` if `other` describes the same surplus: equal tool sets
    /// and equal capability class.
    #[must_use]
    pub fn is_duplicate_of(&self, other: &Self) -> bool {
        self.capability_class == other.capability_class
            && self.involved_tools == other.involved_tools
    }

    /// Folds a duplicate finding into this one.
    ///
    /// The higher severity wins, along with its emergent capability text (ties
    /// keep the lexicographically smaller text). Governance gap, environment
    /// conditions and reasoning become the union of their distinct lines. The
    /// result does not depend on which side is `self`.
    pub fn absorb(&mut self, other: Self) {
        let take_other = match other.severity.cmp(&self.severity) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => other.emergent_capability < self.emergent_capability,
        };
        if take_other {
            self.severity = other.severity;
            self.emergent_capability = other.emergent_capability;
        }
        self.governance_gap = union_lines([self.governance_gap.as_str(), &other.governance_gap]);
        self.environment_conditions =
            union_optional(self.environment_conditions.take(), other.environment_conditions);
        self.reasoning = union_optional(self.reasoning.take(), other.reasoning);
        self.label = match (self.label.take(), other.label) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Builder for [`CompositionSurplus`].
#[derive(Debug)]
pub struct SurplusBuilder {
    label: Option<String>,
    involved_tools: BTreeSet<ToolRef>,
    capability_class: CapabilityClass,
    severity: Severity,
    emergent_capability: Option<String>,
    governance_gap: String,
    environment_conditions: Option<String>,
    reasoning: Option<String>,
}

impl SurplusBuilder {
    /// Sets the oracle-assigned label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !label.trim().is_empty() {
            self.label = Some(label);
        }
        self
    }

    /// Sets the severity.
    #[must_use]
    pub const fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the emergent capability description.
    #[must_use]
    pub fn emergent_capability(mut self, text: impl Into<String>) -> Self {
        self.emergent_capability = Some(text.into());
        self
    }

    /// Sets the governance gap explanation.
    #[must_use]
    pub fn governance_gap(mut self, text: impl Into<String>) -> Self {
        self.governance_gap = text.into();
        self
    }

    /// Sets the environment conditions.
    #[must_use]
    pub fn environment_conditions(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.environment_conditions = (!text.trim().is_empty()).then_some(text);
        self
    }

    /// Sets the step-by-step reasoning behind the finding.
    #[must_use]
    pub fn reasoning(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.reasoning = (!text.trim().is_empty()).then_some(text);
        self
    }

    /// Finalises the surplus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFinding`] if fewer than two distinct tools are
    /// involved or the emergent capability is missing.
    pub fn build(self) -> Result<CompositionSurplus> {
        if self.involved_tools.len() < 2 {
            return Err(Error::invalid_finding(format!(
                "a surplus needs at least 2 distinct tools, found {}",
                self.involved_tools.len()
            )));
        }
        let emergent_capability = self
            .emergent_capability
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| Error::invalid_finding("emergent capability must be provided"))?;

        let servers = self
            .involved_tools
            .iter()
            .map(ToolRef::server)
            .collect::<BTreeSet<_>>();

        Ok(CompositionSurplus {
            label: self.label,
            cross_server: servers.len() >= 2,
            involved_tools: self.involved_tools,
            severity: self.severity,
            emergent_capability,
            capability_class: self.capability_class,
            governance_gap: union_lines([self.governance_gap.as_str()]),
            environment_conditions: self.environment_conditions.map(|text| union_lines([text.as_str()])),
            reasoning: self.reasoning.map(|text| union_lines([text.as_str()])),
        })
    }
}

#[derive(Deserialize)]
struct RawSurplus {
    #[serde(default)]
    label: Option<String>,
    involved_tools: Vec<ToolRef>,
    severity: Severity,
    emergent_capability: String,
    capability_class: CapabilityClass,
    #[serde(default)]
    governance_gap: String,
    #[serde(default)]
    environment_conditions: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl TryFrom<RawSurplus> for CompositionSurplus {
    type Error = Error;

    fn try_from(raw: RawSurplus) -> Result<Self> {
        let mut builder = Self::builder(raw.involved_tools, raw.capability_class)
            .severity(raw.severity)
            .emergent_capability(raw.emergent_capability)
            .governance_gap(raw.governance_gap);
        if let Some(label) = raw.label {
            builder = builder.label(label);
        }
        if let Some(conditions) = raw.environment_conditions {
            builder = builder.environment_conditions(conditions);
        }
        if let Some(reasoning) = raw.reasoning {
            builder = builder.reasoning(reasoning);
        }
        builder.build()
    }
}

fn union_optional(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(union_lines([
            a.as_deref().unwrap_or_default(),
            b.as_deref().unwrap_or_default(),
        ])),
    }
}

/// Joins the distinct non-empty trimmed lines of `texts`, sorted.
pub fn union_lines<'a, I>(texts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    texts
        .into_iter()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join("\n")
}

/// One invocation within an attack chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackStep {
    tool: ToolRef,
    intent: String,
}

impl AttackStep {
    /// Creates a step.
    #[must_use]
    pub fn new(tool: ToolRef, intent: impl Into<String>) -> Self {
        Self {
            tool,
            intent: intent.into(),
        }
    }

    /// Tool invoked by this step.
    #[must_use]
    pub fn tool(&self) -> &ToolRef {
        &self.tool
    }

    /// What the step achieves within the chain.
    #[must_use]
    pub fn intent(&self) -> &str {
        &self.intent
    }
}

/// Ordered sequence of tool invocations realizing a surplus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackChain {
    name: String,
    steps: Vec<AttackStep>,
    severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    surpluses_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    human_approval_bypass: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mitigation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_capability: Option<String>,
}

impl AttackChain {
    /// Creates a chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFinding`] if the name is empty or there are no
    /// steps.
    pub fn new(name: impl Into<String>, steps: Vec<AttackStep>, severity: Severity) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_finding("attack chain name cannot be empty"));
        }
        if steps.is_empty() {
            return Err(Error::invalid_finding(format!(
                "attack chain `{name}` has no steps"
            )));
        }
        Ok(Self {
            name,
            steps,
            severity,
            surpluses_used: Vec::new(),
            human_approval_bypass: None,
            mitigation: None,
            final_capability: None,
        })
    }

    /// Records the surplus labels this chain realizes.
    #[must_use]
    pub fn with_surpluses_used(mut self, labels: Vec<String>) -> Self {
        self.surpluses_used = labels;
        self
    }

    /// Records how human-in-the-loop approval would fail.
    #[must_use]
    pub fn with_human_approval_bypass(mut self, text: impl Into<String>) -> Self {
        self.human_approval_bypass = Some(text.into());
        self
    }

    /// Records a suggested mitigation.
    #[must_use]
    pub fn with_mitigation(mut self, text: impl Into<String>) -> Self {
        self.mitigation = Some(text.into());
        self
    }

    /// Records the unauthorized capability the chain ends with.
    #[must_use]
    pub fn with_final_capability(mut self, text: impl Into<String>) -> Self {
        self.final_capability = Some(text.into());
        self
    }

    /// Chain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered steps.
    #[must_use]
    pub fn steps(&self) -> &[AttackStep] {
        &self.steps
    }

    /// Chain severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Surplus labels this chain realizes.
    #[must_use]
    pub fn surpluses_used(&self) -> &[String] {
        &self.surpluses_used
    }

    /// How human approval would be bypassed, if known.
    #[must_use]
    pub fn human_approval_bypass(&self) -> Option<&str> {
        self.human_approval_bypass.as_deref()
    }

    /// Suggested mitigation, if any.
    #[must_use]
    pub fn mitigation(&self) -> Option<&str> {
        self.mitigation.as_deref()
    }

    /// Capability achieved at the end of the chain, if known.
    #[must_use]
    pub fn final_capability(&self) -> Option<&str> {
        self.final_capability.as_deref()
    }

    /// Returns `true` if both chains share a name and step tool sequence.
    #[must_use]
    pub fn is_duplicate_of(&self, other: &Self) -> bool {
        self.name == other.name
            && self.steps.len() == other.steps.len()
            && self
                .steps
                .iter()
                .zip(&other.steps)
                .all(|(a, b)| a.tool == b.tool)
    }
}
