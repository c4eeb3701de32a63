//! Deterministic stand-in for the external reasoning service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use scanner_primitives::{
    AnalysisFragment, AttackChain, AttackStep, CapabilityClass, CapabilityMap, CapabilityVector,
    CompositionSurplus, Severity, ToolDeclaration, ToolRef,
};

use crate::error::{OracleError, OracleResult};
use crate::mapper::HeuristicMapper;
use crate::oracle::{OracleDescriptor, OracleRequest, ReasoningOracle};

/// A surplus raised whenever one tool carries `left` and another carries `right`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurplusRule {
    /// Class required on one side of the pair.
    pub left: CapabilityClass,
    /// Class required on the other side.
    pub right: CapabilityClass,
    /// Severity of the resulting surplus.
    pub severity: Severity,
    /// Class of the emergent capability.
    pub emergent_class: CapabilityClass,
    /// Short description of the emergent capability.
    pub emergent_capability: String,
}

impl SurplusRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(
        left: CapabilityClass,
        right: CapabilityClass,
        severity: Severity,
        emergent_class: CapabilityClass,
        emergent_capability: impl Into<String>,
    ) -> Self {
        Self {
            left,
            right,
            severity,
            emergent_class,
            emergent_capability: emergent_capability.into(),
        }
    }

    fn orient<'a>(
        &self,
        a: (&'a ToolRef, &CapabilityVector),
        b: (&'a ToolRef, &CapabilityVector),
    ) -> Option<(&'a ToolRef, &'a ToolRef)> {
        if a.1.contains(&self.left) && b.1.contains(&self.right) {
            Some((a.0, b.0))
        } else if b.1.contains(&self.left) && a.1.contains(&self.right) {
            Some((b.0, a.0))
        } else {
            None
        }
    }
}

/// Built-in capability-pair rules.
#[must_use]
pub fn default_rules() -> Vec<SurplusRule> {
    use CapabilityClass as C;
    vec![
        SurplusRule::new(
            C::CredentialAccess,
            C::FinancialTransaction,
            Severity::Critical,
            C::FinancialTransaction,
            "Unauthorized purchase authorised with harvested credentials",
        ),
        SurplusRule::new(
            C::CredentialAccess,
            C::NetworkEgress,
            Severity::Critical,
            C::NetworkEgress,
            "Credential exfiltration to an external endpoint",
        ),
        SurplusRule::new(
            C::ReadData,
            C::NetworkEgress,
            Severity::High,
            C::NetworkEgress,
            "Autonomous exfiltration of read data",
        ),
        SurplusRule::new(
            C::SoftwareInstall,
            C::NetworkEgress,
            Severity::High,
            C::SoftwareInstall,
            "Installation of attacker-chosen software",
        ),
        SurplusRule::new(
            C::Surveillance,
            C::Messaging,
            Severity::High,
            C::Surveillance,
            "Covert reporting of monitored activity",
        ),
        SurplusRule::new(
            C::CodeExecution,
            C::NetworkIngress,
            Severity::High,
            C::CodeExecution,
            "Remotely triggered command execution",
        ),
        SurplusRule::new(
            C::Scheduling,
            C::CodeExecution,
            Severity::Medium,
            C::Scheduling,
            "Persistent scheduled execution",
        ),
        SurplusRule::new(
            C::ReadData,
            C::Messaging,
            Severity::Medium,
            C::Messaging,
            "Disclosure of read data through messages",
        ),
    ]
}

/// Oracle that applies fixed capability-pair rules.
///
/// Tools are classified from explicit overrides first and the
/// [`HeuristicMapper`] otherwise. Precomputed vectors carried by a request are
/// merged on top.
#[derive(Clone, Debug)]
pub struct RuleBasedOracle {
    rules: Vec<SurplusRule>,
    mapper: HeuristicMapper,
    overrides: BTreeMap<ToolRef, CapabilityVector>,
}

impl Default for RuleBasedOracle {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl RuleBasedOracle {
    /// Creates an oracle with the supplied rules.
    #[must_use]
    pub fn new(rules: Vec<SurplusRule>) -> Self {
        Self {
            rules,
            mapper: HeuristicMapper::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// Pins the classification of a tool.
    #[must_use]
    pub fn with_classification<I>(mut self, tool: ToolRef, classes: I) -> Self
    where
        I: IntoIterator<Item = CapabilityClass>,
    {
        self.overrides.insert(tool, classes.into_iter().collect());
        self
    }

    fn vector_of(&self, tool: &ToolDeclaration) -> CapabilityVector {
        self.overrides
            .get(tool.tool_ref())
            .cloned()
            .unwrap_or_else(|| self.mapper.map(tool))
    }

    fn classify_now(&self, tools: &[ToolDeclaration]) -> CapabilityMap {
        tools
            .iter()
            .map(|tool| (tool.tool_ref().clone(), self.vector_of(tool)))
            .collect()
    }
}

#[async_trait]
impl ReasoningOracle for RuleBasedOracle {
    fn descriptor(&self) -> OracleDescriptor {
        OracleDescriptor::new("rule-based", "capability-pairs", 0.0)
    }

    async fn classify(&self, tools: &[ToolDeclaration]) -> OracleResult<CapabilityMap> {
        Ok(self.classify_now(tools))
    }

    async fn detect_surpluses(&self, request: &OracleRequest) -> OracleResult<AnalysisFragment> {
        let mut vectors = self.classify_now(request.tools());
        if let Some(precomputed) = request.capability_vectors() {
            for (tool, classes) in precomputed.iter() {
                if !classes.is_empty() {
                    vectors.merge(tool.clone(), classes);
                }
            }
        }

        let entries: Vec<(&ToolRef, &CapabilityVector)> = vectors.iter().collect();
        let mut fragment = AnalysisFragment::default();
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                for rule in &self.rules {
                    let Some((first, second)) = rule.orient(*a, *b) else {
                        continue;
                    };
                    let (surplus, chain) = finding(rule, first, second)?;
                    fragment.surpluses.push(surplus);
                    fragment.attack_chains.extend(chain);
                }
            }
        }
        fragment.capability_vectors = vectors;
        Ok(fragment)
    }
}

fn finding(
    rule: &SurplusRule,
    first: &ToolRef,
    second: &ToolRef,
) -> OracleResult<(CompositionSurplus, Option<AttackChain>)> {
    let surplus = CompositionSurplus::builder([first.clone(), second.clone()], rule.emergent_class.clone())
        .severity(rule.severity)
        .emergent_capability(rule.emergent_capability.clone())
        .governance_gap(format!(
            "{first} provides {} and {second} provides {}; neither review sees the combination",
            rule.left, rule.right
        ))
        .reasoning(format!(
            "use {first} for {}, then feed the result to {second} for {}",
            rule.left, rule.right
        ))
        .build()
        .map_err(|err| OracleError::contract(err.to_string()))?;

    if rule.severity < Severity::High {
        return Ok((surplus, None));
    }
    let chain = AttackChain::new(
        format!("{} via {} then {}", rule.emergent_class, first.tool(), second.tool()),
        vec![
            AttackStep::new(first.clone(), format!("use {}", rule.left)),
            AttackStep::new(second.clone(), format!("use {}", rule.right)),
        ],
        rule.severity,
    )
    .map_err(|err| OracleError::contract(err.to_string()))?
    .with_human_approval_bypass("each step stays within its tool's stated purpose")
    .with_final_capability(rule.emergent_capability.clone());
    Ok((surplus, Some(chain)))
}
