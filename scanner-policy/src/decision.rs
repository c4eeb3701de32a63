//! Governance decisions derived from a set of surpluses.

use scanner_primitives::{
    CompositionSurplus, GovernanceAction, RiskScore, ServerFindings, SeverityHistogram,
};
use serde::{Deserialize, Serialize};

use crate::constraints::recommend_constraints;

/// Structured decision for one composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceDecision {
    action: GovernanceAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    constraints: Vec<String>,
}

impl GovernanceDecision {
    /// Returns an allow decision with no additional context.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            action: GovernanceAction::Allow,
            reason: None,
            constraints: Vec::new(),
        }
    }

    /// Returns a block decision with an explanatory reason.
    #[must_use]
    pub fn block(reason: impl Into<String>, constraints: Vec<String>) -> Self {
        Self {
            action: GovernanceAction::Block,
            reason: Some(reason.into()),
            constraints,
        }
    }

    /// Returns an allow decision conditioned on the supplied constraints.
    #[must_use]
    pub fn constrained(reason: impl Into<String>, constraints: Vec<String>) -> Self {
        Self {
            action: GovernanceAction::AllowWithConstraints,
            reason: Some(reason.into()),
            constraints,
        }
    }

    /// Returns the recommended action.
    #[must_use]
    pub const fn action(&self) -> GovernanceAction {
        self.action
    }

    /// Returns true when the composition should be blocked.
    #[must_use]
    pub fn is_block(&self) -> bool {
        self.action == GovernanceAction::Block
    }

    /// Returns the optional reason associated with the decision.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Returns the constraint recommendations.
    #[must_use]
    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }

    /// Splits the decision into action, reason, and constraints.
    #[must_use]
    pub fn into_parts(self) -> (GovernanceAction, Option<String>, Vec<String>) {
        (self.action, self.reason, self.constraints)
    }
}

/// Decides the governance action for a set of deduplicated surpluses.
///
/// No surpluses allows the composition. Any Critical surplus blocks it.
/// Otherwise the composition is allowed with constraints.
#[must_use]
pub fn decide(surpluses: &[CompositionSurplus]) -> GovernanceDecision {
    let histogram = SeverityHistogram::from_surpluses(surpluses);
    if histogram.total() == 0 {
        return GovernanceDecision::allow();
    }
    let constraints = recommend_constraints(surpluses);
    if histogram.critical > 0 {
        GovernanceDecision::block(
            format!("{} critical composition surplus(es)", histogram.critical),
            constraints,
        )
    } else {
        GovernanceDecision::constrained(
            format!("{} non-critical composition surplus(es)", histogram.total()),
            constraints,
        )
    }
}

/// Scores a per-server assessment.
///
/// The risk is the highest tool level or attack path severity. A server at
/// High or above is blocked; per-server assessments never carry constraints.
#[must_use]
pub fn score_server(findings: &ServerFindings) -> (RiskScore, GovernanceAction) {
    let risk = RiskScore::max_of(findings.severities());
    let action = if risk >= RiskScore::High {
        GovernanceAction::Block
    } else {
        GovernanceAction::Allow
    };
    (risk, action)
}

#[cfg(test)]
mod tests {
    use scanner_primitives::{
        AttackPath, CapabilityClass, ServerName, Severity, ToolAssessment, ToolRef,
    };

    use super::*;

    fn surplus(severity: Severity) -> CompositionSurplus {
        let a = ToolRef::new(ServerName::new("a").unwrap(), "read_file").unwrap();
        let b = ToolRef::new(ServerName::new("b").unwrap(), "http_post").unwrap();
        CompositionSurplus::builder([a, b], CapabilityClass::NetworkEgress)
            .severity(severity)
            .emergent_capability("exfiltration")
            .build()
            .unwrap()
    }

    #[test]
    fn empty_findings_allow() {
        let decision = decide(&[]);
        assert_eq!(decision.action(), GovernanceAction::Allow);
        assert!(decision.constraints().is_empty());
        assert!(decision.reason().is_none());
    }

    #[test]
    fn critical_findings_block() {
        let decision = decide(&[surplus(Severity::Medium), surplus(Severity::Critical)]);
        assert!(decision.is_block());
        assert!(!decision.constraints().is_empty());

        let (action, reason, _) = decision.into_parts();
        assert_eq!(action, GovernanceAction::Block);
        assert_eq!(reason.as_deref(), Some("1 critical composition surplus(es)"));
    }

    #[test]
    fn non_critical_findings_allow_with_constraints() {
        for severity in [Severity::Low, Severity::Medium, Severity::High] {
            let decision = decide(&[surplus(severity)]);
            assert_eq!(decision.action(), GovernanceAction::AllowWithConstraints);
            assert_eq!(decision.constraints().len(), 1);
        }
    }

    fn tool(name: &str, risk_level: Severity) -> ToolAssessment {
        ToolAssessment {
            tool_name: name.into(),
            risk_summary: String::new(),
            suspicious_language_patterns: Vec::new(),
            risk_level,
            mitigation_suggestions: Vec::new(),
        }
    }

    #[test]
    fn servers_are_blocked_from_high_risk() {
        assert_eq!(
            score_server(&ServerFindings::default()),
            (RiskScore::None, GovernanceAction::Allow)
        );

        let mut findings = ServerFindings {
            tool_assessments: vec![tool("list", Severity::Low), tool("note", Severity::Medium)],
            ..ServerFindings::default()
        };
        assert_eq!(score_server(&findings), (RiskScore::Medium, GovernanceAction::Allow));

        findings.attack_paths.push(AttackPath {
            description: "leak".into(),
            involved_tools: vec!["list".into(), "note".into()],
            severity: Severity::High,
            steps: Vec::new(),
            mitigation: String::new(),
        });
        assert_eq!(score_server(&findings), (RiskScore::High, GovernanceAction::Block));
    }
}
