//! Per-server intent assessments.
//!
//! A [`ServerAssessment`] reviews the declarations of a single server for
//! manipulative language, hidden instructions, and dangerous affordances. It
//! is independent of composition analysis; its saved form keeps a top-level
//! `tool_assessments` list so archived assessments can be loaded back as
//! declaration listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::GovernanceAction;
use crate::finding::{RiskScore, Severity};
use crate::tool::ServerName;

/// Security review of one tool declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAssessment {
    /// Name of the assessed tool.
    pub tool_name: String,
    /// Short summary of the tool's risks.
    pub risk_summary: String,
    /// Phrases in the declaration that bias or instruct the model.
    #[serde(default)]
    pub suspicious_language_patterns: Vec<String>,
    /// Risk level of the tool on its own.
    pub risk_level: Severity,
    /// Suggested mitigations.
    #[serde(default)]
    pub mitigation_suggestions: Vec<String>,
}

/// A way the server's tools could be abused, step by step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackPath {
    /// What the path achieves.
    pub description: String,
    /// Tool names along the path.
    pub involved_tools: Vec<String>,
    /// Severity of the outcome.
    pub severity: Severity,
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Recommended mitigation.
    #[serde(default)]
    pub mitigation: String,
}

/// A language or tone issue and the tools showing it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCategory {
    /// Description of the issue.
    pub description: String,
    /// Tools exhibiting it.
    #[serde(default)]
    pub affected_tools: Vec<String>,
}

/// Which of several overlapping tools a model is likely to pick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedPrecedence {
    /// Tools in the conflict.
    pub tools: Vec<String>,
    /// Tool the model will likely select.
    pub likely_selection: String,
    /// Why it wins.
    pub reason: String,
    /// The tools it shadows.
    #[serde(default)]
    pub conflicting_tools: Vec<String>,
}

/// Tools whose functionality overlaps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlappingFunctionality {
    /// Description of the overlap.
    pub description: String,
    /// Predicted selection outcomes.
    #[serde(default)]
    pub predicted_precedence: Vec<PredictedPrecedence>,
}

/// Findings an oracle reports for one server, before scoring.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFindings {
    /// One entry per assessed tool.
    pub tool_assessments: Vec<ToolAssessment>,
    /// Overall narrative.
    #[serde(default)]
    pub risk_evaluation_summary: String,
    /// Abuse paths through the server's tools.
    #[serde(default)]
    pub attack_paths: Vec<AttackPath>,
    /// Overlapping tools, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlapping_functionality: Option<OverlappingFunctionality>,
    /// Wording meant to steer tool selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub influencing_or_persuasive_language: Option<IssueCategory>,
    /// Informal or crafted tone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crafted_or_informal_tone: Option<IssueCategory>,
    /// Wording that demands attention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_seeking_wording: Option<IssueCategory>,
    /// Declarations that break the server's own conventions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inconsistency_in_tone_or_structure: Option<IssueCategory>,
    /// Capability the tools add to an agent beyond their stated purpose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agentic_capability_tool_delta_expansion_risk: Option<IssueCategory>,
    /// Actionable recommendations.
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ServerFindings {
    /// Returns every severity reported, tool levels and attack paths alike.
    pub fn severities(&self) -> impl Iterator<Item = Severity> + '_ {
        self.tool_assessments
            .iter()
            .map(|tool| tool.risk_level)
            .chain(self.attack_paths.iter().map(|path| path.severity))
    }
}

/// Scored, persisted assessment of one server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerAssessment {
    /// Server that was assessed.
    pub server: ServerName,
    /// Highest reported risk.
    pub overall_risk_score: RiskScore,
    /// Recommended action for the server on its own.
    pub action: GovernanceAction,
    /// Oracle findings.
    #[serde(flatten)]
    pub findings: ServerFindings,
    /// When the assessment finished.
    pub assessed_at: DateTime<Utc>,
    /// Oracle identifier, `provider/model`.
    pub oracle_model: String,
}

impl ServerAssessment {
    /// Returns the listing summary for this assessment, saved as `filename`.
    #[must_use]
    pub fn summary(&self, filename: impl Into<String>) -> AssessmentSummary {
        AssessmentSummary {
            filename: filename.into(),
            server: self.server.clone(),
            risk_score: self.overall_risk_score,
            tools_analyzed: self.findings.tool_assessments.len(),
            action: self.action,
            assessed_at: self.assessed_at,
        }
    }
}

/// One line of the per-server results listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentSummary {
    /// Record name in the archive.
    pub filename: String,
    /// Assessed server.
    pub server: ServerName,
    /// Overall risk.
    pub risk_score: RiskScore,
    /// Number of tools assessed.
    pub tools_analyzed: usize,
    /// Recommended action.
    pub action: GovernanceAction,
    /// Completion time.
    pub assessed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn assessment() -> ServerAssessment {
        ServerAssessment {
            server: ServerName::new("ServerA").unwrap(),
            overall_risk_score: RiskScore::High,
            action: GovernanceAction::Block,
            findings: ServerFindings {
                tool_assessments: vec![ToolAssessment {
                    tool_name: "get_secret_word".into(),
                    risk_summary: "Returns a secret".into(),
                    suspicious_language_patterns: vec!["always use this".into()],
                    risk_level: Severity::High,
                    mitigation_suggestions: Vec::new(),
                }],
                recommendations: vec!["Require approval".into()],
                ..ServerFindings::default()
            },
            assessed_at: Utc::now(),
            oracle_model: "rule-based/heuristic".into(),
        }
    }

    #[test]
    fn saved_form_keeps_tool_assessments_at_the_top_level() {
        let value = serde_json::to_value(assessment()).unwrap();
        assert_eq!(value["tool_assessments"][0]["tool_name"], json!("get_secret_word"));
        assert_eq!(value["overall_risk_score"], json!("High"));
        assert_eq!(value["action"], json!("BLOCK"));
        assert!(value.get("overlapping_functionality").is_none());

        let back: ServerAssessment = serde_json::from_value(value).unwrap();
        assert_eq!(back.findings.tool_assessments.len(), 1);
    }

    #[test]
    fn summary_counts_tools() {
        let summary = assessment().summary("20250101-120000-ServerA.json");
        assert_eq!(summary.tools_analyzed, 1);
        assert_eq!(summary.risk_score, RiskScore::High);
        assert_eq!(summary.server.as_str(), "ServerA");
    }

    #[test]
    fn severities_cover_tools_and_paths() {
        let mut findings = assessment().findings;
        findings.attack_paths.push(AttackPath {
            description: "leak".into(),
            involved_tools: vec!["get_secret_word".into()],
            severity: Severity::Critical,
            steps: Vec::new(),
            mitigation: String::new(),
        });
        assert_eq!(findings.severities().max(), Some(Severity::Critical));
    }
}
