//! Keyword review of a single server's declarations.
//!
//! Oracles without a dedicated per-server reasoning path fall back to
//! [`review_declarations`], which flags steering language, hidden
//! instructions, enticing names, and privileged tools that do not
//! communicate their risk.

use std::collections::BTreeSet;

use scanner_primitives::{
    AttackPath, CapabilityClass, CapabilityMap, CapabilityVector, IssueCategory, ServerFindings,
    Severity, ToolAssessment, ToolDeclaration,
};

/// Phrases that bias tool selection.
const PERSUASIVE: &[&str] = &[
    "always use",
    "must use",
    "prefer this",
    "instead of",
    "best tool",
    "before any other",
    "only tool",
];

/// Phrases that read as instructions to the model rather than descriptions.
const HIDDEN_INSTRUCTIONS: &[&str] = &[
    "ignore previous",
    "ignore all",
    "do not tell",
    "don't tell",
    "do not mention",
    "without asking",
    "<important>",
    "you must",
];

/// Name fragments that entice a model to call the tool.
const ENTICING_NAMES: &[&str] = &["secret", "solve", "flag", "bypass", "admin", "hack", "unlock"];

/// Words that show a declaration communicates its risk.
const RISK_WORDS: &[&str] = &[
    "caution",
    "warning",
    "irreversible",
    "confirm",
    "approval",
    "dangerous",
    "sensitive",
];

const PRIVILEGED: &[CapabilityClass] = &[
    CapabilityClass::CodeExecution,
    CapabilityClass::CredentialAccess,
    CapabilityClass::FinancialTransaction,
    CapabilityClass::SoftwareInstall,
    CapabilityClass::CloudInfrastructure,
    CapabilityClass::Surveillance,
];

const EGRESS: &[CapabilityClass] = &[CapabilityClass::NetworkEgress, CapabilityClass::Messaging];

/// Reviews `tools` using their capability classes from `classes`.
#[must_use]
pub fn review_declarations(tools: &[ToolDeclaration], classes: &CapabilityMap) -> ServerFindings {
    let empty = CapabilityVector::new();
    let mut findings = ServerFindings::default();
    let mut persuasive = Vec::new();
    let mut attention = Vec::new();
    let mut recommendations = BTreeSet::new();

    for tool in tools {
        let vector = classes.get(tool.tool_ref()).unwrap_or(&empty);
        let review = ToolReview::of(tool, vector);
        if review.persuasive {
            persuasive.push(tool.tool_name().to_owned());
        }
        if review.attention_seeking {
            attention.push(tool.tool_name().to_owned());
        }
        recommendations.extend(review.assessment.mitigation_suggestions.iter().cloned());
        findings.tool_assessments.push(review.assessment);
    }

    findings.attack_paths = exfiltration_paths(tools, classes);
    for path in &findings.attack_paths {
        recommendations.insert(path.mitigation.clone());
    }
    if !persuasive.is_empty() {
        findings.influencing_or_persuasive_language = Some(IssueCategory {
            description: "Descriptions steer the model towards these tools".to_owned(),
            affected_tools: persuasive,
        });
    }
    if !attention.is_empty() {
        findings.attention_seeking_wording = Some(IssueCategory {
            description: "Descriptions shout for the model's attention".to_owned(),
            affected_tools: attention,
        });
    }

    let flagged = findings
        .tool_assessments
        .iter()
        .filter(|tool| tool.risk_level >= Severity::Medium)
        .count();
    findings.risk_evaluation_summary = format!(
        "{flagged} of {} tool(s) flagged; {} attack path(s) found",
        findings.tool_assessments.len(),
        findings.attack_paths.len()
    );
    findings.recommendations = recommendations.into_iter().collect();
    findings
}

struct ToolReview {
    assessment: ToolAssessment,
    persuasive: bool,
    attention_seeking: bool,
}

impl ToolReview {
    fn of(tool: &ToolDeclaration, classes: &CapabilityVector) -> Self {
        let description = tool.description().to_lowercase();
        let name = tool.tool_name().to_lowercase();
        let mut patterns = Vec::new();
        let mut mitigations = Vec::new();
        let mut notes = Vec::new();
        let mut level = Severity::Low;

        let persuasive = matches(&description, PERSUASIVE, &mut patterns);
        if persuasive {
            level = level.max(Severity::Medium);
            notes.push("biases tool selection");
            mitigations.push("Remove wording that steers tool selection".to_owned());
        }
        if matches(&description, HIDDEN_INSTRUCTIONS, &mut patterns) {
            level = level.max(Severity::High);
            notes.push("embeds instructions to the model");
            mitigations.push("Strip instructions addressed to the model from the description".to_owned());
        }
        if matches(&name, ENTICING_NAMES, &mut patterns) {
            level = level.max(Severity::Medium);
            notes.push("has an enticing name");
            mitigations.push(format!("Rename `{}` to describe what it does", tool.tool_name()));
        }

        let privileged: Vec<&str> = PRIVILEGED
            .iter()
            .filter(|class| classes.contains(class))
            .map(CapabilityClass::as_str)
            .collect();
        if !privileged.is_empty() {
            level = level.max(Severity::Medium);
            notes.push("grants privileged capability");
            if !RISK_WORDS.iter().any(|word| description.contains(word)) {
                level = level.max(Severity::High);
                notes.push("does not communicate its risk");
                mitigations.push(format!(
                    "Document the {} risk of `{}` and require approval",
                    privileged.join("/"),
                    tool.tool_name()
                ));
            }
        }

        let attention_seeking = tool.description().contains("!!")
            || tool
                .description()
                .split_whitespace()
                .map(|word| word.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
                .any(|word| word.len() > 3 && word.chars().all(|c| c.is_ascii_uppercase()));

        let risk_summary = if notes.is_empty() {
            "No manipulation or privileged capability detected".to_owned()
        } else {
            format!("Tool {}", notes.join(", "))
        };

        Self {
            assessment: ToolAssessment {
                tool_name: tool.tool_name().to_owned(),
                risk_summary,
                suspicious_language_patterns: patterns,
                risk_level: level,
                mitigation_suggestions: mitigations,
            },
            persuasive,
            attention_seeking,
        }
    }
}

fn matches(haystack: &str, needles: &[&str], found: &mut Vec<String>) -> bool {
    let before = found.len();
    found.extend(
        needles
            .iter()
            .filter(|needle| haystack.contains(*needle))
            .map(|needle| (*needle).to_owned()),
    );
    found.len() > before
}

/// Credential readers paired with egress tools on the same server.
fn exfiltration_paths(tools: &[ToolDeclaration], classes: &CapabilityMap) -> Vec<AttackPath> {
    let holds = |tool: &ToolDeclaration, wanted: &[CapabilityClass]| {
        classes
            .get(tool.tool_ref())
            .is_some_and(|vector| wanted.iter().any(|class| vector.contains(class)))
    };
    let mut paths = Vec::new();
    for source in tools.iter().filter(|tool| holds(tool, &[CapabilityClass::CredentialAccess])) {
        for sink in tools
            .iter()
            .filter(|tool| tool.tool_ref() != source.tool_ref() && holds(tool, EGRESS))
        {
            paths.push(AttackPath {
                description: format!(
                    "Credentials read by {} leave the system through {}",
                    source.tool_name(),
                    sink.tool_name()
                ),
                involved_tools: vec![source.tool_name().to_owned(), sink.tool_name().to_owned()],
                severity: Severity::High,
                steps: vec![
                    format!("Call {} to obtain a credential", source.tool_name()),
                    format!("Pass the credential to {}", sink.tool_name()),
                ],
                mitigation: format!(
                    "Do not expose {} and {} to the same agent session",
                    source.tool_name(),
                    sink.tool_name()
                ),
            });
        }
    }
    paths
}
