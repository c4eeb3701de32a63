//! The structured-output contract between the gateway and the oracle.
//!
//! Oracle answers are JSON documents. They are checked twice: first against
//! a JSON Schema (draft 2020-12), then semantically. Every referenced tool
//! must belong to the request's candidate group, and every surplus must
//! involve at least two distinct tools. Per-server assessments may only name
//! tools the server declares. Any failure is a
//! [`OracleError::ContractViolation`], which the gateway may retry.

use std::collections::BTreeSet;

use jsonschema::{Draft, Validator};
use scanner_primitives::{
    AnalysisFragment, AttackChain, AttackPath, AttackStep, CapabilityClass, CapabilityMap, CapabilityVector,
    CompositionSurplus, Confidence, IssueCategory, OverlappingFunctionality, ServerFindings,
    Severity, ToolAssessment, ToolDeclaration, ToolRef,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{OracleError, OracleResult};
use crate::oracle::OracleRequest;

/// Maximum number of schema errors quoted in a violation message.
const MAX_REPORTED_ERRORS: usize = 5;

/// Name under which the analysis schema is sent to the model.
pub const ANALYSIS_SCHEMA_NAME: &str = "composition_analysis";

/// Name under which the classification schema is sent to the model.
pub const CLASSIFICATION_SCHEMA_NAME: &str = "capability_classification";

/// Name under which the per-server assessment schema is sent to the model.
pub const ASSESSMENT_SCHEMA_NAME: &str = "server_assessment";

fn tool_ref_schema() -> Value {
    json!({
        "type": "object",
        "required": ["server", "tool"],
        "properties": {
            "server": { "type": "string", "minLength": 1 },
            "tool": { "type": "string", "minLength": 1 }
        }
    })
}

fn capability_vectors_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["server", "tool", "classes"],
            "properties": {
                "server": { "type": "string", "minLength": 1 },
                "tool": { "type": "string", "minLength": 1 },
                "classes": { "type": "array", "items": class_schema() }
            }
        }
    })
}

/// A class is a bare name or a name with a confidence.
fn class_schema() -> Value {
    json!({
        "oneOf": [
            { "type": "string", "minLength": 1 },
            {
                "type": "object",
                "required": ["class_name"],
                "properties": {
                    "class_name": { "type": "string", "minLength": 1 },
                    "confidence": { "type": "string", "enum": ["Low", "Medium", "High"] }
                }
            }
        ]
    })
}

fn severity_schema() -> Value {
    json!({ "type": "string", "enum": Severity::ALL.map(Severity::as_str) })
}

fn issue_schema() -> Value {
    json!({
        "type": "object",
        "required": ["description", "affected_tools"],
        "properties": {
            "description": { "type": "string" },
            "affected_tools": { "type": "array", "items": { "type": "string" } }
        }
    })
}

/// JSON Schema the oracle's surplus-detection answer must satisfy.
#[must_use]
pub fn analysis_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "CompositionAnalysis",
        "type": "object",
        "required": ["surpluses"],
        "properties": {
            "capability_vectors": capability_vectors_schema(),
            "surpluses": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": [
                        "involved_tools",
                        "severity",
                        "emergent_capability",
                        "capability_class",
                        "governance_gap"
                    ],
                    "properties": {
                        "id": { "type": "string" },
                        "involved_tools": {
                            "type": "array",
                            "minItems": 2,
                            "items": tool_ref_schema()
                        },
                        "severity": severity_schema(),
                        "emergent_capability": { "type": "string", "minLength": 1 },
                        "capability_class": { "type": "string", "minLength": 1 },
                        "governance_gap": { "type": "string" },
                        "environment_conditions": { "type": ["string", "null"] },
                        "reasoning": { "type": ["string", "null"] }
                    }
                }
            },
            "attack_chains": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "steps", "severity"],
                    "properties": {
                        "name": { "type": "string", "minLength": 1 },
                        "steps": {
                            "type": "array",
                            "minItems": 1,
                            "items": {
                                "type": "object",
                                "required": ["server", "tool", "intent"],
                                "properties": {
                                    "server": { "type": "string", "minLength": 1 },
                                    "tool": { "type": "string", "minLength": 1 },
                                    "intent": { "type": "string" }
                                }
                            }
                        },
                        "severity": severity_schema(),
                        "surpluses_used": { "type": "array", "items": { "type": "string" } },
                        "human_approval_bypass": { "type": ["string", "null"] },
                        "mitigation": { "type": ["string", "null"] },
                        "final_capability": { "type": ["string", "null"] }
                    }
                }
            },
            "governance_blind_spots": { "type": "array", "items": { "type": "string" } },
            "cross_server_risk_summary": { "type": ["string", "null"] }
        }
    })
}

/// JSON Schema the oracle's classification answer must satisfy.
#[must_use]
pub fn classification_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "CapabilityClassification",
        "type": "object",
        "required": ["capability_vectors"],
        "properties": { "capability_vectors": capability_vectors_schema() }
    })
}

/// JSON Schema the oracle's per-server assessment must satisfy.
#[must_use]
pub fn assessment_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "ServerAssessment",
        "type": "object",
        "required": ["tool_assessments", "risk_evaluation_summary"],
        "properties": {
            "tool_assessments": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["tool_name", "risk_summary", "risk_level"],
                    "properties": {
                        "tool_name": { "type": "string", "minLength": 1 },
                        "risk_summary": { "type": "string" },
                        "suspicious_language_patterns": { "type": "array", "items": { "type": "string" } },
                        "risk_level": { "type": "string", "enum": ["Low", "Medium", "High"] },
                        "mitigation_suggestions": { "type": "array", "items": { "type": "string" } }
                    }
                }
            },
            "overall_risk_score": { "type": "string", "enum": ["Low", "Medium", "High"] },
            "risk_evaluation_summary": { "type": "string" },
            "attack_paths": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["description", "involved_tools", "severity"],
                    "properties": {
                        "description": { "type": "string" },
                        "involved_tools": { "type": "array", "items": { "type": "string" } },
                        "severity": severity_schema(),
                        "steps": { "type": "array", "items": { "type": "string" } },
                        "mitigation": { "type": "string" }
                    }
                }
            },
            "overlapping_functionality": {
                "type": "object",
                "required": ["description"],
                "properties": {
                    "description": { "type": "string" },
                    "predicted_precedence": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["tools", "likely_selection", "reason"],
                            "properties": {
                                "tools": { "type": "array", "items": { "type": "string" } },
                                "likely_selection": { "type": "string" },
                                "reason": { "type": "string" },
                                "conflicting_tools": { "type": "array", "items": { "type": "string" } }
                            }
                        }
                    }
                }
            },
            "influencing_or_persuasive_language": issue_schema(),
            "crafted_or_informal_tone": issue_schema(),
            "attention_seeking_wording": issue_schema(),
            "inconsistency_in_tone_or_structure": issue_schema(),
            "agentic_capability_tool_delta_expansion_risk": issue_schema(),
            "recommendations": {
                "type": "object",
                "required": ["suggestions"],
                "properties": {
                    "suggestions": { "type": "array", "items": { "type": "string" } }
                }
            },
            "action": { "type": "string", "enum": ["ALLOW", "BLOCK"] }
        }
    })
}

/// Compiled validators for every oracle answer.
pub struct ResponseContract {
    analysis: Validator,
    classification: Validator,
    assessment: Validator,
}

impl std::fmt::Debug for ResponseContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseContract").finish_non_exhaustive()
    }
}

impl ResponseContract {
    /// Compiles the response schemas.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::InvalidRequest`] if a schema fails to compile.
    pub fn new() -> OracleResult<Self> {
        Ok(Self {
            analysis: compile(&analysis_schema())?,
            classification: compile(&classification_schema())?,
            assessment: compile(&assessment_schema())?,
        })
    }

    /// Parses a surplus-detection answer for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::ContractViolation`] if the text is not JSON, does
    /// not match [`analysis_schema`], or references tools outside the group.
    pub fn parse_fragment(&self, text: &str, request: &OracleRequest) -> OracleResult<AnalysisFragment> {
        let value = parse_json(text)?;
        check_schema(&self.analysis, &value)?;
        let wire: WireAnalysis = serde_json::from_value(value)
            .map_err(|err| OracleError::contract(format!("response has an unexpected shape: {err}")))?;
        let scope = Scope::of_request(request);

        let capability_vectors = scope.capability_map(wire.capability_vectors)?;

        let mut surpluses = Vec::with_capacity(wire.surpluses.len());
        for surplus in wire.surpluses {
            surpluses.push(scope.surplus(surplus)?);
        }

        let mut attack_chains = Vec::with_capacity(wire.attack_chains.len());
        for chain in wire.attack_chains {
            attack_chains.push(scope.chain(chain)?);
        }

        Ok(AnalysisFragment {
            capability_vectors,
            surpluses,
            attack_chains,
            governance_blind_spots: wire.governance_blind_spots,
            cross_server_risk_summary: wire
                .cross_server_risk_summary
                .filter(|summary| !summary.trim().is_empty()),
        })
    }

    /// Parses a classification answer for `tools`.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::ContractViolation`] if the text is not JSON, does
    /// not match [`classification_schema`], or names unknown tools.
    pub fn parse_classification(&self, text: &str, tools: &[ToolDeclaration]) -> OracleResult<CapabilityMap> {
        let value = parse_json(text)?;
        check_schema(&self.classification, &value)?;
        let wire: WireClassification = serde_json::from_value(value)
            .map_err(|err| OracleError::contract(format!("response has an unexpected shape: {err}")))?;
        Scope::of_tools(tools).capability_map(wire.capability_vectors)
    }

    /// Parses a per-server assessment of `tools`.
    ///
    /// The model's own `overall_risk_score` and `action` are ignored; the
    /// server is scored from the findings.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::ContractViolation`] if the text is not JSON, does
    /// not match [`assessment_schema`], or names tools the server does not
    /// declare.
    pub fn parse_assessment(&self, text: &str, tools: &[ToolDeclaration]) -> OracleResult<ServerFindings> {
        let value = parse_json(text)?;
        check_schema(&self.assessment, &value)?;
        let wire: WireAssessment = serde_json::from_value(value)
            .map_err(|err| OracleError::contract(format!("response has an unexpected shape: {err}")))?;
        let findings = ServerFindings {
            tool_assessments: wire.tool_assessments,
            risk_evaluation_summary: wire.risk_evaluation_summary,
            attack_paths: wire.attack_paths,
            overlapping_functionality: wire.overlapping_functionality,
            influencing_or_persuasive_language: wire.influencing_or_persuasive_language,
            crafted_or_informal_tone: wire.crafted_or_informal_tone,
            attention_seeking_wording: wire.attention_seeking_wording,
            inconsistency_in_tone_or_structure: wire.inconsistency_in_tone_or_structure,
            agentic_capability_tool_delta_expansion_risk: wire
                .agentic_capability_tool_delta_expansion_risk,
            recommendations: wire.recommendations.suggestions,
        };
        check_findings(&findings, tools)?;
        Ok(findings)
    }
}

/// Checks a per-server assessment produced by any oracle against the
/// server's declarations.
///
/// # Errors
///
/// Returns [`OracleError::ContractViolation`] if a tool assessment or attack
/// path names a tool that is not declared, or a tool is assessed twice.
pub fn check_findings(findings: &ServerFindings, tools: &[ToolDeclaration]) -> OracleResult<()> {
    let declared: BTreeSet<&str> = tools.iter().map(ToolDeclaration::tool_name).collect();
    let unknown = |name: &str| {
        OracleError::contract(format!("assessment references undeclared tool `{name}`"))
    };
    let mut assessed = BTreeSet::new();
    for tool in &findings.tool_assessments {
        if !declared.contains(tool.tool_name.as_str()) {
            return Err(unknown(&tool.tool_name));
        }
        if !assessed.insert(tool.tool_name.as_str()) {
            return Err(OracleError::contract(format!(
                "tool `{}` is assessed more than once",
                tool.tool_name
            )));
        }
    }
    for path in &findings.attack_paths {
        if let Some(name) = path
            .involved_tools
            .iter()
            .find(|name| !declared.contains(name.as_str()))
        {
            return Err(unknown(name));
        }
    }
    Ok(())
}

/// Checks a fragment produced by any oracle against its request.
///
/// # Errors
///
/// Returns [`OracleError::ContractViolation`] if the fragment references a
/// tool outside the request's candidate group.
pub fn check_fragment(fragment: &AnalysisFragment, request: &OracleRequest) -> OracleResult<()> {
    if let Some((tool, _)) = fragment
        .capability_vectors
        .iter()
        .find(|(tool, _)| !request.contains(tool))
    {
        return Err(unknown_tool(tool));
    }
    for surplus in &fragment.surpluses {
        if let Some(tool) = surplus.involved_tools().find(|tool| !request.contains(tool)) {
            return Err(unknown_tool(tool));
        }
    }
    for chain in &fragment.attack_chains {
        if let Some(step) = chain.steps().iter().find(|step| !request.contains(step.tool())) {
            return Err(unknown_tool(step.tool()));
        }
    }
    Ok(())
}

/// Removes a surrounding Markdown code fence, if present.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn compile(schema: &Value) -> OracleResult<Validator> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| OracleError::invalid_request(format!("invalid response schema: {err}")))
}

fn parse_json(text: &str) -> OracleResult<Value> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(OracleError::contract("response was empty"));
    }
    serde_json::from_str(body).map_err(|err| OracleError::contract(format!("response is not valid JSON: {err}")))
}

fn check_schema(validator: &Validator, value: &Value) -> OracleResult<()> {
    let errors: Vec<String> = validator
        .iter_errors(value)
        .take(MAX_REPORTED_ERRORS)
        .map(|err| err.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(OracleError::contract(format!(
            "response does not match schema: {}",
            errors.join("; ")
        )))
    }
}

fn unknown_tool(tool: &ToolRef) -> OracleError {
    OracleError::contract(format!("response references tool {tool} outside the candidate group"))
}

/// Tools the oracle was asked about.
struct Scope(BTreeSet<ToolRef>);

impl Scope {
    fn of_request(request: &OracleRequest) -> Self {
        Self(request.tool_refs().into_iter().collect())
    }

    fn of_tools(tools: &[ToolDeclaration]) -> Self {
        Self(tools.iter().map(|tool| tool.tool_ref().clone()).collect())
    }

    fn resolve(&self, server: &str, tool: &str) -> OracleResult<ToolRef> {
        let reference = ToolRef::parse(server, tool)
            .map_err(|err| OracleError::contract(format!("invalid tool reference: {err}")))?;
        if self.0.contains(&reference) {
            Ok(reference)
        } else {
            Err(unknown_tool(&reference))
        }
    }

    fn capability_map(&self, vectors: Vec<WireVector>) -> OracleResult<CapabilityMap> {
        let mut map = CapabilityMap::new();
        for entry in vectors {
            let tool = self.resolve(&entry.server, &entry.tool)?;
            let mut classes = CapabilityVector::new();
            for class in entry.classes {
                match class {
                    WireClass::Name(name) => {
                        classes.insert(CapabilityClass::parse(&name));
                    }
                    WireClass::Rated {
                        class_name,
                        confidence: Some(confidence),
                    } => map.merge_rated(tool.clone(), CapabilityClass::parse(&class_name), confidence),
                    WireClass::Rated {
                        class_name,
                        confidence: None,
                    } => {
                        classes.insert(CapabilityClass::parse(&class_name));
                    }
                }
            }
            map.merge(tool, &classes);
        }
        Ok(map)
    }

    fn surplus(&self, wire: WireSurplus) -> OracleResult<CompositionSurplus> {
        let mut tools = Vec::with_capacity(wire.involved_tools.len());
        for tool in &wire.involved_tools {
            tools.push(self.resolve(&tool.server, &tool.tool)?);
        }
        let mut builder = CompositionSurplus::builder(tools, CapabilityClass::parse(&wire.capability_class))
            .severity(wire.severity)
            .emergent_capability(wire.emergent_capability)
            .governance_gap(wire.governance_gap);
        if let Some(id) = wire.id {
            builder = builder.label(id);
        }
        if let Some(conditions) = wire.environment_conditions {
            builder = builder.environment_conditions(conditions);
        }
        if let Some(reasoning) = wire.reasoning {
            builder = builder.reasoning(reasoning);
        }
        builder
            .build()
            .map_err(|err| OracleError::contract(err.to_string()))
    }

    fn chain(&self, wire: WireChain) -> OracleResult<AttackChain> {
        let mut steps = Vec::with_capacity(wire.steps.len());
        for step in wire.steps {
            steps.push(AttackStep::new(self.resolve(&step.server, &step.tool)?, step.intent));
        }
        let mut chain = AttackChain::new(wire.name, steps, wire.severity)
            .map_err(|err| OracleError::contract(err.to_string()))?
            .with_surpluses_used(wire.surpluses_used);
        if let Some(bypass) = wire.human_approval_bypass {
            chain = chain.with_human_approval_bypass(bypass);
        }
        if let Some(mitigation) = wire.mitigation {
            chain = chain.with_mitigation(mitigation);
        }
        if let Some(capability) = wire.final_capability.filter(|text| !text.trim().is_empty()) {
            chain = chain.with_final_capability(capability);
        }
        Ok(chain)
    }
}

#[derive(Deserialize)]
struct WireAnalysis {
    #[serde(default)]
    capability_vectors: Vec<WireVector>,
    surpluses: Vec<WireSurplus>,
    #[serde(default)]
    attack_chains: Vec<WireChain>,
    #[serde(default)]
    governance_blind_spots: Vec<String>,
    #[serde(default)]
    cross_server_risk_summary: Option<String>,
}

#[derive(Deserialize)]
struct WireAssessment {
    tool_assessments: Vec<ToolAssessment>,
    risk_evaluation_summary: String,
    #[serde(default)]
    attack_paths: Vec<AttackPath>,
    #[serde(default)]
    overlapping_functionality: Option<OverlappingFunctionality>,
    #[serde(default)]
    influencing_or_persuasive_language: Option<IssueCategory>,
    #[serde(default)]
    crafted_or_informal_tone: Option<IssueCategory>,
    #[serde(default)]
    attention_seeking_wording: Option<IssueCategory>,
    #[serde(default)]
    inconsistency_in_tone_or_structure: Option<IssueCategory>,
    #[serde(default)]
    agentic_capability_tool_delta_expansion_risk: Option<IssueCategory>,
    #[serde(default)]
    recommendations: WireRecommendations,
}

#[derive(Default, Deserialize)]
struct WireRecommendations {
    #[serde(default)]
    suggestions: Vec<String>,
}

#[derive(Deserialize)]
struct WireClassification {
    capability_vectors: Vec<WireVector>,
}

#[derive(Deserialize)]
struct WireToolRef {
    server: String,
    tool: String,
}

#[derive(Deserialize)]
struct WireVector {
    server: String,
    tool: String,
    #[serde(default)]
    classes: Vec<WireClass>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireClass {
    Name(String),
    Rated {
        class_name: String,
        #[serde(default)]
        confidence: Option<Confidence>,
    },
}

#[derive(Deserialize)]
struct WireSurplus {
    #[serde(default)]
    id: Option<String>,
    involved_tools: Vec<WireToolRef>,
    severity: Severity,
    emergent_capability: String,
    capability_class: String,
    #[serde(default)]
    governance_gap: String,
    #[serde(default)]
    environment_conditions: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct WireStep {
    server: String,
    tool: String,
    #[serde(default)]
    intent: String,
}

#[derive(Deserialize)]
struct WireChain {
    name: String,
    steps: Vec<WireStep>,
    severity: Severity,
    #[serde(default)]
    surpluses_used: Vec<String>,
    #[serde(default)]
    human_approval_bypass: Option<String>,
    #[serde(default)]
    mitigation: Option<String>,
    #[serde(default)]
    final_capability: Option<String>,
}

#[cfg(test)]
mod tests {
    use scanner_primitives::{CompositionKey, ServerName};

    use super::*;

    fn decl(server: &str, name: &str) -> ToolDeclaration {
        ToolDeclaration::new(ServerName::new(server).unwrap(), name, "", json!({})).unwrap()
    }

    fn request() -> OracleRequest {
        let tools = vec![decl("ServerA", "get_secret_word"), decl("ServerB", "update_cart")];
        let key = CompositionKey::new(tools.iter().map(|t| t.tool_ref().clone())).unwrap();
        OracleRequest::new(key, tools).unwrap()
    }

    fn answer() -> Value {
        json!({
            "capability_vectors": [
                { "server": "ServerA", "tool": "get_secret_word", "classes": ["Authentication"] },
                {
                    "server": "ServerB",
                    "tool": "update_cart",
                    "classes": [{ "class_name": "FinancialTransaction", "confidence": "High" }]
                }
            ],
            "surpluses": [{
                "id": "S1",
                "involved_tools": [
                    { "server": "ServerA", "tool": "get_secret_word" },
                    { "server": "ServerB", "tool": "update_cart" }
                ],
                "severity": "Critical",
                "emergent_capability": "Purchases authorised with a leaked secret",
                "capability_class": "FinancialTransaction",
                "governance_gap": "Each server is low risk on its own",
                "reasoning": "Read the secret word, then pass it to the cart as a coupon"
            }],
            "attack_chains": [{
                "name": "secret to purchase",
                "steps": [
                    { "server": "ServerA", "tool": "get_secret_word", "intent": "read secret" },
                    { "server": "ServerB", "tool": "update_cart", "intent": "buy" }
                ],
                "severity": "Critical",
                "human_approval_bypass": "each step looks benign",
                "final_capability": "unapproved purchase"
            }],
            "governance_blind_spots": ["Per-server review never sees the secret reach the cart"],
            "cross_server_risk_summary": "Secrets from ServerA authorise spending on ServerB"
        })
    }

    #[test]
    fn valid_answer_converts_to_domain_types() {
        let contract = ResponseContract::new().unwrap();
        let fragment = contract
            .parse_fragment(&answer().to_string(), &request())
            .unwrap();

        assert_eq!(fragment.surpluses.len(), 1);
        let surplus = &fragment.surpluses[0];
        assert_eq!(surplus.severity(), Severity::Critical);
        assert!(surplus.is_cross_server());
        assert_eq!(surplus.label(), Some("S1"));

        let secret = ToolRef::parse("ServerA", "get_secret_word").unwrap();
        assert!(
            fragment
                .capability_vectors
                .get(&secret)
                .unwrap()
                .contains(&CapabilityClass::CredentialAccess)
        );
        assert_eq!(fragment.attack_chains[0].steps().len(), 2);

        assert_eq!(
            surplus.reasoning(),
            Some("Read the secret word, then pass it to the cart as a coupon")
        );
        assert_eq!(fragment.attack_chains[0].final_capability(), Some("unapproved purchase"));
        let cart = ToolRef::parse("ServerB", "update_cart").unwrap();
        assert_eq!(
            fragment
                .capability_vectors
                .confidence(&cart, &CapabilityClass::FinancialTransaction),
            Some(Confidence::High)
        );
        assert_eq!(
            fragment.capability_vectors.confidence(&secret, &CapabilityClass::CredentialAccess),
            None
        );
        assert_eq!(
            fragment.governance_blind_spots,
            ["Per-server review never sees the secret reach the cart"]
        );
        assert_eq!(
            fragment.cross_server_risk_summary.as_deref(),
            Some("Secrets from ServerA authorise spending on ServerB")
        );
    }

    #[test]
    fn fenced_answers_are_accepted() {
        let contract = ResponseContract::new().unwrap();
        let text = format!("```json\n{}\n```", answer());
        assert!(contract.parse_fragment(&text, &request()).is_ok());
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn schema_violations_are_contract_errors() {
        let contract = ResponseContract::new().unwrap();
        let mut bad = answer();
        bad["surpluses"][0]["severity"] = json!("Catastrophic");

        let err = contract.parse_fragment(&bad.to_string(), &request()).unwrap_err();
        assert!(err.is_contract_violation());

        let err = contract.parse_fragment("not json at all", &request()).unwrap_err();
        assert!(err.is_contract_violation());

        let err = contract.parse_fragment("", &request()).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn single_tool_surplus_is_rejected() {
        let contract = ResponseContract::new().unwrap();
        let mut bad = answer();
        bad["surpluses"][0]["involved_tools"] =
            json!([{ "server": "ServerA", "tool": "get_secret_word" }]);
        let err = contract.parse_fragment(&bad.to_string(), &request()).unwrap_err();
        assert!(err.is_contract_violation());

        let mut repeated = answer();
        repeated["surpluses"][0]["involved_tools"] = json!([
            { "server": "ServerA", "tool": "get_secret_word" },
            { "server": "ServerA", "tool": "get_secret_word" }
        ]);
        let err = contract.parse_fragment(&repeated.to_string(), &request()).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn unknown_tools_are_rejected() {
        let contract = ResponseContract::new().unwrap();
        let mut bad = answer();
        bad["attack_chains"][0]["steps"][1]["tool"] = json!("wire_money");
        let err = contract.parse_fragment(&bad.to_string(), &request()).unwrap_err();
        assert!(matches!(err, OracleError::ContractViolation { ref reason, .. } if reason.contains("wire_money")));
    }

    #[test]
    fn classification_answers_are_scoped_to_the_tools() {
        let contract = ResponseContract::new().unwrap();
        let tools = vec![decl("ServerA", "get_secret_word")];
        let text = json!({
            "capability_vectors": [
                { "server": "ServerA", "tool": "get_secret_word", "classes": ["CredentialAccess", "Telepathy"] }
            ]
        })
        .to_string();

        let map = contract.parse_classification(&text, &tools).unwrap();
        let classes = map.get(tools[0].tool_ref()).unwrap();
        assert!(classes.contains(&CapabilityClass::Other("Telepathy".into())));
        assert_eq!(classes.len(), 2);
    }

    #[test]
    fn check_fragment_flags_foreign_tools() {
        let foreign = ToolRef::parse("ServerC", "exfiltrate").unwrap();
        let mut fragment = AnalysisFragment::default();
        fragment
            .capability_vectors
            .merge(foreign, &CapabilityVector::new());
        assert!(check_fragment(&fragment, &request()).is_err());
        assert!(check_fragment(&AnalysisFragment::default(), &request()).is_ok());
    }

    fn server_tools() -> Vec<ToolDeclaration> {
        vec![decl("ServerA", "get_secret_word"), decl("ServerA", "send_note")]
    }

    fn assessment() -> Value {
        json!({
            "tool_assessments": [{
                "tool_name": "get_secret_word",
                "risk_summary": "Hands out a secret",
                "suspicious_language_patterns": ["always call this first"],
                "risk_level": "High",
                "mitigation_suggestions": ["Require approval"]
            }],
            "overall_risk_score": "Low",
            "risk_evaluation_summary": "One risky tool",
            "attack_paths": [{
                "description": "secret leaves through a note",
                "involved_tools": ["get_secret_word", "send_note"],
                "severity": "High",
                "steps": ["read", "send"],
                "mitigation": "Separate the tools"
            }],
            "influencing_or_persuasive_language": {
                "description": "steers selection",
                "affected_tools": ["get_secret_word"]
            },
            "recommendations": { "suggestions": ["Rename get_secret_word"] },
            "action": "ALLOW"
        })
    }

    #[test]
    fn assessment_answers_convert_to_findings() {
        let contract = ResponseContract::new().unwrap();
        let findings = contract
            .parse_assessment(&assessment().to_string(), &server_tools())
            .unwrap();

        assert_eq!(findings.tool_assessments[0].risk_level, Severity::High);
        assert_eq!(findings.attack_paths[0].steps, ["read", "send"]);
        assert_eq!(findings.recommendations, ["Rename get_secret_word"]);
        assert!(findings.influencing_or_persuasive_language.is_some());
        assert!(findings.crafted_or_informal_tone.is_none());
    }

    #[test]
    fn assessments_may_only_name_declared_tools() {
        let contract = ResponseContract::new().unwrap();

        let mut stray = assessment();
        stray["attack_paths"][0]["involved_tools"][1] = json!("wire_money");
        let err = contract
            .parse_assessment(&stray.to_string(), &server_tools())
            .unwrap_err();
        assert!(matches!(err, OracleError::ContractViolation { ref reason, .. } if reason.contains("wire_money")));

        let mut twice = assessment();
        let first = twice["tool_assessments"][0].clone();
        twice["tool_assessments"].as_array_mut().unwrap().push(first);
        assert!(contract.parse_assessment(&twice.to_string(), &server_tools()).is_err());

        let mut critical_tool = assessment();
        critical_tool["tool_assessments"][0]["risk_level"] = json!("Critical");
        assert!(contract.parse_assessment(&critical_tool.to_string(), &server_tools()).is_err());
    }
}
