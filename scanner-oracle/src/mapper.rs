//! Local keyword heuristic for capability classification.

use scanner_primitives::{CapabilityClass, CapabilityMap, CapabilityVector, ToolDeclaration};

const BUILTIN_RULES: &[(CapabilityClass, &[&str])] = &[
    (
        CapabilityClass::ReadData,
        &["read", "get", "list", "search", "query", "lookup", "retrieve", "view", "find", "fetch"],
    ),
    (
        CapabilityClass::WriteData,
        &["write", "update", "create", "delete", "modify", "edit", "insert", "remove", "save", "add"],
    ),
    (
        CapabilityClass::NetworkEgress,
        &["http", "https", "url", "webhook", "upload", "download", "endpoint", "post"],
    ),
    (
        CapabilityClass::NetworkIngress,
        &["listen", "inbound", "expose", "tunnel", "port", "serve"],
    ),
    (
        CapabilityClass::FinancialTransaction,
        &[
            "cart", "checkout", "payment", "pay", "purchase", "order", "invoice", "transfer",
            "refund", "charge", "billing", "wallet",
        ],
    ),
    (
        CapabilityClass::CodeExecution,
        &["exec", "execute", "run", "shell", "command", "script", "eval", "bash", "code"],
    ),
    (
        CapabilityClass::CredentialAccess,
        &[
            "secret", "password", "credential", "token", "apikey", "auth", "login", "oauth",
            "session", "cookie",
        ],
    ),
    (
        CapabilityClass::Storage,
        &["database", "db", "sql", "table", "bucket", "blob", "storage", "cache", "record"],
    ),
    (
        CapabilityClass::Messaging,
        &["email", "mail", "message", "slack", "sms", "notify", "notification", "chat", "send"],
    ),
    (
        CapabilityClass::SoftwareInstall,
        &["install", "package", "pip", "npm", "dependency", "plugin"],
    ),
    (
        CapabilityClass::CloudInfrastructure,
        &["cloud", "aws", "gcp", "azure", "instance", "cluster", "deploy", "kubernetes", "dns"],
    ),
    (
        CapabilityClass::Scheduling,
        &["schedule", "cron", "calendar", "reminder", "timer", "recurring"],
    ),
    (
        CapabilityClass::BrowserAutomation,
        &["browser", "navigate", "click", "screenshot", "webpage", "playwright", "selenium"],
    ),
    (
        CapabilityClass::Surveillance,
        &["location", "camera", "microphone", "track", "gps", "contacts", "keystroke"],
    ),
];

/// Deterministic keyword classifier over tool names, descriptions, and
/// parameter names.
///
/// Used as a cheap pre-classification step; the oracle may refine the result.
#[derive(Clone, Debug, Default)]
pub struct HeuristicMapper {
    extra: Vec<(CapabilityClass, Vec<String>)>,
}

impl HeuristicMapper {
    /// Creates a mapper with the built-in keyword table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds keywords that map to `class`, on top of the built-in table.
    #[must_use]
    pub fn with_keywords<I, S>(mut self, class: CapabilityClass, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords = keywords
            .into_iter()
            .map(|kw| kw.into().to_ascii_lowercase())
            .collect();
        self.extra.push((class, keywords));
        self
    }

    /// Classifies a single declaration.
    #[must_use]
    pub fn map(&self, tool: &ToolDeclaration) -> CapabilityVector {
        let mut tokens = tokens(tool.tool_name());
        tokens.extend(tokens_of(tool.description()));
        for parameter in tool.parameter_names() {
            tokens.extend(tokens_of(parameter));
        }

        let mut vector = CapabilityVector::new();
        for (class, keywords) in BUILTIN_RULES {
            if keywords.iter().any(|kw| matches_any(&tokens, kw)) {
                vector.insert(class.clone());
            }
        }
        for (class, keywords) in &self.extra {
            if keywords.iter().any(|kw| matches_any(&tokens, kw)) {
                vector.insert(class.clone());
            }
        }
        vector
    }

    /// Classifies every declaration.
    #[must_use]
    pub fn map_all(&self, tools: &[ToolDeclaration]) -> CapabilityMap {
        tools
            .iter()
            .map(|tool| (tool.tool_ref().clone(), self.map(tool)))
            .collect()
    }
}

fn matches_any(tokens: &[String], keyword: &str) -> bool {
    tokens.iter().any(|token| {
        token == keyword
            || token
                .strip_suffix('s')
                .is_some_and(|singular| singular == keyword)
    })
}

fn tokens(text: &str) -> Vec<String> {
    tokens_of(text).collect()
}

/// Splits on non-alphanumerics and lower-to-upper case transitions.
fn tokens_of(text: &str) -> impl Iterator<Item = String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;
    for ch in text.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            previous_lower = false;
            continue;
        }
        if ch.is_uppercase() && previous_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        previous_lower = ch.is_lowercase() || ch.is_numeric();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words.into_iter()
}
