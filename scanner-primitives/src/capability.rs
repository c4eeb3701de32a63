//! Coarse capability classes assigned to tools.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Coarse capability tag.
///
/// Tags outside the built-in taxonomy are preserved verbatim in
/// [`CapabilityClass::Other`] so findings from a richer oracle taxonomy are
/// never dropped.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CapabilityClass {
    /// Reads files, records, or documents.
    ReadData,
    /// Creates or modifies files, records, or documents.
    WriteData,
    /// Sends data to external network destinations.
    NetworkEgress,
    /// Accepts inbound connections or listens for data.
    NetworkIngress,
    /// Moves money or places orders.
    FinancialTransaction,
    /// Runs code or shell commands.
    CodeExecution,
    /// Reads or mints secrets, tokens, or credentials.
    CredentialAccess,
    /// Persists data in a durable store.
    Storage,
    /// Sends messages to people or channels.
    Messaging,
    /// Installs packages or software.
    SoftwareInstall,
    /// Manages cloud infrastructure.
    CloudInfrastructure,
    /// Schedules deferred or recurring work.
    Scheduling,
    /// Drives a browser session.
    BrowserAutomation,
    /// Observes people, devices, or locations.
    Surveillance,
    /// Tag outside the built-in taxonomy.
    Other(String),
}

impl CapabilityClass {
    /// Returns every built-in class, in declaration order.
    #[must_use]
    pub fn known() -> [Self; 14] {
        [
            Self::ReadData,
            Self::WriteData,
            Self::NetworkEgress,
            Self::NetworkIngress,
            Self::FinancialTransaction,
            Self::CodeExecution,
            Self::CredentialAccess,
            Self::Storage,
            Self::Messaging,
            Self::SoftwareInstall,
            Self::CloudInfrastructure,
            Self::Scheduling,
            Self::BrowserAutomation,
            Self::Surveillance,
        ]
    }

    /// Returns the canonical tag name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ReadData => "ReadData",
            Self::WriteData => "WriteData",
            Self::NetworkEgress => "NetworkEgress",
            Self::NetworkIngress => "NetworkIngress",
            Self::FinancialTransaction => "FinancialTransaction",
            Self::CodeExecution => "CodeExecution",
            Self::CredentialAccess => "CredentialAccess",
            Self::Storage => "Storage",
            Self::Messaging => "Messaging",
            Self::SoftwareInstall => "SoftwareInstall",
            Self::CloudInfrastructure => "CloudInfrastructure",
            Self::Scheduling => "Scheduling",
            Self::BrowserAutomation => "BrowserAutomation",
            Self::Surveillance => "Surveillance",
            Self::Other(tag) => tag,
        }
    }

    /// Parses a tag, accepting common aliases case-insensitively.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        let tag = tag.trim();
        let normalized: String = tag
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "readdata" | "readfiles" | "read" => Self::ReadData,
            "writedata" | "writefiles" | "write" => Self::WriteData,
            "networkegress" | "egress" => Self::NetworkEgress,
            "networkingress" | "ingress" => Self::NetworkIngress,
            "financialtransaction" | "payments" => Self::FinancialTransaction,
            "codeexecution" | "execute" | "execution" => Self::CodeExecution,
            "credentialaccess" | "authentication" | "credentials" => Self::CredentialAccess,
            "storage" | "databaseaccess" => Self::Storage,
            "messaging" => Self::Messaging,
            "softwareinstall" | "installsoftware" | "packagemanagement" => Self::SoftwareInstall,
            "cloudinfrastructure" | "cloudinfra" => Self::CloudInfrastructure,
            "scheduling" => Self::Scheduling,
            "browserautomation" => Self::BrowserAutomation,
            "surveillance" => Self::Surveillance,
            _ => Self::Other(tag.to_owned()),
        }
    }
}

impl Display for CapabilityClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for CapabilityClass {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<CapabilityClass> for String {
    fn from(value: CapabilityClass) -> Self {
        match value {
            CapabilityClass::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

/// Set of capability classes held by a single tool.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityVector(BTreeSet<CapabilityClass>);

impl CapabilityVector {
    /// Creates an empty vector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class, returning `true` if it was not already present.
    pub fn insert(&mut self, class: CapabilityClass) -> bool {
        self.0.insert(class)
    }

    /// Returns `true` if the vector contains the class.
    #[must_use]
    pub fn contains(&self, class: &CapabilityClass) -> bool {
        self.0.contains(class)
    }

    /// Adds every class from `other`.
    pub fn union_with(&mut self, other: &Self) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Returns `true` if no classes are assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over classes in order.
    pub fn iter(&self) -> impl Iterator<Item = &CapabilityClass> {
        self.0.iter()
    }
}

impl FromIterator<CapabilityClass> for CapabilityVector {
    fn from_iter<I: IntoIterator<Item = CapabilityClass>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// How sure the oracle is that a tool provides a class.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Confidence {
    /// Weak signal.
    Low,
    /// Plausible from the declaration.
    Medium,
    /// Stated by the declaration.
    High,
}

impl Confidence {
    /// Parses `Low`, `Medium` or `High` in any case.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}
