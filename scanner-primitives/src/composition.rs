//! Composition keys: the unit of analysis identity.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::ids::KeyId;
use crate::tool::{ServerName, ToolRef};

/// Unordered set of tools spanning at least two distinct servers.
///
/// Identity is invariant to the order tools were supplied in: the canonical
/// form is the sorted, deduplicated tool list, and [`CompositionKey::id`] is the
/// SHA-256 digest of its length-prefixed encoding.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ToolRef>", into = "Vec<ToolRef>")]
pub struct CompositionKey {
    tools: BTreeSet<ToolRef>,
    id: KeyId,
}

impl CompositionKey {
    /// Builds a key from the supplied tool references.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientServers`] when the tools span fewer than two
    /// distinct servers.
    pub fn new<I>(tools: I) -> Result<Self>
    where
        I: IntoIterator<Item = ToolRef>,
    {
        let tools: BTreeSet<ToolRef> = tools.into_iter().collect();
        let servers = tools.iter().map(ToolRef::server).collect::<BTreeSet<_>>().len();
        if servers < 2 {
            return Err(Error::InsufficientServers { found: servers });
        }
        let id = digest(&tools);
        Ok(Self { tools, id })
    }

    /// Returns the order-independent identifier.
    #[must_use]
    pub fn id(&self) -> &KeyId {
        &self.id
    }

    /// Iterates over tools in canonical order.
    pub fn tools(&self) -> impl Iterator<Item = &ToolRef> {
        self.tools.iter()
    }

    /// Returns `true` if the tool is part of this composition.
    #[must_use]
    pub fn contains(&self, tool: &ToolRef) -> bool {
        self.tools.contains(tool)
    }

    /// Returns the number of tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Always `false`; a key holds at least two tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the distinct servers spanned by this composition.
    #[must_use]
    pub fn servers(&self) -> ServerSet {
        self.tools.iter().map(|tool| tool.server().clone()).collect()
    }
}

impl TryFrom<Vec<ToolRef>> for CompositionKey {
    type Error = Error;

    fn try_from(value: Vec<ToolRef>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CompositionKey> for Vec<ToolRef> {
    fn from(value: CompositionKey) -> Self {
        value.tools.into_iter().collect()
    }
}

fn digest(tools: &BTreeSet<ToolRef>) -> KeyId {
    let mut hasher = Sha256::new();
    for tool in tools {
        for part in [tool.server().as_str(), tool.tool()] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
    }
    KeyId::from_digest(format!("{:x}", hasher.finalize()))
}

/// Sorted, deduplicated set of server names.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerSet(BTreeSet<ServerName>);

impl ServerSet {
    /// Returns the number of servers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no servers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if the server is a member.
    #[must_use]
    pub fn contains(&self, server: &ServerName) -> bool {
        self.0.contains(server)
    }

    /// Iterates over servers in order.
    pub fn iter(&self) -> impl Iterator<Item = &ServerName> {
        self.0.iter()
    }
}

impl FromIterator<ServerName> for ServerSet {
    fn from_iter<I: IntoIterator<Item = ServerName>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Display for ServerSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for server in &self.0 {
            if !first {
                f.write_str("+")?;
            }
            first = false;
            f.write_str(server.as_str())?;
        }
        Ok(())
    }
}
