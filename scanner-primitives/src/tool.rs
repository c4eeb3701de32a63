//! Tool declarations collected from MCP servers.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

const MAX_SERVER_NAME_LEN: usize = 128;
const MAX_TOOL_NAME_LEN: usize = 256;

/// Name of an independently governed tool server.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerName(String);

impl ServerName {
    /// Creates a server name after trimming and validating it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidServerName`] if the name is empty, too long, or
    /// contains control characters.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let raw = name.into();
        let name = raw.trim();
        if name.is_empty() {
            return Err(Error::InvalidServerName {
                name: raw,
                reason: "server name cannot be empty".into(),
            });
        }
        if name.len() > MAX_SERVER_NAME_LEN {
            return Err(Error::InvalidServerName {
                name: name.to_owned(),
                reason: format!("server name length must be <= {MAX_SERVER_NAME_LEN}"),
            });
        }
        if name.chars().any(char::is_control) {
            return Err(Error::InvalidServerName {
                name: name.to_owned(),
                reason: "server name cannot contain control characters".into(),
            });
        }
        Ok(Self(name.to_owned()))
    }

    /// Returns the server name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ServerName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServerName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ServerName> for String {
    fn from(value: ServerName) -> Self {
        value.0
    }
}

/// Reference to a tool by its origin server and name.
///
/// Ordering is by server name, then tool name, which is the enumeration order
/// used everywhere a stable order matters.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ToolRef {
    server: ServerName,
    tool: String,
}

impl ToolRef {
    /// Creates a tool reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTool`] if the tool name is empty.
    pub fn new(server: ServerName, tool: impl Into<String>) -> Result<Self> {
        let tool = tool.into();
        validate_tool_name(&tool)?;
        Ok(Self { server, tool })
    }

    /// Parses both parts from plain strings.
    ///
    /// # Errors
    ///
    /// Returns an error if either the server or tool name is invalid.
    pub fn parse(server: &str, tool: &str) -> Result<Self> {
        Self::new(ServerName::new(server)?, tool)
    }

    /// Returns the origin server.
    #[must_use]
    pub fn server(&self) -> &ServerName {
        &self.server
    }

    /// Returns the tool name.
    #[must_use]
    pub fn tool(&self) -> &str {
        &self.tool
    }
}

impl Display for ToolRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.tool)
    }
}

/// Normalized, immutable tool declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDeclaration")]
pub struct ToolDeclaration {
    #[serde(flatten)]
    tool_ref: ToolRef,
    description: String,
    input_schema: Value,
}

impl ToolDeclaration {
    /// Creates a declaration after validating its fields.
    ///
    /// A `null` input schema is normalized to an empty object schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTool`] if the tool name is invalid or the input
    /// schema is neither an object nor `null`.
    pub fn new(
        server: ServerName,
        tool_name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Result<Self> {
        let tool_ref = ToolRef::new(server, tool_name)?;
        let input_schema = match input_schema {
            Value::Null => Value::Object(Map::new()),
            schema @ Value::Object(_) => schema,
            other => {
                return Err(Error::invalid_tool(format!(
                    "input schema for `{tool_ref}` must be an object, found {}",
                    json_kind(&other)
                )));
            }
        };
        Ok(Self {
            tool_ref,
            description: description.into(),
            input_schema,
        })
    }

    /// Builds a declaration from the MCP `tools/list` wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTool`] if the wire record fails validation.
    pub fn from_mcp(server: ServerName, tool: McpTool) -> Result<Self> {
        Self::new(
            server,
            tool.name,
            tool.description.unwrap_or_default(),
            tool.input_schema,
        )
    }

    /// Returns the reference identifying this tool.
    #[must_use]
    pub fn tool_ref(&self) -> &ToolRef {
        &self.tool_ref
    }

    /// Returns the origin server.
    #[must_use]
    pub fn server_name(&self) -> &ServerName {
        self.tool_ref.server()
    }

    /// Returns the tool name.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        self.tool_ref.tool()
    }

    /// Returns the free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the parameter schema.
    #[must_use]
    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Returns the top-level property names declared by the input schema.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|props| props.keys().map(String::as_str))
    }

    /// Returns the declaration in MCP wire shape, without the server annotation.
    #[must_use]
    pub fn to_mcp(&self) -> McpTool {
        McpTool {
            name: self.tool_name().to_owned(),
            description: Some(self.description.clone()),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Tool record as returned by an MCP server's `tools/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    /// Tool name, unique within its server.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema describing the tool's parameters.
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Deserialize)]
struct RawDeclaration {
    server: String,
    tool: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input_schema: Value,
}

impl TryFrom<RawDeclaration> for ToolDeclaration {
    type Error = Error;

    fn try_from(raw: RawDeclaration) -> Result<Self> {
        Self::new(
            ServerName::new(raw.server)?,
            raw.tool,
            raw.description,
            raw.input_schema,
        )
    }
}

fn validate_tool_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid_tool("tool name cannot be empty"));
    }
    if name.len() > MAX_TOOL_NAME_LEN {
        return Err(Error::invalid_tool(format!(
            "tool name length must be <= {MAX_TOOL_NAME_LEN}"
        )));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
