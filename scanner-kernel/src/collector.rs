//! Tool collection boundary.
//!
//! A [`ToolCollector`] turns a server name into that server's tool
//! declarations. The collectors here read declaration files; a live connector
//! speaking to running servers plugs in behind the same trait.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scanner_primitives::{McpTool, ServerName, ToolDeclaration};
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Errors raised while collecting declarations.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// No source is configured for the server.
    #[error("no declaration source configured for server `{server}`")]
    UnknownServer {
        /// Requested server.
        server: ServerName,
    },
    /// The configured source cannot be read by this collector.
    #[error("cannot collect `{server}`: {reason}")]
    Unsupported {
        /// Requested server.
        server: ServerName,
        /// Why the source is not supported.
        reason: String,
    },
    /// Reading a declaration file failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A declaration file did not have a recognised shape.
    #[error("malformed declarations in {}: {reason}", path.display())]
    Malformed {
        /// File being parsed.
        path: PathBuf,
        /// Description of the problem.
        reason: String,
    },
    /// Two sources resolved to the same server name.
    #[error("server `{server}` is declared by more than one source")]
    DuplicateServer {
        /// Conflicting server name.
        server: ServerName,
    },
    /// A declaration failed validation.
    #[error(transparent)]
    Invalid(#[from] scanner_primitives::Error),
}

impl CollectionError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Result alias for collection operations.
pub type CollectionResult<T> = Result<T, CollectionError>;

/// Source of tool declarations for one server.
#[async_trait]
pub trait ToolCollector: Send + Sync {
    /// Returns every tool the server exposes.
    async fn collect(&self, server: &ServerName) -> CollectionResult<Vec<ToolDeclaration>>;

    /// Returns the servers this collector can be asked about, if it knows.
    fn known_servers(&self) -> Vec<ServerName> {
        Vec::new()
    }
}

/// Where a configured server's declarations come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerSource {
    /// A declaration file on disk.
    File(PathBuf),
    /// A running server, reachable only through a live connector.
    Url(String),
}

/// Collector over a configured set of servers.
#[derive(Clone, Debug, Default)]
pub struct DirectoryCollector {
    sources: BTreeMap<ServerName, ServerSource>,
}

impl DirectoryCollector {
    /// Creates a collector from explicit sources.
    #[must_use]
    pub fn new(sources: BTreeMap<ServerName, ServerSource>) -> Self {
        Self { sources }
    }

    /// Registers every `*.json` file in a directory, naming each server after
    /// its file stem.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::Io`] if the directory cannot be listed and
    /// [`CollectionError::DuplicateServer`] if two files map to one server.
    pub async fn scan(dir: impl AsRef<Path>) -> CollectionResult<Self> {
        let dir = dir.as_ref();
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|err| CollectionError::io(dir, err))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| CollectionError::io(dir, err))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        let collector = FileCollector::from_files(files)?;
        Ok(Self {
            sources: collector
                .files
                .into_iter()
                .map(|(server, path)| (server, ServerSource::File(path)))
                .collect(),
        })
    }

    /// Loads sources from an `mcp.json`-style document.
    ///
    /// Each entry under `servers` names either a `declarations_file` (resolved
    /// against the document's directory) or a `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read or an entry names
    /// neither source.
    pub async fn from_mcp_json(path: impl AsRef<Path>) -> CollectionResult<Self> {
        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            servers: BTreeMap<String, Entry>,
        }

        #[derive(Deserialize)]
        struct Entry {
            #[serde(default)]
            declarations_file: Option<PathBuf>,
            #[serde(default)]
            url: Option<String>,
        }

        let path = path.as_ref();
        let data = fs::read(path)
            .await
            .map_err(|err| CollectionError::io(path, err))?;
        let document: Document = serde_json::from_slice(&data)
            .map_err(|err| CollectionError::malformed(path, err.to_string()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut sources = BTreeMap::new();
        for (name, entry) in document.servers {
            let server = ServerName::new(&name)?;
            let source = match (entry.declarations_file, entry.url) {
                (Some(file), _) => ServerSource::File(base.join(file)),
                (None, Some(url)) => ServerSource::Url(url),
                (None, None) => {
                    return Err(CollectionError::malformed(
                        path,
                        format!("server `{name}` names neither declarations_file nor url"),
                    ));
                }
            };
            sources.insert(server, source);
        }
        Ok(Self { sources })
    }

    /// Adds the sources of `other`; its entries win on name clashes.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.sources.extend(other.sources);
        self
    }

    /// Returns the configured server names.
    pub fn servers(&self) -> impl Iterator<Item = &ServerName> {
        self.sources.keys()
    }

    /// Returns the source for a server.
    #[must_use]
    pub fn source(&self, server: &ServerName) -> Option<&ServerSource> {
        self.sources.get(server)
    }
}

#[async_trait]
impl ToolCollector for DirectoryCollector {
    async fn collect(&self, server: &ServerName) -> CollectionResult<Vec<ToolDeclaration>> {
        match self.sources.get(server) {
            Some(ServerSource::File(path)) => read_declarations(server, path).await,
            Some(ServerSource::Url(url)) => Err(CollectionError::Unsupported {
                server: server.clone(),
                reason: format!("{url} requires a live connector"),
            }),
            None => Err(CollectionError::UnknownServer {
                server: server.clone(),
            }),
        }
    }

    fn known_servers(&self) -> Vec<ServerName> {
        self.sources.keys().cloned().collect()
    }
}

/// Collector over explicit declaration files.
///
/// The server name is the file stem, minus an optional `YYYYMMDD-HHMMSS-`
/// prefix left by earlier per-server scans.
#[derive(Clone, Debug, Default)]
pub struct FileCollector {
    files: BTreeMap<ServerName, PathBuf>,
}

impl FileCollector {
    /// Creates a collector from file paths.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::DuplicateServer`] when two files map to the
    /// same server, or a validation error when a stem is not a valid name.
    pub fn from_files<I, P>(paths: I) -> CollectionResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut files = BTreeMap::new();
        for path in paths {
            let path = path.into();
            let server = server_name_for(&path)?;
            if files.insert(server.clone(), path).is_some() {
                return Err(CollectionError::DuplicateServer { server });
            }
        }
        Ok(Self { files })
    }

    /// Returns the server names the files map to.
    pub fn servers(&self) -> impl Iterator<Item = &ServerName> {
        self.files.keys()
    }

    /// Returns `true` if a file is registered for the server.
    #[must_use]
    pub fn covers(&self, server: &ServerName) -> bool {
        self.files.contains_key(server)
    }

    /// Returns `true` when no file is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl ToolCollector for FileCollector {
    async fn collect(&self, server: &ServerName) -> CollectionResult<Vec<ToolDeclaration>> {
        match self.files.get(server) {
            Some(path) => read_declarations(server, path).await,
            None => Err(CollectionError::UnknownServer {
                server: server.clone(),
            }),
        }
    }
}

/// Derives a server name from a declaration file path.
///
/// # Errors
///
/// Returns a validation error if the remaining stem is not a valid name.
pub fn server_name_for(path: &Path) -> CollectionResult<ServerName> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| CollectionError::malformed(path, "file name is not valid UTF-8"))?;
    Ok(ServerName::new(strip_timestamp(stem))?)
}

fn strip_timestamp(stem: &str) -> &str {
    let bytes = stem.as_bytes();
    let stamped = bytes.len() > 16
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[8] == b'-'
        && bytes[9..15].iter().all(u8::is_ascii_digit)
        && bytes[15] == b'-';
    if stamped { &stem[16..] } else { stem }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeclarationFile {
    Bare(Vec<McpTool>),
    Listing { tools: Vec<McpTool> },
    Assessment { tool_assessments: Vec<AssessedTool> },
}

#[derive(Deserialize)]
struct AssessedTool {
    tool_name: String,
    #[serde(default)]
    risk_summary: String,
}

/// Parses a declaration document for one server.
///
/// Accepts a bare array of MCP tool objects, a `{ "tools": [...] }` listing,
/// or a saved per-server assessment with `tool_assessments`.
///
/// # Errors
///
/// Returns [`CollectionError::Malformed`] for unrecognised documents and
/// duplicate tool names.
pub fn parse_declarations(
    server: &ServerName,
    path: &Path,
    data: &[u8],
) -> CollectionResult<Vec<ToolDeclaration>> {
    let document: DeclarationFile = serde_json::from_slice(data).map_err(|_| {
        CollectionError::malformed(
            path,
            "expected an array of tools, a `tools` listing, or `tool_assessments`",
        )
    })?;
    let declarations = match document {
        DeclarationFile::Bare(tools) | DeclarationFile::Listing { tools } => tools
            .into_iter()
            .map(|tool| ToolDeclaration::from_mcp(server.clone(), tool))
            .collect::<Result<Vec<_>, _>>()?,
        DeclarationFile::Assessment { tool_assessments } => tool_assessments
            .into_iter()
            .map(|tool| {
                ToolDeclaration::new(
                    server.clone(),
                    tool.tool_name,
                    tool.risk_summary,
                    serde_json::Value::Null,
                )
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let mut seen = BTreeSet::new();
    for declaration in &declarations {
        if !seen.insert(declaration.tool_name()) {
            return Err(CollectionError::malformed(
                path,
                format!("tool `{}` is declared twice", declaration.tool_name()),
            ));
        }
    }
    Ok(declarations)
}

async fn read_declarations(
    server: &ServerName,
    path: &Path,
) -> CollectionResult<Vec<ToolDeclaration>> {
    let data = fs::read(path)
        .await
        .map_err(|err| CollectionError::io(path, err))?;
    let declarations = parse_declarations(server, path, &data)?;
    debug!(
        server = %server,
        path = %path.display(),
        tools = declarations.len(),
        "collected declarations"
    );
    Ok(declarations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(name: &str) -> ServerName {
        ServerName::new(name).unwrap()
    }

    #[test]
    fn timestamp_prefix_is_stripped() {
        let path = Path::new("/tmp/20250101-120000-ServerA.json");
        assert_eq!(server_name_for(path).unwrap().as_str(), "ServerA");
        let path = Path::new("/tmp/ServerB.json");
        assert_eq!(server_name_for(path).unwrap().as_str(), "ServerB");
        let path = Path::new("2025-ServerC.json");
        assert_eq!(server_name_for(path).unwrap().as_str(), "2025-ServerC");
    }

    #[test]
    fn every_document_shape_parses() {
        let path = Path::new("decls.json");
        let bare = br#"[{"name": "get_secret_word", "description": "Returns the secret"}]"#;
        let listing = br#"{"tools": [{"name": "update_cart", "inputSchema": {"type": "object"}}]}"#;
        let assessment =
            br#"{"tool_assessments": [{"tool_name": "send_email", "risk_summary": "Sends mail", "risk_level": "Low"}]}"#;

        let parsed = parse_declarations(&server("a"), path, bare).unwrap();
        assert_eq!(parsed[0].tool_name(), "get_secret_word");
        let parsed = parse_declarations(&server("a"), path, listing).unwrap();
        assert_eq!(parsed[0].tool_name(), "update_cart");
        let parsed = parse_declarations(&server("a"), path, assessment).unwrap();
        assert_eq!(parsed[0].description(), "Sends mail");
    }

    #[test]
    fn duplicates_and_unknown_shapes_are_malformed() {
        let path = Path::new("decls.json");
        let twice = br#"[{"name": "x"}, {"name": "x"}]"#;
        assert!(matches!(
            parse_declarations(&server("a"), path, twice),
            Err(CollectionError::Malformed { .. })
        ));
        assert!(matches!(
            parse_declarations(&server("a"), path, br#"{"other": 1}"#),
            Err(CollectionError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn file_collector_reads_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20250101-120000-ServerA.json");
        std::fs::write(&path, br#"[{"name": "get_secret_word"}]"#).unwrap();

        let collector = FileCollector::from_files([path]).unwrap();
        let tools = collector.collect(&server("ServerA")).await.unwrap();
        assert_eq!(tools[0].tool_ref().to_string(), "ServerA/get_secret_word");
        assert!(matches!(
            collector.collect(&server("ServerB")).await,
            Err(CollectionError::UnknownServer { .. })
        ));
    }

    #[tokio::test]
    async fn two_files_for_one_server_conflict() {
        let err = FileCollector::from_files([
            "20250101-120000-ServerA.json",
            "20250202-120000-ServerA.json",
        ])
        .unwrap_err();
        assert!(matches!(err, CollectionError::DuplicateServer { .. }));
    }

    #[tokio::test]
    async fn mcp_json_resolves_files_and_rejects_urls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shop.json"), br#"{"tools": [{"name": "update_cart"}]}"#)
            .unwrap();
        std::fs::write(
            dir.path().join("mcp.json"),
            br#"{"servers": {
                "ServerB": {"declarations_file": "shop.json"},
                "Live": {"url": "http://localhost:8000/mcp"}
            }}"#,
        )
        .unwrap();

        let collector = DirectoryCollector::from_mcp_json(dir.path().join("mcp.json"))
            .await
            .unwrap();
        assert_eq!(collector.servers().count(), 2);
        let tools = collector.collect(&server("ServerB")).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert!(matches!(
            collector.collect(&server("Live")).await,
            Err(CollectionError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn scan_registers_json_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ServerA.json"), b"[]").unwrap();
        std::fs::write(dir.path().join("20250101-000000-ServerB.json"), b"[]").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let collector = DirectoryCollector::scan(dir.path()).await.unwrap();
        let names: Vec<_> = collector.servers().map(ServerName::as_str).collect();
        assert_eq!(names, ["ServerA", "ServerB"]);
        assert_eq!(collector.known_servers().len(), 2);
    }
}
