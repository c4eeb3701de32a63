//! Candidate-group generation over a collected tool set.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use scanner_primitives::{CapabilityMap, ServerName, ToolDeclaration, ToolRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default upper bound on candidate groups per run.
pub const DEFAULT_MAX_GROUPS: usize = 64;

/// Which tool pairs are enumerated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Only pairs whose tools come from different servers.
    #[default]
    CrossServer,
    /// Every unordered pair of tools.
    AllPairs,
}

/// Errors raised while generating the search space.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// The tool set spans fewer than two servers.
    #[error("composition analysis needs at least 2 servers, found {found}")]
    InsufficientServers {
        /// Distinct servers found.
        found: usize,
    },
    /// More candidate groups than the configured bound.
    #[error("search space of {actual} groups exceeds the bound of {bound}")]
    SearchSpaceTooLarge {
        /// Configured bound.
        bound: usize,
        /// Groups that would have been evaluated.
        actual: usize,
    },
    /// The same tool was collected twice.
    #[error("tool `{tool}` appears more than once")]
    DuplicateTool {
        /// Duplicated tool.
        tool: ToolRef,
    },
    /// An explicit group names a tool that was not collected.
    #[error("group {index} names unknown tool `{tool}`")]
    UnknownTool {
        /// Position of the group in the request.
        index: usize,
        /// Unknown tool.
        tool: ToolRef,
    },
    /// An explicit group has fewer than two distinct tools.
    #[error("group {index} must contain at least 2 distinct tools")]
    GroupTooSmall {
        /// Position of the group in the request.
        index: usize,
    },
    /// The group bound was configured as zero.
    #[error("max_groups must be greater than zero")]
    InvalidBound,
}

/// Result alias for search operations.
pub type SearchResult<T> = Result<T, SearchError>;

/// Set of two or more tools evaluated together by one oracle call.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateGroup {
    tools: Vec<ToolDeclaration>,
}

impl CandidateGroup {
    fn new(mut tools: Vec<ToolDeclaration>) -> Self {
        tools.sort_by(|a, b| a.tool_ref().cmp(b.tool_ref()));
        Self { tools }
    }

    /// Tools in the group, sorted by reference.
    #[must_use]
    pub fn tools(&self) -> &[ToolDeclaration] {
        &self.tools
    }

    /// References of the tools in the group.
    pub fn tool_refs(&self) -> impl Iterator<Item = &ToolRef> {
        self.tools.iter().map(ToolDeclaration::tool_ref)
    }

    /// Number of tools in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Always `false`; groups hold at least two tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns `true` if the tools come from two or more servers.
    #[must_use]
    pub fn is_cross_server(&self) -> bool {
        self.tools
            .iter()
            .map(ToolDeclaration::server_name)
            .collect::<BTreeSet<_>>()
            .len()
            > 1
    }
}

impl Display for CandidateGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, tool) in self.tool_refs().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            Display::fmt(tool, f)?;
        }
        Ok(())
    }
}

/// Optional filter applied to candidate groups before the bound is checked.
pub trait SearchPrefilter: Send + Sync {
    /// Returns `true` to keep the group.
    fn keep(&self, group: &CandidateGroup, vectors: &CapabilityMap) -> bool;
}

impl<F> SearchPrefilter for F
where
    F: Fn(&CandidateGroup, &CapabilityMap) -> bool + Send + Sync,
{
    fn keep(&self, group: &CandidateGroup, vectors: &CapabilityMap) -> bool {
        self(group, vectors)
    }
}

/// Keeps only groups whose every tool carries at least one capability class.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassifiedOnly;

impl SearchPrefilter for ClassifiedOnly {
    fn keep(&self, group: &CandidateGroup, vectors: &CapabilityMap) -> bool {
        group
            .tool_refs()
            .all(|tool| vectors.get(tool).is_some_and(|vector| !vector.is_empty()))
    }
}

/// Search-space settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Pair enumeration mode.
    pub mode: SearchMode,
    /// Maximum number of candidate groups per run.
    pub max_groups: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            max_groups: DEFAULT_MAX_GROUPS,
        }
    }
}

/// Enumerated candidate groups for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchSpace {
    /// Groups to evaluate, in stable order.
    pub groups: Vec<CandidateGroup>,
    /// Candidates enumerated before any prefilter.
    pub enumerated: usize,
}

/// Builds the candidate groups for a collected tool set.
///
/// Pairs are enumerated over tools sorted by (server, tool), then explicit
/// higher-order groups are appended. The bound is never enforced by
/// truncation: an oversized space is an error.
#[derive(Clone)]
pub struct SearchGenerator {
    config: SearchConfig,
    prefilter: Option<Arc<dyn SearchPrefilter>>,
}

impl fmt::Debug for SearchGenerator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchGenerator")
            .field("config", &self.config)
            .field("prefilter", &self.prefilter.is_some())
            .finish()
    }
}

impl SearchGenerator {
    /// Creates a generator.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidBound`] when `max_groups` is zero.
    pub fn new(config: SearchConfig) -> SearchResult<Self> {
        if config.max_groups == 0 {
            return Err(SearchError::InvalidBound);
        }
        Ok(Self {
            config,
            prefilter: None,
        })
    }

    /// Installs a prefilter.
    #[must_use]
    pub fn with_prefilter(mut self, prefilter: Arc<dyn SearchPrefilter>) -> Self {
        self.prefilter = Some(prefilter);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> SearchConfig {
        self.config
    }

    /// Generates the search space.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InsufficientServers`] for fewer than two
    /// servers, [`SearchError::SearchSpaceTooLarge`] when the (filtered) count
    /// exceeds the bound, and validation errors for duplicate tools or
    /// malformed explicit groups.
    pub fn generate(
        &self,
        declarations: &[ToolDeclaration],
        explicit: &[Vec<ToolRef>],
        vectors: &CapabilityMap,
    ) -> SearchResult<SearchSpace> {
        let mut sorted: Vec<&ToolDeclaration> = declarations.iter().collect();
        sorted.sort_by(|a, b| a.tool_ref().cmp(b.tool_ref()));
        if let Some(pair) = sorted.windows(2).find(|w| w[0].tool_ref() == w[1].tool_ref()) {
            return Err(SearchError::DuplicateTool {
                tool: pair[0].tool_ref().clone(),
            });
        }

        let servers = sorted
            .iter()
            .map(|decl| decl.server_name())
            .collect::<BTreeSet<_>>()
            .len();
        if servers < 2 {
            return Err(SearchError::InsufficientServers { found: servers });
        }

        let extra = self.explicit_groups(&sorted, explicit)?;
        let pairs = pair_count(&sorted, self.config.mode);
        let enumerated = pairs.saturating_add(extra.len());
        let bound = self.config.max_groups;

        let Some(prefilter) = &self.prefilter else {
            if enumerated > bound {
                return Err(SearchError::SearchSpaceTooLarge {
                    bound,
                    actual: enumerated,
                });
            }
            let mut groups: Vec<CandidateGroup> =
                pairs_of(&sorted, self.config.mode).collect();
            groups.extend(extra);
            debug!(enumerated, groups = groups.len(), mode = ?self.config.mode, "generated search space");
            return Ok(SearchSpace { groups, enumerated });
        };

        let mut groups = Vec::new();
        let mut kept = 0usize;
        for group in pairs_of(&sorted, self.config.mode).chain(extra) {
            if !prefilter.keep(&group, vectors) {
                continue;
            }
            kept += 1;
            if kept <= bound {
                groups.push(group);
            }
        }
        if kept > bound {
            return Err(SearchError::SearchSpaceTooLarge {
                bound,
                actual: kept,
            });
        }
        debug!(enumerated, groups = groups.len(), mode = ?self.config.mode, "generated filtered search space");
        Ok(SearchSpace { groups, enumerated })
    }

    fn explicit_groups(
        &self,
        sorted: &[&ToolDeclaration],
        explicit: &[Vec<ToolRef>],
    ) -> SearchResult<Vec<CandidateGroup>> {
        let index: BTreeMap<&ToolRef, &ToolDeclaration> =
            sorted.iter().map(|decl| (decl.tool_ref(), *decl)).collect();
        let mut seen = BTreeSet::new();
        let mut groups = Vec::new();
        for (i, refs) in explicit.iter().enumerate() {
            let set: BTreeSet<&ToolRef> = refs.iter().collect();
            if set.len() < 2 {
                return Err(SearchError::GroupTooSmall { index: i });
            }
            let mut tools = Vec::with_capacity(set.len());
            for tool in &set {
                let decl = index.get(tool).ok_or_else(|| SearchError::UnknownTool {
                    index: i,
                    tool: (*tool).clone(),
                })?;
                tools.push((*decl).clone());
            }
            if self.covers_pair(&tools) || !seen.insert(set) {
                continue;
            }
            groups.push(CandidateGroup::new(tools));
        }
        Ok(groups)
    }

    fn covers_pair(&self, tools: &[ToolDeclaration]) -> bool {
        match tools {
            [a, b] => match self.config.mode {
                SearchMode::AllPairs => true,
                SearchMode::CrossServer => a.server_name() != b.server_name(),
            },
            _ => false,
        }
    }
}

fn pairs_of<'a>(
    sorted: &'a [&'a ToolDeclaration],
    mode: SearchMode,
) -> impl Iterator<Item = CandidateGroup> + 'a {
    sorted.iter().enumerate().flat_map(move |(i, a)| {
        sorted[i + 1..]
            .iter()
            .filter(move |b| mode == SearchMode::AllPairs || a.server_name() != b.server_name())
            .map(move |b| CandidateGroup::new(vec![(*a).clone(), (*b).clone()]))
    })
}

/// Number of pairs [`SearchGenerator::generate`] enumerates for a tool set.
#[must_use]
pub fn pair_count(declarations: &[&ToolDeclaration], mode: SearchMode) -> usize {
    let n = declarations.len();
    let all = n.saturating_mul(n.saturating_sub(1)) / 2;
    match mode {
        SearchMode::AllPairs => all,
        SearchMode::CrossServer => {
            let mut per_server: BTreeMap<&ServerName, usize> = BTreeMap::new();
            for decl in declarations {
                *per_server.entry(decl.server_name()).or_default() += 1;
            }
            let same_server: usize = per_server.values().map(|k| k * k.saturating_sub(1) / 2).sum();
            all - same_server
        }
    }
}

#[cfg(test)]
mod tests {
    use scanner_primitives::{CapabilityClass, CapabilityVector, ServerName};
    use serde_json::json;

    use super::*;

    fn decl(server: &str, name: &str) -> ToolDeclaration {
        ToolDeclaration::new(ServerName::new(server).unwrap(), name, "", json!({})).unwrap()
    }

    fn tools() -> Vec<ToolDeclaration> {
        vec![
            decl("b", "update_cart"),
            decl("a", "get_secret_word"),
            decl("a", "list_files"),
            decl("c", "send_email"),
        ]
    }

    fn generator(mode: SearchMode, max_groups: usize) -> SearchGenerator {
        SearchGenerator::new(SearchConfig { mode, max_groups }).unwrap()
    }

    #[test]
    fn all_pairs_is_n_choose_two() {
        let space = generator(SearchMode::AllPairs, 64)
            .generate(&tools(), &[], &CapabilityMap::new())
            .unwrap();
        assert_eq!(space.groups.len(), 6);
        assert_eq!(space.enumerated, 6);
    }

    #[test]
    fn cross_server_skips_same_server_pairs_in_stable_order() {
        let space = generator(SearchMode::CrossServer, 64)
            .generate(&tools(), &[], &CapabilityMap::new())
            .unwrap();
        assert_eq!(space.groups.len(), 5);
        assert!(space.groups.iter().all(CandidateGroup::is_cross_server));
        assert_eq!(space.groups[0].to_string(), "a/get_secret_word + b/update_cart");

        let mut shuffled = tools();
        shuffled.reverse();
        let again = generator(SearchMode::CrossServer, 64)
            .generate(&shuffled, &[], &CapabilityMap::new())
            .unwrap();
        assert_eq!(space, again);
    }

    #[test]
    fn oversized_space_is_an_error_not_a_truncation() {
        let err = generator(SearchMode::AllPairs, 5)
            .generate(&tools(), &[], &CapabilityMap::new())
            .unwrap_err();
        assert_eq!(err, SearchError::SearchSpaceTooLarge { bound: 5, actual: 6 });
    }

    #[test]
    fn prefilter_count_is_checked_instead() {
        let mut vectors = CapabilityMap::new();
        for tool in ["a/get_secret_word", "b/update_cart"] {
            let (server, name) = tool.split_once('/').unwrap();
            vectors.merge(
                ToolRef::parse(server, name).unwrap(),
                &CapabilityVector::from_iter([CapabilityClass::ReadData]),
            );
        }
        let space = generator(SearchMode::AllPairs, 1)
            .with_prefilter(Arc::new(ClassifiedOnly))
            .generate(&tools(), &[], &vectors)
            .unwrap();
        assert_eq!(space.enumerated, 6);
        assert_eq!(space.groups.len(), 1);
    }

    #[test]
    fn single_server_is_insufficient() {
        let err = generator(SearchMode::AllPairs, 64)
            .generate(&[decl("a", "x"), decl("a", "y")], &[], &CapabilityMap::new())
            .unwrap_err();
        assert_eq!(err, SearchError::InsufficientServers { found: 1 });
    }

    #[test]
    fn explicit_groups_are_validated_and_deduplicated() {
        let triple = vec![
            ToolRef::parse("a", "get_secret_word").unwrap(),
            ToolRef::parse("b", "update_cart").unwrap(),
            ToolRef::parse("c", "send_email").unwrap(),
        ];
        let pair = triple[..2].to_vec();
        let space = generator(SearchMode::CrossServer, 64)
            .generate(&tools(), &[triple.clone(), pair, triple], &CapabilityMap::new())
            .unwrap();
        assert_eq!(space.groups.len(), 6);
        assert_eq!(space.groups[5].len(), 3);

        let unknown = vec![
            ToolRef::parse("a", "get_secret_word").unwrap(),
            ToolRef::parse("z", "nope").unwrap(),
        ];
        let err = generator(SearchMode::CrossServer, 64)
            .generate(&tools(), &[unknown], &CapabilityMap::new())
            .unwrap_err();
        assert!(matches!(err, SearchError::UnknownTool { index: 0, .. }));
    }

    #[test]
    fn zero_bound_is_rejected() {
        assert_eq!(
            SearchGenerator::new(SearchConfig {
                mode: SearchMode::AllPairs,
                max_groups: 0
            })
            .unwrap_err(),
            SearchError::InvalidBound
        );
    }
}
