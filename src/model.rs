//! Data model shared by every stage of the collector.
//!
//! Types fall into three groups:
//! - **Upstream wire types**: [`DependencyGraphResponse`] and friends, exactly
//!   as the resolver RPC returns them.
//! - **Graph types**: [`VersionKey`], [`GraphNode`], [`GraphEdge`] and the
//!   validated [`ResolvedGraph`].
//! - **Ingestion types**: [`PackageSpec`], [`MatchFlag`],
//!   [`DependencyAttributes`] and [`IngestionUnit`], the shape submitted to
//!   the knowledge graph.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Graph Types
// ============================================================================

/// Identifies one package release as reported by the upstream resolver.
///
/// Equality is exact and case-sensitive on all three fields. Naming
/// differences between ecosystems are resolved later by the canonicalizer,
/// never here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionKey {
    /// Package management system, e.g. `"NPM"`, `"PYPI"`
    pub system: String,

    /// Package name as the system spells it
    pub name: String,

    /// Concrete version string
    pub version: String,
}

impl VersionKey {
    pub fn new(
        system: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.system, self.name, self.version)
    }
}

/// One node of a resolved graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub version_key: VersionKey,

    /// Whether the name encodes a bundle scope path (`a>1.2.3>b`)
    pub bundled: bool,

    /// Informational resolver errors attached to this node
    pub errors: Vec<String>,

    /// Position in the resolver's node list; 0 is the root
    pub index: usize,
}

/// A dependency edge between two nodes, addressed by node index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_index: usize,
    pub to_index: usize,

    /// Declared constraint the target satisfies, e.g. `"^1.0.0"`
    pub requirement: String,
}

/// A structurally valid dependency graph.
///
/// Built only by [`crate::graph::builder::build`], which guarantees that
/// `nodes` is non-empty and that every edge addresses an existing node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedGraph {
    pub(crate) nodes: Vec<GraphNode>,
    pub(crate) edges: Vec<GraphEdge>,
    pub(crate) graph_error: Option<String>,

    /// Outgoing edge positions per node, in resolver order
    #[serde(skip)]
    pub(crate) adjacency: Vec<Vec<usize>>,
}

impl ResolvedGraph {
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn graph_error(&self) -> Option<&str> {
        self.graph_error.as_deref()
    }

    /// The root node (index 0).
    pub fn root(&self) -> &GraphNode {
        // Non-empty by construction.
        &self.nodes[0]
    }

    pub fn node(&self, index: usize) -> Option<&GraphNode> {
        self.nodes.get(index)
    }

    /// Outgoing edges of `index`, in resolver order.
    pub fn dependencies_of(&self, index: usize) -> impl Iterator<Item = &GraphEdge> + '_ {
        self.adjacency
            .get(index)
            .into_iter()
            .flatten()
            .map(move |&pos| &self.edges[pos])
    }

    /// Edges ordered by source node position, keeping resolver order for
    /// edges that leave the same node.
    pub fn edges_in_node_order(&self) -> impl Iterator<Item = &GraphEdge> + '_ {
        (0..self.nodes.len()).flat_map(move |i| self.dependencies_of(i))
    }
}

// ============================================================================
// Upstream Wire Types
// ============================================================================

/// Response of the upstream resolver's `GetDependencies` call.
///
/// Missing fields decode to their empty defaults; an empty `error` string
/// means no graph-level error was reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraphResponse {
    #[serde(default)]
    pub nodes: Vec<WireNode>,

    #[serde(default)]
    pub edges: Vec<WireEdge>,

    #[serde(default)]
    pub error: String,
}

impl DependencyGraphResponse {
    /// Decodes the JSON form of a resolver response.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireNode {
    pub version_key: VersionKey,

    #[serde(default)]
    pub bundled: bool,

    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEdge {
    pub from_node: usize,
    pub to_node: usize,

    #[serde(default)]
    pub requirement: String,
}

// ============================================================================
// Ingestion Types
// ============================================================================

/// Package identifier in the shape the knowledge graph expects.
///
/// `scope` is the decoded bundle path for bundled packages and empty for
/// globally named ones, so a bundled `c` and a global `c` never compare
/// equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    /// Canonical package type, e.g. `"npm"`, `"golang"`
    #[serde(rename = "type")]
    pub pkg_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
}

impl PackageSpec {
    pub fn is_bundled(&self) -> bool {
        !self.scope.is_empty()
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg:{}/", self.pkg_type)?;
        if let Some(ns) = &self.namespace {
            write!(f, "{}/", ns)?;
        }
        write!(f, "{}@{}", self.name, self.version)?;
        if self.is_bundled() {
            write!(f, "#{}", self.scope.join(">"))?;
        }
        Ok(())
    }
}

/// Whether a dependency edge pins an exact version or floats in a range.
///
/// These are the only two flags the ingestion API accepts for dependency
/// edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchFlag {
    /// Pinned to the resolved version
    ExactMatch,

    /// Any version satisfying the declared requirement
    RangeMatch,
}

impl fmt::Display for MatchFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchFlag::ExactMatch => f.write_str("ExactMatch"),
            MatchFlag::RangeMatch => f.write_str("RangeMatch"),
        }
    }
}

/// Position of the dependency relative to the collected root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyType {
    Direct,
    Indirect,
}

/// Attributes recorded on each dependency edge in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyAttributes {
    /// Declared requirement, preserved verbatim
    pub version_range: String,
    pub dependency_type: DependencyType,
    pub justification: String,
    pub origin: String,
    pub collector: String,
}

/// Identity of an [`IngestionUnit`] for deduplication.
pub type UnitKey = (PackageSpec, PackageSpec, MatchFlag);

/// One dependency edge ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionUnit {
    pub pkg: PackageSpec,
    pub dep_pkg: PackageSpec,
    pub match_flag: MatchFlag,
    pub dependency: DependencyAttributes,

    /// Resolver errors of the nodes this edge touches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
}

impl IngestionUnit {
    pub fn requirement(&self) -> &str {
        &self.dependency.version_range
    }

    /// Scope path of the dependency if it is a bundled artifact.
    pub fn bundled_scope(&self) -> Option<&[String]> {
        if self.dep_pkg.is_bundled() {
            Some(&self.dep_pkg.scope)
        } else {
            None
        }
    }

    pub fn key(&self) -> UnitKey {
        (self.pkg.clone(), self.dep_pkg.clone(), self.match_flag)
    }
}

impl fmt::Display for IngestionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{} {:?}]",
            self.pkg,
            self.dep_pkg,
            self.match_flag,
            self.requirement()
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
