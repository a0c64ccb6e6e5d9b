//! Graph Builder: validates the resolver's flat node/edge lists and indexes
//! them for traversal.

use crate::model::{
    DependencyGraphResponse, GraphEdge, GraphNode, ResolvedGraph, WireEdge, WireNode,
};
use thiserror::Error;
use tracing::debug;

/// Structural violations that make a resolver response unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedGraphError {
    /// The resolver returned no nodes, so there is no root
    #[error("Resolver returned an empty graph")]
    Empty,

    /// An edge addresses a node index past the end of the node list
    #[error("Edge #{position} ({from} -> {to}) references a node outside 0..{node_count}")]
    DanglingEdge {
        position: usize,
        from: usize,
        to: usize,
        node_count: usize,
    },
}

/// Builds a [`ResolvedGraph`] from the resolver's flat lists.
///
/// Node order is preserved and nodes are never merged, even when two of them
/// carry the same `VersionKey`. Node and graph errors are copied through
/// unchanged; they never fail the build.
///
/// # Errors
///
/// - [`MalformedGraphError::Empty`] if `nodes` is empty
/// - [`MalformedGraphError::DanglingEdge`] for the first edge whose endpoints
///   fall outside the node list
pub fn build(
    nodes: Vec<WireNode>,
    edges: Vec<WireEdge>,
    graph_error: Option<String>,
) -> Result<ResolvedGraph, MalformedGraphError> {
    if nodes.is_empty() {
        return Err(MalformedGraphError::Empty);
    }
    let node_count = nodes.len();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    let mut graph_edges = Vec::with_capacity(edges.len());
    for (position, edge) in edges.into_iter().enumerate() {
        if edge.from_node >= node_count || edge.to_node >= node_count {
            return Err(MalformedGraphError::DanglingEdge {
                position,
                from: edge.from_node,
                to: edge.to_node,
                node_count,
            });
        }
        adjacency[edge.from_node].push(position);
        graph_edges.push(GraphEdge {
            from_index: edge.from_node,
            to_index: edge.to_node,
            requirement: edge.requirement,
        });
    }

    let graph_nodes: Vec<GraphNode> = nodes
        .into_iter()
        .enumerate()
        .map(|(index, node)| GraphNode {
            version_key: node.version_key,
            bundled: node.bundled,
            errors: node.errors,
            index,
        })
        .collect();

    debug!(
        nodes = graph_nodes.len(),
        edges = graph_edges.len(),
        root = %graph_nodes[0].version_key,
        "Built dependency graph"
    );

    Ok(ResolvedGraph {
        nodes: graph_nodes,
        edges: graph_edges,
        graph_error: graph_error.filter(|e| !e.is_empty()),
        adjacency,
    })
}

/// Builds a graph straight from a resolver response; an empty `error` field
/// means no graph-level error.
pub fn from_response(response: DependencyGraphResponse) -> Result<ResolvedGraph, MalformedGraphError> {
    build(response.nodes, response.edges, Some(response.error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VersionKey;

    fn wire_node(name: &str, version: &str) -> WireNode {
        WireNode {
            version_key: VersionKey::new("NPM", name, version),
            bundled: false,
            errors: vec![],
        }
    }

    fn wire_edge(from: usize, to: usize, requirement: &str) -> WireEdge {
        WireEdge {
            from_node: from,
            to_node: to,
            requirement: requirement.to_string(),
        }
    }

    #[test]
    fn test_build_simple_graph() {
        let graph = build(
            vec![wire_node("a", "1.2.3"), wire_node("b", "4.5.6")],
            vec![wire_edge(0, 1, "^4.0.0")],
            None,
        )
        .unwrap();

        assert_eq!(graph.root().version_key, VersionKey::new("NPM", "a", "1.2.3"));
        assert_eq!(graph.nodes()[1].index, 1);
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].requirement, "^4.0.0");
        assert!(graph.graph_error().is_none());
    }

    #[test]
    fn test_empty_graph_is_rejected() {
        let err = build(vec![], vec![], None).unwrap_err();
        assert_eq!(err, MalformedGraphError::Empty);
    }

    #[test]
    fn test_dangling_edge_names_the_index() {
        let err = build(
            vec![wire_node("a", "1.0.0"), wire_node("b", "1.0.0")],
            vec![wire_edge(0, 5, "x")],
            None,
        )
        .unwrap_err();

        assert_eq!(
            err,
            MalformedGraphError::DanglingEdge {
                position: 0,
                from: 0,
                to: 5,
                node_count: 2
            }
        );
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn test_dangling_source_is_rejected() {
        let err = build(vec![wire_node("a", "1.0.0")], vec![wire_edge(3, 0, "")], None)
            .unwrap_err();
        assert!(matches!(err, MalformedGraphError::DanglingEdge { from: 3, .. }));
    }

    #[test]
    fn test_duplicate_nodes_are_kept() {
        let graph = build(
            vec![
                wire_node("root", "1.0.0"),
                wire_node("dup", "2.0.0"),
                wire_node("dup", "2.0.0"),
            ],
            vec![wire_edge(0, 1, "^2"), wire_edge(0, 2, "~2.0")],
            None,
        )
        .unwrap();

        assert_eq!(graph.nodes().len(), 3);
        assert_eq!(graph.nodes()[1].version_key, graph.nodes()[2].version_key);
    }

    #[test]
    fn test_errors_are_carried_through() {
        let mut broken = wire_node("b", "1.0.0");
        broken.errors = vec!["could not resolve peer".to_string()];
        let graph = build(
            vec![wire_node("a", "1.0.0"), broken],
            vec![wire_edge(0, 1, "1.0.0")],
            Some("partial resolution".to_string()),
        )
        .unwrap();

        assert_eq!(graph.nodes()[1].errors, vec!["could not resolve peer"]);
        assert_eq!(graph.graph_error(), Some("partial resolution"));
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_edges_follow_node_order() {
        let graph = build(
            vec![wire_node("a", "1"), wire_node("b", "1"), wire_node("c", "1")],
            vec![wire_edge(1, 2, "r1"), wire_edge(0, 2, "r2"), wire_edge(0, 1, "r3")],
            None,
        )
        .unwrap();

        let order: Vec<&str> = graph
            .edges_in_node_order()
            .map(|e| e.requirement.as_str())
            .collect();
        assert_eq!(order, vec!["r2", "r3", "r1"]);
        assert_eq!(graph.dependencies_of(1).count(), 1);
        assert_eq!(graph.dependencies_of(9).count(), 0);
    }

    #[test]
    fn test_empty_response_error_is_none() {
        let response = DependencyGraphResponse {
            nodes: vec![wire_node("a", "1.0.0")],
            edges: vec![],
            error: String::new(),
        };
        let graph = from_response(response).unwrap();
        assert!(graph.graph_error().is_none());
    }
}
