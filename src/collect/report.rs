//! Per-VersionKey outcomes and the aggregated run report.

use crate::graph::builder::MalformedGraphError;
use crate::model::{GraphNode, IngestionUnit, ResolvedGraph, VersionKey};
use crate::traits::FetchError;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Why a VersionKey could not be collected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectError {
    #[error("Fetch failed after {attempts} attempts: {source}")]
    Fetch { attempts: usize, source: FetchError },

    #[error("Malformed graph: {0}")]
    Malformed(#[from] MalformedGraphError),

    #[error("Collection cancelled")]
    Cancelled,

    #[error("Worker failed: {0}")]
    Worker(String),
}

fn serialize_display<T: fmt::Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

/// Informational resolver error carried into the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Node the message belongs to; `None` for the graph-level error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_index: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_key: Option<VersionKey>,

    pub message: String,
}

impl Annotation {
    pub fn graph(message: impl Into<String>) -> Self {
        Self {
            node_index: None,
            version_key: None,
            message: message.into(),
        }
    }

    pub fn node(node: &GraphNode, message: impl Into<String>) -> Self {
        Self {
            node_index: Some(node.index),
            version_key: Some(node.version_key.clone()),
            message: message.into(),
        }
    }

    /// Graph error first, then node errors in node order.
    pub fn collect(graph: &ResolvedGraph) -> Vec<Self> {
        graph
            .graph_error()
            .map(Annotation::graph)
            .into_iter()
            .chain(
                graph
                    .nodes()
                    .iter()
                    .flat_map(|n| n.errors.iter().map(move |e| Annotation::node(n, e.as_str()))),
            )
            .collect()
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.node_index, &self.version_key) {
            (Some(i), Some(key)) => write!(f, "node {} ({}): {}", i, key, self.message),
            _ => write!(f, "graph: {}", self.message),
        }
    }
}

/// A dependency the knowledge graph did not take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedUnit {
    /// Human-readable edge, e.g. `pkg:npm/a@1.0.0 -> pkg:npm/b@2.0.0`
    pub subject: String,

    /// The unit, when the edge got as far as becoming one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<IngestionUnit>,

    pub reason: String,
}

impl RejectedUnit {
    pub fn from_unit(unit: IngestionUnit, reason: impl Into<String>) -> Self {
        Self {
            subject: format!("{} -> {}", unit.pkg, unit.dep_pkg),
            unit: Some(unit),
            reason: reason.into(),
        }
    }

    pub fn from_edge(from: &VersionKey, to: &VersionKey, reason: impl Into<String>) -> Self {
        Self {
            subject: format!("{} -> {}", from, to),
            unit: None,
            reason: reason.into(),
        }
    }
}

/// Final state of one VersionKey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    /// Reached the end of ingestion; rejections do not make this a failure
    Done {
        accepted: usize,
        rejected: Vec<RejectedUnit>,
        annotations: Vec<Annotation>,
    },

    Failed {
        #[serde(serialize_with = "serialize_display")]
        cause: CollectError,
    },
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done { .. })
    }
}

/// Timing and volume figures for one VersionKey.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectStats {
    pub total_duration_ms: u64,
    pub fetch_duration_ms: u64,
    pub ingest_duration_ms: u64,
    pub fetch_attempts: usize,
    pub nodes: usize,
    pub edges: usize,
    pub units: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyReport {
    pub key: VersionKey,
    pub outcome: Outcome,
    pub stats: CollectStats,
}

impl KeyReport {
    pub fn failed(key: VersionKey, cause: CollectError, stats: CollectStats) -> Self {
        Self {
            key,
            outcome: Outcome::Failed { cause },
            stats,
        }
    }
}

/// Outcomes of a run, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub entries: Vec<KeyReport>,
}

impl CollectionReport {
    pub fn done_count(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_done()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries.len() - self.done_count()
    }

    pub fn get(&self, key: &VersionKey) -> Option<&KeyReport> {
        self.entries.iter().find(|e| &e.key == key)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_and_json() {
        let report = CollectionReport {
            entries: vec![
                KeyReport {
                    key: VersionKey::new("NPM", "a", "1.0.0"),
                    outcome: Outcome::Done {
                        accepted: 2,
                        rejected: vec![],
                        annotations: vec![Annotation::graph("partial")],
                    },
                    stats: CollectStats::default(),
                },
                KeyReport::failed(
                    VersionKey::new("NPM", "b", "1.0.0"),
                    CollectError::Malformed(MalformedGraphError::Empty),
                    CollectStats::default(),
                ),
            ],
        };

        assert_eq!(report.done_count(), 1);
        assert_eq!(report.failed_count(), 1);

        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["entries"][0]["outcome"]["status"], "done");
        assert_eq!(json["entries"][1]["outcome"]["status"], "failed");
        assert_eq!(
            json["entries"][1]["outcome"]["cause"],
            "Malformed graph: Resolver returned an empty graph"
        );
    }

    #[test]
    fn test_annotation_display() {
        let node = GraphNode {
            version_key: VersionKey::new("NPM", "b", "2.0.0"),
            bundled: false,
            errors: vec![],
            index: 3,
        };
        assert_eq!(
            Annotation::node(&node, "peer missing").to_string(),
            "node 3 (NPM:b@2.0.0): peer missing"
        );
        assert_eq!(Annotation::graph("x").to_string(), "graph: x");
    }
}
