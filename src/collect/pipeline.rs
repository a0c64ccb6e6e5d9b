//! Collector Driver.
//!
//! Runs one VersionKey through the collection state machine:
//!
//! ```text
//! Fetching -> Building -> Resolving -> Batching -> Ingesting -> Done
//!     \           \
//!      +-----------+----------------------------------------> Failed
//! ```
//!
//! Only `Fetching` and `Ingesting` await the network. Cancellation is checked
//! before each transition, never in the middle of a call, so an in-flight RPC
//! either completes or hits its deadline.

use crate::collect::report::{
    Annotation, CollectError, CollectStats, KeyReport, Outcome, RejectedUnit,
};
use crate::config::{CollectorConfig, ConfigError};
use crate::graph::{builder, canonical};
use crate::ingest::batch::{dedup_units, plan_batches};
use crate::ingest::client::IngestionClient;
use crate::matching;
use crate::model::{
    DependencyAttributes, DependencyGraphResponse, DependencyType, GraphNode, IngestionUnit,
    ResolvedGraph, VersionKey,
};
use crate::traits::{FetchError, KnowledgeGraph, UpstreamResolver};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const JUSTIFICATION: &str = "dependency data collected via upstream resolver";

/// States of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectState {
    Fetching,
    Building,
    Resolving,
    Batching,
    Ingesting,
    Done,
    Failed,
}

impl fmt::Display for CollectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectState::Fetching => "fetching",
            CollectState::Building => "building",
            CollectState::Resolving => "resolving",
            CollectState::Batching => "batching",
            CollectState::Ingesting => "ingesting",
            CollectState::Done => "done",
            CollectState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Units produced from one graph, plus the edges that could not become units.
#[derive(Debug, Default)]
pub struct ResolvedUnits {
    pub units: Vec<IngestionUnit>,
    pub rejected: Vec<RejectedUnit>,
}

/// Drives fetch, build, resolve, batch and ingest for single VersionKeys.
///
/// Holds no per-key state, so one driver is shared by every worker.
pub struct CollectorDriver {
    resolver: Arc<dyn UpstreamResolver>,
    client: IngestionClient,
    config: CollectorConfig,
}

impl CollectorDriver {
    /// Creates a driver; fails if `config` does not fit the graph's limits.
    pub fn new(
        resolver: Arc<dyn UpstreamResolver>,
        graph: Arc<dyn KnowledgeGraph>,
        config: CollectorConfig,
    ) -> Result<Self, ConfigError> {
        let client = IngestionClient::new(graph, config.clone())?;
        Ok(Self {
            resolver,
            client,
            config,
        })
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Collects and ingests the dependency graph of `key`.
    ///
    /// Never panics on bad input and never returns an error: every problem is
    /// folded into the returned [`KeyReport`].
    #[instrument(skip(self, cancel), fields(key = %key))]
    pub async fn collect(&self, key: &VersionKey, cancel: &CancellationToken) -> KeyReport {
        let start = Instant::now();
        let mut stats = CollectStats::default();
        let outcome = self.run(key, cancel, &mut stats).await;
        stats.total_duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Outcome::Done {
                accepted, rejected, ..
            } => info!(
                state = %CollectState::Done,
                accepted,
                rejected = rejected.len(),
                duration_ms = stats.total_duration_ms,
                "Collection done"
            ),
            Outcome::Failed { cause } => {
                warn!(state = %CollectState::Failed, error = %cause, "Collection failed")
            }
        }
        KeyReport {
            key: key.clone(),
            outcome,
            stats,
        }
    }

    async fn run(
        &self,
        key: &VersionKey,
        cancel: &CancellationToken,
        stats: &mut CollectStats,
    ) -> Outcome {
        match self.run_states(key, cancel, stats).await {
            Ok(outcome) => outcome,
            Err(cause) => Outcome::Failed { cause },
        }
    }

    fn enter(&self, state: CollectState, cancel: &CancellationToken) -> Result<(), CollectError> {
        if cancel.is_cancelled() {
            debug!(%state, "Cancelled before state");
            return Err(CollectError::Cancelled);
        }
        debug!(%state, "Entering state");
        Ok(())
    }

    async fn run_states(
        &self,
        key: &VersionKey,
        cancel: &CancellationToken,
        stats: &mut CollectStats,
    ) -> Result<Outcome, CollectError> {
        // ====================================================================
        // Fetching
        // ====================================================================
        self.enter(CollectState::Fetching, cancel)?;
        let fetch_start = Instant::now();
        let (response, attempts) = self.fetch(key).await;
        stats.fetch_attempts = attempts;
        stats.fetch_duration_ms = fetch_start.elapsed().as_millis() as u64;
        let response = response.map_err(|source| CollectError::Fetch { attempts, source })?;

        // ====================================================================
        // Building
        // ====================================================================
        self.enter(CollectState::Building, cancel)?;
        let graph = builder::from_response(response)?;
        stats.nodes = graph.nodes().len();
        stats.edges = graph.edges().len();

        // ====================================================================
        // Resolving
        // ====================================================================
        self.enter(CollectState::Resolving, cancel)?;
        let annotations = Annotation::collect(&graph);
        let ResolvedUnits { units, mut rejected } = self.resolve_units(&graph);
        let units = dedup_units(units);
        stats.units = units.len();

        // ====================================================================
        // Batching
        // ====================================================================
        self.enter(CollectState::Batching, cancel)?;
        let batches = plan_batches(units, self.client.batch_limits());
        stats.batches = batches.len();

        // ====================================================================
        // Ingesting
        // ====================================================================
        self.enter(CollectState::Ingesting, cancel)?;
        let ingest_start = Instant::now();
        let mut accepted = 0;
        for batch in batches {
            match self.client.submit(batch).await {
                Ok(result) => {
                    accepted += result.accepted_count();
                    rejected.extend(
                        result
                            .rejected()
                            .map(|(unit, reason)| RejectedUnit::from_unit(unit.clone(), reason)),
                    );
                }
                Err(failure) => {
                    accepted += failure.settled.accepted_count();
                    rejected.extend(
                        failure
                            .settled
                            .rejected()
                            .map(|(unit, reason)| RejectedUnit::from_unit(unit.clone(), reason)),
                    );
                    let reason = failure.to_string();
                    rejected.extend(
                        failure
                            .unsettled
                            .into_iter()
                            .map(|unit| RejectedUnit::from_unit(unit, reason.clone())),
                    );
                }
            }
        }
        stats.ingest_duration_ms = ingest_start.elapsed().as_millis() as u64;

        Ok(Outcome::Done {
            accepted,
            rejected,
            annotations,
        })
    }

    /// Calls the resolver with a deadline per attempt, retrying transport
    /// failures under the configured backoff. Returns the attempt count with
    /// the result.
    async fn fetch(&self, key: &VersionKey) -> (Result<DependencyGraphResponse, FetchError>, usize) {
        let limit = self.config.per_call_timeout();
        let resolver = &self.resolver;
        let mut attempts = 0;
        let result = RetryIf::spawn(
            self.config.backoff(),
            || {
                attempts += 1;
                let attempt = attempts;
                async move {
                    let result = match timeout(limit, resolver.resolve(key)).await {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::Timeout(limit)),
                    };
                    if let Err(e) = &result {
                        warn!(attempt, error = %e, "Resolver call failed");
                    }
                    result
                }
            },
            |e: &FetchError| e.is_retryable(),
        )
        .await;
        (result, attempts)
    }

    /// Turns every edge into an ingestion unit, in node-list order.
    ///
    /// Resolver errors on either endpoint become annotations on the unit.
    /// Edges whose endpoints cannot be canonicalized are reported as rejected
    /// instead of aborting the graph.
    pub fn resolve_units(&self, graph: &ResolvedGraph) -> ResolvedUnits {
        let mut out = ResolvedUnits::default();
        for edge in graph.edges_in_node_order() {
            let (from, to) = match (graph.node(edge.from_index), graph.node(edge.to_index)) {
                (Some(from), Some(to)) => (from, to),
                // Unreachable for graphs produced by the builder.
                _ => continue,
            };

            let specs = canonical::canonicalize_node(from)
                .and_then(|pkg| canonical::canonicalize_node(to).map(|dep| (pkg, dep)));
            let (pkg, dep_pkg) = match specs {
                Ok(specs) => specs,
                Err(e) => {
                    out.rejected.push(RejectedUnit::from_edge(
                        &from.version_key,
                        &to.version_key,
                        e.to_string(),
                    ));
                    continue;
                }
            };

            let decision = matching::classify(&edge.requirement, &to.version_key.version);
            let mut annotations = node_annotations(from);
            annotations.extend(node_annotations(to));
            if decision.satisfied == Some(false) {
                annotations.push(format!(
                    "resolved version {} does not satisfy requirement {:?}",
                    to.version_key.version, edge.requirement
                ));
            }

            let mut justification = JUSTIFICATION.to_string();
            if dep_pkg.is_bundled() {
                justification.push_str(" (bundled)");
            }
            let dependency_type = if edge.from_index == 0 {
                DependencyType::Direct
            } else {
                DependencyType::Indirect
            };

            out.units.push(IngestionUnit {
                pkg,
                dep_pkg,
                match_flag: decision.flag,
                dependency: DependencyAttributes {
                    version_range: edge.requirement.clone(),
                    dependency_type,
                    justification,
                    origin: self.config.origin.clone(),
                    collector: self.config.collector.clone(),
                },
                annotations,
            });
        }
        out
    }
}

fn node_annotations(node: &GraphNode) -> Vec<String> {
    node.errors
        .iter()
        .map(|e| Annotation::node(node, e.as_str()).to_string())
        .collect()
}
