//! In-memory knowledge graph.
//!
//! Stores dependency edges in a set, so re-ingesting an edge is a no-op.
//! Useful for dry runs and as the reference double for the ingestion client.

use crate::ingest::client::validate_package;
use crate::model::{DependencyAttributes, MatchFlag, PackageSpec};
use crate::traits::{KnowledgeGraph, KnowledgeGraphError, UnitOutcome, DEFAULT_MAX_BULK_LEN};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Identity of a stored dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredDependency {
    pub pkg: PackageSpec,
    pub dep_pkg: PackageSpec,
    pub match_flag: MatchFlag,
    pub dependency: DependencyAttributes,
}

#[derive(Debug)]
pub struct InMemoryKnowledgeGraph {
    edges: Mutex<HashSet<StoredDependency>>,
    max_bulk_len: usize,
    calls: AtomicUsize,
}

impl Default for InMemoryKnowledgeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKnowledgeGraph {
    pub fn new() -> Self {
        Self {
            edges: Mutex::new(HashSet::new()),
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_max_bulk_len(mut self, max_bulk_len: usize) -> Self {
        self.max_bulk_len = max_bulk_len;
        self
    }

    pub async fn edge_count(&self) -> usize {
        self.edges.lock().await.len()
    }

    pub async fn edges(&self) -> Vec<StoredDependency> {
        self.edges.lock().await.iter().cloned().collect()
    }

    /// Number of ingest calls served, single and bulk.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn check_aligned(
        &self,
        pkgs: &[PackageSpec],
        dep_pkgs: &[PackageSpec],
        dependencies: &[DependencyAttributes],
    ) -> Result<(), KnowledgeGraphError> {
        if pkgs.len() != dep_pkgs.len() || pkgs.len() != dependencies.len() {
            return Err(KnowledgeGraphError::Validation(format!(
                "bulk arrays are not aligned: {} pkgs, {} depPkgs, {} dependencies",
                pkgs.len(),
                dep_pkgs.len(),
                dependencies.len()
            )));
        }
        if pkgs.len() > self.max_bulk_len {
            return Err(KnowledgeGraphError::Validation(format!(
                "bulk length {} exceeds limit {}",
                pkgs.len(),
                self.max_bulk_len
            )));
        }
        Ok(())
    }
}

fn stored(
    pkg: &PackageSpec,
    dep_pkg: &PackageSpec,
    match_flag: MatchFlag,
    dependency: &DependencyAttributes,
) -> StoredDependency {
    StoredDependency {
        pkg: pkg.clone(),
        dep_pkg: dep_pkg.clone(),
        match_flag,
        dependency: dependency.clone(),
    }
}

fn insert(edges: &mut HashSet<StoredDependency>, edge: StoredDependency) -> UnitOutcome {
    if let Err(reason) = validate_package(&edge.pkg).and_then(|_| validate_package(&edge.dep_pkg))
    {
        return UnitOutcome::Rejected(reason);
    }
    edges.insert(edge);
    UnitOutcome::Accepted
}

#[async_trait]
impl KnowledgeGraph for InMemoryKnowledgeGraph {
    fn max_bulk_len(&self) -> usize {
        self.max_bulk_len
    }

    async fn ingest_dependency(
        &self,
        pkg: &PackageSpec,
        dep_pkg: &PackageSpec,
        match_flag: MatchFlag,
        dependency: &DependencyAttributes,
    ) -> Result<UnitOutcome, KnowledgeGraphError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut edges = self.edges.lock().await;
        Ok(insert(&mut edges, stored(pkg, dep_pkg, match_flag, dependency)))
    }

    async fn ingest_dependencies(
        &self,
        pkgs: &[PackageSpec],
        dep_pkgs: &[PackageSpec],
        match_flag: MatchFlag,
        dependencies: &[DependencyAttributes],
    ) -> Result<Vec<UnitOutcome>, KnowledgeGraphError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.check_aligned(pkgs, dep_pkgs, dependencies)?;
        let mut edges = self.edges.lock().await;
        Ok(pkgs
            .iter()
            .zip(dep_pkgs)
            .zip(dependencies)
            .map(|((pkg, dep_pkg), dependency)| {
                insert(&mut edges, stored(pkg, dep_pkg, match_flag, dependency))
            })
            .collect())
    }

    async fn existing_dependencies(
        &self,
        pkgs: &[PackageSpec],
        dep_pkgs: &[PackageSpec],
        match_flag: MatchFlag,
        dependencies: &[DependencyAttributes],
    ) -> Result<Vec<bool>, KnowledgeGraphError> {
        self.check_aligned(pkgs, dep_pkgs, dependencies)?;
        let edges = self.edges.lock().await;
        Ok(pkgs
            .iter()
            .zip(dep_pkgs)
            .zip(dependencies)
            .map(|((pkg, dep_pkg), dependency)| {
                edges.contains(&stored(pkg, dep_pkg, match_flag, dependency))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::batch::tests::unit;

    #[tokio::test]
    async fn test_reingest_is_noop() {
        let graph = InMemoryKnowledgeGraph::new();
        let u = unit("a", MatchFlag::RangeMatch, "^1");

        for _ in 0..3 {
            let outcome = graph
                .ingest_dependency(&u.pkg, &u.dep_pkg, u.match_flag, &u.dependency)
                .await
                .unwrap();
            assert_eq!(outcome, UnitOutcome::Accepted);
        }
        assert_eq!(graph.edge_count().await, 1);
        assert_eq!(graph.call_count(), 3);
    }

    #[tokio::test]
    async fn test_bulk_rejects_invalid_element_only() {
        let graph = InMemoryKnowledgeGraph::new();
        let good = unit("a", MatchFlag::RangeMatch, "^1");
        let mut bad = unit("b", MatchFlag::RangeMatch, "^1");
        bad.dep_pkg.version = String::new();

        let outcomes = graph
            .ingest_dependencies(
                &[good.pkg.clone(), bad.pkg.clone()],
                &[good.dep_pkg.clone(), bad.dep_pkg.clone()],
                MatchFlag::RangeMatch,
                &[good.dependency.clone(), bad.dependency.clone()],
            )
            .await
            .unwrap();

        assert_eq!(outcomes[0], UnitOutcome::Accepted);
        assert!(matches!(outcomes[1], UnitOutcome::Rejected(_)));
        assert_eq!(graph.edge_count().await, 1);
    }

    #[tokio::test]
    async fn test_misaligned_bulk_is_validation_error() {
        let graph = InMemoryKnowledgeGraph::new();
        let u = unit("a", MatchFlag::RangeMatch, "^1");
        let err = graph
            .ingest_dependencies(&[u.pkg.clone()], &[], MatchFlag::RangeMatch, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeGraphError::Validation(_)));
    }

    #[tokio::test]
    async fn test_existing_dependencies() {
        let graph = InMemoryKnowledgeGraph::new();
        let a = unit("a", MatchFlag::RangeMatch, "^1");
        let b = unit("b", MatchFlag::RangeMatch, "^1");
        graph
            .ingest_dependency(&a.pkg, &a.dep_pkg, a.match_flag, &a.dependency)
            .await
            .unwrap();

        let existing = graph
            .existing_dependencies(
                &[a.pkg.clone(), b.pkg.clone()],
                &[a.dep_pkg.clone(), b.dep_pkg.clone()],
                MatchFlag::RangeMatch,
                &[a.dependency.clone(), b.dependency.clone()],
            )
            .await
            .unwrap();
        assert_eq!(existing, vec![true, false]);

        // Same edge under the other flag is a different edge.
        let exact = graph
            .existing_dependencies(&[a.pkg], &[a.dep_pkg], MatchFlag::ExactMatch, &[a.dependency])
            .await
            .unwrap();
        assert_eq!(exact, vec![false]);
    }
}
