use crate::model::{
    DependencyAttributes, DependencyGraphResponse, MatchFlag, PackageSpec, VersionKey,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Largest bulk array the knowledge graph accepts unless it says otherwise.
pub const DEFAULT_MAX_BULK_LEN: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Resolver transport error: {0}")]
    Transport(String),
    #[error("Resolver call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Resolver unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    /// Every fetch error is a transport-level failure; semantic errors come
    /// back inside the response body instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transport(_) | FetchError::Timeout(_) | FetchError::Unavailable(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KnowledgeGraphError {
    #[error("Knowledge graph transport error: {0}")]
    Transport(String),
    #[error("Knowledge graph call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Knowledge graph returned status {status}: {message}")]
    Server { status: u16, message: String },
    #[error("Knowledge graph rejected the request: {0}")]
    Validation(String),
    #[error("Unexpected knowledge graph response: {0}")]
    Protocol(String),
}

impl KnowledgeGraphError {
    /// Transport failures leave the outcome unknown and may be retried;
    /// validation failures never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            KnowledgeGraphError::Transport(_)
            | KnowledgeGraphError::Timeout(_)
            | KnowledgeGraphError::Protocol(_) => true,
            KnowledgeGraphError::Server { status, .. } => *status >= 500,
            KnowledgeGraphError::Validation(_) => false,
        }
    }
}

/// Per-unit result of an ingestion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitOutcome {
    Accepted,
    Rejected(String),
}

#[async_trait]
pub trait UpstreamResolver: Send + Sync {
    /// Returns the resolved dependency graph of one package version.
    async fn resolve(&self, key: &VersionKey) -> Result<DependencyGraphResponse, FetchError>;
}

/// Client side of the knowledge graph's dependency mutations.
///
/// Ingesting an edge that already exists must be a no-op, which is what
/// makes retries after an unknown outcome safe.
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    /// Maximum number of elements accepted by one bulk call.
    fn max_bulk_len(&self) -> usize {
        DEFAULT_MAX_BULK_LEN
    }

    /// Ingests a single dependency edge.
    async fn ingest_dependency(
        &self,
        pkg: &PackageSpec,
        dep_pkg: &PackageSpec,
        match_flag: MatchFlag,
        dependency: &DependencyAttributes,
    ) -> Result<UnitOutcome, KnowledgeGraphError>;

    /// Ingests positionally aligned arrays sharing one match flag. The
    /// returned outcomes are aligned with the inputs.
    async fn ingest_dependencies(
        &self,
        pkgs: &[PackageSpec],
        dep_pkgs: &[PackageSpec],
        match_flag: MatchFlag,
        dependencies: &[DependencyAttributes],
    ) -> Result<Vec<UnitOutcome>, KnowledgeGraphError>;

    /// Reports, per aligned position, whether the edge is already stored.
    async fn existing_dependencies(
        &self,
        pkgs: &[PackageSpec],
        dep_pkgs: &[PackageSpec],
        match_flag: MatchFlag,
        dependencies: &[DependencyAttributes],
    ) -> Result<Vec<bool>, KnowledgeGraphError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(KnowledgeGraphError::Transport("reset".into()).is_retryable());
        assert!(KnowledgeGraphError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!KnowledgeGraphError::Server {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!KnowledgeGraphError::Validation("missing flag".into()).is_retryable());
    }
}
