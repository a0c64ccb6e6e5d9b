//! Batch Ingestion Client.
//!
//! Submits one [`IngestionBatch`] to the knowledge graph with:
//! - client-side validation of every unit before any call
//! - a deadline on every call
//! - bounded retries with exponential backoff for transport failures
//! - re-verification after a failure, because a bulk call that failed in
//!   transport may still have stored a prefix of its elements

use crate::config::{CollectorConfig, ConfigError};
use crate::ingest::batch::{BatchLimits, IngestionBatch};
use crate::model::{IngestionUnit, MatchFlag, PackageSpec};
use crate::traits::{KnowledgeGraph, KnowledgeGraphError, UnitOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Checks the fields the knowledge graph requires on a package.
pub fn validate_package(pkg: &PackageSpec) -> Result<(), String> {
    if pkg.pkg_type.trim().is_empty() {
        return Err(format!("package {} has an empty type", pkg));
    }
    if pkg.name.trim().is_empty() {
        return Err(format!("package {} has an empty name", pkg));
    }
    if pkg.version.trim().is_empty() {
        return Err(format!("package {} has an empty version", pkg));
    }
    Ok(())
}

pub fn validate_unit(unit: &IngestionUnit) -> Result<(), String> {
    validate_package(&unit.pkg)?;
    validate_package(&unit.dep_pkg)
}

/// Per-unit outcomes of a batch, in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub outcomes: Vec<(IngestionUnit, UnitOutcome)>,
}

impl BatchResult {
    pub fn accepted_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == UnitOutcome::Accepted)
            .count()
    }

    pub fn rejected(&self) -> impl Iterator<Item = (&IngestionUnit, &str)> {
        self.outcomes.iter().filter_map(|(unit, outcome)| match outcome {
            UnitOutcome::Rejected(reason) => Some((unit, reason.as_str())),
            UnitOutcome::Accepted => None,
        })
    }
}

/// A batch whose transport failures outlasted the retry budget.
///
/// `settled` holds units whose outcome is known (validated away, or found
/// stored during re-verification); `unsettled` the rest.
#[derive(thiserror::Error, Debug, Clone)]
#[error("Batch ingestion failed after {attempts} attempts ({} units unsettled): {cause}", .unsettled.len())]
pub struct BatchFailure {
    pub settled: BatchResult,
    pub unsettled: Vec<IngestionUnit>,
    pub attempts: usize,
    pub cause: KnowledgeGraphError,
}

/// Shared, thread-safe client over a [`KnowledgeGraph`].
pub struct IngestionClient {
    graph: Arc<dyn KnowledgeGraph>,
    config: CollectorConfig,
}

impl IngestionClient {
    /// Creates a client, validating `config` against the graph's bulk limit.
    pub fn new(graph: Arc<dyn KnowledgeGraph>, config: CollectorConfig) -> Result<Self, ConfigError> {
        config.validate(graph.max_bulk_len())?;
        Ok(Self { graph, config })
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_units: self.config.max_batch_units,
            max_bytes: self.config.max_batch_bytes,
        }
    }

    fn call_timeout(&self) -> Duration {
        self.config.per_call_timeout()
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T, KnowledgeGraphError>
    where
        F: Future<Output = Result<T, KnowledgeGraphError>>,
    {
        let limit = self.call_timeout();
        timeout(limit, fut)
            .await
            .map_err(|_| KnowledgeGraphError::Timeout(limit))?
    }

    /// Ingests the units at `positions`; a single unit goes through the
    /// single-edge mutation.
    async fn ingest(
        &self,
        units: &[IngestionUnit],
        positions: &[usize],
        flag: MatchFlag,
    ) -> Result<Vec<UnitOutcome>, KnowledgeGraphError> {
        if let [pos] = positions {
            let u = &units[*pos];
            let outcome = self
                .with_deadline(
                    self.graph
                        .ingest_dependency(&u.pkg, &u.dep_pkg, flag, &u.dependency),
                )
                .await?;
            return Ok(vec![outcome]);
        }

        let (pkgs, dep_pkgs, deps) = aligned(units, positions);
        let outcomes = self
            .with_deadline(self.graph.ingest_dependencies(&pkgs, &dep_pkgs, flag, &deps))
            .await?;
        if outcomes.len() != positions.len() {
            return Err(KnowledgeGraphError::Protocol(format!(
                "expected {} outcomes, got {}",
                positions.len(),
                outcomes.len()
            )));
        }
        Ok(outcomes)
    }

    async fn existing(
        &self,
        units: &[IngestionUnit],
        positions: &[usize],
        flag: MatchFlag,
    ) -> Result<Vec<bool>, KnowledgeGraphError> {
        let (pkgs, dep_pkgs, deps) = aligned(units, positions);
        let existing = self
            .with_deadline(self.graph.existing_dependencies(&pkgs, &dep_pkgs, flag, &deps))
            .await?;
        if existing.len() != positions.len() {
            return Err(KnowledgeGraphError::Protocol(format!(
                "expected {} verification flags, got {}",
                positions.len(),
                existing.len()
            )));
        }
        Ok(existing)
    }

    /// Submits one batch.
    ///
    /// Validation failures, whether detected locally or reported by the
    /// knowledge graph, settle units as rejected and are never retried.
    /// Transport failures are retried up to `maxAttempts` in total; before
    /// each retry the client asks which pending units are already stored and
    /// only resubmits the others.
    ///
    /// # Errors
    ///
    /// Returns [`BatchFailure`] when the retry budget runs out with units
    /// still unsettled.
    #[instrument(skip(self, batch), fields(flag = %batch.match_flag(), units = batch.len()))]
    pub async fn submit(&self, batch: IngestionBatch) -> Result<BatchResult, BatchFailure> {
        let flag = batch.match_flag();
        let units = batch.into_units();
        let mut outcomes: Vec<Option<UnitOutcome>> = units
            .iter()
            .map(|u| validate_unit(u).err().map(UnitOutcome::Rejected))
            .collect();
        let mut pending: Vec<usize> = (0..units.len()).filter(|&i| outcomes[i].is_none()).collect();

        let mut delays = self.config.backoff();
        let mut attempts = 0;
        while !pending.is_empty() {
            attempts += 1;
            let err = match self.ingest(&units, &pending, flag).await {
                Ok(results) => {
                    for (&pos, outcome) in pending.iter().zip(results) {
                        outcomes[pos] = Some(outcome);
                    }
                    pending.clear();
                    break;
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(error = %err, units = pending.len(), "Knowledge graph rejected batch");
                for pos in pending.drain(..) {
                    outcomes[pos] = Some(UnitOutcome::Rejected(err.to_string()));
                }
                break;
            }

            let delay = match delays.next() {
                Some(delay) => delay,
                None => {
                    warn!(attempts, error = %err, "Retry budget exhausted");
                    return Err(failure(units, outcomes, attempts, err));
                }
            };
            warn!(
                attempt = attempts,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Bulk ingestion failed, verifying before retry"
            );
            tokio::time::sleep(delay).await;

            match self.existing(&units, &pending, flag).await {
                Ok(existing) => {
                    let mut still_pending = Vec::with_capacity(pending.len());
                    for (&pos, stored) in pending.iter().zip(existing) {
                        if stored {
                            outcomes[pos] = Some(UnitOutcome::Accepted);
                        } else {
                            still_pending.push(pos);
                        }
                    }
                    debug!(
                        already_stored = pending.len() - still_pending.len(),
                        remaining = still_pending.len(),
                        "Verified pending units"
                    );
                    pending = still_pending;
                }
                Err(verify_err) => {
                    // Resubmitting everything is safe: ingestion is idempotent.
                    debug!(error = %verify_err, "Verification failed, resubmitting all pending units");
                }
            }
        }

        let result = BatchResult {
            outcomes: units
                .into_iter()
                .zip(outcomes)
                .filter_map(|(u, o)| o.map(|o| (u, o)))
                .collect(),
        };
        info!(
            attempts,
            accepted = result.accepted_count(),
            rejected = result.outcomes.len() - result.accepted_count(),
            "Batch settled"
        );
        Ok(result)
    }
}

fn aligned(
    units: &[IngestionUnit],
    positions: &[usize],
) -> (Vec<PackageSpec>, Vec<PackageSpec>, Vec<crate::model::DependencyAttributes>) {
    let mut pkgs = Vec::with_capacity(positions.len());
    let mut dep_pkgs = Vec::with_capacity(positions.len());
    let mut deps = Vec::with_capacity(positions.len());
    for &pos in positions {
        let u = &units[pos];
        pkgs.push(u.pkg.clone());
        dep_pkgs.push(u.dep_pkg.clone());
        deps.push(u.dependency.clone());
    }
    (pkgs, dep_pkgs, deps)
}

fn failure(
    units: Vec<IngestionUnit>,
    outcomes: Vec<Option<UnitOutcome>>,
    attempts: usize,
    cause: KnowledgeGraphError,
) -> BatchFailure {
    let mut settled = BatchResult::default();
    let mut unsettled = Vec::new();
    for (unit, outcome) in units.into_iter().zip(outcomes) {
        match outcome {
            Some(outcome) => settled.outcomes.push((unit, outcome)),
            None => unsettled.push(unit),
        }
    }
    BatchFailure {
        settled,
        unsettled,
        attempts,
        cause,
    }
}
