use crate::collect::pipeline::CollectorDriver;
use crate::collect::report::{CollectError, CollectStats, CollectionReport, KeyReport};
use crate::model::VersionKey;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Worker pool collecting independent VersionKeys in parallel.
///
/// Each key runs to completion on one task; the only thing workers share is
/// the driver and, through it, the knowledge-graph client.
pub struct CollectorExecutor {
    semaphore: Arc<Semaphore>,
    driver: Arc<CollectorDriver>,
}

impl CollectorExecutor {
    /// Pool width comes from the driver's `maxConcurrency`.
    pub fn new(driver: Arc<CollectorDriver>) -> Self {
        let concurrency_limit = driver.config().max_concurrency;
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
            driver,
        }
    }

    /// Collects every key and reports outcomes in request order.
    ///
    /// A panic or failure while collecting one key is recorded as that key's
    /// `Failed` outcome and does not affect the others.
    #[instrument(skip(self, keys, cancel), fields(keys = keys.len()))]
    pub async fn execute(&self, keys: Vec<VersionKey>, cancel: CancellationToken) -> CollectionReport {
        info!("Starting collection run");

        let handles: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let semaphore = self.semaphore.clone();
                let driver = self.driver.clone();
                let cancel = cancel.clone();
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            return KeyReport::failed(
                                task_key,
                                CollectError::Worker(format!("Semaphore error: {}", e)),
                                CollectStats::default(),
                            )
                        }
                    };
                    driver.collect(&task_key, &cancel).await
                });
                (key, handle)
            })
            .collect();

        let mut report = CollectionReport::default();
        for (key, handle) in handles {
            let entry = match handle.await {
                Ok(entry) => entry,
                Err(e) => {
                    error!(key = %key, error = %e, "Collection worker failed");
                    KeyReport::failed(key, CollectError::Worker(e.to_string()), CollectStats::default())
                }
            };
            report.entries.push(entry);
        }

        info!(
            done = report.done_count(),
            failed = report.failed_count(),
            "Finished collection run"
        );
        report
    }
}
