//! Collector configuration.
//!
//! The configuration is an opaque object handed in by the caller; this
//! module only gives it a typed shape, defaults and validation. Durations are
//! expressed in milliseconds on the wire.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::ExponentialBackoff;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Parse(String),
    #[error("{field} must be at least 1")]
    Zero { field: &'static str },
    #[error("maxBatchUnits {requested} exceeds the knowledge graph bulk limit {limit}")]
    BatchTooLarge { requested: usize, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorConfig {
    /// Upper bound on units per bulk mutation
    pub max_batch_units: usize,

    /// Upper bound on the estimated serialized size of one batch
    pub max_batch_bytes: usize,

    /// Total attempts per fetch and per batch (first try included)
    pub max_attempts: usize,

    /// Delay before the first retry; doubles on each further retry
    pub backoff_base_ms: u64,

    /// Ceiling for a single retry delay
    pub max_backoff_ms: u64,

    /// Deadline for each resolver or knowledge-graph call
    pub per_call_timeout_ms: u64,

    /// Number of VersionKeys collected in parallel
    pub max_concurrency: usize,

    /// Provenance stamped on every ingested dependency
    pub origin: String,
    pub collector: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_batch_units: 500,
            max_batch_bytes: 4 * 1024 * 1024,
            max_attempts: 4,
            backoff_base_ms: 100,
            max_backoff_ms: 10_000,
            per_call_timeout_ms: 30_000,
            max_concurrency: 8,
            origin: "deps.dev".to_string(),
            collector: "depgraph-collector".to_string(),
        }
    }
}

impl CollectorConfig {
    /// Parses a JSON configuration object and validates it against the
    /// default bulk limit.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate(crate::traits::DEFAULT_MAX_BULK_LEN)?;
        Ok(config)
    }

    /// Checks the limits against the knowledge graph's bulk array limit.
    pub fn validate(&self, max_bulk_len: usize) -> Result<(), ConfigError> {
        if self.max_batch_units == 0 {
            return Err(ConfigError::Zero {
                field: "maxBatchUnits",
            });
        }
        if self.max_batch_units > max_bulk_len {
            return Err(ConfigError::BatchTooLarge {
                requested: self.max_batch_units,
                limit: max_bulk_len,
            });
        }
        if self.max_batch_bytes == 0 {
            return Err(ConfigError::Zero {
                field: "maxBatchBytes",
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "maxAttempts",
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "maxConcurrency",
            });
        }
        if self.per_call_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "perCallTimeoutMs",
            });
        }
        Ok(())
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    /// Retry delays: `base, 2*base, 4*base, ...` capped at `max_backoff_ms`,
    /// one delay per retry after the first attempt.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        let cap = Duration::from_millis(self.max_backoff_ms);
        // from_millis(2) yields 2, 4, 8, ... which `factor` scales to 2*base, 4*base, ...
        std::iter::once(Duration::from_millis(self.backoff_base_ms))
            .chain(
                ExponentialBackoff::from_millis(2)
                    .factor(self.backoff_base_ms)
                    .max_delay(cap),
            )
            .map(move |delay| delay.min(cap))
            .take(self.max_attempts.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CollectorConfig::from_json_str(r#"{"maxBatchUnits": 50, "maxAttempts": 2}"#)
            .unwrap();
        assert_eq!(config.max_batch_units, 50);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.per_call_timeout(), Duration::from_secs(30));
        assert_eq!(config.origin, "deps.dev");
    }

    #[test]
    fn test_rejects_oversized_batches() {
        let err = CollectorConfig::from_json_str(r#"{"maxBatchUnits": 5000}"#).unwrap_err();
        assert_eq!(
            err,
            ConfigError::BatchTooLarge {
                requested: 5000,
                limit: 1000
            }
        );
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = CollectorConfig::from_json_str(r#"{"maxAttempts": 0}"#).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Zero {
                field: "maxAttempts"
            }
        );
    }

    #[test]
    fn test_backoff_doubles_and_is_bounded() {
        let config = CollectorConfig {
            backoff_base_ms: 100,
            max_backoff_ms: 300,
            max_attempts: 4,
            ..CollectorConfig::default()
        };
        let delays: Vec<Duration> = config.backoff().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
            ]
        );
    }

    #[test]
    fn test_backoff_keeps_odd_and_zero_bases() {
        let odd = CollectorConfig {
            backoff_base_ms: 101,
            max_attempts: 4,
            ..CollectorConfig::default()
        };
        assert_eq!(
            odd.backoff().collect::<Vec<_>>(),
            vec![
                Duration::from_millis(101),
                Duration::from_millis(202),
                Duration::from_millis(404),
            ]
        );

        let zero = CollectorConfig {
            backoff_base_ms: 0,
            max_attempts: 3,
            ..CollectorConfig::default()
        };
        assert!(zero.backoff().all(|d| d == Duration::ZERO));
        assert_eq!(zero.backoff().count(), 2);
    }

    #[test]
    fn test_single_attempt_has_no_retries() {
        let config = CollectorConfig {
            max_attempts: 1,
            ..CollectorConfig::default()
        };
        assert_eq!(config.backoff().count(), 0);
    }
}
