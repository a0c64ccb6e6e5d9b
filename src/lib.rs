pub mod collect;
pub mod config;
pub mod executor;
pub mod graph;
pub mod ingest;
pub mod matching;
pub mod model;
pub mod telemetry;
pub mod traits;

// Re-export common types for convenience
pub use collect::{CollectError, CollectionReport, CollectorDriver, KeyReport, Outcome};
pub use config::{CollectorConfig, ConfigError};
pub use executor::*;
pub use model::*;
pub use traits::*;
