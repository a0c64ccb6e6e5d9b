//! Collect module - per-VersionKey orchestration and reporting.
//!
//! - **Pipeline**: [`pipeline::CollectorDriver`] runs the
//!   fetch → build → resolve → batch → ingest state machine
//! - **Report**: [`report::KeyReport`] and [`report::CollectionReport`]
//!   carry `Done`/`Failed` outcomes, rejections and resolver annotations

pub mod pipeline;
pub mod report;

pub use pipeline::{CollectState, CollectorDriver, ResolvedUnits};
pub use report::{
    Annotation, CollectError, CollectStats, CollectionReport, KeyReport, Outcome, RejectedUnit,
};
