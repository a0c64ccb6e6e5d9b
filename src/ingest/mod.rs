//! Ingest module - submission of dependency edges to the knowledge graph.
//!
//! - **Batching**: [`batch::plan_batches`] groups units by match flag and
//!   chunks them under the configured limits
//! - **Client**: [`client::IngestionClient`] submits batches with retries and
//!   re-verification
//! - **Memory**: [`memory::InMemoryKnowledgeGraph`], an idempotent local graph

pub mod batch;
pub mod client;
pub mod memory;

pub use batch::{dedup_units, plan_batches, BatchLimits, IngestionBatch};
pub use client::{BatchFailure, BatchResult, IngestionClient};
pub use memory::InMemoryKnowledgeGraph;
