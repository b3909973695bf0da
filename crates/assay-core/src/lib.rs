//! Assay Core - batch data model and execution engine boundary
//!
//! This crate defines how batches are identified (`BatchDefinition`), requested
//! (`BatchRequest`), addressed (`BatchSpec`) and materialized (`Batch`), plus the
//! DataFusion-backed reference engine.

pub mod batch;
pub mod engine;

pub use batch::{
    batch_definition_matches_batch_request, Batch, BatchData, BatchDefinition, BatchMarkers,
    BatchRequest, BatchSpec, DataReference, InMemoryBatchSpec, PartitionDefinition,
    PartitionRequest, PathBatchSpec, ReaderOptions, SqlBatchSpec,
};
pub use engine::{DataFusionEngine, ExecutionEngine};

// Re-export for downstream consumers
pub use arrow::record_batch::RecordBatch;
pub use datafusion::prelude::SessionContext;
