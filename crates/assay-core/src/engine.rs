//! Execution engine boundary and the DataFusion-backed reference engine

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use datafusion::prelude::*;
use tracing::{debug, info};

use crate::batch::{BatchData, BatchSpec, PathBatchSpec, ReaderOptions};

/// Turns an engine-specific [`BatchSpec`] into materialized [`BatchData`].
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Name used when the engine is selected from configuration
    fn class_name(&self) -> &'static str;

    async fn get_batch_data(&self, batch_spec: &BatchSpec) -> anyhow::Result<BatchData>;
}

/// Reference engine wrapping DataFusion's SessionContext
pub struct DataFusionEngine {
    ctx: SessionContext,
}

impl DataFusionEngine {
    pub fn new() -> Self {
        Self::with_context(SessionContext::new())
    }

    /// Wrap an existing context, e.g. one that already has tables registered
    pub fn with_context(ctx: SessionContext) -> Self {
        info!("DataFusionEngine initialized");
        Self { ctx }
    }

    /// Get a reference to the underlying SessionContext
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    async fn collect(df: DataFrame) -> anyhow::Result<BatchData> {
        let schema: SchemaRef = Arc::new(df.schema().as_arrow().clone());
        let batches = df.collect().await?;
        Ok(BatchData::new(schema, batches))
    }

    async fn read_path(&self, spec: &PathBatchSpec) -> anyhow::Result<BatchData> {
        let path = spec
            .path
            .to_str()
            .ok_or_else(|| anyhow!("Path is not valid UTF-8: {}", spec.path.display()))?;
        let delimiter = delimiter_byte(&spec.reader_options)?;
        let extension = file_extension(&spec.path);

        let options = CsvReadOptions::new()
            .has_header(spec.reader_options.has_header)
            .delimiter(delimiter)
            .file_extension(&extension);

        let df = self.ctx.read_csv(path, options).await?;
        Self::collect(df).await
    }
}

impl Default for DataFusionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionEngine for DataFusionEngine {
    fn class_name(&self) -> &'static str {
        "DataFusionEngine"
    }

    async fn get_batch_data(&self, batch_spec: &BatchSpec) -> anyhow::Result<BatchData> {
        debug!("Loading {} batch spec", batch_spec.kind());
        match batch_spec {
            BatchSpec::Path(spec) => self.read_path(spec).await,
            BatchSpec::Sql(spec) => {
                let df = self.ctx.sql(&spec.query).await?;
                Self::collect(df).await
            }
            BatchSpec::InMemory(spec) => Ok(spec.data.clone()),
        }
    }
}

fn delimiter_byte(options: &ReaderOptions) -> anyhow::Result<u8> {
    if !options.delimiter.is_ascii() {
        bail!("CSV delimiter must be a single ASCII character, got '{}'", options.delimiter);
    }
    Ok(options.delimiter as u8)
}

// DataFusion filters listed files by extension, so match whatever the file has.
fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}
