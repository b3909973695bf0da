//! Typed errors for the connectors crate.

use thiserror::Error;

/// Errors raised while configuring connectors or resolving batch requests.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),

    /// The request does not identify enough to be resolved.
    #[error("ambiguous batch request: {0}")]
    AmbiguousRequest(String),

    /// The request addresses a different connector or environment.
    #[error("invalid batch request: {0}")]
    InvalidRequest(String),

    /// A named connector or asset does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The catalog no longer reflects the underlying source.
    #[error("stale reference cache: {0}")]
    StaleCache(String),

    #[error("data reference cache has not been populated for connector '{0}'; call refresh_data_references_cache first")]
    CacheNotPopulated(String),

    /// A sorter could not interpret a partition value.
    #[error("sorting failed: {0}")]
    Sorting(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    /// The execution engine failed to materialize a batch.
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for ConnectorError {
    fn from(e: anyhow::Error) -> Self {
        ConnectorError::Execution(format!("{:#}", e))
    }
}

impl From<sqlx::Error> for ConnectorError {
    fn from(e: sqlx::Error) -> Self {
        ConnectorError::ConnectionFailed(e.to_string())
    }
}

impl From<datafusion::error::DataFusionError> for ConnectorError {
    fn from(e: datafusion::error::DataFusionError) -> Self {
        ConnectorError::QueryFailed(e.to_string())
    }
}

impl From<arrow::error::ArrowError> for ConnectorError {
    fn from(e: arrow::error::ArrowError) -> Self {
        ConnectorError::QueryFailed(e.to_string())
    }
}

impl From<regex::Error> for ConnectorError {
    fn from(e: regex::Error) -> Self {
        ConnectorError::Config(format!("invalid pattern: {}", e))
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        ConnectorError::Config(e.to_string())
    }
}
