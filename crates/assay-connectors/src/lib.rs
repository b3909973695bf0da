//! Assay Connectors - data connectors and batch resolution
//!
//! This crate turns source-agnostic batch requests into batch definitions and
//! engine-specific batch specs for:
//! - local filesystem trees (CSV files)
//! - in-memory Arrow data keyed by name
//! - SQL tables (PostgreSQL, or tables registered in a DataFusion context)

pub mod catalog;
pub mod config;
pub mod connector;
pub mod datasource;
pub mod dict;
pub mod error;
pub mod factory;
pub mod filesystem;
pub mod partitioner;
pub mod sorter;
pub mod sql;
pub mod where_clause;

pub use catalog::{Catalog, CatalogEntry};
pub use config::{
    DatasourceConfig, FilesystemAssetConfig, FilesystemConnectorConfig, RegexConfig,
    SqlConnectorConfig,
};
pub use connector::{AssetReport, DataConnector, DataConnectorBuilder, SelfCheckReport};
pub use datasource::Datasource;
pub use dict::DictBackend;
pub use error::ConnectorError;
pub use factory::{
    default_registry, BuildContext, ConnectorFactory, ConnectorRegistry, FilesystemConnectorFactory,
    SqlConnectorFactory,
};
pub use filesystem::{FilesystemAsset, FilesystemBackend};
pub use partitioner::{
    KeyValuePartitioner, Partition, Partitioner, PartitionerConfig, RegexPartitioner,
};
pub use sorter::{OrderBy, Sorter, SorterConfig, SorterKind};
pub use sql::{
    DataFusionIntrospector, PostgresIntrospector, SqlBackend, SqlIntrospector, SqlTableAsset,
};

use std::fmt::Debug;

use assay_core::{BatchDefinition, BatchSpec, DataReference};
use async_trait::async_trait;

/// Asset name given to definitions when neither a configured asset nor a
/// `data_asset_name` capture group names one.
pub const DEFAULT_ASSET_NAME: &str = "DEFAULT_ASSET_NAME";

/// Source-specific half of a data connector: listing raw references and
/// addressing them.
#[async_trait]
pub trait DataReferenceBackend: Debug + Send + Sync {
    /// Class name reported by self-checks and used in configuration.
    fn class_name(&self) -> &'static str;

    /// Assets declared in configuration. Empty when assets are inferred from
    /// the references themselves.
    fn configured_asset_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// List raw references, sorted, for one configured asset or, with
    /// `None`, for the whole source.
    async fn list_data_references(
        &self,
        data_asset_name: Option<&str>,
    ) -> Result<Vec<DataReference>, ConnectorError>;

    /// Build the engine-facing spec for a reference the catalog resolved
    /// `batch_definition` to.
    fn build_batch_spec(
        &self,
        data_reference: &DataReference,
        batch_definition: &BatchDefinition,
    ) -> Result<BatchSpec, ConnectorError>;
}
