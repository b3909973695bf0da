//! Connector factory: pluggable connector construction by `class_name`.

use std::collections::BTreeMap;
use std::sync::Arc;

use datafusion::prelude::SessionContext;
use serde_json::Value;
use tracing::info;

use crate::config::{FilesystemConnectorConfig, SqlConnectorConfig, DEFAULT_REGEX_PARTITIONER_NAME};
use crate::connector::DataConnector;
use crate::error::ConnectorError;
use crate::filesystem::{FilesystemAsset, FilesystemBackend};
use crate::partitioner::{Partitioner, RegexPartitioner};
use crate::sorter::build_sorters;
use crate::sql::{DataFusionIntrospector, PostgresIntrospector, SqlBackend, SqlIntrospector};

/// Everything a factory may need besides the connector's own document.
#[derive(Clone)]
pub struct BuildContext {
    pub execution_environment_name: String,
    /// Session SQL connectors introspect when no connection string is given.
    pub session: Option<SessionContext>,
}

impl BuildContext {
    pub fn new(execution_environment_name: impl Into<String>) -> Self {
        Self {
            execution_environment_name: execution_environment_name.into(),
            session: None,
        }
    }

    pub fn with_session(mut self, session: SessionContext) -> Self {
        self.session = Some(session);
        self
    }
}

/// Builds one kind of data connector from its configuration document.
pub trait ConnectorFactory: Send + Sync {
    /// The `class_name` this factory handles.
    fn class_name(&self) -> &'static str;

    /// `config` is the connector document with `class_name` already removed.
    fn build(
        &self,
        name: &str,
        config: Value,
        ctx: &BuildContext,
    ) -> Result<DataConnector, ConnectorError>;
}

/// Registry of connector factories keyed by `class_name`.
pub struct ConnectorRegistry {
    factories: Vec<Arc<dyn ConnectorFactory>>,
}

impl ConnectorRegistry {
    pub fn new(factories: Vec<Arc<dyn ConnectorFactory>>) -> Self {
        Self { factories }
    }

    pub fn register(&mut self, factory: Arc<dyn ConnectorFactory>) {
        self.factories.push(factory);
    }

    pub fn class_names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| f.class_name()).collect()
    }

    /// Build a connector from a document tagged with `class_name`.
    pub fn build_connector(
        &self,
        name: &str,
        config: &Value,
        ctx: &BuildContext,
    ) -> Result<DataConnector, ConnectorError> {
        let mut document = config.as_object().cloned().ok_or_else(|| {
            ConnectorError::Config(format!(
                "configuration of data connector '{}' must be an object",
                name
            ))
        })?;
        let class_name = match document.remove("class_name") {
            Some(Value::String(class_name)) => class_name,
            _ => {
                return Err(ConnectorError::Config(format!(
                    "data connector '{}' needs a string 'class_name'",
                    name
                )))
            }
        };

        let factory = self
            .factories
            .iter()
            .find(|f| f.class_name() == class_name)
            .ok_or_else(|| {
                ConnectorError::Config(format!(
                    "unknown data connector class_name '{}' (known: {:?})",
                    class_name,
                    self.class_names()
                ))
            })?;

        let connector = factory.build(name, Value::Object(document), ctx)?;
        info!("Built {} '{}'", class_name, name);
        Ok(connector)
    }
}

// ---------------------------------------------------------------------------
// Built-in factory implementations
// ---------------------------------------------------------------------------

/// Factory for local filesystem trees.
pub struct FilesystemConnectorFactory;

impl ConnectorFactory for FilesystemConnectorFactory {
    fn class_name(&self) -> &'static str {
        "FilesystemDataConnector"
    }

    fn build(
        &self,
        name: &str,
        config: Value,
        ctx: &BuildContext,
    ) -> Result<DataConnector, ConnectorError> {
        let config: FilesystemConnectorConfig = serde_json::from_value(config)?;

        let mut backend = FilesystemBackend::new(&config.base_directory)
            .with_reader_options(config.reader_options.clone());
        if let Some(glob_directive) = &config.glob_directive {
            backend = backend.with_glob_directive(glob_directive);
        }

        let mut asset_partitioners: BTreeMap<String, Arc<dyn Partitioner>> = BTreeMap::new();
        for (asset_name, asset) in &config.assets {
            let asset = asset.clone().unwrap_or_default();
            if let Some(partitioner) = asset.partitioner_config(config.default_regex.as_ref())? {
                asset_partitioners.insert(asset_name.clone(), partitioner.build()?);
            }
            backend = backend.with_asset(
                asset_name,
                FilesystemAsset {
                    base_directory: asset.base_directory,
                    glob_directive: asset.glob_directive,
                },
            );
        }

        let mut builder = DataConnector::builder(
            name,
            ctx.execution_environment_name.clone(),
            Box::new(backend),
        )
        .sorters(build_sorters(&config.sorters));

        let mut default_partitioner_name = config.default_partitioner_name.clone();
        if let Some(regex) = &config.default_regex {
            let partitioner = RegexPartitioner::new(&regex.pattern, regex.group_names.clone())?;
            builder = builder.partitioner(DEFAULT_REGEX_PARTITIONER_NAME, Arc::new(partitioner));
            default_partitioner_name
                .get_or_insert_with(|| DEFAULT_REGEX_PARTITIONER_NAME.to_string());
        }
        for (partitioner_name, partitioner) in &config.partitioners {
            builder = builder.partitioner(partitioner_name.clone(), partitioner.build()?);
        }
        if let Some(default_name) = default_partitioner_name {
            builder = builder.default_partitioner(default_name);
        }
        for (asset_name, partitioner) in asset_partitioners {
            builder = builder.asset_partitioner(asset_name, partitioner);
        }
        builder.build()
    }
}

/// Factory for SQL tables, backed by PostgreSQL or a DataFusion session.
pub struct SqlConnectorFactory;

impl ConnectorFactory for SqlConnectorFactory {
    fn class_name(&self) -> &'static str {
        "SqlDataConnector"
    }

    fn build(
        &self,
        name: &str,
        config: Value,
        ctx: &BuildContext,
    ) -> Result<DataConnector, ConnectorError> {
        let config: SqlConnectorConfig = serde_json::from_value(config)?;

        let introspector: Arc<dyn SqlIntrospector> = match (&config.connection_string, &ctx.session)
        {
            (Some(conn), _) => Arc::new(PostgresIntrospector::new(conn.clone())),
            (None, Some(session)) => Arc::new(DataFusionIntrospector::new(session.clone())),
            (None, None) => {
                return Err(ConnectorError::Config(format!(
                    "SQL data connector '{}' needs a 'connection_string' or a DataFusion session",
                    name
                )))
            }
        };

        let backend =
            SqlBackend::new(introspector, config.schema_name.clone(), config.assets.clone())?;
        let asset_partitioners = backend.asset_partitioners();

        let mut builder = DataConnector::builder(
            name,
            ctx.execution_environment_name.clone(),
            Box::new(backend),
        )
        .sorters(build_sorters(&config.sorters));
        for (asset_name, partitioner) in asset_partitioners {
            builder = builder.asset_partitioner(asset_name, partitioner);
        }
        builder.build()
    }
}

/// Build the default registry with all built-in factories.
pub fn default_registry() -> ConnectorRegistry {
    ConnectorRegistry::new(vec![
        Arc::new(FilesystemConnectorFactory),
        Arc::new(SqlConnectorFactory),
    ])
}
