//! A datasource composes named data connectors with one execution engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use assay_core::{Batch, BatchMarkers, BatchRequest, DataFusionEngine, ExecutionEngine};
use datafusion::prelude::SessionContext;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::DatasourceConfig;
use crate::connector::DataConnector;
use crate::error::ConnectorError;
use crate::factory::{BuildContext, ConnectorRegistry};

pub struct Datasource {
    name: String,
    data_connectors: BTreeMap<String, DataConnector>,
    execution_engine: Arc<dyn ExecutionEngine>,
}

impl Datasource {
    pub fn new(name: impl Into<String>, execution_engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            name: name.into(),
            data_connectors: BTreeMap::new(),
            execution_engine,
        }
    }

    /// Build a datasource from a `{execution_engine, data_connectors}` document.
    pub fn from_config(
        name: &str,
        config: &Value,
        registry: &ConnectorRegistry,
    ) -> Result<Self, ConnectorError> {
        Self::from_config_with_context(name, config, registry, SessionContext::new())
    }

    /// Like [`from_config`](Self::from_config), sharing `session` between the
    /// engine and any SQL connectors without a connection string.
    pub fn from_config_with_context(
        name: &str,
        config: &Value,
        registry: &ConnectorRegistry,
        session: SessionContext,
    ) -> Result<Self, ConnectorError> {
        let config: DatasourceConfig = serde_json::from_value(config.clone())?;

        let engine: Arc<dyn ExecutionEngine> = match config.execution_engine.class_name.as_str() {
            "DataFusionEngine" => Arc::new(DataFusionEngine::with_context(session.clone())),
            other => {
                return Err(ConnectorError::Config(format!(
                    "unknown execution engine class_name '{}'",
                    other
                )))
            }
        };

        let ctx = BuildContext::new(name).with_session(session);
        let mut datasource = Self::new(name, engine);
        for (connector_name, connector_config) in &config.data_connectors {
            let connector = registry.build_connector(connector_name, connector_config, &ctx)?;
            datasource.add_data_connector(connector)?;
        }
        info!(
            "Datasource '{}' configured with {} data connector(s)",
            datasource.name,
            datasource.data_connectors.len()
        );
        Ok(datasource)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_data_connector(&mut self, connector: DataConnector) -> Result<(), ConnectorError> {
        if connector.execution_environment_name() != self.name {
            return Err(ConnectorError::Config(format!(
                "data connector '{}' belongs to execution environment '{}', not '{}'",
                connector.name(),
                connector.execution_environment_name(),
                self.name
            )));
        }
        if self.data_connectors.contains_key(connector.name()) {
            return Err(ConnectorError::Config(format!(
                "datasource '{}' already has a data connector named '{}'",
                self.name,
                connector.name()
            )));
        }
        debug!("Datasource '{}' added data connector '{}'", self.name, connector.name());
        self.data_connectors
            .insert(connector.name().to_string(), connector);
        Ok(())
    }

    pub fn data_connector_names(&self) -> Vec<&str> {
        self.data_connectors.keys().map(String::as_str).collect()
    }

    pub fn data_connector(&self, name: &str) -> Result<&DataConnector, ConnectorError> {
        self.data_connectors.get(name).ok_or_else(|| self.unknown_connector(name))
    }

    pub fn data_connector_mut(&mut self, name: &str) -> Result<&mut DataConnector, ConnectorError> {
        let err = self.unknown_connector(name);
        self.data_connectors.get_mut(name).ok_or(err)
    }

    fn unknown_connector(&self, name: &str) -> ConnectorError {
        ConnectorError::NotFound(format!(
            "data connector '{}' is not part of datasource '{}' (known: {:?})",
            name,
            self.name,
            self.data_connector_names()
        ))
    }

    /// Resolve a request to materialized batches, in the connector's sort order.
    pub async fn get_batch_list_from_batch_request(
        &self,
        batch_request: &BatchRequest,
    ) -> Result<Vec<Batch>, ConnectorError> {
        if let Some(env) = batch_request.execution_environment_name.as_deref() {
            if env != self.name {
                return Err(ConnectorError::InvalidRequest(format!(
                    "batch request names execution environment '{}' but was sent to '{}'",
                    env, self.name
                )));
            }
        }
        let connector_name = batch_request.data_connector_name.as_deref().ok_or_else(|| {
            ConnectorError::AmbiguousRequest("batch request must name a data connector".to_string())
        })?;
        let connector = self.data_connector(connector_name)?;

        let batch_definitions = connector
            .get_batch_definition_list_from_batch_request(batch_request)
            .await?;

        let mut batches = Vec::with_capacity(batch_definitions.len());
        for batch_definition in batch_definitions {
            let batch_spec = connector.build_batch_spec_from_batch_definition(&batch_definition)?;
            let data = self.execution_engine.get_batch_data(&batch_spec).await?;
            debug!(
                "Loaded {} row(s) for {} from {} spec",
                data.num_rows(),
                batch_definition,
                batch_spec.kind()
            );
            batches.push(Batch {
                data,
                batch_definition,
                batch_spec,
                batch_markers: BatchMarkers::now(),
            });
        }
        info!(
            "Datasource '{}' loaded {} batch(es) from data connector '{}'",
            self.name,
            batches.len(),
            connector_name
        );
        Ok(batches)
    }

    /// Resolve a request that must identify exactly one batch.
    pub async fn get_batch(&self, batch_request: &BatchRequest) -> Result<Batch, ConnectorError> {
        let mut batches = self.get_batch_list_from_batch_request(batch_request).await?;
        match batches.len() {
            1 => Ok(batches.remove(0)),
            n => Err(ConnectorError::AmbiguousRequest(format!(
                "batch request resolved to {} batches, expected exactly one",
                n
            ))),
        }
    }

    /// Asset names per data connector.
    pub async fn get_available_data_asset_names(
        &self,
    ) -> Result<BTreeMap<String, Vec<String>>, ConnectorError> {
        let mut names = BTreeMap::new();
        for (connector_name, connector) in &self.data_connectors {
            names.insert(
                connector_name.clone(),
                connector.get_available_data_asset_names().await?,
            );
        }
        Ok(names)
    }

    /// Refresh every connector's reference cache.
    pub async fn refresh_data_references_caches(&self) -> Result<(), ConnectorError> {
        for connector in self.data_connectors.values() {
            connector.refresh_data_references_cache().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Datasource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datasource")
            .field("name", &self.name)
            .field("data_connectors", &self.data_connectors)
            .field("execution_engine", &self.execution_engine.class_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::DictBackend;
    use crate::factory::default_registry;
    use serde_json::json;

    fn dict_connector(name: &str, env: &str) -> DataConnector {
        DataConnector::builder(name, env, Box::new(DictBackend::default()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_add_data_connector_checks_environment_and_duplicates() {
        let mut datasource = Datasource::new("env", Arc::new(DataFusionEngine::new()));
        datasource.add_data_connector(dict_connector("a", "env")).unwrap();
        assert!(matches!(
            datasource.add_data_connector(dict_connector("a", "env")),
            Err(ConnectorError::Config(_))
        ));
        assert!(matches!(
            datasource.add_data_connector(dict_connector("b", "other")),
            Err(ConnectorError::Config(_))
        ));
        assert_eq!(datasource.data_connector_names(), vec!["a"]);
        assert!(datasource.data_connector_mut("a").is_ok());
    }

    #[tokio::test]
    async fn test_request_routing_errors() {
        let mut datasource = Datasource::new("env", Arc::new(DataFusionEngine::new()));
        datasource.add_data_connector(dict_connector("a", "env")).unwrap();

        let wrong_env = BatchRequest::for_asset("other", "a", "x");
        assert!(matches!(
            datasource.get_batch_list_from_batch_request(&wrong_env).await,
            Err(ConnectorError::InvalidRequest(_))
        ));

        let no_connector = BatchRequest::new().with_data_asset("x");
        assert!(matches!(
            datasource.get_batch_list_from_batch_request(&no_connector).await,
            Err(ConnectorError::AmbiguousRequest(_))
        ));

        let unknown = BatchRequest::for_asset("env", "zzz", "x");
        assert!(matches!(
            datasource.get_batch_list_from_batch_request(&unknown).await,
            Err(ConnectorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_batch_requires_exactly_one() {
        let mut datasource = Datasource::new("env", Arc::new(DataFusionEngine::new()));
        datasource.add_data_connector(dict_connector("a", "env")).unwrap();
        let request = BatchRequest::for_asset("env", "a", "anything");
        assert!(matches!(
            datasource.get_batch(&request).await,
            Err(ConnectorError::AmbiguousRequest(_))
        ));
    }

    #[test]
    fn test_from_config_rejects_unknown_engine() {
        let result = Datasource::from_config(
            "env",
            &json!({"execution_engine": {"class_name": "SparkEngine"}}),
            &default_registry(),
        );
        assert!(matches!(result, Err(ConnectorError::Config(_))));
    }

    #[tokio::test]
    async fn test_from_config_builds_connectors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_1.csv"), "x\n1\n").unwrap();

        let datasource = Datasource::from_config(
            "env",
            &json!({
                "execution_engine": {"class_name": "DataFusionEngine"},
                "data_connectors": {
                    "fs": {
                        "class_name": "FilesystemDataConnector",
                        "base_directory": dir.path(),
                        "default_regex": {
                            "pattern": "(.+)_(\\d+)\\.csv",
                            "group_names": ["data_asset_name", "id"]
                        }
                    }
                }
            }),
            &default_registry(),
        )
        .unwrap();
        assert_eq!(datasource.data_connector_names(), vec!["fs"]);

        let names = datasource.get_available_data_asset_names().await.unwrap();
        assert_eq!(names["fs"], vec!["a".to_string()]);
    }
}
