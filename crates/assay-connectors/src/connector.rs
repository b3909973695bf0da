//! The data connector: reference catalog, partitioners, sorters and the
//! batch-request resolution algorithm shared by every backend.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use assay_core::{
    batch_definition_matches_batch_request, BatchDefinition, BatchRequest, BatchSpec,
    DataReference,
};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogEntry};
use crate::error::ConnectorError;
use crate::partitioner::{Partition, Partitioner, PartitionerConfig};
use crate::sorter::{sort_batch_definitions, validate_sorters, Sorter};
use crate::{DataReferenceBackend, DEFAULT_ASSET_NAME};

const SELF_CHECK_EXAMPLE_COUNT: usize = 3;

/// Resolves batch requests against one source.
///
/// The catalog starts empty and is only ever replaced wholesale by
/// [`DataConnector::refresh_data_references_cache`]. Readers take a snapshot
/// `Arc` and never observe a partially built catalog.
#[derive(Debug)]
pub struct DataConnector {
    name: String,
    execution_environment_name: String,
    backend: Box<dyn DataReferenceBackend>,
    partitioners: BTreeMap<String, Arc<dyn Partitioner>>,
    default_partitioner_name: Option<String>,
    asset_partitioners: BTreeMap<String, Arc<dyn Partitioner>>,
    sorters: Vec<Sorter>,
    catalog: RwLock<Option<Arc<Catalog>>>,
}

/// Builder for [`DataConnector`]; validation happens in [`build`](Self::build).
#[derive(Debug)]
pub struct DataConnectorBuilder {
    name: String,
    execution_environment_name: String,
    backend: Box<dyn DataReferenceBackend>,
    partitioners: BTreeMap<String, Arc<dyn Partitioner>>,
    default_partitioner_name: Option<String>,
    asset_partitioners: BTreeMap<String, Arc<dyn Partitioner>>,
    sorters: Vec<Sorter>,
}

impl DataConnectorBuilder {
    pub fn partitioner(
        mut self,
        name: impl Into<String>,
        partitioner: Arc<dyn Partitioner>,
    ) -> Self {
        self.partitioners.insert(name.into(), partitioner);
        self
    }

    pub fn default_partitioner(mut self, name: impl Into<String>) -> Self {
        self.default_partitioner_name = Some(name.into());
        self
    }

    /// Partitioner used for one configured asset instead of the default.
    pub fn asset_partitioner(
        mut self,
        data_asset_name: impl Into<String>,
        partitioner: Arc<dyn Partitioner>,
    ) -> Self {
        self.asset_partitioners
            .insert(data_asset_name.into(), partitioner);
        self
    }

    pub fn sorters(mut self, sorters: Vec<Sorter>) -> Self {
        self.sorters = sorters;
        self
    }

    pub fn build(self) -> Result<DataConnector, ConnectorError> {
        if self.name.trim().is_empty() {
            return Err(ConnectorError::Config(
                "data connector name cannot be empty".to_string(),
            ));
        }

        let configured = self.backend.configured_asset_names();
        for asset in self.asset_partitioners.keys() {
            if !configured.contains(asset) {
                return Err(ConnectorError::Config(format!(
                    "partitioner given for unknown asset '{}' on data connector '{}'",
                    asset, self.name
                )));
            }
        }

        let mut connector = DataConnector {
            name: self.name,
            execution_environment_name: self.execution_environment_name,
            backend: self.backend,
            partitioners: self.partitioners,
            default_partitioner_name: None,
            asset_partitioners: self.asset_partitioners,
            sorters: self.sorters,
            catalog: RwLock::new(None),
        };
        if let Some(name) = self.default_partitioner_name {
            connector.set_default_partitioner(&name)?;
        }
        connector.validate_all_sorters()?;

        debug!(
            "Constructed {} '{}' with {} partitioner(s) and {} sorter(s)",
            connector.backend.class_name(),
            connector.name,
            connector.partitioners.len(),
            connector.sorters.len()
        );
        Ok(connector)
    }
}

/// Summary produced by [`DataConnector::self_check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfCheckReport {
    pub class_name: String,
    pub data_asset_count: usize,
    pub example_data_asset_names: Vec<String>,
    pub data_assets: BTreeMap<String, AssetReport>,
    pub unmatched_data_reference_count: usize,
    pub example_unmatched_data_references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetReport {
    pub batch_definition_count: usize,
    pub example_data_references: Vec<String>,
}

impl DataConnector {
    pub fn builder(
        name: impl Into<String>,
        execution_environment_name: impl Into<String>,
        backend: Box<dyn DataReferenceBackend>,
    ) -> DataConnectorBuilder {
        DataConnectorBuilder {
            name: name.into(),
            execution_environment_name: execution_environment_name.into(),
            backend,
            partitioners: BTreeMap::new(),
            default_partitioner_name: None,
            asset_partitioners: BTreeMap::new(),
            sorters: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn execution_environment_name(&self) -> &str {
        &self.execution_environment_name
    }

    pub fn class_name(&self) -> &'static str {
        self.backend.class_name()
    }

    pub fn default_partitioner_name(&self) -> Option<&str> {
        self.default_partitioner_name.as_deref()
    }

    pub fn partitioner_names(&self) -> Vec<&str> {
        self.partitioners.keys().map(String::as_str).collect()
    }

    /// Register a partitioner at runtime. Existing catalog entries are not
    /// re-partitioned until the next refresh.
    pub fn add_partitioner(
        &mut self,
        name: impl Into<String>,
        config: PartitionerConfig,
    ) -> Result<(), ConnectorError> {
        let name = name.into();
        let partitioner = config.build()?;
        debug!(
            "Adding {} '{}' to data connector '{}'",
            partitioner.class_name(),
            name,
            self.name
        );
        let replaces_default = self.default_partitioner_name.as_deref() == Some(name.as_str());
        let previous = self.partitioners.insert(name.clone(), partitioner);
        if replaces_default {
            if let Err(e) = self.validate_all_sorters() {
                match previous {
                    Some(previous) => self.partitioners.insert(name, previous),
                    None => self.partitioners.remove(&name),
                };
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn set_default_partitioner(&mut self, name: &str) -> Result<(), ConnectorError> {
        if !self.partitioners.contains_key(name) {
            return Err(ConnectorError::Config(format!(
                "default partitioner '{}' is not registered on data connector '{}' (known: {:?})",
                name,
                self.name,
                self.partitioner_names()
            )));
        }
        let previous = self.default_partitioner_name.replace(name.to_string());
        if let Err(e) = self.validate_all_sorters() {
            self.default_partitioner_name = previous;
            return Err(e);
        }
        Ok(())
    }

    fn default_partitioner(&self) -> Option<&Arc<dyn Partitioner>> {
        self.default_partitioner_name
            .as_ref()
            .and_then(|name| self.partitioners.get(name))
    }

    /// Sorters must fit the partitioner every listing scope will use.
    fn validate_all_sorters(&self) -> Result<(), ConnectorError> {
        if self.sorters.is_empty() {
            return Ok(());
        }
        for scope in self.scopes() {
            match self.partitioner_for_scope(scope.as_deref()) {
                Ok(Some(partitioner)) => {
                    validate_sorters(&self.sorters, partitioner.group_names())?
                }
                Ok(None) => {
                    return Err(ConnectorError::Config(format!(
                        "data connector '{}' has sorters but no partitioner to take identifiers from",
                        self.name
                    )))
                }
                // No default chosen yet; refresh reports it.
                Err(_) => {}
            }
        }
        Ok(())
    }

    /// Partitioner that applies to one listing scope. `None` means every
    /// reference in the scope is unmatched.
    fn partitioner_for_scope(
        &self,
        scope: Option<&str>,
    ) -> Result<Option<Arc<dyn Partitioner>>, ConnectorError> {
        if let Some(partitioner) = scope.and_then(|asset| self.asset_partitioners.get(asset)) {
            return Ok(Some(Arc::clone(partitioner)));
        }
        if let Some(partitioner) = self.default_partitioner() {
            return Ok(Some(Arc::clone(partitioner)));
        }
        if self.partitioners.is_empty() {
            return Ok(None);
        }
        Err(ConnectorError::Config(format!(
            "data connector '{}' has partitioners {:?} but no default partitioner",
            self.name,
            self.partitioner_names()
        )))
    }

    fn scopes(&self) -> Vec<Option<String>> {
        let configured = self.backend.configured_asset_names();
        if configured.is_empty() {
            vec![None]
        } else {
            configured.into_iter().map(Some).collect()
        }
    }

    fn batch_definition_for(&self, scope: Option<&str>, partition: Partition) -> BatchDefinition {
        let data_asset_name = scope
            .map(str::to_string)
            .or(partition.data_asset_name)
            .unwrap_or_else(|| DEFAULT_ASSET_NAME.to_string());
        BatchDefinition::new(
            self.execution_environment_name.clone(),
            self.name.clone(),
            data_asset_name,
            partition.definition,
        )
    }

    /// Raw listing across every scope, bypassing the catalog.
    pub async fn get_data_reference_list(&self) -> Result<Vec<DataReference>, ConnectorError> {
        let mut references = Vec::new();
        for scope in self.scopes() {
            references.extend(self.backend.list_data_references(scope.as_deref()).await?);
        }
        Ok(references)
    }

    async fn build_catalog(&self) -> Result<Catalog, ConnectorError> {
        let mut entries = Vec::new();
        let mut seen: BTreeMap<BatchDefinition, DataReference> = BTreeMap::new();
        for scope in self.scopes() {
            let partitioner = self.partitioner_for_scope(scope.as_deref())?;
            let references = self.backend.list_data_references(scope.as_deref()).await?;
            for data_reference in references {
                let batch_definitions = match partitioner
                    .as_ref()
                    .and_then(|p| p.find_partition_for_reference(&data_reference))
                {
                    Some(partition) => {
                        let definition = self.batch_definition_for(scope.as_deref(), partition);
                        if let Some(first) = seen.get(&definition) {
                            return Err(ConnectorError::Config(format!(
                                "data connector '{}' partitions both '{}' and '{}' to {}",
                                self.name, first, data_reference, definition
                            )));
                        }
                        seen.insert(definition.clone(), data_reference.clone());
                        vec![definition]
                    }
                    None => {
                        debug!(
                            "Data connector '{}': reference '{}' is unmatched",
                            self.name, data_reference
                        );
                        Vec::new()
                    }
                };
                entries.push(CatalogEntry {
                    data_asset_scope: scope.clone(),
                    data_reference,
                    batch_definitions,
                });
            }
        }
        Ok(Catalog::new(entries))
    }

    /// Re-list every scope and swap in a freshly built catalog.
    pub async fn refresh_data_references_cache(&self) -> Result<(), ConnectorError> {
        let catalog = Arc::new(self.build_catalog().await?);
        let unmatched = catalog.unmatched_references().len();
        info!(
            "Refreshed data connector '{}': {} reference(s), {} matched, {} unmatched",
            self.name,
            catalog.reference_count(),
            catalog.reference_count() - unmatched,
            unmatched
        );
        *self.catalog.write() = Some(catalog);
        Ok(())
    }

    fn cached_catalog(&self) -> Option<Arc<Catalog>> {
        self.catalog.read().clone()
    }

    fn require_catalog(&self) -> Result<Arc<Catalog>, ConnectorError> {
        self.cached_catalog()
            .ok_or_else(|| ConnectorError::CacheNotPopulated(self.name.clone()))
    }

    async fn ensure_catalog(&self) -> Result<Arc<Catalog>, ConnectorError> {
        if let Some(catalog) = self.cached_catalog() {
            return Ok(catalog);
        }
        self.refresh_data_references_cache().await?;
        self.require_catalog()
    }

    pub fn is_cache_populated(&self) -> bool {
        self.catalog.read().is_some()
    }

    /// Number of references in the cached catalog, matched or not.
    pub fn get_data_reference_list_count(&self) -> Result<usize, ConnectorError> {
        Ok(self.require_catalog()?.reference_count())
    }

    /// References no partitioner accepted during the last refresh.
    pub fn get_unmatched_data_references(&self) -> Result<BTreeSet<DataReference>, ConnectorError> {
        Ok(self.require_catalog()?.unmatched_references())
    }

    /// Configured asset names, or the asset names found in the catalog when
    /// assets are inferred.
    pub async fn get_available_data_asset_names(&self) -> Result<Vec<String>, ConnectorError> {
        let configured = self.backend.configured_asset_names();
        if !configured.is_empty() {
            return Ok(configured);
        }
        let catalog = self.ensure_catalog().await?;
        Ok(catalog.asset_names().into_iter().collect())
    }

    fn validate_batch_request(&self, batch_request: &BatchRequest) -> Result<(), ConnectorError> {
        let Some(name) = batch_request.data_connector_name.as_deref() else {
            return Err(ConnectorError::AmbiguousRequest(
                "batch request must name a data connector".to_string(),
            ));
        };
        if name != self.name {
            return Err(ConnectorError::InvalidRequest(format!(
                "batch request names data connector '{}' but was sent to '{}'",
                name, self.name
            )));
        }
        if let Some(env) = batch_request.execution_environment_name.as_deref() {
            if env != self.execution_environment_name {
                return Err(ConnectorError::InvalidRequest(format!(
                    "batch request names execution environment '{}' but data connector '{}' belongs to '{}'",
                    env, self.name, self.execution_environment_name
                )));
            }
        }
        if batch_request.data_asset_name.is_none() {
            return Err(ConnectorError::AmbiguousRequest(format!(
                "batch request to data connector '{}' must name a data asset",
                self.name
            )));
        }
        Ok(())
    }

    /// Resolve a request to sorted batch definitions. Refreshes the catalog
    /// first if it has never been populated. An asset with no definitions
    /// yields an empty list.
    pub async fn get_batch_definition_list_from_batch_request(
        &self,
        batch_request: &BatchRequest,
    ) -> Result<Vec<BatchDefinition>, ConnectorError> {
        self.validate_batch_request(batch_request)?;
        let catalog = self.ensure_catalog().await?;

        let matching: Vec<(DataReference, BatchDefinition)> = catalog
            .batch_definitions()
            .filter(|(_, definition)| {
                batch_definition_matches_batch_request(definition, batch_request)
            })
            .map(|(reference, definition)| (reference.clone(), definition.clone()))
            .collect();

        let sorted: Vec<BatchDefinition> = sort_batch_definitions(&self.sorters, matching)?
            .into_iter()
            .map(|(_, definition)| definition)
            .collect();

        let selected = match &batch_request.partition_request {
            Some(partition_request) => partition_request.select(sorted),
            None => sorted,
        };
        debug!(
            "Data connector '{}' resolved {} batch definition(s)",
            self.name,
            selected.len()
        );
        Ok(selected)
    }

    /// Engine spec for a definition present in the cached catalog.
    pub fn build_batch_spec_from_batch_definition(
        &self,
        batch_definition: &BatchDefinition,
    ) -> Result<BatchSpec, ConnectorError> {
        let catalog = self.require_catalog()?;
        let data_reference = catalog.find_reference(batch_definition).ok_or_else(|| {
            ConnectorError::StaleCache(format!(
                "batch definition {} is not in the catalog of data connector '{}'",
                batch_definition, self.name
            ))
        })?;
        self.backend.build_batch_spec(data_reference, batch_definition)
    }

    /// Refresh the catalog and summarize what this connector can see. Only
    /// the first few assets are detailed.
    pub async fn self_check(&self) -> Result<SelfCheckReport, ConnectorError> {
        self.refresh_data_references_cache().await?;
        let catalog = self.require_catalog()?;
        let asset_names = self.get_available_data_asset_names().await?;

        let data_assets = asset_names
            .iter()
            .take(SELF_CHECK_EXAMPLE_COUNT)
            .map(|asset| {
                let references: Vec<&DataReference> = catalog
                    .batch_definitions_for_asset(asset)
                    .map(|(reference, _)| reference)
                    .collect();
                let report = AssetReport {
                    batch_definition_count: references.len(),
                    example_data_references: references
                        .iter()
                        .take(SELF_CHECK_EXAMPLE_COUNT)
                        .map(|r| r.to_string())
                        .collect(),
                };
                (asset.clone(), report)
            })
            .collect();

        let unmatched = catalog.unmatched_references();
        Ok(SelfCheckReport {
            class_name: self.class_name().to_string(),
            data_asset_count: asset_names.len(),
            example_data_asset_names: asset_names
                .iter()
                .take(SELF_CHECK_EXAMPLE_COUNT)
                .cloned()
                .collect(),
            data_assets,
            unmatched_data_reference_count: unmatched.len(),
            example_unmatched_data_references: unmatched
                .iter()
                .take(SELF_CHECK_EXAMPLE_COUNT)
                .map(|r| r.to_string())
                .collect(),
        })
    }
}
