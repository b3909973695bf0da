//! Declarative configuration documents for connectors and datasources.
//!
//! Connector documents are tagged by `class_name`; the registry strips the tag
//! and hands the rest to the matching factory, which deserializes one of the
//! structs below.

use std::collections::BTreeMap;
use std::path::PathBuf;

use assay_core::ReaderOptions;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::partitioner::PartitionerConfig;
use crate::sorter::SorterConfig;
use crate::sql::SqlTableAsset;

/// Name under which `default_regex` is registered.
pub const DEFAULT_REGEX_PARTITIONER_NAME: &str = "default_regex";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexConfig {
    pub pattern: String,
    #[serde(default)]
    pub group_names: Vec<String>,
}

/// Per-asset section of a filesystem connector.
///
/// `pattern` and `group_names` override the corresponding halves of the
/// connector's `default_regex`; `partitioner` replaces it entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemAssetConfig {
    #[serde(default)]
    pub base_directory: Option<PathBuf>,
    #[serde(default)]
    pub glob_directive: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub group_names: Option<Vec<String>>,
    #[serde(default)]
    pub partitioner: Option<PartitionerConfig>,
}

impl FilesystemAssetConfig {
    /// Partitioner this asset uses instead of the connector default, if any.
    pub fn partitioner_config(
        &self,
        default_regex: Option<&RegexConfig>,
    ) -> Result<Option<PartitionerConfig>, ConnectorError> {
        let overrides_regex = self.pattern.is_some() || self.group_names.is_some();
        match (&self.partitioner, overrides_regex) {
            (Some(_), true) => Err(ConnectorError::Config(
                "asset may set either 'partitioner' or 'pattern'/'group_names', not both"
                    .to_string(),
            )),
            (Some(partitioner), false) => Ok(Some(partitioner.clone())),
            (None, false) => Ok(None),
            (None, true) => {
                let pattern = self
                    .pattern
                    .clone()
                    .or_else(|| default_regex.map(|r| r.pattern.clone()))
                    .ok_or_else(|| {
                        ConnectorError::Config(
                            "asset sets 'group_names' but neither it nor 'default_regex' has a pattern"
                                .to_string(),
                        )
                    })?;
                let group_names = self
                    .group_names
                    .clone()
                    .or_else(|| default_regex.map(|r| r.group_names.clone()))
                    .unwrap_or_default();
                Ok(Some(PartitionerConfig::RegexPartitioner {
                    pattern,
                    group_names,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemConnectorConfig {
    pub base_directory: PathBuf,
    #[serde(default)]
    pub glob_directive: Option<String>,
    #[serde(default)]
    pub default_regex: Option<RegexConfig>,
    #[serde(default)]
    pub partitioners: BTreeMap<String, PartitionerConfig>,
    #[serde(default)]
    pub default_partitioner_name: Option<String>,
    #[serde(default)]
    pub sorters: Vec<SorterConfig>,
    /// `null` entries declare an asset with no overrides.
    #[serde(default)]
    pub assets: BTreeMap<String, Option<FilesystemAssetConfig>>,
    #[serde(default)]
    pub reader_options: ReaderOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlConnectorConfig {
    /// PostgreSQL connection string. Without it, tables are looked up in the
    /// datasource's DataFusion session.
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub schema_name: Option<String>,
    pub assets: BTreeMap<String, SqlTableAsset>,
    #[serde(default)]
    pub sorters: Vec<SorterConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionEngineConfig {
    pub class_name: String,
}

impl Default for ExecutionEngineConfig {
    fn default() -> Self {
        Self {
            class_name: "DataFusionEngine".to_string(),
        }
    }
}

/// A datasource document: one engine plus named connector documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasourceConfig {
    /// Execution environment name. Callers without one of their own use it
    /// to name the datasource.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub execution_engine: ExecutionEngineConfig,
    #[serde(default)]
    pub data_connectors: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filesystem_config_with_null_assets() {
        let config: FilesystemConnectorConfig = serde_json::from_value(json!({
            "base_directory": "/data",
            "glob_directive": "*.csv",
            "default_regex": {"pattern": "(.+)_(\\d+)\\.csv", "group_names": ["name", "number"]},
            "sorters": [{"class_name": "NumericSorter", "name": "number", "orderby": "desc"}],
            "assets": {"alpha": null, "beta": {"glob_directive": "beta/*"}}
        }))
        .unwrap();
        assert_eq!(config.assets.len(), 2);
        assert_eq!(config.assets["alpha"], None);
        assert_eq!(config.reader_options, ReaderOptions::default());
        assert_eq!(config.sorters.len(), 1);
    }

    #[test]
    fn test_filesystem_config_rejects_unknown_keys() {
        let result = serde_json::from_value::<FilesystemConnectorConfig>(json!({
            "base_directory": "/data",
            "glob": "*"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_asset_pattern_overrides_default_regex() {
        let default_regex = RegexConfig {
            pattern: "(.+)\\.csv".to_string(),
            group_names: vec!["name".to_string()],
        };
        let asset = FilesystemAssetConfig {
            pattern: Some("(.+)_(\\d+)\\.csv".to_string()),
            group_names: Some(vec!["name".to_string(), "number".to_string()]),
            ..Default::default()
        };
        assert_eq!(
            asset.partitioner_config(Some(&default_regex)).unwrap(),
            Some(PartitionerConfig::regex("(.+)_(\\d+)\\.csv", &["name", "number"]))
        );

        let names_only = FilesystemAssetConfig {
            group_names: Some(vec!["whole".to_string()]),
            ..Default::default()
        };
        assert_eq!(
            names_only.partitioner_config(Some(&default_regex)).unwrap(),
            Some(PartitionerConfig::regex("(.+)\\.csv", &["whole"]))
        );

        assert_eq!(
            FilesystemAssetConfig::default()
                .partitioner_config(Some(&default_regex))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_asset_partitioner_conflicts_with_pattern() {
        let asset = FilesystemAssetConfig {
            pattern: Some("x".to_string()),
            partitioner: Some(PartitionerConfig::KeyValuePartitioner {
                group_names: vec!["year".to_string()],
            }),
            ..Default::default()
        };
        assert!(matches!(
            asset.partitioner_config(None),
            Err(ConnectorError::Config(_))
        ));
    }

    #[test]
    fn test_group_names_without_any_pattern() {
        let asset = FilesystemAssetConfig {
            group_names: Some(vec!["x".to_string()]),
            ..Default::default()
        };
        assert!(matches!(
            asset.partitioner_config(None),
            Err(ConnectorError::Config(_))
        ));
    }

    #[test]
    fn test_sql_config_requires_assets_key() {
        let result = serde_json::from_value::<SqlConnectorConfig>(json!({"schema_name": "public"}));
        assert!(result.is_err());

        let config: SqlConnectorConfig = serde_json::from_value(json!({
            "assets": {"events": {"table_name": "events", "partition_columns": ["day"]}}
        }))
        .unwrap();
        assert_eq!(config.assets["events"].partition_columns, vec!["day"]);
    }

    #[test]
    fn test_datasource_config_defaults_engine() {
        let config: DatasourceConfig = serde_json::from_value(json!({
            "data_connectors": {}
        }))
        .unwrap();
        assert_eq!(config.execution_engine.class_name, "DataFusionEngine");
    }
}
