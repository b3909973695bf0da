//! Batch identity and addressing types.
//!
//! A [`BatchRequest`] is a partial filter over [`BatchDefinition`]s. Connectors
//! resolve requests into definitions, and definitions into engine-specific
//! [`BatchSpec`]s. The execution engine turns a spec into [`BatchData`], which
//! is wrapped together with its identity in a [`Batch`].

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque address of one physical unit of data as seen by a connector
/// (a relative file path, a dictionary key, a table partition).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataReference(String);

impl DataReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DataReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DataReference {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DataReference {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for DataReference {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for DataReference {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Identifier name → value mapping extracted from a data reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionDefinition(BTreeMap<String, String>);

impl PartitionDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// Every key of `subset` is present here with an equal value.
    /// Extra keys on `self` are allowed; an empty `subset` always matches.
    pub fn contains_all(&self, subset: &PartitionDefinition) -> bool {
        subset
            .iter()
            .all(|(key, value)| self.0.get(key).is_some_and(|v| v == value))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PartitionDefinition {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for PartitionDefinition {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a PartitionDefinition {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Canonical, fully-qualified identity of one addressable batch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchDefinition {
    pub execution_environment_name: String,
    pub data_connector_name: String,
    pub data_asset_name: String,
    pub partition_definition: PartitionDefinition,
}

impl BatchDefinition {
    pub fn new(
        execution_environment_name: impl Into<String>,
        data_connector_name: impl Into<String>,
        data_asset_name: impl Into<String>,
        partition_definition: PartitionDefinition,
    ) -> Self {
        Self {
            execution_environment_name: execution_environment_name.into(),
            data_connector_name: data_connector_name.into(),
            data_asset_name: data_asset_name.into(),
            partition_definition,
        }
    }
}

impl fmt::Display for BatchDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.execution_environment_name, self.data_connector_name, self.data_asset_name
        )?;
        if !self.partition_definition.is_empty() {
            let parts: Vec<String> = self
                .partition_definition
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "[{}]", parts.join(", "))?;
        }
        Ok(())
    }
}

/// Partition-level constraints of a [`BatchRequest`].
///
/// `index` picks a single definition out of the sorted result (negative
/// values count from the end); `limit` truncates it. `index` wins when both
/// are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartitionRequest {
    pub partition_identifiers: PartitionDefinition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl PartitionRequest {
    pub fn identifiers(partition_identifiers: impl Into<PartitionDefinition>) -> Self {
        Self {
            partition_identifiers: partition_identifiers.into(),
            ..Self::default()
        }
    }

    /// Apply `index` / `limit` to an already filtered and sorted list.
    pub fn select<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if let Some(index) = self.index {
            let len = items.len() as i64;
            let resolved = if index < 0 { len + index } else { index };
            if resolved < 0 || resolved >= len {
                return Vec::new();
            }
            return vec![items.swap_remove(resolved as usize)];
        }
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        items
    }
}

/// A partially specified query over batch definitions. Unset fields match
/// any value. Built through the typed builder only; not `Deserialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_environment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_connector_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_asset_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_request: Option<PartitionRequest>,
}

impl BatchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request addressing one asset of one connector.
    pub fn for_asset(
        execution_environment_name: impl Into<String>,
        data_connector_name: impl Into<String>,
        data_asset_name: impl Into<String>,
    ) -> Self {
        Self::new()
            .with_execution_environment(execution_environment_name)
            .with_data_connector(data_connector_name)
            .with_data_asset(data_asset_name)
    }

    pub fn with_execution_environment(mut self, name: impl Into<String>) -> Self {
        self.execution_environment_name = Some(name.into());
        self
    }

    pub fn with_data_connector(mut self, name: impl Into<String>) -> Self {
        self.data_connector_name = Some(name.into());
        self
    }

    pub fn with_data_asset(mut self, name: impl Into<String>) -> Self {
        self.data_asset_name = Some(name.into());
        self
    }

    pub fn with_partition_request(mut self, partition_request: PartitionRequest) -> Self {
        self.partition_request = Some(partition_request);
        self
    }

    pub fn with_partition_identifiers(
        self,
        partition_identifiers: impl Into<PartitionDefinition>,
    ) -> Self {
        self.with_partition_request(PartitionRequest::identifiers(partition_identifiers))
    }
}

/// Whether `batch_definition` satisfies every constraint `batch_request` sets.
///
/// The request is a filter and the definition is ground truth: unset request
/// fields match anything, and partition identifiers only need to be a subset
/// of the definition's partition definition. An empty identifier map is a
/// no-op filter.
pub fn batch_definition_matches_batch_request(
    batch_definition: &BatchDefinition,
    batch_request: &BatchRequest,
) -> bool {
    fn field_matches(requested: &Option<String>, actual: &str) -> bool {
        requested.as_deref().map_or(true, |name| name == actual)
    }

    field_matches(
        &batch_request.execution_environment_name,
        &batch_definition.execution_environment_name,
    ) && field_matches(
        &batch_request.data_connector_name,
        &batch_definition.data_connector_name,
    ) && field_matches(
        &batch_request.data_asset_name,
        &batch_definition.data_asset_name,
    ) && batch_request.partition_request.as_ref().map_or(true, |p| {
        batch_definition
            .partition_definition
            .contains_all(&p.partition_identifiers)
    })
}

/// CSV reader options carried by [`PathBatchSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderOptions {
    pub delimiter: char,
    pub has_header: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_header: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathBatchSpec {
    pub path: PathBuf,
    pub reader_options: ReaderOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlBatchSpec {
    pub table_name: String,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct InMemoryBatchSpec {
    pub data_reference: DataReference,
    pub data: BatchData,
}

/// Engine-specific addressing information for one batch. Produced by a
/// connector from a [`BatchDefinition`].
#[derive(Debug, Clone)]
pub enum BatchSpec {
    Path(PathBatchSpec),
    Sql(SqlBatchSpec),
    InMemory(InMemoryBatchSpec),
}

impl BatchSpec {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchSpec::Path(_) => "path",
            BatchSpec::Sql(_) => "sql",
            BatchSpec::InMemory(_) => "in_memory",
        }
    }
}

/// Materialized tabular payload of a batch.
#[derive(Debug, Clone)]
pub struct BatchData {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl BatchData {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    pub fn from_record_batch(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchMarkers {
    pub load_time: DateTime<Utc>,
}

impl BatchMarkers {
    pub fn now() -> Self {
        Self {
            load_time: Utc::now(),
        }
    }
}

/// A materialized batch with its identity and addressing, for traceability.
#[derive(Debug, Clone)]
pub struct Batch {
    pub data: BatchData,
    pub batch_definition: BatchDefinition,
    pub batch_spec: BatchSpec,
    pub batch_markers: BatchMarkers,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition_a() -> BatchDefinition {
        BatchDefinition::new("A", "a", "aaa", PartitionDefinition::from([("id", "A")]))
    }

    #[test]
    fn test_matches_execution_environment_only() {
        let a = definition_a();
        assert!(batch_definition_matches_batch_request(
            &a,
            &BatchRequest::new().with_execution_environment("A")
        ));
        assert!(!batch_definition_matches_batch_request(
            &a,
            &BatchRequest::new().with_execution_environment("B")
        ));
    }

    #[test]
    fn test_matches_progressively_specific_requests() {
        let a = definition_a();
        let request = BatchRequest::new()
            .with_execution_environment("A")
            .with_data_connector("a");
        assert!(batch_definition_matches_batch_request(&a, &request));

        let request = request.with_data_asset("aaa");
        assert!(batch_definition_matches_batch_request(&a, &request));

        let wrong_asset = BatchRequest::for_asset("A", "a", "bbb");
        assert!(!batch_definition_matches_batch_request(&a, &wrong_asset));
    }

    #[test]
    fn test_conflicting_partition_identifier() {
        let a = definition_a();
        let request =
            BatchRequest::for_asset("A", "a", "aaa").with_partition_identifiers([("id", "B")]);
        assert!(!batch_definition_matches_batch_request(&a, &request));
    }

    #[test]
    fn test_partition_identifiers_alone() {
        let a = definition_a();
        let request = BatchRequest::new().with_partition_identifiers([("id", "A")]);
        assert!(batch_definition_matches_batch_request(&a, &request));
    }

    #[test]
    fn test_empty_request_matches_everything() {
        assert!(batch_definition_matches_batch_request(
            &definition_a(),
            &BatchRequest::new()
        ));
    }

    #[test]
    fn test_empty_partition_identifiers_is_no_op() {
        let request = BatchRequest::new().with_partition_request(PartitionRequest::default());
        assert!(batch_definition_matches_batch_request(
            &definition_a(),
            &request
        ));
    }

    #[test]
    fn test_identifier_missing_from_definition() {
        let request = BatchRequest::new().with_partition_identifiers([("year", "2020")]);
        assert!(!batch_definition_matches_batch_request(
            &definition_a(),
            &request
        ));
    }

    #[test]
    fn test_extra_definition_keys_allowed() {
        let def = BatchDefinition::new(
            "env",
            "conn",
            "asset",
            PartitionDefinition::from([("year", "2020"), ("month", "01")]),
        );
        let request = BatchRequest::new().with_partition_identifiers([("year", "2020")]);
        assert!(batch_definition_matches_batch_request(&def, &request));
    }

    #[test]
    fn test_partition_request_index_and_limit() {
        let items = vec![1, 2, 3, 4];

        let first = PartitionRequest {
            index: Some(0),
            ..Default::default()
        };
        assert_eq!(first.select(items.clone()), vec![1]);

        let last = PartitionRequest {
            index: Some(-1),
            ..Default::default()
        };
        assert_eq!(last.select(items.clone()), vec![4]);

        let out_of_range = PartitionRequest {
            index: Some(10),
            ..Default::default()
        };
        assert!(out_of_range.select(items.clone()).is_empty());

        let limited = PartitionRequest {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(limited.select(items.clone()), vec![1, 2]);

        assert_eq!(PartitionRequest::default().select(items.clone()), items);
    }

    #[test]
    fn test_batch_definition_display() {
        assert_eq!(definition_a().to_string(), "A.a.aaa[id=A]");
        let bare = BatchDefinition::new("env", "conn", "asset", PartitionDefinition::new());
        assert_eq!(bare.to_string(), "env.conn.asset");
    }

    #[test]
    fn test_batch_request_serializes_only_set_fields() {
        let request = BatchRequest::new().with_data_asset("alpha");
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"data_asset_name":"alpha"}"#);
    }

    #[test]
    fn test_reader_options_reject_unknown_keys() {
        let result = serde_json::from_str::<ReaderOptions>(r#"{"delimiter":";","quote":"'"}"#);
        assert!(result.is_err());

        let parsed: ReaderOptions = serde_json::from_str(r#"{"delimiter":";"}"#).unwrap();
        assert_eq!(parsed.delimiter, ';');
        assert!(parsed.has_header);
    }
}
