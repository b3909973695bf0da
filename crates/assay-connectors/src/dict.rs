//! In-memory backend over named Arrow data.

use std::collections::BTreeMap;

use assay_core::{BatchData, BatchDefinition, BatchSpec, DataReference, InMemoryBatchSpec};
use async_trait::async_trait;

use crate::error::ConnectorError;
use crate::DataReferenceBackend;

/// Backend whose references are the keys of an injected map.
#[derive(Debug, Clone, Default)]
pub struct DictBackend {
    data: BTreeMap<String, BatchData>,
}

impl DictBackend {
    pub fn new(data: BTreeMap<String, BatchData>) -> Self {
        Self { data }
    }

    pub fn insert(&mut self, key: impl Into<String>, data: BatchData) {
        self.data.insert(key.into(), data);
    }

    pub fn remove(&mut self, key: &str) -> Option<BatchData> {
        self.data.remove(key)
    }
}

#[async_trait]
impl DataReferenceBackend for DictBackend {
    fn class_name(&self) -> &'static str {
        "DictDataConnector"
    }

    async fn list_data_references(
        &self,
        _data_asset_name: Option<&str>,
    ) -> Result<Vec<DataReference>, ConnectorError> {
        Ok(self.data.keys().map(|k| DataReference::from(k.as_str())).collect())
    }

    fn build_batch_spec(
        &self,
        data_reference: &DataReference,
        _batch_definition: &BatchDefinition,
    ) -> Result<BatchSpec, ConnectorError> {
        let data = self.data.get(data_reference.as_str()).ok_or_else(|| {
            ConnectorError::StaleCache(format!(
                "no data is stored under '{}' anymore",
                data_reference
            ))
        })?;
        Ok(BatchSpec::InMemory(InMemoryBatchSpec {
            data_reference: data_reference.clone(),
            data: data.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::StringArray;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use assay_core::PartitionDefinition;
    use std::sync::Arc;

    fn frame(value: &str) -> BatchData {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Utf8, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec![value]))]).unwrap();
        BatchData::from_record_batch(batch)
    }

    #[tokio::test]
    async fn test_lists_sorted_keys() {
        let mut backend = DictBackend::default();
        backend.insert("b", frame("b"));
        backend.insert("a", frame("a"));
        let references = backend.list_data_references(None).await.unwrap();
        assert_eq!(references, vec![DataReference::from("a"), DataReference::from("b")]);
    }

    #[test]
    fn test_missing_key_is_stale() {
        let mut backend = DictBackend::default();
        backend.insert("a", frame("a"));
        let definition = BatchDefinition::new("env", "c", "asset", PartitionDefinition::new());

        let spec = backend
            .build_batch_spec(&"a".into(), &definition)
            .unwrap();
        match spec {
            BatchSpec::InMemory(spec) => assert_eq!(spec.data.num_rows(), 1),
            other => panic!("Expected InMemory, got {:?}", other.kind()),
        }

        backend.remove("a");
        assert!(matches!(
            backend.build_batch_spec(&"a".into(), &definition),
            Err(ConnectorError::StaleCache(_))
        ));
    }
}
