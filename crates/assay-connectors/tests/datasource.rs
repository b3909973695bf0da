//! Integration tests for resolving batch requests into loaded batches

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use arrow::array::{Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use assay_connectors::{
    default_registry, ConnectorError, DataConnector, Datasource, DictBackend, RegexPartitioner,
};
use assay_core::{BatchData, BatchRequest, BatchSpec, DataFusionEngine, PartitionRequest};
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;
use serde_json::json;

fn frame(values: Vec<i64>) -> BatchData {
    let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap();
    BatchData::from_record_batch(batch)
}

fn total(data: &BatchData) -> i64 {
    data.batches
        .iter()
        .map(|batch| {
            let column = batch
                .column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .unwrap();
            column.values().iter().sum::<i64>()
        })
        .sum()
}

fn in_memory_datasource() -> Datasource {
    let mut data = BTreeMap::new();
    data.insert("orders-1".to_string(), frame(vec![1, 2, 3]));
    data.insert("orders-2".to_string(), frame(vec![10, 20]));
    data.insert("customers-1".to_string(), frame(vec![7]));
    data.insert("scratch".to_string(), frame(vec![0]));

    let partitioner = RegexPartitioner::new(
        r"(.+)-(\d+)",
        vec!["data_asset_name".to_string(), "id".to_string()],
    )
    .unwrap();
    let connector = DataConnector::builder("memory", "warehouse", Box::new(DictBackend::new(data)))
        .partitioner("by_id", Arc::new(partitioner))
        .default_partitioner("by_id")
        .build()
        .unwrap();

    let mut datasource = Datasource::new("warehouse", Arc::new(DataFusionEngine::new()));
    datasource.add_data_connector(connector).unwrap();
    datasource
}

fn events_session() -> SessionContext {
    let schema = Arc::new(Schema::new(vec![
        Field::new("region", DataType::Utf8, false),
        Field::new("day", DataType::Utf8, false),
        Field::new("amount", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(vec!["eu", "us", "eu", "eu"])),
            Arc::new(StringArray::from(vec![
                "2020-01-01",
                "2020-01-01",
                "2020-01-02",
                "2020-01-02",
            ])),
            Arc::new(Int64Array::from(vec![10, 20, 30, 40])),
        ],
    )
    .unwrap();
    let ctx = SessionContext::new();
    let table = MemTable::try_new(schema, vec![vec![batch]]).unwrap();
    ctx.register_table("events", Arc::new(table)).unwrap();
    ctx
}

#[tokio::test]
async fn test_in_memory_batches_round_trip() {
    let datasource = in_memory_datasource();

    let names = datasource.get_available_data_asset_names().await.unwrap();
    assert_eq!(names["memory"], vec!["customers", "orders"]);

    let batches = datasource
        .get_batch_list_from_batch_request(&BatchRequest::for_asset(
            "warehouse", "memory", "orders",
        ))
        .await
        .unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].batch_definition.partition_definition.get("id"), Some("1"));
    assert_eq!(batches[0].data.num_rows(), 3);
    assert_eq!(total(&batches[1].data), 30);
    assert!(matches!(batches[0].batch_spec, BatchSpec::InMemory(_)));

    let unmatched = datasource
        .data_connector("memory")
        .unwrap()
        .get_unmatched_data_references()
        .unwrap();
    assert_eq!(unmatched.len(), 1);
}

#[tokio::test]
async fn test_get_batch_by_partition_identifiers() {
    let datasource = in_memory_datasource();

    let request = BatchRequest::for_asset("warehouse", "memory", "orders")
        .with_partition_identifiers([("id", "2")]);
    let batch = datasource.get_batch(&request).await.unwrap();
    assert_eq!(batch.data.num_rows(), 2);
    assert_eq!(batch.batch_definition.data_asset_name, "orders");

    let latest = BatchRequest::for_asset("warehouse", "memory", "orders").with_partition_request(
        PartitionRequest {
            index: Some(-1),
            ..Default::default()
        },
    );
    let batch = datasource.get_batch(&latest).await.unwrap();
    assert_eq!(total(&batch.data), 30);

    let both = BatchRequest::for_asset("warehouse", "memory", "orders");
    assert!(matches!(
        datasource.get_batch(&both).await,
        Err(ConnectorError::AmbiguousRequest(_))
    ));
}

#[tokio::test]
async fn test_connector_without_partitioner_matches_nothing() {
    let mut datasource = in_memory_datasource();
    let request = BatchRequest::for_asset("warehouse", "memory", "customers");
    assert_eq!(
        datasource
            .get_batch_list_from_batch_request(&request)
            .await
            .unwrap()
            .len(),
        1
    );

    let mut data = BTreeMap::new();
    data.insert("orders-1".to_string(), frame(vec![1]));
    let replacement =
        DataConnector::builder("memory2", "warehouse", Box::new(DictBackend::new(data)))
            .build()
            .unwrap();
    datasource.add_data_connector(replacement).unwrap();
    assert_eq!(datasource.data_connector_names(), vec!["memory", "memory2"]);

    // Without a partitioner every reference is unmatched.
    let connector = datasource.data_connector("memory2").unwrap();
    connector.refresh_data_references_cache().await.unwrap();
    assert_eq!(connector.get_unmatched_data_references().unwrap().len(), 1);
    assert!(datasource
        .get_batch_list_from_batch_request(&BatchRequest::for_asset(
            "warehouse", "memory2", "orders"
        ))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_sql_connector_over_datafusion_session() {
    let datasource = Datasource::from_config_with_context(
        "warehouse",
        &json!({
            "execution_engine": {"class_name": "DataFusionEngine"},
            "data_connectors": {
                "tables": {
                    "class_name": "SqlDataConnector",
                    "assets": {
                        "daily_events": {"table_name": "events", "partition_columns": ["day"]},
                        "all_events": {"table_name": "events"}
                    },
                    "sorters": [{
                        "class_name": "DateTimeSorter",
                        "name": "day",
                        "orderby": "desc",
                        "datetime_format": "%Y-%m-%d"
                    }]
                }
            }
        }),
        &default_registry(),
        events_session(),
    );
    // `all_events` has no `day` group, so the sorter cannot apply to it.
    assert!(matches!(datasource, Err(ConnectorError::Config(_))));

    let datasource = Datasource::from_config_with_context(
        "warehouse",
        &json!({
            "data_connectors": {
                "tables": {
                    "class_name": "SqlDataConnector",
                    "assets": {
                        "daily_events": {"table_name": "events", "partition_columns": ["day"]}
                    },
                    "sorters": [{
                        "class_name": "DateTimeSorter",
                        "name": "day",
                        "orderby": "desc",
                        "datetime_format": "%Y-%m-%d"
                    }]
                }
            }
        }),
        &default_registry(),
        events_session(),
    )
    .unwrap();

    let request = BatchRequest::for_asset("warehouse", "tables", "daily_events");
    let batches = datasource
        .get_batch_list_from_batch_request(&request)
        .await
        .unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(
        batches[0].batch_definition.partition_definition.get("day"),
        Some("2020-01-02")
    );
    assert_eq!(batches[0].data.num_rows(), 2);
    assert_eq!(batches[1].data.num_rows(), 2);
    match &batches[0].batch_spec {
        BatchSpec::Sql(spec) => {
            assert_eq!(spec.table_name, "events");
            assert!(spec.query.contains("WHERE"));
        }
        other => panic!("expected a SQL spec, got {:?}", other.kind()),
    }
}

#[tokio::test]
async fn test_sql_connector_reports_missing_table() {
    let datasource = Datasource::from_config_with_context(
        "warehouse",
        &json!({
            "data_connectors": {
                "tables": {
                    "class_name": "SqlDataConnector",
                    "assets": {"ghost": {"table_name": "ghost"}}
                }
            }
        }),
        &default_registry(),
        events_session(),
    )
    .unwrap();

    let result = datasource
        .get_batch_list_from_batch_request(&BatchRequest::for_asset("warehouse", "tables", "ghost"))
        .await;
    assert!(matches!(result, Err(ConnectorError::TableNotFound(_))));
}

#[tokio::test]
async fn test_filesystem_csv_batches() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sales_2020.csv"), "id,amount\n1,10\n2,20\n").unwrap();
    fs::write(dir.path().join("sales_2021.csv"), "id,amount\n3,30\n").unwrap();
    fs::write(dir.path().join("notes.txt"), "not a batch").unwrap();

    let datasource = Datasource::from_config(
        "local",
        &json!({
            "data_connectors": {
                "files": {
                    "class_name": "FilesystemDataConnector",
                    "base_directory": dir.path(),
                    "default_regex": {
                        "pattern": "(.+)_(\\d{4})\\.csv",
                        "group_names": ["data_asset_name", "year"]
                    },
                    "sorters": [{"class_name": "NumericSorter", "name": "year", "orderby": "desc"}]
                }
            }
        }),
        &default_registry(),
    )
    .unwrap();

    let batch = datasource
        .get_batch(
            &BatchRequest::for_asset("local", "files", "sales").with_partition_request(
                PartitionRequest {
                    index: Some(0),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();
    assert_eq!(batch.batch_definition.partition_definition.get("year"), Some("2021"));
    assert_eq!(batch.data.num_rows(), 1);
    assert_eq!(batch.data.schema.fields().len(), 2);
    match &batch.batch_spec {
        BatchSpec::Path(spec) => assert!(spec.path.ends_with("sales_2021.csv")),
        other => panic!("expected a path spec, got {:?}", other.kind()),
    }

    let all = datasource
        .get_batch_list_from_batch_request(&BatchRequest::for_asset("local", "files", "sales"))
        .await
        .unwrap();
    let rows: Vec<usize> = all.iter().map(|b| b.data.num_rows()).collect();
    assert_eq!(rows, vec![1, 2]);
    assert!(all.iter().all(|b| b.batch_markers.load_time <= chrono::Utc::now()));
}

#[tokio::test]
async fn test_semicolon_delimited_reader_options() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("prices-1.csv"), "sku;price\na;1\nb;2\n").unwrap();

    let datasource = Datasource::from_config(
        "local",
        &json!({
            "data_connectors": {
                "files": {
                    "class_name": "FilesystemDataConnector",
                    "base_directory": dir.path(),
                    "assets": {"prices": null},
                    "default_regex": {"pattern": "prices-(\\d+)\\.csv", "group_names": ["n"]},
                    "reader_options": {"delimiter": ";"}
                }
            }
        }),
        &default_registry(),
    )
    .unwrap();

    let batch = datasource
        .get_batch(&BatchRequest::for_asset("local", "files", "prices"))
        .await
        .unwrap();
    assert_eq!(batch.data.num_rows(), 2);
    let field_names: Vec<&str> = batch
        .data
        .schema
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .collect();
    assert_eq!(field_names, vec!["sku", "price"]);
    assert!(!batch.data.batches[0].column(0).is_empty());
}
