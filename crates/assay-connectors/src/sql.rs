//! SQL table backend.
//!
//! Each configured asset is a table plus the columns that partition it. A
//! reference is `table/col=value/...` with form-urlencoded segments; the
//! connector parses it back with a [`KeyValuePartitioner`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arrow::array::Array;
use arrow::util::display::array_value_to_string;
use assay_core::{BatchDefinition, BatchSpec, DataReference, SqlBatchSpec};
use async_trait::async_trait;
use datafusion::common::TableReference;
use datafusion::prelude::SessionContext;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, warn};

use crate::error::ConnectorError;
use crate::partitioner::{encode_key_value_segment, KeyValuePartitioner, Partitioner};
use crate::where_clause::{
    build_where_clause, qualified_table_name, quote_identifier, EqualityFilter,
};
use crate::DataReferenceBackend;

const DEFAULT_POSTGRES_SCHEMA: &str = "public";

/// Source of table metadata and distinct partition values.
#[async_trait]
pub trait SqlIntrospector: fmt::Debug + Send + Sync {
    async fn table_exists(
        &self,
        schema_name: Option<&str>,
        table_name: &str,
    ) -> Result<bool, ConnectorError>;

    /// Distinct tuples of `columns`, values rendered as text.
    async fn distinct_partition_values(
        &self,
        schema_name: Option<&str>,
        table_name: &str,
        columns: &[String],
    ) -> Result<Vec<Vec<Option<String>>>, ConnectorError>;
}

/// `SELECT DISTINCT` over the partition columns, each cast to text.
pub fn distinct_partition_values_query(
    schema_name: Option<&str>,
    table_name: &str,
    columns: &[String],
) -> String {
    let select_cols = columns
        .iter()
        .map(|c| format!("CAST({} AS TEXT)", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let order_by = (1..=columns.len())
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT DISTINCT {} FROM {} ORDER BY {}",
        select_cols,
        qualified_table_name(schema_name, table_name),
        order_by
    )
}

/// Introspects a PostgreSQL database through ephemeral sqlx pools.
#[derive(Clone)]
pub struct PostgresIntrospector {
    conn_string: String,
}

impl PostgresIntrospector {
    pub fn new(conn_string: impl Into<String>) -> Self {
        Self {
            conn_string: conn_string.into(),
        }
    }

    async fn pool(&self) -> Result<sqlx::PgPool, ConnectorError> {
        Ok(PgPoolOptions::new()
            .max_connections(2)
            .connect(&self.conn_string)
            .await?)
    }
}

impl fmt::Debug for PostgresIntrospector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = url::Url::parse(&self.conn_string)
            .map(|mut url| {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            })
            .unwrap_or_else(|_| "<unparseable>".to_string());
        f.debug_struct("PostgresIntrospector")
            .field("conn_string", &redacted)
            .finish()
    }
}

#[async_trait]
impl SqlIntrospector for PostgresIntrospector {
    async fn table_exists(
        &self,
        schema_name: Option<&str>,
        table_name: &str,
    ) -> Result<bool, ConnectorError> {
        let pool = self.pool().await?;
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2)",
        )
        .bind(schema_name.unwrap_or(DEFAULT_POSTGRES_SCHEMA))
        .bind(table_name)
        .fetch_one(&pool)
        .await
        .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
        pool.close().await;
        Ok(row.0)
    }

    async fn distinct_partition_values(
        &self,
        schema_name: Option<&str>,
        table_name: &str,
        columns: &[String],
    ) -> Result<Vec<Vec<Option<String>>>, ConnectorError> {
        let sql = distinct_partition_values_query(schema_name, table_name, columns);
        debug!("distinct_partition_values query: {}", sql);

        let pool = self.pool().await?;
        let rows: Vec<PgRow> = sqlx::query(&sql)
            .fetch_all(&pool)
            .await
            .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
        pool.close().await;

        rows.iter()
            .map(|row| {
                (0..columns.len())
                    .map(|i| {
                        row.try_get::<Option<String>, _>(i)
                            .map_err(|e| ConnectorError::QueryFailed(e.to_string()))
                    })
                    .collect()
            })
            .collect()
    }
}

/// Introspects tables registered in a DataFusion `SessionContext`.
#[derive(Clone)]
pub struct DataFusionIntrospector {
    ctx: SessionContext,
}

impl DataFusionIntrospector {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }
}

impl fmt::Debug for DataFusionIntrospector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFusionIntrospector")
            .field("session_id", &self.ctx.session_id())
            .finish()
    }
}

#[async_trait]
impl SqlIntrospector for DataFusionIntrospector {
    async fn table_exists(
        &self,
        schema_name: Option<&str>,
        table_name: &str,
    ) -> Result<bool, ConnectorError> {
        let table_ref = match schema_name {
            Some(schema) => TableReference::partial(schema, table_name),
            None => TableReference::bare(table_name),
        };
        Ok(self.ctx.table_exist(table_ref)?)
    }

    async fn distinct_partition_values(
        &self,
        schema_name: Option<&str>,
        table_name: &str,
        columns: &[String],
    ) -> Result<Vec<Vec<Option<String>>>, ConnectorError> {
        let sql = distinct_partition_values_query(schema_name, table_name, columns);
        debug!("distinct_partition_values query: {}", sql);

        let batches = self.ctx.sql(&sql).await?.collect().await?;
        let mut rows = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                let values = batch
                    .columns()
                    .iter()
                    .map(|col| {
                        if col.is_null(row) {
                            Ok(None)
                        } else {
                            array_value_to_string(col.as_ref(), row).map(Some)
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                rows.push(values);
            }
        }
        Ok(rows)
    }
}

/// One table exposed as a data asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlTableAsset {
    pub table_name: String,
    #[serde(default)]
    pub partition_columns: Vec<String>,
}

#[derive(Debug)]
pub struct SqlBackend {
    schema_name: Option<String>,
    assets: BTreeMap<String, SqlTableAsset>,
    introspector: Arc<dyn SqlIntrospector>,
}

impl SqlBackend {
    pub fn new(
        introspector: Arc<dyn SqlIntrospector>,
        schema_name: Option<String>,
        assets: BTreeMap<String, SqlTableAsset>,
    ) -> Result<Self, ConnectorError> {
        if assets.is_empty() {
            return Err(ConnectorError::Config(
                "SQL data connector requires at least one configured asset".to_string(),
            ));
        }
        Ok(Self {
            schema_name,
            assets,
            introspector,
        })
    }

    /// Partitioner that parses this backend's references for each asset.
    pub fn asset_partitioners(&self) -> BTreeMap<String, Arc<dyn Partitioner>> {
        self.assets
            .iter()
            .map(|(name, asset)| {
                let partitioner: Arc<dyn Partitioner> =
                    Arc::new(KeyValuePartitioner::new(asset.partition_columns.clone()));
                (name.clone(), partitioner)
            })
            .collect()
    }

    fn asset(&self, name: &str) -> Result<&SqlTableAsset, ConnectorError> {
        self.assets.get(name).ok_or_else(|| {
            ConnectorError::NotFound(format!("SQL data asset '{}' is not configured", name))
        })
    }

    fn qualified_table(&self, asset: &SqlTableAsset) -> String {
        qualified_table_name(self.schema_name.as_deref(), &asset.table_name)
    }

    async fn list_asset(
        &self,
        asset: &SqlTableAsset,
    ) -> Result<Vec<DataReference>, ConnectorError> {
        let schema = self.schema_name.as_deref();
        if !self.introspector.table_exists(schema, &asset.table_name).await? {
            return Err(ConnectorError::TableNotFound(self.qualified_table(asset)));
        }
        if asset.partition_columns.is_empty() {
            return Ok(vec![DataReference::from(asset.table_name.as_str())]);
        }

        let rows = self
            .introspector
            .distinct_partition_values(schema, &asset.table_name, &asset.partition_columns)
            .await?;

        let mut references = Vec::with_capacity(rows.len());
        'rows: for row in rows {
            let mut segments = vec![asset.table_name.clone()];
            for (column, value) in asset.partition_columns.iter().zip(row) {
                match value {
                    Some(value) => segments.push(encode_key_value_segment(column, &value)),
                    None => {
                        warn!(
                            "Skipping partition of '{}' with NULL value in column '{}'",
                            asset.table_name, column
                        );
                        continue 'rows;
                    }
                }
            }
            references.push(DataReference::from(segments.join("/")));
        }
        references.sort();
        Ok(references)
    }
}

#[async_trait]
impl DataReferenceBackend for SqlBackend {
    fn class_name(&self) -> &'static str {
        "SqlDataConnector"
    }

    fn configured_asset_names(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }

    async fn list_data_references(
        &self,
        data_asset_name: Option<&str>,
    ) -> Result<Vec<DataReference>, ConnectorError> {
        match data_asset_name {
            Some(name) => self.list_asset(self.asset(name)?).await,
            None => {
                let mut references = Vec::new();
                for asset in self.assets.values() {
                    references.extend(self.list_asset(asset).await?);
                }
                Ok(references)
            }
        }
    }

    fn build_batch_spec(
        &self,
        _data_reference: &DataReference,
        batch_definition: &BatchDefinition,
    ) -> Result<BatchSpec, ConnectorError> {
        let asset = self.asset(&batch_definition.data_asset_name)?;
        let filters = asset
            .partition_columns
            .iter()
            .map(|column| {
                batch_definition
                    .partition_definition
                    .get(column)
                    .map(|value| EqualityFilter::new(column.clone(), value))
                    .ok_or_else(|| {
                        ConnectorError::StaleCache(format!(
                            "batch definition {} lacks partition column '{}'",
                            batch_definition, column
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let table_name = self.qualified_table(asset);
        let query = format!("SELECT * FROM {}{}", table_name, build_where_clause(&filters));
        Ok(BatchSpec::Sql(SqlBatchSpec { table_name, query }))
    }
}
