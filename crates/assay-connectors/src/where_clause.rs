//! SQL text builders for partition predicates.

use serde::Deserialize;

/// Equality predicate on one partition column.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EqualityFilter {
    pub column: String,
    pub value: String,
}

impl EqualityFilter {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn to_sql_where(&self) -> String {
        format!(
            "{} = '{}'",
            quote_identifier(&self.column),
            sanitize_sql_string(&self.value)
        )
    }
}

fn sanitize_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

fn sanitize_sql_identifier(s: &str) -> String {
    s.replace('"', "\"\"")
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", sanitize_sql_identifier(name))
}

/// `"schema"."table"`, or just `"table"` without a schema.
pub fn qualified_table_name(schema_name: Option<&str>, table_name: &str) -> String {
    match schema_name {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(table_name)),
        None => quote_identifier(table_name),
    }
}

pub fn build_where_clause(filters: &[EqualityFilter]) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = filters.iter().map(|f| f.to_sql_where()).collect();
    format!(" WHERE {}", parts.join(" AND "))
}
