//! Partitioners map a raw data reference to partition identifiers.
//!
//! A partitioner either accepts a reference and produces a [`Partition`], or
//! rejects it, in which case the connector records the reference as
//! unmatched. Rejection is never an error.

use std::fmt::Debug;
use std::sync::Arc;

use assay_core::{DataReference, PartitionDefinition};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::form_urlencoded;

use crate::error::ConnectorError;

/// Capture group whose value names the data asset instead of a partition
/// identifier.
pub const DATA_ASSET_NAME_GROUP: &str = "data_asset_name";

/// Result of successfully partitioning one data reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub data_reference: DataReference,
    pub data_asset_name: Option<String>,
    pub definition: PartitionDefinition,
}

pub trait Partitioner: Debug + Send + Sync {
    fn class_name(&self) -> &'static str;

    /// Identifier names this partitioner emits, in declaration order.
    fn group_names(&self) -> &[String];

    fn find_partition_for_reference(&self, data_reference: &DataReference) -> Option<Partition>;
}

/// Regex-driven partitioner.
///
/// The pattern is anchored at the start of the reference; whatever follows
/// the match is ignored. Capture groups are paired with `group_names` by
/// position. Surplus capture groups are dropped, and an optional group that
/// did not participate yields an empty string.
#[derive(Debug, Clone)]
pub struct RegexPartitioner {
    pattern: String,
    regex: Regex,
    group_names: Vec<String>,
    identifier_names: Vec<String>,
}

impl RegexPartitioner {
    pub fn new(pattern: &str, group_names: Vec<String>) -> Result<Self, ConnectorError> {
        let regex = Regex::new(&format!("^(?:{})", pattern))?;
        let capture_count = regex.captures_len() - 1;
        if group_names.len() > capture_count {
            return Err(ConnectorError::Config(format!(
                "pattern '{}' has {} capture group(s) but {} group name(s) were given",
                pattern,
                capture_count,
                group_names.len()
            )));
        }
        let identifier_names = group_names
            .iter()
            .filter(|name| name.as_str() != DATA_ASSET_NAME_GROUP)
            .cloned()
            .collect();
        debug!(
            "RegexPartitioner compiled '{}' with groups {:?}",
            pattern, group_names
        );
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            group_names,
            identifier_names,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Partitioner for RegexPartitioner {
    fn class_name(&self) -> &'static str {
        "RegexPartitioner"
    }

    fn group_names(&self) -> &[String] {
        &self.identifier_names
    }

    fn find_partition_for_reference(&self, data_reference: &DataReference) -> Option<Partition> {
        let captures = self.regex.captures(data_reference.as_str())?;

        let mut data_asset_name = None;
        let mut definition = PartitionDefinition::new();
        for (idx, name) in self.group_names.iter().enumerate() {
            let value = captures.get(idx + 1).map_or("", |m| m.as_str());
            if name == DATA_ASSET_NAME_GROUP {
                if !value.is_empty() {
                    data_asset_name = Some(value.to_string());
                }
            } else {
                definition.insert(name.clone(), value);
            }
        }

        Some(Partition {
            data_reference: data_reference.clone(),
            data_asset_name,
            definition,
        })
    }
}

/// Hive-style partitioner over `/`-separated `key=value` segments.
///
/// Keys and values are form-urlencoded. A reference is accepted only when
/// every configured group name appears as a key; other segments are ignored.
#[derive(Debug, Clone)]
pub struct KeyValuePartitioner {
    group_names: Vec<String>,
}

impl KeyValuePartitioner {
    pub fn new(group_names: Vec<String>) -> Self {
        Self { group_names }
    }
}

impl Partitioner for KeyValuePartitioner {
    fn class_name(&self) -> &'static str {
        "KeyValuePartitioner"
    }

    fn group_names(&self) -> &[String] {
        &self.group_names
    }

    fn find_partition_for_reference(&self, data_reference: &DataReference) -> Option<Partition> {
        let mut found = PartitionDefinition::new();
        for segment in data_reference.as_str().split('/') {
            if !segment.contains('=') {
                continue;
            }
            for (key, value) in form_urlencoded::parse(segment.as_bytes()) {
                found.insert(key.into_owned(), value.into_owned());
            }
        }

        let mut definition = PartitionDefinition::new();
        for name in &self.group_names {
            definition.insert(name.clone(), found.get(name)?);
        }

        Some(Partition {
            data_reference: data_reference.clone(),
            data_asset_name: None,
            definition,
        })
    }
}

/// Encode one `key=value` segment the way [`KeyValuePartitioner`] decodes it.
pub fn encode_key_value_segment(key: &str, value: &str) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair(key, value)
        .finish()
}

/// Declarative partitioner configuration, tagged by `class_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", deny_unknown_fields)]
pub enum PartitionerConfig {
    RegexPartitioner {
        pattern: String,
        #[serde(default)]
        group_names: Vec<String>,
    },
    KeyValuePartitioner {
        group_names: Vec<String>,
    },
}

impl PartitionerConfig {
    pub fn regex(pattern: impl Into<String>, group_names: &[&str]) -> Self {
        PartitionerConfig::RegexPartitioner {
            pattern: pattern.into(),
            group_names: group_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn build(&self) -> Result<Arc<dyn Partitioner>, ConnectorError> {
        Ok(match self {
            PartitionerConfig::RegexPartitioner {
                pattern,
                group_names,
            } => Arc::new(RegexPartitioner::new(pattern, group_names.clone())?),
            PartitionerConfig::KeyValuePartitioner { group_names } => {
                Arc::new(KeyValuePartitioner::new(group_names.clone()))
            }
        })
    }
}
