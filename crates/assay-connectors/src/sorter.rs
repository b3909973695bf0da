//! Deterministic ordering of batch definitions by partition identifiers.

use std::cmp::Ordering;

use assay_core::{BatchDefinition, DataReference};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

const DEFAULT_DATETIME_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderBy {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SorterKind {
    Lexicographic,
    Numeric,
    DateTime { format: String },
    CustomList { reference_list: Vec<String> },
}

/// Orders definitions by the value of one partition identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Sorter {
    pub name: String,
    pub order_by: OrderBy,
    pub kind: SorterKind,
}

/// Comparable key extracted by a [`Sorter`].
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Text(String),
    Number(f64),
    DateTime(NaiveDateTime),
    Position(usize),
}

impl SortKey {
    fn rank(&self) -> u8 {
        match self {
            SortKey::Text(_) => 0,
            SortKey::Number(_) => 1,
            SortKey::DateTime(_) => 2,
            SortKey::Position(_) => 3,
        }
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::DateTime(a), SortKey::DateTime(b)) => a.cmp(b),
            (SortKey::Position(a), SortKey::Position(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Sorter {
    pub fn new(name: impl Into<String>, order_by: OrderBy, kind: SorterKind) -> Self {
        Self {
            name: name.into(),
            order_by,
            kind,
        }
    }

    pub fn lexicographic(name: impl Into<String>, order_by: OrderBy) -> Self {
        Self::new(name, order_by, SorterKind::Lexicographic)
    }

    pub fn class_name(&self) -> &'static str {
        match self.kind {
            SorterKind::Lexicographic => "LexicographicSorter",
            SorterKind::Numeric => "NumericSorter",
            SorterKind::DateTime { .. } => "DateTimeSorter",
            SorterKind::CustomList { .. } => "CustomListSorter",
        }
    }

    pub fn get_sort_key(
        &self,
        batch_definition: &BatchDefinition,
    ) -> Result<SortKey, ConnectorError> {
        let value = batch_definition
            .partition_definition
            .get(&self.name)
            .ok_or_else(|| {
                ConnectorError::Sorting(format!(
                    "{} '{}' found no such identifier in {}",
                    self.class_name(),
                    self.name,
                    batch_definition
                ))
            })?;

        match &self.kind {
            SorterKind::Lexicographic => Ok(SortKey::Text(value.to_string())),
            SorterKind::Numeric => value.trim().parse::<f64>().map(SortKey::Number).map_err(|_| {
                ConnectorError::Sorting(format!(
                    "NumericSorter '{}' cannot parse '{}' as a number",
                    self.name, value
                ))
            }),
            SorterKind::DateTime { format } => parse_datetime(value, format)
                .map(SortKey::DateTime)
                .ok_or_else(|| {
                    ConnectorError::Sorting(format!(
                        "DateTimeSorter '{}' cannot parse '{}' with format '{}'",
                        self.name, value, format
                    ))
                }),
            SorterKind::CustomList { reference_list } => reference_list
                .iter()
                .position(|item| item == value)
                .map(SortKey::Position)
                .ok_or_else(|| {
                    ConnectorError::Sorting(format!(
                        "CustomListSorter '{}' has no entry for '{}'",
                        self.name, value
                    ))
                }),
        }
    }
}

fn parse_datetime(value: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, format)
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

/// Sort `(reference, definition)` pairs by the given sorters.
///
/// Earlier sorters dominate; ties fall through to later ones and finally to
/// the data reference ascending. With no sorters the result is ordered by
/// reference alone.
pub fn sort_batch_definitions(
    sorters: &[Sorter],
    entries: Vec<(DataReference, BatchDefinition)>,
) -> Result<Vec<(DataReference, BatchDefinition)>, ConnectorError> {
    let mut keyed = entries
        .into_iter()
        .map(|(reference, definition)| {
            let keys = sorters
                .iter()
                .map(|sorter| sorter.get_sort_key(&definition))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((keys, reference, definition))
        })
        .collect::<Result<Vec<_>, ConnectorError>>()?;

    keyed.sort_by(|(keys_a, ref_a, _), (keys_b, ref_b, _)| {
        sorters
            .iter()
            .zip(keys_a.iter().zip(keys_b.iter()))
            .map(|(sorter, (a, b))| match sorter.order_by {
                OrderBy::Asc => a.cmp(b),
                OrderBy::Desc => b.cmp(a),
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| ref_a.cmp(ref_b))
    });

    Ok(keyed
        .into_iter()
        .map(|(_, reference, definition)| (reference, definition))
        .collect())
}

/// Check sorters against the identifier groups of the partitioner they
/// apply to.
pub fn validate_sorters(sorters: &[Sorter], group_names: &[String]) -> Result<(), ConnectorError> {
    if sorters.len() > group_names.len() {
        return Err(ConnectorError::Config(format!(
            "{} sorter(s) configured but the partitioner only has {} identifier group(s) {:?}",
            sorters.len(),
            group_names.len(),
            group_names
        )));
    }
    for sorter in sorters {
        if !group_names.contains(&sorter.name) {
            return Err(ConnectorError::Config(format!(
                "sorter '{}' does not match any identifier group {:?}",
                sorter.name, group_names
            )));
        }
    }
    Ok(())
}

fn default_datetime_format() -> String {
    DEFAULT_DATETIME_FORMAT.to_string()
}

/// Declarative sorter configuration, tagged by `class_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", deny_unknown_fields)]
pub enum SorterConfig {
    LexicographicSorter {
        name: String,
        #[serde(default)]
        orderby: OrderBy,
    },
    NumericSorter {
        name: String,
        #[serde(default)]
        orderby: OrderBy,
    },
    DateTimeSorter {
        name: String,
        #[serde(default)]
        orderby: OrderBy,
        #[serde(default = "default_datetime_format")]
        datetime_format: String,
    },
    CustomListSorter {
        name: String,
        #[serde(default)]
        orderby: OrderBy,
        reference_list: Vec<String>,
    },
}

impl SorterConfig {
    pub fn build(&self) -> Sorter {
        match self {
            SorterConfig::LexicographicSorter { name, orderby } => {
                Sorter::new(name.clone(), *orderby, SorterKind::Lexicographic)
            }
            SorterConfig::NumericSorter { name, orderby } => {
                Sorter::new(name.clone(), *orderby, SorterKind::Numeric)
            }
            SorterConfig::DateTimeSorter {
                name,
                orderby,
                datetime_format,
            } => Sorter::new(
                name.clone(),
                *orderby,
                SorterKind::DateTime {
                    format: datetime_format.clone(),
                },
            ),
            SorterConfig::CustomListSorter {
                name,
                orderby,
                reference_list,
            } => Sorter::new(
                name.clone(),
                *orderby,
                SorterKind::CustomList {
                    reference_list: reference_list.clone(),
                },
            ),
        }
    }
}

pub fn build_sorters(configs: &[SorterConfig]) -> Vec<Sorter> {
    configs.iter().map(SorterConfig::build).collect()
}
