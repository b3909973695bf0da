//! Immutable snapshot of a connector's reference listing.

use std::collections::BTreeSet;

use assay_core::{BatchDefinition, DataReference};

/// One listed reference and the batch definitions it produced. An empty
/// `batch_definitions` means no partitioner accepted the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Configured asset the reference was listed under, `None` for inferred
    /// connectors.
    pub data_asset_scope: Option<String>,
    pub data_reference: DataReference,
    pub batch_definitions: Vec<BatchDefinition>,
}

impl CatalogEntry {
    pub fn is_matched(&self) -> bool {
        !self.batch_definitions.is_empty()
    }
}

/// Complete result of one refresh. Never mutated after construction; a
/// refresh builds a new catalog and replaces the old one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Number of listed references, matched or not.
    pub fn reference_count(&self) -> usize {
        self.entries.len()
    }

    pub fn unmatched_references(&self) -> BTreeSet<DataReference> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_matched())
            .map(|entry| entry.data_reference.clone())
            .collect()
    }

    /// All `(reference, definition)` pairs, in listing order.
    pub fn batch_definitions(
        &self,
    ) -> impl Iterator<Item = (&DataReference, &BatchDefinition)> + '_ {
        self.entries.iter().flat_map(|entry| {
            entry
                .batch_definitions
                .iter()
                .map(move |definition| (&entry.data_reference, definition))
        })
    }

    pub fn batch_definitions_for_asset<'a>(
        &'a self,
        data_asset_name: &'a str,
    ) -> impl Iterator<Item = (&'a DataReference, &'a BatchDefinition)> + 'a {
        self.batch_definitions()
            .filter(move |(_, definition)| definition.data_asset_name == data_asset_name)
    }

    /// Reference that produced `batch_definition`, if it is in this snapshot.
    pub fn find_reference(&self, batch_definition: &BatchDefinition) -> Option<&DataReference> {
        self.batch_definitions()
            .find(|(_, definition)| *definition == batch_definition)
            .map(|(reference, _)| reference)
    }

    pub fn asset_names(&self) -> BTreeSet<String> {
        self.batch_definitions()
            .map(|(_, definition)| definition.data_asset_name.clone())
            .collect()
    }
}
