//! Local filesystem backend.
//!
//! References are file paths relative to the scope's base directory, always
//! `/`-separated. A configured asset may override the base directory (taken
//! relative to the connector's base unless absolute) and the glob directive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use assay_core::{BatchDefinition, BatchSpec, DataReference, PathBatchSpec, ReaderOptions};
use async_trait::async_trait;
use glob::Pattern;
use tracing::{debug, warn};

use crate::error::ConnectorError;
use crate::DataReferenceBackend;

pub const DEFAULT_GLOB_DIRECTIVE: &str = "*";

/// Per-asset listing overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilesystemAsset {
    pub base_directory: Option<PathBuf>,
    pub glob_directive: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    base_directory: PathBuf,
    glob_directive: String,
    assets: BTreeMap<String, FilesystemAsset>,
    reader_options: ReaderOptions,
}

impl FilesystemBackend {
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
            glob_directive: DEFAULT_GLOB_DIRECTIVE.to_string(),
            assets: BTreeMap::new(),
            reader_options: ReaderOptions::default(),
        }
    }

    pub fn with_glob_directive(mut self, glob_directive: impl Into<String>) -> Self {
        self.glob_directive = glob_directive.into();
        self
    }

    pub fn with_asset(mut self, name: impl Into<String>, asset: FilesystemAsset) -> Self {
        self.assets.insert(name.into(), asset);
        self
    }

    pub fn with_reader_options(mut self, reader_options: ReaderOptions) -> Self {
        self.reader_options = reader_options;
        self
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    fn asset(&self, name: &str) -> Result<&FilesystemAsset, ConnectorError> {
        self.assets.get(name).ok_or_else(|| {
            ConnectorError::NotFound(format!(
                "data asset '{}' is not configured (known: {:?})",
                name,
                self.assets.keys().collect::<Vec<_>>()
            ))
        })
    }

    fn scope_base(&self, asset: Option<&FilesystemAsset>) -> PathBuf {
        match asset.and_then(|a| a.base_directory.as_ref()) {
            Some(dir) => self.base_directory.join(dir),
            None => self.base_directory.clone(),
        }
    }

    fn scope_glob_directive<'a>(&'a self, asset: Option<&'a FilesystemAsset>) -> &'a str {
        asset
            .and_then(|a| a.glob_directive.as_deref())
            .unwrap_or(&self.glob_directive)
    }
}

/// Files under `base` matching `glob_directive`, relative to `base` and
/// sorted. A missing base directory lists as empty.
pub fn list_files(base: &Path, glob_directive: &str) -> Result<Vec<DataReference>, ConnectorError> {
    if !base.is_dir() {
        warn!(
            "Base directory '{}' does not exist; listing no references",
            base.display()
        );
        return Ok(Vec::new());
    }
    let base_str = base.to_str().ok_or_else(|| {
        ConnectorError::Config(format!("base directory is not valid UTF-8: {}", base.display()))
    })?;
    let pattern = format!(
        "{}/{}",
        Pattern::escape(base_str.trim_end_matches('/')),
        glob_directive
    );
    let matches = glob::glob(&pattern).map_err(|e| {
        ConnectorError::Config(format!("invalid glob directive '{}': {}", glob_directive, e))
    })?;

    let mut references = Vec::new();
    for entry in matches {
        let path = entry.map_err(|e| ConnectorError::Io(e.into_error()))?;
        if !path.is_file() {
            continue;
        }
        let relative = path.strip_prefix(base).unwrap_or(&path);
        let reference = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        references.push(DataReference::from(reference));
    }
    references.sort();
    debug!(
        "Listed {} file(s) under '{}' with '{}'",
        references.len(),
        base.display(),
        glob_directive
    );
    Ok(references)
}

#[async_trait]
impl DataReferenceBackend for FilesystemBackend {
    fn class_name(&self) -> &'static str {
        "FilesystemDataConnector"
    }

    fn configured_asset_names(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }

    async fn list_data_references(
        &self,
        data_asset_name: Option<&str>,
    ) -> Result<Vec<DataReference>, ConnectorError> {
        let asset = data_asset_name.map(|name| self.asset(name)).transpose()?;
        let base = self.scope_base(asset);
        let glob_directive = self.scope_glob_directive(asset).to_string();

        tokio::task::spawn_blocking(move || list_files(&base, &glob_directive))
            .await
            .map_err(|e| ConnectorError::Io(std::io::Error::other(e)))?
    }

    fn build_batch_spec(
        &self,
        data_reference: &DataReference,
        batch_definition: &BatchDefinition,
    ) -> Result<BatchSpec, ConnectorError> {
        let asset = self.assets.get(&batch_definition.data_asset_name);
        let path = self.scope_base(asset).join(data_reference.as_str());
        if !path.is_file() {
            return Err(ConnectorError::StaleCache(format!(
                "file '{}' no longer exists",
                path.display()
            )));
        }
        Ok(BatchSpec::Path(PathBatchSpec {
            path,
            reader_options: self.reader_options.clone(),
        }))
    }
}
