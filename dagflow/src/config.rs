//! Engine configuration.
//!
//! Configuration can be read from a YAML file ([`EngineConfig::from_yaml_file`])
//! or, for storage, from `DAGFLOW_STORAGE_*` environment variables.

use crate::errors::DagflowError;
use crate::serialization::TypeStoragePluginRegistry;
use crate::storage::{
    BackendKind, FilesystemObjectStore, InMemoryObjectStore, IntermediateStore, ObjectStore,
    DEFAULT_PREFIX,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory used by the filesystem backend when none is configured.
pub const DEFAULT_STORAGE_DIR: &str = "dagflow_storage";

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_level() -> String {
    "info".to_string()
}

/// Where run artifacts are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind.
    #[serde(default)]
    pub backend: BackendKind,
    /// Key prefix in front of `storage/{run_id}`.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Base directory for the filesystem backend.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Endpoint URL for the HTTP backend.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bucket for the HTTP backend.
    #[serde(default)]
    pub bucket: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            prefix: default_prefix(),
            base_dir: None,
            endpoint: None,
            bucket: None,
        }
    }
}

impl StorageConfig {
    /// Reads storage configuration from the environment.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `DAGFLOW_STORAGE_BACKEND` | `backend` |
    /// | `DAGFLOW_STORAGE_PREFIX` | `prefix` |
    /// | `DAGFLOW_STORAGE_DIR` | `base_dir` |
    /// | `DAGFLOW_STORAGE_ENDPOINT` | `endpoint` |
    /// | `DAGFLOW_STORAGE_BUCKET` | `bucket` |
    pub fn from_env() -> Result<Self, DagflowError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DagflowError> {
        let backend = match lookup("DAGFLOW_STORAGE_BACKEND") {
            Some(value) => value.parse().map_err(DagflowError::Config)?,
            None => BackendKind::default(),
        };
        Ok(Self {
            backend,
            prefix: lookup("DAGFLOW_STORAGE_PREFIX").unwrap_or_else(default_prefix),
            base_dir: lookup("DAGFLOW_STORAGE_DIR").map(PathBuf::from),
            endpoint: lookup("DAGFLOW_STORAGE_ENDPOINT"),
            bucket: lookup("DAGFLOW_STORAGE_BUCKET"),
        })
    }

    /// Builds the configured backend.
    pub fn build_object_store(&self) -> Result<Arc<dyn ObjectStore>, DagflowError> {
        match self.backend {
            BackendKind::InMemory => Ok(Arc::new(InMemoryObjectStore::new())),
            BackendKind::Filesystem => {
                let base_dir = self
                    .base_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
                Ok(Arc::new(FilesystemObjectStore::new(base_dir)))
            }
            BackendKind::Http => self.build_http_store(),
        }
    }

    #[cfg(feature = "http")]
    fn build_http_store(&self) -> Result<Arc<dyn ObjectStore>, DagflowError> {
        let (Some(endpoint), Some(bucket)) = (&self.endpoint, &self.bucket) else {
            return Err(DagflowError::Config(
                "the http storage backend requires both 'endpoint' and 'bucket'".to_string(),
            ));
        };
        Ok(Arc::new(crate::storage::HttpObjectStore::new(endpoint, bucket)?))
    }

    #[cfg(not(feature = "http"))]
    fn build_http_store(&self) -> Result<Arc<dyn ObjectStore>, DagflowError> {
        Err(DagflowError::Config(
            "the http storage backend requires the 'http' feature".to_string(),
        ))
    }

    /// Builds the configured backend and returns the store for `run_id`.
    pub fn build_store(
        &self,
        run_id: impl Into<String>,
        plugins: Arc<TypeStoragePluginRegistry>,
    ) -> Result<IntermediateStore, DagflowError> {
        Ok(IntermediateStore::new(run_id, self.build_object_store()?)
            .with_prefix(&self.prefix)
            .with_type_storage_plugin_registry(plugins))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, used when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Artifact storage.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Loads configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, DagflowError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DagflowError::Config(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, DagflowError> {
        serde_yaml::from_str(text).map_err(|e| DagflowError::Config(e.to_string()))
    }
}
