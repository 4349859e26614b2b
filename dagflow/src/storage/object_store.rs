//! Key/value object store abstraction shared by all backends.

use crate::errors::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of backend an object store writes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process-local memory.
    #[default]
    InMemory,
    /// Local filesystem.
    Filesystem,
    /// S3-compatible HTTP object storage.
    Http,
}

impl BackendKind {
    /// Returns the stable name used in config and errors.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::Filesystem => "filesystem",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_memory" | "memory" => Ok(Self::InMemory),
            "filesystem" | "fs" | "file" => Ok(Self::Filesystem),
            "http" | "s3" => Ok(Self::Http),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

/// A durable key/value store of raw bytes.
///
/// Keys are `/`-separated. Operations are atomic per key; there are no
/// cross-key transactions.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Returns the backend kind.
    fn kind(&self) -> BackendKind;

    /// Writes `bytes` at `key`, overwriting any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Reads the object at `key`.
    ///
    /// Fails with [`StorageError::NotFound`] when there is none.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// True if an object exists at `key` or under the `key/` prefix.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Removes the object at `key` and everything under `key/`.
    ///
    /// Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Lists every key that equals `prefix` or starts with `prefix/`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Copies the object at `from` to `to`.
    async fn copy(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let bytes = self.get(from).await?;
        self.put(to, bytes).await
    }

    /// Returns the backend URI of a key.
    fn uri_for_key(&self, key: &str) -> String;
}

/// True if `key` is `prefix` itself or lies under `prefix/`.
pub(crate) fn key_in_prefix(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    prefix.is_empty()
        || key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
