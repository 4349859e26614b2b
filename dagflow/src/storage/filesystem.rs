//! Local filesystem object store.

use super::object_store::{BackendKind, ObjectStore};
use crate::errors::StorageError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::trace;
use uuid::Uuid;

const TEMP_MARKER: &str = ".tmp-";

/// Object store writing each key to a file under a base directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a partially written object.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    base_dir: PathBuf,
}

impl FilesystemObjectStore {
    /// Creates a store rooted at `base_dir`. The directory is created lazily.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.base_dir.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(StorageError::backend(
                    self.kind().as_str(),
                    key,
                    "relative path segments are not allowed in keys",
                ));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_dir).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(segments.join("/"))
    }

    async fn collect_files(&self, dir: PathBuf, keys: &mut Vec<String>) -> Result<(), StorageError> {
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(dir.display().to_string(), e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io(dir.display().to_string(), e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::io(path.display().to_string(), e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if !entry.file_name().to_string_lossy().contains(TEMP_MARKER) {
                    if let Some(key) = self.key_for(&path) {
                        keys.push(key);
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let Some(parent) = path.parent() else {
            return Err(StorageError::backend(self.kind().as_str(), key, "key has no parent directory"));
        };
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(key, e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{file_name}{TEMP_MARKER}{}", Uuid::new_v4().simple()));
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StorageError::io(key, e));
        }
        trace!(key, path = %path.display(), "Wrote object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::not_found(self.kind().as_str(), key))
            }
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::io(key, e)),
        };
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let path = self.path_for(prefix)?;
        let mut keys = Vec::new();
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => self.collect_files(path, &mut keys).await?,
            Ok(_) => {
                if let Some(key) = self.key_for(&path) {
                    keys.push(key);
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(prefix, e)),
        }
        keys.sort();
        Ok(keys)
    }

    fn uri_for_key(&self, key: &str) -> String {
        let path = self
            .path_for(key)
            .unwrap_or_else(|_| self.base_dir.join(key));
        format!("file://{}", path.display())
    }
}
