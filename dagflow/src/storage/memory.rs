//! In-memory object store.

use super::object_store::{key_in_prefix, BackendKind, ObjectStore};
use crate::errors::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Object store backed by a concurrent map.
///
/// Clones share the same map, so two stores for different runs can see each
/// other's roots (needed for cross-run copies).
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<DashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::not_found(self.kind().as_str(), key))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.contains_key(key)
            || self.objects.iter().any(|entry| key_in_prefix(entry.key(), key)))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.retain(|k, _| !key_in_prefix(k, key));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| key_in_prefix(entry.key(), prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn uri_for_key(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryObjectStore::new();
        store.put("a/b", b"one".to_vec()).await.unwrap();
        store.put("a/b/c", b"two".to_vec()).await.unwrap();
        store.put("a/bc", b"three".to_vec()).await.unwrap();

        assert_eq!(store.get("a/b").await.unwrap(), b"one".to_vec());
        assert_eq!(store.list("a/b").await.unwrap(), vec!["a/b", "a/b/c"]);

        store.delete("a/b").await.unwrap();
        assert!(!store.exists("a/b").await.unwrap());
        assert!(store.exists("a/bc").await.unwrap());
        store.delete("a/b").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = InMemoryObjectStore::new();
        assert!(store.get("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_exists_for_prefix_only() {
        let store = InMemoryObjectStore::new();
        store.put("root/x/part-0", Vec::new()).await.unwrap();
        assert!(store.exists("root/x").await.unwrap());
        assert!(!store.exists("root/y").await.unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_objects() {
        let store = InMemoryObjectStore::new();
        let other = store.clone();
        store.put("k", vec![1]).await.unwrap();
        other.copy("k", "k2").await.unwrap();
        assert_eq!(store.get("k2").await.unwrap(), vec![1]);
        assert_eq!(store.uri_for_key("k"), "memory://k");
    }
}
