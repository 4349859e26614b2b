//! Run-scoped artifact store.
//!
//! Every object of a run lives under `{prefix}/storage/{run_id}/`. This key
//! layout is shared with other implementations and must not change.

use super::object_store::{BackendKind, ObjectStore};
use crate::context::ExecutionContext;
use crate::definition::RuntimeType;
use crate::errors::{DagflowError, SerializationError, StorageError};
use crate::serialization::{SerializationMode, TypeStoragePluginRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "dagster";

/// A value together with the name of the strategy that stored it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    /// The value.
    pub obj: Value,
    /// Strategy used, if the default path stored it.
    pub serialization_strategy: Option<String>,
}

impl StoredObject {
    /// Creates a stored object.
    #[must_use]
    pub fn new(obj: Value, serialization_strategy: Option<String>) -> Self {
        Self {
            obj,
            serialization_strategy,
        }
    }
}

/// Reads and writes the artifacts of one run.
#[derive(Debug, Clone)]
pub struct IntermediateStore {
    run_id: String,
    prefix: String,
    object_store: Arc<dyn ObjectStore>,
    plugins: Arc<TypeStoragePluginRegistry>,
}

impl IntermediateStore {
    /// Creates a store for `run_id` with the default prefix and no plugins.
    #[must_use]
    pub fn new(run_id: impl Into<String>, object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            run_id: run_id.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            object_store,
            plugins: Arc::new(TypeStoragePluginRegistry::new()),
        }
    }

    /// Overrides the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix
            .into()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        self
    }

    /// Sets the storage plugin registry.
    #[must_use]
    pub fn with_type_storage_plugin_registry(mut self, plugins: Arc<TypeStoragePluginRegistry>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Returns a store for another run sharing this store's backend, prefix
    /// and plugins.
    #[must_use]
    pub fn for_run_id(&self, run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..self.clone()
        }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the key prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the backend kind.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.object_store.kind()
    }

    /// Returns the underlying object store.
    #[must_use]
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.object_store
    }

    /// Returns the plugin registry.
    #[must_use]
    pub fn plugins(&self) -> &TypeStoragePluginRegistry {
        &self.plugins
    }

    /// Returns `{prefix}/storage/{run_id}`.
    #[must_use]
    pub fn root(&self) -> String {
        self.root_for_run(&self.run_id)
    }

    /// Returns `{prefix}/storage/{run_id}` for any run.
    #[must_use]
    pub fn root_for_run(&self, run_id: &str) -> String {
        if self.prefix.is_empty() {
            format!("storage/{run_id}")
        } else {
            format!("{}/storage/{run_id}", self.prefix)
        }
    }

    /// Returns the key of `paths` below this run's root.
    #[must_use]
    pub fn key_for_paths(&self, paths: &[String]) -> String {
        join_key(self.root(), paths)
    }

    /// Returns the backend URI of `paths` below this run's root.
    #[must_use]
    pub fn uri_for_paths(&self, paths: &[String]) -> String {
        self.object_store.uri_for_key(&self.key_for_paths(paths))
    }

    /// Stores `value` under `paths`.
    ///
    /// A plugin registered for `(runtime_type, backend)` takes precedence over
    /// the type's serialization strategy. Existing objects are overwritten.
    ///
    /// # Errors
    ///
    /// Fails on a type mismatch, a composite the default path cannot store,
    /// or a backend error.
    pub async fn set_object(
        &self,
        value: &Value,
        ctx: &ExecutionContext,
        runtime_type: &RuntimeType,
        paths: &[String],
    ) -> Result<StoredObject, DagflowError> {
        if let Some(plugin) = self.plugins.plugin_for(runtime_type, self.backend_kind()) {
            debug!(
                run_id = %self.run_id,
                step_key = ctx.step_key().unwrap_or_default(),
                type_name = runtime_type.name(),
                "Storing object through plugin"
            );
            return plugin
                .set_object(self, value, ctx, runtime_type, paths)
                .await;
        }
        self.set_object_with_strategy(value, ctx, runtime_type, paths)
            .await
    }

    /// Loads the value stored under `paths`.
    ///
    /// # Errors
    ///
    /// Fails with [`SerializationError::TypeMismatch`] if the stored data does
    /// not decode as `runtime_type`, and with a storage error if it is missing.
    pub async fn get_object(
        &self,
        ctx: &ExecutionContext,
        runtime_type: &RuntimeType,
        paths: &[String],
    ) -> Result<StoredObject, DagflowError> {
        if let Some(plugin) = self.plugins.plugin_for(runtime_type, self.backend_kind()) {
            return plugin.get_object(self, ctx, runtime_type, paths).await;
        }
        self.get_object_with_strategy(ctx, runtime_type, paths).await
    }

    /// Stores `value` with the type's serialization strategy, ignoring plugins.
    ///
    /// # Errors
    ///
    /// See [`IntermediateStore::set_object`].
    pub async fn set_object_with_strategy(
        &self,
        value: &Value,
        ctx: &ExecutionContext,
        runtime_type: &RuntimeType,
        paths: &[String],
    ) -> Result<StoredObject, DagflowError> {
        self.plugins
            .ensure_default_composite_path(runtime_type, self.backend_kind())?;

        let key = self.key_for_paths(paths);
        runtime_type
            .type_check(value)
            .map_err(|reason| SerializationError::type_mismatch(runtime_type.name(), &key, reason))?;

        let strategy = runtime_type.serialization_strategy();
        let mut bytes = Vec::new();
        strategy.serialize(value, &mut bytes)?;
        let size = bytes.len();
        self.object_store.put(&key, bytes).await?;

        debug!(
            run_id = %self.run_id,
            step_key = ctx.step_key().unwrap_or_default(),
            key = %key,
            strategy = strategy.name(),
            size,
            "Stored object"
        );
        Ok(StoredObject::new(value.clone(), Some(strategy.name().to_string())))
    }

    /// Loads a value with the type's serialization strategy, ignoring plugins.
    ///
    /// # Errors
    ///
    /// See [`IntermediateStore::get_object`].
    pub async fn get_object_with_strategy(
        &self,
        ctx: &ExecutionContext,
        runtime_type: &RuntimeType,
        paths: &[String],
    ) -> Result<StoredObject, DagflowError> {
        self.plugins
            .ensure_default_composite_path(runtime_type, self.backend_kind())?;

        let key = self.key_for_paths(paths);
        let bytes = self.object_store.get(&key).await?;
        let strategy = runtime_type.serialization_strategy();
        let mismatch = |reason: String| SerializationError::type_mismatch(runtime_type.name(), &key, reason);

        if strategy.read_mode() == SerializationMode::Text {
            std::str::from_utf8(&bytes).map_err(|e| mismatch(format!("stored data is not text: {e}")))?;
        }
        let value = strategy
            .deserialize(&mut bytes.as_slice())
            .map_err(|e| mismatch(e.to_string()))?;
        runtime_type.type_check(&value).map_err(mismatch)?;

        debug!(
            run_id = %self.run_id,
            step_key = ctx.step_key().unwrap_or_default(),
            key = %key,
            strategy = strategy.name(),
            "Loaded object"
        );
        Ok(StoredObject::new(value, Some(strategy.name().to_string())))
    }

    /// True if anything is stored at or under `paths`.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub async fn has_object(
        &self,
        _ctx: &ExecutionContext,
        paths: &[String],
    ) -> Result<bool, DagflowError> {
        let key = self.key_for_paths(paths);
        Ok(self.object_store.exists(&key).await?)
    }

    /// Removes everything stored at or under `paths`. Missing objects are fine.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub async fn rm_object(&self, ctx: &ExecutionContext, paths: &[String]) -> Result<(), DagflowError> {
        let key = self.key_for_paths(paths);
        self.object_store.delete(&key).await?;
        debug!(
            run_id = %self.run_id,
            step_key = ctx.step_key().unwrap_or_default(),
            key = %key,
            "Removed object"
        );
        Ok(())
    }

    /// Copies the object(s) at `paths` of `source_run_id` into this run.
    ///
    /// Objects laid out by a plugin under `paths` are copied too. The source
    /// run is only read.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageError::NotFound`] if the source run has nothing at
    /// `paths`.
    pub async fn copy_object_from_run(
        &self,
        ctx: &ExecutionContext,
        source_run_id: &str,
        paths: &[String],
    ) -> Result<(), DagflowError> {
        let source_key = join_key(self.root_for_run(source_run_id), paths);
        let dest_key = self.key_for_paths(paths);

        let keys = self.object_store.list(&source_key).await?;
        if keys.is_empty() {
            return Err(StorageError::not_found(self.backend_kind().as_str(), source_key).into());
        }
        for key in &keys {
            let suffix = key.strip_prefix(source_key.as_str()).ok_or_else(|| {
                StorageError::backend(
                    self.backend_kind().as_str(),
                    key,
                    format!("listed key is not below '{source_key}'"),
                )
            })?;
            let target = format!("{dest_key}{suffix}");
            self.object_store.copy(key, &target).await?;
        }

        debug!(
            run_id = %self.run_id,
            source_run_id,
            step_key = ctx.step_key().unwrap_or_default(),
            key = %dest_key,
            objects = keys.len(),
            "Copied object from run"
        );
        Ok(())
    }
}

/// Appends `paths` to `root`, dropping empty segments so that keys match
/// what backends report from `list`.
fn join_key(root: String, paths: &[String]) -> String {
    let mut key = root;
    for segment in paths
        .iter()
        .flat_map(|path| path.split('/'))
        .filter(|segment| !segment.is_empty())
    {
        key.push('/');
        key.push_str(segment);
    }
    key
}
