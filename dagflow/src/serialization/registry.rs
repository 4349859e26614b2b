//! Storage plugins keyed by type and backend.

use super::SerializationStrategy;
use crate::context::ExecutionContext;
use crate::definition::RuntimeType;
use crate::errors::{DagflowError, SerializationError};
use crate::storage::{BackendKind, IntermediateStore, StoredObject};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Owns the write and read path for one type on one backend.
///
/// A plugin may ignore the default single-key layout, for example to spread
/// a value over several physical objects.
#[async_trait]
pub trait TypeStoragePlugin: Send + Sync + Debug {
    /// Stores `value` under `paths` in `store`.
    async fn set_object(
        &self,
        store: &IntermediateStore,
        value: &Value,
        ctx: &ExecutionContext,
        runtime_type: &RuntimeType,
        paths: &[String],
    ) -> Result<StoredObject, DagflowError>;

    /// Loads the value stored under `paths` in `store`.
    async fn get_object(
        &self,
        store: &IntermediateStore,
        ctx: &ExecutionContext,
        runtime_type: &RuntimeType,
        paths: &[String],
    ) -> Result<StoredObject, DagflowError>;
}

/// Maps `(type name, backend kind)` to a storage plugin.
///
/// Passed to each store at construction; there is no process-wide registry.
#[derive(Debug, Clone, Default)]
pub struct TypeStoragePluginRegistry {
    plugins: HashMap<(String, BackendKind), Arc<dyn TypeStoragePlugin>>,
}

impl TypeStoragePluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin for a type on a backend, replacing any previous one.
    #[must_use]
    pub fn with_plugin(
        mut self,
        runtime_type: &RuntimeType,
        backend: BackendKind,
        plugin: Arc<dyn TypeStoragePlugin>,
    ) -> Self {
        self.register(runtime_type, backend, plugin);
        self
    }

    /// Registers a plugin in place.
    pub fn register(
        &mut self,
        runtime_type: &RuntimeType,
        backend: BackendKind,
        plugin: Arc<dyn TypeStoragePlugin>,
    ) {
        self.plugins
            .insert((runtime_type.name().to_string(), backend), plugin);
    }

    /// Returns the plugin registered for a type on a backend.
    #[must_use]
    pub fn plugin_for(
        &self,
        runtime_type: &RuntimeType,
        backend: BackendKind,
    ) -> Option<&Arc<dyn TypeStoragePlugin>> {
        self.plugins
            .get(&(runtime_type.name().to_string(), backend))
    }

    /// Returns true if a plugin is registered for a type on a backend.
    #[must_use]
    pub fn has_plugin(&self, runtime_type: &RuntimeType, backend: BackendKind) -> bool {
        self.plugin_for(runtime_type, backend).is_some()
    }

    /// Returns the serialization strategy of a type.
    #[must_use]
    pub fn strategy_for<'a>(&self, runtime_type: &'a RuntimeType) -> &'a Arc<dyn SerializationStrategy> {
        runtime_type.serialization_strategy()
    }

    /// Checks that a composite type can be stored through the default path.
    ///
    /// The default path serializes containers structurally. It refuses any
    /// element type, at any depth, that carries its own strategy or has a
    /// plugin for `backend`. Such composites need a plugin of their own.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::NotImplemented`] naming the composite and
    /// the offending element type.
    pub fn ensure_default_composite_path(
        &self,
        runtime_type: &RuntimeType,
        backend: BackendKind,
    ) -> Result<(), SerializationError> {
        let mut current = runtime_type;
        while let Some(element) = current.element_type() {
            if element.has_custom_serialization() {
                return Err(SerializationError::NotImplemented {
                    type_name: runtime_type.name().to_string(),
                    element_type: element.name().to_string(),
                    reason: format!(
                        "declares custom serialization strategy '{}'",
                        element.serialization_strategy().name()
                    ),
                });
            }
            if self.has_plugin(element, backend) {
                return Err(SerializationError::NotImplemented {
                    type_name: runtime_type.name().to_string(),
                    element_type: element.name().to_string(),
                    reason: format!("has a storage plugin for the {backend} backend"),
                });
            }
            current = element;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TypeKind;
    use crate::serialization::CsvSerializationStrategy;

    #[derive(Debug)]
    struct NoopPlugin;

    #[async_trait]
    impl TypeStoragePlugin for NoopPlugin {
        async fn set_object(
            &self,
            _store: &IntermediateStore,
            value: &Value,
            _ctx: &ExecutionContext,
            _runtime_type: &RuntimeType,
            _paths: &[String],
        ) -> Result<StoredObject, DagflowError> {
            Ok(StoredObject::new(value.clone(), None))
        }

        async fn get_object(
            &self,
            _store: &IntermediateStore,
            _ctx: &ExecutionContext,
            _runtime_type: &RuntimeType,
            _paths: &[String],
        ) -> Result<StoredObject, DagflowError> {
            Ok(StoredObject::new(Value::Null, None))
        }
    }

    fn csv_rows() -> RuntimeType {
        RuntimeType::new("CsvRows", TypeKind::Rows)
            .with_serialization_strategy(Arc::new(CsvSerializationStrategy))
    }

    #[test]
    fn test_plugin_lookup_is_per_backend() {
        let ty = RuntimeType::rows();
        let registry =
            TypeStoragePluginRegistry::new().with_plugin(&ty, BackendKind::Filesystem, Arc::new(NoopPlugin));

        assert!(registry.has_plugin(&ty, BackendKind::Filesystem));
        assert!(!registry.has_plugin(&ty, BackendKind::InMemory));
        assert!(!registry.has_plugin(&RuntimeType::int(), BackendKind::Filesystem));
    }

    #[test]
    fn test_strategy_for_returns_type_strategy() {
        let registry = TypeStoragePluginRegistry::new();
        assert_eq!(registry.strategy_for(&RuntimeType::int()).name(), "json");
        assert_eq!(registry.strategy_for(&csv_rows()).name(), "csv");
    }

    #[test]
    fn test_composite_of_builtin_uses_default_path() {
        let registry = TypeStoragePluginRegistry::new();
        let ty = RuntimeType::list(RuntimeType::nullable(RuntimeType::int()));
        assert!(registry
            .ensure_default_composite_path(&ty, BackendKind::InMemory)
            .is_ok());
    }

    #[test]
    fn test_composite_of_custom_element_is_rejected() {
        let registry = TypeStoragePluginRegistry::new();
        let ty = RuntimeType::list(RuntimeType::nullable(csv_rows()));

        let err = registry
            .ensure_default_composite_path(&ty, BackendKind::InMemory)
            .unwrap_err();
        match err {
            SerializationError::NotImplemented {
                type_name,
                element_type,
                ..
            } => {
                assert_eq!(type_name, "List[Nullable[CsvRows]]");
                assert_eq!(element_type, "CsvRows");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_composite_of_plugin_element_is_rejected() {
        let element = RuntimeType::rows();
        let registry = TypeStoragePluginRegistry::new().with_plugin(
            &element,
            BackendKind::InMemory,
            Arc::new(NoopPlugin),
        );
        let ty = RuntimeType::list(element);

        assert!(registry
            .ensure_default_composite_path(&ty, BackendKind::InMemory)
            .is_err());
        assert!(registry
            .ensure_default_composite_path(&ty, BackendKind::Filesystem)
            .is_ok());
    }
}
