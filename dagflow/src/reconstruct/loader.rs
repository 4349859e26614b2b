//! Loading entry points named by code pointers.
//!
//! Entry points are registered with an [`EntryPointRegistry`] under the file
//! and module they are defined in. A process that receives a pointer resolves
//! it against its own registry.

use super::pointer::{normalize_path, CodePointer, Target};
use crate::errors::ReconstructionError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Loads the value a code pointer names.
#[cfg_attr(test, mockall::automock)]
pub trait CodeLoader: Send + Sync {
    /// Loads the raw target at `pointer`. Factories are returned uninvoked.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::InvariantViolation`] if nothing is
    /// registered at `pointer`.
    fn load_target(&self, pointer: &CodePointer) -> Result<Target, ReconstructionError>;
}

/// A named entry point together with where it is defined.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    /// The simple name.
    pub name: String,
    /// The name as written at the definition site.
    pub qualified_name: String,
    /// Module path of the definition.
    pub module: String,
    /// Source file of the definition.
    pub source_file: PathBuf,
    /// The value.
    pub target: Target,
}

impl EntryPoint {
    /// Creates an entry point.
    #[must_use]
    pub fn new(
        qualified_name: &str,
        module: impl Into<String>,
        source_file: impl Into<PathBuf>,
        target: Target,
    ) -> Self {
        let qualified_name: String = qualified_name.split_whitespace().collect();
        let name = qualified_name
            .rsplit("::")
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            name,
            qualified_name,
            module: module.into(),
            source_file: source_file.into(),
            target,
        }
    }

    /// Creates an entry point for a closure or function value, named by its
    /// type. Closures are anonymous and cannot be reconstructed.
    #[must_use]
    pub fn from_callable<F>(module: impl Into<String>, source_file: impl Into<PathBuf>, f: F) -> Self
    where
        F: Fn() -> Target + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<F>();
        Self::new(type_name, module, source_file, Target::factory(f))
    }

    /// Pointer to this entry point by source file.
    #[must_use]
    pub fn file_pointer(&self) -> CodePointer {
        CodePointer::file(&self.source_file, &self.name)
    }

    /// Pointer to this entry point by module.
    #[must_use]
    pub fn module_pointer(&self) -> CodePointer {
        CodePointer::module(&self.module, &self.name)
    }
}

/// Declares an [`EntryPoint`] for a zero-argument function at the call site.
///
/// ```ignore
/// let entry = entry_point!(define_pipeline);
/// ```
#[macro_export]
macro_rules! entry_point {
    ($($path:ident)::+) => {
        $crate::reconstruct::EntryPoint::new(
            stringify!($($path)::+),
            module_path!(),
            file!(),
            $crate::reconstruct::Target::factory($($path)::+),
        )
    };
}

/// In-process table of loadable entry points.
#[derive(Debug, Default)]
pub struct EntryPointRegistry {
    files: RwLock<HashMap<(PathBuf, String), Target>>,
    modules: RwLock<HashMap<(String, String), Target>>,
}

impl EntryPointRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a target under a file and name.
    pub fn register_file(&self, path: impl Into<PathBuf>, fn_name: impl Into<String>, target: Target) {
        let path = normalize_path(&path.into());
        self.files.write().insert((path, fn_name.into()), target);
    }

    /// Registers a target under a module and name.
    pub fn register_module(&self, module: impl Into<String>, fn_name: impl Into<String>, target: Target) {
        self.modules
            .write()
            .insert((module.into(), fn_name.into()), target);
    }

    /// Registers an entry point under both its file and its module.
    pub fn register(&self, entry: &EntryPoint) {
        self.register_file(&entry.source_file, &entry.name, entry.target.clone());
        self.register_module(&entry.module, &entry.name, entry.target.clone());
    }

    /// Builder form of [`EntryPointRegistry::register`].
    #[must_use]
    pub fn with_entry_point(self, entry: &EntryPoint) -> Self {
        self.register(entry);
        self
    }

    /// Number of registered file and module entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().len() + self.modules.read().len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CodeLoader for EntryPointRegistry {
    fn load_target(&self, pointer: &CodePointer) -> Result<Target, ReconstructionError> {
        debug!(pointer = %pointer, "Loading entry point");
        let found = match pointer {
            CodePointer::File { path, fn_name } => self
                .files
                .read()
                .get(&(normalize_path(path), fn_name.clone()))
                .cloned(),
            CodePointer::Module { module, fn_name } => self
                .modules
                .read()
                .get(&(module.clone(), fn_name.clone()))
                .cloned(),
            CodePointer::Config { target, .. } => return self.load_target(target),
        };
        found.ok_or_else(|| {
            ReconstructionError::invariant(format!(
                "{} is not a registered entry point",
                pointer.describe()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::RepositoryDefinition;

    fn empty_repo() -> RepositoryDefinition {
        RepositoryDefinition::new("empty")
    }

    #[test]
    fn test_entry_point_macro_captures_location() {
        let entry = entry_point!(empty_repo);
        assert_eq!(entry.name, "empty_repo");
        assert_eq!(entry.qualified_name, "empty_repo");
        assert_eq!(entry.module, module_path!());
        assert_eq!(entry.source_file, PathBuf::from(file!()));
        assert!(matches!(entry.target, Target::Factory(_)));
    }

    #[test]
    fn test_qualified_entry_point_keeps_path() {
        let entry = entry_point!(self::empty_repo);
        assert_eq!(entry.name, "empty_repo");
        assert_eq!(entry.qualified_name, "self::empty_repo");
    }

    #[test]
    fn test_closure_entry_point_is_anonymous() {
        let entry = EntryPoint::from_callable("m", "m.rs", || Target::value_of::<()>());
        assert!(entry.qualified_name.contains("{{closure}}"));
    }

    #[test]
    fn test_registry_loads_by_file_module_and_config() {
        let entry = entry_point!(empty_repo);
        let registry = EntryPointRegistry::new().with_entry_point(&entry);
        assert_eq!(registry.len(), 2);

        assert!(registry.load_target(&entry.file_pointer()).is_ok());
        assert!(registry.load_target(&entry.module_pointer()).is_ok());

        let dotted = CodePointer::file(
            PathBuf::from("./").join(&entry.source_file),
            "empty_repo",
        );
        assert!(registry.load_target(&dotted).is_ok());

        let config = CodePointer::Config {
            config_path: PathBuf::from("repo.yaml"),
            target: Box::new(entry.module_pointer()),
        };
        assert!(registry.load_target(&config).is_ok());
    }

    #[test]
    fn test_unregistered_pointer_is_invariant_violation() {
        let registry = EntryPointRegistry::new();
        let err = registry
            .load_target(&CodePointer::module("nowhere", "nothing"))
            .unwrap_err();
        assert!(matches!(err, ReconstructionError::InvariantViolation(ref m) if m.contains("nowhere::nothing")));
    }
}
