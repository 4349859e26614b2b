//! Code pointers and the values they load.

use crate::definition::{
    PartitionSetDefinition, PipelineDefinition, RepositoryDefinition, ScheduleDefinition,
};
use crate::errors::ReconstructionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A re-locatable reference to an entry point.
///
/// Pointers are plain data so they can be sent to another process and
/// resolved there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodePointer {
    /// An entry point defined in a source file.
    File {
        /// Source file path.
        path: PathBuf,
        /// Entry point name.
        fn_name: String,
    },
    /// An entry point defined in a module.
    Module {
        /// Module path, e.g. `my_crate::pipelines`.
        module: String,
        /// Entry point name.
        fn_name: String,
    },
    /// A pointer read from a repository config file.
    Config {
        /// The config file.
        config_path: PathBuf,
        /// The pointer the config names.
        target: Box<CodePointer>,
    },
}

impl CodePointer {
    /// Creates a file pointer.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>, fn_name: impl Into<String>) -> Self {
        Self::File {
            path: path.into(),
            fn_name: fn_name.into(),
        }
    }

    /// Creates a module pointer.
    #[must_use]
    pub fn module(module: impl Into<String>, fn_name: impl Into<String>) -> Self {
        Self::Module {
            module: module.into(),
            fn_name: fn_name.into(),
        }
    }

    /// Returns the entry point name.
    #[must_use]
    pub fn fn_name(&self) -> &str {
        match self {
            Self::File { fn_name, .. } | Self::Module { fn_name, .. } => fn_name,
            Self::Config { target, .. } => target.fn_name(),
        }
    }

    /// Returns the innermost file or module pointer.
    #[must_use]
    pub fn innermost(&self) -> &Self {
        match self {
            Self::Config { target, .. } => target.innermost(),
            other => other,
        }
    }

    /// Human-readable description used in errors and logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::File { path, fn_name } => format!("{}::{fn_name}", path.display()),
            Self::Module { module, fn_name } => format!("{module}::{fn_name}"),
            Self::Config {
                config_path,
                target,
            } => format!("{} (from config {})", target.describe(), config_path.display()),
        }
    }
}

impl fmt::Display for CodePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A zero-argument entry point producing a target.
pub type TargetFactory = Arc<dyn Fn() -> anyhow::Result<Target> + Send + Sync>;

/// The value an entry point holds.
#[derive(Clone)]
pub enum Target {
    /// A pipeline definition.
    Pipeline(Arc<PipelineDefinition>),
    /// A repository definition.
    Repository(Arc<RepositoryDefinition>),
    /// Schedule definitions.
    Schedules(Vec<ScheduleDefinition>),
    /// Partition set definitions.
    PartitionSets(Vec<PartitionSetDefinition>),
    /// A zero-argument callable, invoked on resolution.
    Factory(TargetFactory),
    /// Any other value, known only by its type name.
    Value {
        /// Type name of the value.
        type_name: String,
    },
}

impl Target {
    /// Wraps a zero-argument function as a factory target.
    pub fn factory<F, T>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: IntoTarget,
    {
        Self::Factory(Arc::new(move || f().into_target()))
    }

    /// Describes a value of some other type.
    #[must_use]
    pub fn value_of<T: ?Sized>() -> Self {
        Self::Value {
            type_name: std::any::type_name::<T>().to_string(),
        }
    }

    /// Short name of the target kind.
    #[must_use]
    pub fn kind_name(&self) -> String {
        match self {
            Self::Pipeline(_) => "PipelineDefinition".to_string(),
            Self::Repository(_) => "RepositoryDefinition".to_string(),
            Self::Schedules(_) => "schedule definitions".to_string(),
            Self::PartitionSets(_) => "partition set definitions".to_string(),
            Self::Factory(_) => "factory".to_string(),
            Self::Value { type_name } => type_name.clone(),
        }
    }

    /// True for targets that produce a pipeline when resolved.
    #[must_use]
    pub fn is_pipeline_producing(&self) -> bool {
        matches!(self, Self::Pipeline(_) | Self::Factory(_))
    }

    /// Invokes a factory once; other targets are returned unchanged.
    ///
    /// # Errors
    ///
    /// A failing factory, or one that returns another factory, is an
    /// [`ReconstructionError::InvariantViolation`] naming `pointer`.
    pub fn resolve(self, pointer: &CodePointer) -> Result<Self, ReconstructionError> {
        let Self::Factory(factory) = self else {
            return Ok(self);
        };
        match factory() {
            Ok(Self::Factory(_)) => Err(ReconstructionError::invariant(format!(
                "Entry point {} returned another callable; it must return a definition",
                pointer.describe()
            ))),
            Ok(target) => Ok(target),
            Err(e) => Err(ReconstructionError::invariant(format!(
                "Error invoking entry point {}: {e:#}",
                pointer.describe()
            ))),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline(p) => f.debug_tuple("Pipeline").field(&p.name()).finish(),
            Self::Repository(r) => f.debug_tuple("Repository").field(&r.name()).finish(),
            Self::Schedules(s) => f.debug_tuple("Schedules").field(s).finish(),
            Self::PartitionSets(p) => f.debug_tuple("PartitionSets").field(p).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
            Self::Value { type_name } => f.debug_struct("Value").field("type_name", type_name).finish(),
        }
    }
}

/// Values an entry point can return.
pub trait IntoTarget {
    /// Converts the value into a target.
    ///
    /// # Errors
    ///
    /// Propagates the error of a fallible entry point.
    fn into_target(self) -> anyhow::Result<Target>;
}

impl IntoTarget for Target {
    fn into_target(self) -> anyhow::Result<Target> {
        Ok(self)
    }
}

impl IntoTarget for PipelineDefinition {
    fn into_target(self) -> anyhow::Result<Target> {
        Ok(Target::Pipeline(Arc::new(self)))
    }
}

impl IntoTarget for Arc<PipelineDefinition> {
    fn into_target(self) -> anyhow::Result<Target> {
        Ok(Target::Pipeline(self))
    }
}

impl IntoTarget for RepositoryDefinition {
    fn into_target(self) -> anyhow::Result<Target> {
        Ok(Target::Repository(Arc::new(self)))
    }
}

impl IntoTarget for Arc<RepositoryDefinition> {
    fn into_target(self) -> anyhow::Result<Target> {
        Ok(Target::Repository(self))
    }
}

impl IntoTarget for Vec<ScheduleDefinition> {
    fn into_target(self) -> anyhow::Result<Target> {
        Ok(Target::Schedules(self))
    }
}

impl IntoTarget for Vec<PartitionSetDefinition> {
    fn into_target(self) -> anyhow::Result<Target> {
        Ok(Target::PartitionSets(self))
    }
}

impl<T: IntoTarget> IntoTarget for anyhow::Result<T> {
    fn into_target(self) -> anyhow::Result<Target> {
        self?.into_target()
    }
}

/// Resolves `.` and `..` components without touching the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // `..` above the root stays at the root.
                Some(Component::RootDir | Component::Prefix(_)) => {}
                Some(Component::ParentDir | Component::CurDir) | None => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
