//! Error types for the dagflow engine.
//!
//! Errors are grouped by the family they belong to: declaration errors raised
//! while building or compiling a pipeline, subset and step selection errors,
//! serialization errors, backend storage errors, reconstruction errors and
//! execution errors. Every family converts into [`DagflowError`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for dagflow operations.
#[derive(Debug, Error)]
pub enum DagflowError {
    /// A pipeline or repository declaration is invalid.
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    /// The dependency graph contains a cycle.
    #[error("{0}")]
    CyclicDependency(#[from] CyclicDependencyError),

    /// A task selection is unknown or not closed over its dependencies.
    #[error("{0}")]
    InvalidSubset(#[from] InvalidSubsetError),

    /// A step key is not present in the plan.
    #[error("{0}")]
    InvalidStep(#[from] InvalidStepError),

    /// An output name is not produced by its owning step.
    #[error("{0}")]
    InvalidOutput(#[from] InvalidOutputError),

    /// A value could not be serialized or deserialized.
    #[error("{0}")]
    Serialization(#[from] SerializationError),

    /// A storage backend operation failed.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// A code pointer could not be reconstructed.
    #[error("{0}")]
    Reconstruction(#[from] ReconstructionError),

    /// A step failed while executing.
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Diagnostic metadata attached to declaration errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "DAGFLOW-PLAN-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline or repository declaration is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DefinitionError {
    /// The error message.
    pub message: String,
    /// The names (tasks, pipelines) involved in the error.
    pub names: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl DefinitionError {
    /// Creates a new definition error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            names: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the names involved.
    #[must_use]
    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = names;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// A task name was declared twice in one pipeline.
    #[must_use]
    pub fn duplicate_task(pipeline: &str, task: &str) -> Self {
        Self::new(format!(
            "Pipeline '{pipeline}' declares task '{task}' more than once"
        ))
        .with_names(vec![task.to_string()])
        .with_error_info(
            ContractErrorInfo::new("DAGFLOW-DEF-DUPLICATE", format!("Duplicate task '{task}'"))
                .with_fix_hint("Task names must be unique within a pipeline."),
        )
    }

    /// A dependency map entry references a task that does not exist.
    #[must_use]
    pub fn unknown_task(pipeline: &str, task: &str, referenced_by: &str) -> Self {
        Self::new(format!(
            "Pipeline '{pipeline}' has a dependency on unknown task '{task}' (referenced by '{referenced_by}')"
        ))
        .with_names(vec![referenced_by.to_string(), task.to_string()])
        .with_error_info(
            ContractErrorInfo::new("DAGFLOW-DEF-MISSING_DEP", format!("Task '{task}' not found"))
                .with_fix_hint("Check the dependency map for typos in task names."),
        )
    }

    /// A dependency map entry names an input the task does not declare.
    #[must_use]
    pub fn unknown_input(pipeline: &str, task: &str, input: &str) -> Self {
        Self::new(format!(
            "Pipeline '{pipeline}': task '{task}' has no input named '{input}'"
        ))
        .with_names(vec![task.to_string()])
        .with_error_info(ContractErrorInfo::new(
            "DAGFLOW-DEF-MISSING_INPUT",
            format!("Input '{task}.{input}' not declared"),
        ))
    }

    /// Two dependency map entries feed the same task input.
    #[must_use]
    pub fn duplicate_input(pipeline: &str, task: &str, input: &str) -> Self {
        Self::new(format!(
            "Pipeline '{pipeline}': input '{task}.{input}' is wired more than once"
        ))
        .with_names(vec![task.to_string()])
        .with_error_info(
            ContractErrorInfo::new(
                "DAGFLOW-DEF-DUPLICATE_INPUT",
                format!("Input '{task}.{input}' has several sources"),
            )
            .with_fix_hint("Each task input can depend on exactly one upstream output."),
        )
    }

    /// A dependency map entry names an output the source task does not declare.
    #[must_use]
    pub fn unknown_output(pipeline: &str, task: &str, output: &str) -> Self {
        Self::new(format!(
            "Pipeline '{pipeline}': task '{task}' has no output named '{output}'"
        ))
        .with_names(vec![task.to_string()])
        .with_error_info(ContractErrorInfo::new(
            "DAGFLOW-DEF-MISSING_OUTPUT",
            format!("Output '{task}.{output}' not declared"),
        ))
    }
}

/// Error raised when the dependency graph contains a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cyclic dependency in pipeline '{pipeline}': {}", cycle_path.join(" -> "))]
pub struct CyclicDependencyError {
    /// The pipeline name.
    pub pipeline: String,
    /// The path of tasks forming the cycle; first and last entries are equal.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CyclicDependencyError {
    /// Creates a new cyclic dependency error.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "DAGFLOW-PLAN-CYCLE",
            format!("Dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            pipeline: pipeline.into(),
            cycle_path,
            error_info: info,
        }
    }
}

/// Error raised when a task selection cannot be compiled.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct InvalidSubsetError {
    /// The error message.
    pub message: String,
    /// The offending task names.
    pub task_names: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl InvalidSubsetError {
    /// The selection references tasks the pipeline does not contain.
    #[must_use]
    pub fn unknown_tasks(pipeline: &str, task_names: Vec<String>) -> Self {
        Self {
            message: format!(
                "Pipeline '{pipeline}' has no task(s) named {}",
                quoted_list(&task_names)
            ),
            error_info: ContractErrorInfo::new("DAGFLOW-PLAN-SUBSET", "Unknown task in selection"),
            task_names,
        }
    }

    /// A selected task depends on a task outside the selection.
    #[must_use]
    pub fn not_closed(pipeline: &str, task: &str, input: &str, source_task: &str) -> Self {
        Self {
            message: format!(
                "Invalid selection for pipeline '{pipeline}': task '{task}' input '{input}' depends on \
                 '{source_task}', which is not selected"
            ),
            task_names: vec![task.to_string(), source_task.to_string()],
            error_info: ContractErrorInfo::new("DAGFLOW-PLAN-SUBSET", "Selection is not closed")
                .with_fix_hint(format!(
                    "Select '{source_task}' as well, or subset an already compiled plan to reuse its stored outputs."
                ))
                .with_context_entry("task", task)
                .with_context_entry("source_task", source_task),
        }
    }
}

fn quoted_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("'{n}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error raised when a step key is not present in an execution plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Execution plan for pipeline '{pipeline}' has no step '{step_key}'")]
pub struct InvalidStepError {
    /// The pipeline name.
    pub pipeline: String,
    /// The unknown step key.
    pub step_key: String,
}

impl InvalidStepError {
    /// Creates a new invalid step error.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, step_key: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            step_key: step_key.into(),
        }
    }
}

/// Error raised when a step does not produce the requested output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Step '{step_key}' has no output named '{output_name}'")]
pub struct InvalidOutputError {
    /// The owning step key.
    pub step_key: String,
    /// The unknown output name.
    pub output_name: String,
}

impl InvalidOutputError {
    /// Creates a new invalid output error.
    #[must_use]
    pub fn new(step_key: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            output_name: output_name.into(),
        }
    }
}

/// Errors raised while serializing or deserializing a value.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Stored data cannot be decoded as, or a value does not conform to, the requested type.
    #[error("Type mismatch for type '{type_name}' at '{location}': {reason}")]
    TypeMismatch {
        /// The requested type.
        type_name: String,
        /// The storage key or logical location.
        location: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The default composite path cannot handle the element serialization.
    #[error(
        "Composite type '{type_name}' cannot be stored through the default path: element type \
         '{element_type}' {reason}. Register a storage plugin for '{type_name}' instead"
    )]
    NotImplemented {
        /// The composite type.
        type_name: String,
        /// The element type carrying custom serialization.
        element_type: String,
        /// What makes the element custom.
        reason: String,
    },

    /// A strategy failed to encode or decode.
    #[error("Strategy '{strategy}' failed: {reason}")]
    Strategy {
        /// The strategy name.
        strategy: String,
        /// The failure reason.
        reason: String,
    },
}

impl SerializationError {
    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(
        type_name: impl Into<String>,
        location: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            type_name: type_name.into(),
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Creates a strategy error.
    #[must_use]
    pub fn strategy(strategy: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Strategy {
            strategy: strategy.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by object store backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object exists at the key.
    #[error("No object at '{key}' in {backend} storage")]
    NotFound {
        /// The backend name.
        backend: String,
        /// The missing key.
        key: String,
    },

    /// A filesystem operation failed.
    #[error("I/O error at '{key}': {source}")]
    Io {
        /// The key being accessed.
        key: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A remote backend returned an error.
    #[error("{backend} storage error at '{key}': {message}")]
    Backend {
        /// The backend name.
        backend: String,
        /// The key being accessed.
        key: String,
        /// The backend message.
        message: String,
    },
}

impl StorageError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(backend: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            backend: backend.into(),
            key: key.into(),
        }
    }

    /// Creates an I/O error.
    #[must_use]
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }

    /// Creates a backend error.
    #[must_use]
    pub fn backend(
        backend: impl Into<String>,
        key: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Backend {
            backend: backend.into(),
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Returns true for a missing object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised while constructing or resolving reconstructable pointers.
#[derive(Debug, Error)]
pub enum ReconstructionError {
    /// A pointer or target violated a reconstruction invariant.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A repository does not contain the requested pipeline.
    #[error("Repository '{repository}' has no pipeline named '{pipeline}'")]
    UnknownPipeline {
        /// The repository name.
        repository: String,
        /// The requested pipeline name.
        pipeline: String,
    },

    /// The resolved pipeline rejected the frozen task subset.
    #[error("{0}")]
    InvalidSubset(#[from] InvalidSubsetError),

    /// A repository configuration file is malformed.
    #[error("Invalid repository config '{}': {message}", path.display())]
    Config {
        /// The config file path.
        path: PathBuf,
        /// What is wrong with it.
        message: String,
    },

    /// A repository configuration file could not be read.
    #[error("Could not read repository config '{}': {source}", path.display())]
    Io {
        /// The config file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ReconstructionError {
    /// Creates an invariant violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}

/// Errors raised while executing a single step.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// An external input has no configured value and no default.
    #[error("Step '{step_key}' input '{input_name}' has no dependency, config value or default")]
    MissingInput {
        /// The step key.
        step_key: String,
        /// The input name.
        input_name: String,
    },

    /// The compute function did not yield a declared output.
    #[error("Step '{step_key}' did not yield declared output '{output_name}'")]
    MissingOutput {
        /// The step key.
        step_key: String,
        /// The output name.
        output_name: String,
    },

    /// The compute function yielded an undeclared output.
    #[error("Step '{step_key}' yielded undeclared output '{output_name}'")]
    UnexpectedOutput {
        /// The step key.
        step_key: String,
        /// The output name.
        output_name: String,
    },

    /// A value does not conform to the declared input or output type.
    #[error("Step '{step_key}' value '{name}' is not a valid '{type_name}': {reason}")]
    TypeCheck {
        /// The step key.
        step_key: String,
        /// The input or output name.
        name: String,
        /// The declared type.
        type_name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The user compute function failed.
    #[error("Step '{step_key}' compute failed: {source}")]
    Compute {
        /// The step key.
        step_key: String,
        /// The compute error.
        #[source]
        source: anyhow::Error,
    },

    /// The plan references a task the pipeline does not define.
    #[error("Step '{step_key}' refers to task '{task_name}' which is not in pipeline '{pipeline}'")]
    UnknownTask {
        /// The step key.
        step_key: String,
        /// The task name.
        task_name: String,
        /// The pipeline name.
        pipeline: String,
    },

    /// A spawned step task failed to join.
    #[error("Step '{step_key}' task join error: {message}")]
    Join {
        /// The step key.
        step_key: String,
        /// The join error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("task", "load");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("task"), Some(&"load".to_string()));
    }

    #[test]
    fn test_cyclic_dependency_error() {
        let err = CyclicDependencyError::new(
            "p",
            vec!["a".to_string(), "b".to_string(), "c".to_string(), "a".to_string()],
        );

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.error_info.code, "DAGFLOW-PLAN-CYCLE");
    }

    #[test]
    fn test_not_closed_subset_names_both_tasks() {
        let err = InvalidSubsetError::not_closed("diamond", "D", "right", "C");
        assert_eq!(err.task_names, vec!["D".to_string(), "C".to_string()]);
        assert!(err.to_string().contains("'C'"));
    }

    #[test]
    fn test_errors_convert_into_dagflow_error() {
        let err: DagflowError = InvalidStepError::new("p", "missing.compute").into();
        assert!(matches!(err, DagflowError::InvalidStep(_)));
        assert!(err.to_string().contains("missing.compute"));

        let err: DagflowError = SerializationError::type_mismatch("Bool", "k", "bad").into();
        assert!(matches!(
            err,
            DagflowError::Serialization(SerializationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_storage_error_not_found() {
        let err = StorageError::not_found("in_memory", "dagster/storage/run/x");
        assert!(err.is_not_found());
        assert!(!StorageError::backend("http", "k", "500").is_not_found());
    }
}
