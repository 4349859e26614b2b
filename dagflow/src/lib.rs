//! # Dagflow
//!
//! An execution-plan engine for data pipelines.
//!
//! Dagflow turns a declared pipeline into a deterministic plan of steps,
//! stores the values steps produce in a run-scoped artifact store, and lets
//! pipelines be referred to by re-locatable pointers:
//!
//! - **Plan compilation**: Deterministic topological ordering with cycle detection and subsetting
//! - **Artifact storage**: `{prefix}/storage/{run_id}/...` keys over memory, filesystem or HTTP backends
//! - **Serialization**: Per-type strategies plus backend-specific storage plugins
//! - **Reconstruction**: Serializable pointers resolved once per instance
//! - **Execution**: Concurrent step execution with re-execution from a parent run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dagflow::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("numbers")
//!     .task(load_task())
//!     .task(sum_task())
//!     .depends_on("sum", "rows", "load", "result")
//!     .build()?;
//!
//! let plan = compile(&pipeline, None)?;
//! let store = IntermediateStore::new(make_new_run_id(), Arc::new(InMemoryObjectStore::new()));
//! let result = PlanExecutor::new(Arc::new(pipeline), store).execute(&plan).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod definition;
pub mod errors;
pub mod observability;
pub mod plan;
pub mod reconstruct;
pub mod serialization;
pub mod storage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, LogFormat, LoggingConfig, StorageConfig};
    pub use crate::context::{make_new_run_id, ExecutionContext, RunConfig, RunIdentity};
    pub use crate::definition::{
        Compute, InputSpec, OutputSpec, PipelineBuilder, PipelineDefinition,
        RepositoryDefinition, RuntimeType, TaskDefinition, TaskInputs, TaskOutputs,
        DEFAULT_OUTPUT,
    };
    pub use crate::errors::{
        CyclicDependencyError, DagflowError, DefinitionError, ExecutionError,
        InvalidSubsetError, ReconstructionError, SerializationError, StorageError,
    };
    pub use crate::plan::{
        compile, ExecutionPlan, PlanExecutionResult, PlanExecutor, ReexecutionOptions,
        StepOutputHandle, StepStatus,
    };
    pub use crate::reconstruct::{
        reconstructable, CodeLoader, CodePointer, EntryPoint, EntryPointRegistry,
        ReconstructablePipeline, ReconstructableRepository, Target,
    };
    pub use crate::serialization::{SerializationStrategy, TypeStoragePluginRegistry};
    pub use crate::storage::{
        BackendKind, FilesystemObjectStore, InMemoryObjectStore, IntermediateStore,
        IntermediatesManager, ObjectStore,
    };
}
