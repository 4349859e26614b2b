//! Pipeline, task, type and repository declarations.
//!
//! Definitions are built once and are immutable afterwards.

mod pipeline;
mod repository;
mod task;
mod types;

pub use pipeline::{DependencyDefinition, PipelineBuilder, PipelineDefinition};
pub(crate) use pipeline::validate_selection;
pub use repository::{
    PartitionSetDefinition, RepositoryDefinition, ScheduleDefinition, EPHEMERAL_REPOSITORY_NAME,
};
pub use task::{
    Compute, FnCompute, InputSpec, OutputSpec, TaskDefinition, TaskInputs, TaskOutputs,
    DEFAULT_OUTPUT,
};
pub use types::{RuntimeType, TypeKind};
