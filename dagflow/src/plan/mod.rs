//! Execution plans: compilation, subsetting and execution.

mod compiler;
mod executor;
mod objects;

pub use compiler::compile;
pub use executor::{
    PlanExecutionResult, PlanExecutor, ReexecutionOptions, StepOutcome, StepStatus,
};
pub use objects::{
    step_key_for_task, ExecutionPlan, ExecutionStep, StepInput, StepInputSource, StepOutput,
    StepOutputHandle,
};
