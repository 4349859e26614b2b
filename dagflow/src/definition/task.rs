//! Task definitions and compute functions.
//!
//! Tasks are the units of computation in a pipeline. Each task declares typed
//! inputs and outputs and a compute function mapping input values to output
//! values.

use super::RuntimeType;
use crate::context::ExecutionContext;
use anyhow::anyhow;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Name of the output a single-output task yields.
pub const DEFAULT_OUTPUT: &str = "result";

/// A named, typed task input.
#[derive(Debug, Clone)]
pub struct InputSpec {
    /// Input name, unique within the task.
    pub name: String,
    /// Declared type.
    pub runtime_type: RuntimeType,
    /// Value used when the input is neither wired nor configured.
    pub default_value: Option<Value>,
    /// Optional description.
    pub description: Option<String>,
}

impl InputSpec {
    /// Creates an input specification.
    #[must_use]
    pub fn new(name: impl Into<String>, runtime_type: RuntimeType) -> Self {
        Self {
            name: name.into(),
            runtime_type,
            default_value: None,
            description: None,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named, typed task output.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    /// Output name, unique within the task.
    pub name: String,
    /// Declared type.
    pub runtime_type: RuntimeType,
}

impl OutputSpec {
    /// Creates an output specification.
    #[must_use]
    pub fn new(name: impl Into<String>, runtime_type: RuntimeType) -> Self {
        Self {
            name: name.into(),
            runtime_type,
        }
    }

    /// Creates the default `result` output.
    #[must_use]
    pub fn result(runtime_type: RuntimeType) -> Self {
        Self::new(DEFAULT_OUTPUT, runtime_type)
    }
}

/// Input values handed to a compute function, keyed by input name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskInputs {
    values: IndexMap<String, Value>,
}

impl TaskInputs {
    /// Creates an empty input set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Returns a value, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Returns a value or an error naming the missing input.
    pub fn required(&self, name: &str) -> anyhow::Result<&Value> {
        self.values
            .get(name)
            .ok_or_else(|| anyhow!("input '{name}' was not provided"))
    }

    /// Number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when there are no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for TaskInputs {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Output values yielded by a compute function, keyed by output name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutputs {
    values: IndexMap<String, Value>,
}

impl TaskOutputs {
    /// Creates an empty output set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an output set holding only the default `result` output.
    #[must_use]
    pub fn result(value: Value) -> Self {
        Self::new().with(DEFAULT_OUTPUT, value)
    }

    /// Adds an output value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Removes and returns an output value.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.values.shift_remove(name)
    }

    /// Iterates output names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// The compute function of a task.
#[async_trait]
pub trait Compute: Send + Sync + Debug {
    /// Maps input values to output values.
    async fn compute(
        &self,
        ctx: &ExecutionContext,
        inputs: &TaskInputs,
    ) -> anyhow::Result<TaskOutputs>;
}

/// A compute function backed by a synchronous closure.
pub struct FnCompute<F>
where
    F: Fn(&ExecutionContext, &TaskInputs) -> anyhow::Result<TaskOutputs> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnCompute<F>
where
    F: Fn(&ExecutionContext, &TaskInputs) -> anyhow::Result<TaskOutputs> + Send + Sync,
{
    /// Creates a new closure-backed compute function.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnCompute<F>
where
    F: Fn(&ExecutionContext, &TaskInputs) -> anyhow::Result<TaskOutputs> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCompute").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Compute for FnCompute<F>
where
    F: Fn(&ExecutionContext, &TaskInputs) -> anyhow::Result<TaskOutputs> + Send + Sync,
{
    async fn compute(
        &self,
        ctx: &ExecutionContext,
        inputs: &TaskInputs,
    ) -> anyhow::Result<TaskOutputs> {
        (self.func)(ctx, inputs)
    }
}

/// A task declaration: name, typed inputs and outputs, and compute function.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    name: String,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
    compute: Arc<dyn Compute>,
    description: Option<String>,
}

impl TaskDefinition {
    /// Creates a task with no inputs or outputs.
    #[must_use]
    pub fn new(name: impl Into<String>, compute: Arc<dyn Compute>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            compute,
            description: None,
        }
    }

    /// Creates a task whose compute function is a synchronous closure.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ExecutionContext, &TaskInputs) -> anyhow::Result<TaskOutputs>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let compute = Arc::new(FnCompute::new(name.clone(), func));
        Self::new(name, compute)
    }

    /// Appends an input.
    #[must_use]
    pub fn with_input(mut self, input: InputSpec) -> Self {
        self.inputs.push(input);
        self
    }

    /// Appends an output.
    #[must_use]
    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared inputs in order.
    #[must_use]
    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    /// Returns the declared outputs in order.
    #[must_use]
    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    /// Looks up an input by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Looks up an output by name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Returns the compute function.
    #[must_use]
    pub fn compute(&self) -> &Arc<dyn Compute> {
        &self.compute
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}
