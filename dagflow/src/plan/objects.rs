//! Execution plan objects.

use crate::errors::{DagflowError, InvalidOutputError, InvalidStepError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const STEP_KEY_SUFFIX: &str = ".compute";

/// Returns the step key of a task: `{task_name}.compute`.
#[must_use]
pub fn step_key_for_task(task_name: &str) -> String {
    format!("{task_name}{STEP_KEY_SUFFIX}")
}

/// Address of one step output within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepOutputHandle {
    /// Owning step.
    pub step_key: String,
    /// Output name.
    pub output_name: String,
}

impl StepOutputHandle {
    /// Creates a handle.
    #[must_use]
    pub fn new(step_key: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            output_name: output_name.into(),
        }
    }
}

impl fmt::Display for StepOutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.step_key, self.output_name)
    }
}

/// Where a step input value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepInputSource {
    /// The output of another step.
    StepOutput {
        /// The upstream output.
        handle: StepOutputHandle,
    },
    /// Run configuration or the input default.
    External,
}

/// A bound step input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInput {
    /// Input name.
    pub name: String,
    /// Declared type name.
    pub type_name: String,
    /// Value source.
    pub source: StepInputSource,
}

impl StepInput {
    /// Returns the upstream handle, if the input is wired to a step output.
    #[must_use]
    pub fn upstream_handle(&self) -> Option<&StepOutputHandle> {
        match &self.source {
            StepInputSource::StepOutput { handle } => Some(handle),
            StepInputSource::External => None,
        }
    }
}

/// A declared step output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Output name.
    pub name: String,
    /// Declared type name.
    pub type_name: String,
}

/// One compiled unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Unique key, `{task_name}.compute`.
    pub key: String,
    /// Task this step runs.
    pub task_name: String,
    /// Inputs in declaration order.
    pub inputs: Vec<StepInput>,
    /// Outputs in declaration order.
    pub outputs: Vec<StepOutput>,
}

impl ExecutionStep {
    /// Looks up an output.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&StepOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Handles of every output of this step.
    pub fn output_handles(&self) -> impl Iterator<Item = StepOutputHandle> + '_ {
        self.outputs
            .iter()
            .map(|o| StepOutputHandle::new(&self.key, &o.name))
    }

    /// Keys of the steps this step reads from, deduplicated.
    #[must_use]
    pub fn upstream_step_keys(&self) -> BTreeSet<&str> {
        self.inputs
            .iter()
            .filter_map(StepInput::upstream_handle)
            .map(|h| h.step_key.as_str())
            .collect()
    }
}

/// An ordered set of steps, topologically sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pipeline_name: String,
    steps: IndexMap<String, ExecutionStep>,
}

impl ExecutionPlan {
    pub(crate) fn new(pipeline_name: impl Into<String>, steps: Vec<ExecutionStep>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            steps: steps.into_iter().map(|s| (s.key.clone(), s)).collect(),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// Iterates steps in execution order.
    pub fn steps(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.steps.values()
    }

    /// Step keys in execution order.
    #[must_use]
    pub fn step_keys(&self) -> Vec<&str> {
        self.steps.keys().map(String::as_str).collect()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns true if the plan contains the step.
    #[must_use]
    pub fn has_step(&self, key: &str) -> bool {
        self.steps.contains_key(key)
    }

    /// Looks up a step.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStepError`] if the key is not in the plan.
    pub fn get_step_by_key(&self, key: &str) -> Result<&ExecutionStep, InvalidStepError> {
        self.steps
            .get(key)
            .ok_or_else(|| InvalidStepError::new(&self.pipeline_name, key))
    }

    /// Restricts the plan to the given steps, keeping plan order.
    ///
    /// Inputs of kept steps still point at their original upstream handles,
    /// which may now lie outside the plan.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStepError`] for the first key not in the plan.
    pub fn build_subset_plan(&self, step_keys: &[&str]) -> Result<Self, InvalidStepError> {
        for key in step_keys {
            self.get_step_by_key(key)?;
        }
        let wanted: BTreeSet<&str> = step_keys.iter().copied().collect();
        let steps = self
            .steps
            .values()
            .filter(|s| wanted.contains(s.key.as_str()))
            .cloned()
            .collect();
        Ok(Self::new(&self.pipeline_name, steps))
    }

    /// Restricts the plan to the steps owning the given outputs.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStepError`] for an unknown step key and
    /// [`InvalidOutputError`] for an output the step does not produce.
    pub fn build_subset_plan_for_outputs(
        &self,
        handles: &[StepOutputHandle],
    ) -> Result<Self, DagflowError> {
        let mut keys: Vec<&str> = Vec::new();
        for handle in handles {
            let step = self.get_step_by_key(&handle.step_key)?;
            if step.output(&handle.output_name).is_none() {
                return Err(InvalidOutputError::new(&handle.step_key, &handle.output_name).into());
            }
            if !keys.contains(&step.key.as_str()) {
                keys.push(step.key.as_str());
            }
        }
        Ok(self.build_subset_plan(&keys)?)
    }

    /// Handles read by plan steps but produced outside the plan.
    #[must_use]
    pub fn external_step_inputs(&self) -> Vec<StepOutputHandle> {
        let mut handles: Vec<StepOutputHandle> = Vec::new();
        for step in self.steps.values() {
            for handle in step.inputs.iter().filter_map(StepInput::upstream_handle) {
                if !self.has_step(&handle.step_key) && !handles.contains(handle) {
                    handles.push(handle.clone());
                }
            }
        }
        handles
    }
}
