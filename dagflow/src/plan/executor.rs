//! Runs an execution plan against a run's artifact store.
//!
//! Steps start as soon as their in-plan upstream steps have succeeded. Steps
//! exchange values only through the store.

use super::compiler::compile;
use super::objects::{ExecutionPlan, ExecutionStep, StepOutputHandle};
use crate::context::{ExecutionContext, RunConfig, RunIdentity};
use crate::definition::{PipelineDefinition, TaskInputs};
use crate::errors::{DagflowError, ExecutionError};
use crate::storage::{IntermediateStore, IntermediatesManager};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Final state of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// All outputs were stored.
    Success,
    /// The step failed.
    Failure,
    /// An upstream step failed, so the step never ran.
    Skipped,
}

/// What happened to one step.
#[derive(Debug)]
pub struct StepOutcome {
    /// The step key.
    pub step_key: String,
    /// Final state.
    pub status: StepStatus,
    /// Stored outputs, for successful steps.
    pub outputs: Vec<StepOutputHandle>,
    /// The failure, for failed steps.
    pub error: Option<DagflowError>,
    /// Wall time in milliseconds; zero for skipped steps.
    pub duration_ms: f64,
}

impl StepOutcome {
    fn skipped(step_key: &str) -> Self {
        Self {
            step_key: step_key.to_string(),
            status: StepStatus::Skipped,
            outputs: Vec::new(),
            error: None,
            duration_ms: 0.0,
        }
    }
}

/// Result of executing a plan.
#[derive(Debug)]
pub struct PlanExecutionResult {
    /// The run the plan executed in.
    pub run_id: String,
    /// Outcomes in plan order.
    pub outcomes: Vec<StepOutcome>,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
}

impl PlanExecutionResult {
    /// True when every step succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == StepStatus::Success)
    }

    /// Looks up the outcome of a step.
    #[must_use]
    pub fn outcome(&self, step_key: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.step_key == step_key)
    }

    /// Keys of steps with the given status.
    #[must_use]
    pub fn step_keys_with_status(&self, status: StepStatus) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == status)
            .map(|o| o.step_key.as_str())
            .collect()
    }
}

/// Re-execute selected steps, reusing a parent run's other outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReexecutionOptions {
    /// The run whose outputs are reused.
    pub parent_run_id: String,
    /// Steps to execute again.
    pub step_keys: Vec<String>,
}

impl ReexecutionOptions {
    /// Creates re-execution options.
    #[must_use]
    pub fn new(parent_run_id: impl Into<String>, step_keys: Vec<String>) -> Self {
        Self {
            parent_run_id: parent_run_id.into(),
            step_keys,
        }
    }
}

/// Executes plans of one pipeline within one run.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    pipeline: Arc<PipelineDefinition>,
    intermediates: IntermediatesManager,
    run_config: Arc<RunConfig>,
}

type StepResult = (String, Result<Vec<StepOutputHandle>, DagflowError>, f64);

impl PlanExecutor {
    /// Creates an executor writing to `store`.
    #[must_use]
    pub fn new(pipeline: Arc<PipelineDefinition>, store: IntermediateStore) -> Self {
        Self {
            pipeline,
            intermediates: IntermediatesManager::new(store),
            run_config: Arc::new(RunConfig::default()),
        }
    }

    /// Sets the configuration for external inputs.
    #[must_use]
    pub fn with_run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = Arc::new(run_config);
        self
    }

    /// Returns the intermediates manager of the run.
    #[must_use]
    pub fn intermediates(&self) -> &IntermediatesManager {
        &self.intermediates
    }

    fn run_context(&self, parent_run_id: Option<&str>) -> ExecutionContext {
        let mut run = RunIdentity::with_run_id(self.intermediates.store().run_id())
            .with_pipeline_name(self.pipeline.name());
        if let Some(parent) = parent_run_id {
            run = run.with_parent_run_id(parent);
        }
        ExecutionContext::new(run)
    }

    /// Executes `plan`.
    ///
    /// A failing step does not stop independent branches; its downstream
    /// steps are skipped. Step failures are reported in the result.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::UnknownTask`] if the plan names a task the
    /// pipeline lacks, and [`ExecutionError::Join`] if a step task panics.
    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<PlanExecutionResult, DagflowError> {
        self.execute_in_context(plan, self.run_context(None)).await
    }

    /// Re-executes the selected steps of the full plan.
    ///
    /// Outputs the selected steps read from unselected steps are first copied
    /// from the parent run.
    ///
    /// # Errors
    ///
    /// Fails on an unknown step key, on a parent output that cannot be
    /// copied, and as [`PlanExecutor::execute`] does.
    pub async fn reexecute(
        &self,
        options: &ReexecutionOptions,
    ) -> Result<PlanExecutionResult, DagflowError> {
        let full_plan = compile(&self.pipeline, None)?;
        let keys: Vec<&str> = options.step_keys.iter().map(String::as_str).collect();
        let plan = full_plan.build_subset_plan(&keys)?;
        let ctx = self.run_context(Some(&options.parent_run_id));

        for handle in plan.external_step_inputs() {
            self.intermediates
                .copy_intermediate_from_run(&ctx, &options.parent_run_id, &handle)
                .await?;
        }
        info!(
            run_id = ctx.run_id(),
            parent_run_id = %options.parent_run_id,
            steps = plan.len(),
            "Re-executing steps from parent run"
        );
        self.execute_in_context(&plan, ctx).await
    }

    async fn execute_in_context(
        &self,
        plan: &ExecutionPlan,
        ctx: ExecutionContext,
    ) -> Result<PlanExecutionResult, DagflowError> {
        let start = Instant::now();
        for step in plan.steps() {
            if !self.pipeline.has_task(&step.task_name) {
                return Err(ExecutionError::UnknownTask {
                    step_key: step.key.clone(),
                    task_name: step.task_name.clone(),
                    pipeline: self.pipeline.name().to_string(),
                }
                .into());
            }
        }

        let mut remaining: HashMap<&str, usize> = HashMap::new();
        let mut downstream: HashMap<&str, Vec<&ExecutionStep>> = HashMap::new();
        for step in plan.steps() {
            let upstream: Vec<&str> = step
                .upstream_step_keys()
                .into_iter()
                .filter(|key| plan.has_step(key))
                .collect();
            remaining.insert(step.key.as_str(), upstream.len());
            for key in upstream {
                downstream.entry(key).or_default().push(step);
            }
        }

        let mut outcomes: HashMap<String, StepOutcome> = HashMap::new();
        let mut active = FuturesUnordered::new();
        for step in plan.steps().filter(|s| remaining[s.key.as_str()] == 0) {
            active.push(self.spawn_step(step.clone(), &ctx));
        }

        while let Some((step_key, result, duration_ms)) = active.next().await {
            match result {
                Ok(outputs) => {
                    for next in downstream.get(step_key.as_str()).into_iter().flatten() {
                        if let Some(count) = remaining.get_mut(next.key.as_str()) {
                            *count = count.saturating_sub(1);
                            if *count == 0 {
                                active.push(self.spawn_step((*next).clone(), &ctx));
                            }
                        }
                    }
                    outcomes.insert(
                        step_key.clone(),
                        StepOutcome {
                            step_key,
                            status: StepStatus::Success,
                            outputs,
                            error: None,
                            duration_ms,
                        },
                    );
                }
                Err(error) => {
                    warn!(step_key = %step_key, error = %error, "Step failed");
                    for skipped in transitive_downstream(&downstream, &step_key) {
                        info!(step_key = skipped, upstream = %step_key, "Skipping step after upstream failure");
                        outcomes.insert(skipped.to_string(), StepOutcome::skipped(skipped));
                    }
                    outcomes.insert(
                        step_key.clone(),
                        StepOutcome {
                            step_key,
                            status: StepStatus::Failure,
                            outputs: Vec::new(),
                            error: Some(error),
                            duration_ms,
                        },
                    );
                }
            }
        }

        let ordered = plan
            .steps()
            .filter_map(|step| outcomes.remove(&step.key))
            .collect();
        let result = PlanExecutionResult {
            run_id: ctx.run_id().to_string(),
            outcomes: ordered,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            run_id = %result.run_id,
            pipeline = plan.pipeline_name(),
            success = result.success(),
            duration_ms = result.duration_ms,
            "Plan execution finished"
        );
        Ok(result)
    }

    /// Spawns `step`. A task that panics or is cancelled resolves to a
    /// failure of that step.
    fn spawn_step(
        &self,
        step: ExecutionStep,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = StepResult> {
        let pipeline = self.pipeline.clone();
        let intermediates = self.intermediates.clone();
        let run_config = self.run_config.clone();
        let ctx = ctx.for_step(&step.key);
        let step_key = step.key.clone();
        let spawned_at = Instant::now();

        let handle = tokio::spawn(async move {
            info!(step_key = %step.key, run_id = ctx.run_id(), "Step started");
            let start = Instant::now();
            let result = run_step(&pipeline, &step, &intermediates, &run_config, &ctx).await;
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
            if result.is_ok() {
                info!(step_key = %step.key, duration_ms, "Step finished");
            }
            (step.key, result, duration_ms)
        });
        handle.map(move |joined| {
            joined.unwrap_or_else(|e| {
                let error = ExecutionError::Join {
                    step_key: step_key.clone(),
                    message: e.to_string(),
                };
                let duration_ms = spawned_at.elapsed().as_secs_f64() * 1000.0;
                (step_key, Err(error.into()), duration_ms)
            })
        })
    }
}

fn transitive_downstream<'a>(
    downstream: &HashMap<&'a str, Vec<&'a ExecutionStep>>,
    failed: &str,
) -> Vec<&'a str> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut order = Vec::new();
    let mut pending: Vec<&str> = downstream
        .get(failed)
        .into_iter()
        .flatten()
        .map(|s| s.key.as_str())
        .collect();
    while let Some(key) = pending.pop() {
        if !seen.insert(key) {
            continue;
        }
        order.push(key);
        if let Some(children) = downstream.get(key) {
            pending.extend(children.iter().map(|s| s.key.as_str()));
        }
    }
    order
}

async fn run_step(
    pipeline: &PipelineDefinition,
    step: &ExecutionStep,
    intermediates: &IntermediatesManager,
    run_config: &RunConfig,
    ctx: &ExecutionContext,
) -> Result<Vec<StepOutputHandle>, DagflowError> {
    let task = pipeline
        .task(&step.task_name)
        .ok_or_else(|| ExecutionError::UnknownTask {
            step_key: step.key.clone(),
            task_name: step.task_name.clone(),
            pipeline: pipeline.name().to_string(),
        })?;

    let mut inputs = TaskInputs::new();
    for declared in task.inputs() {
        let upstream = step
            .inputs
            .iter()
            .find(|i| i.name == declared.name)
            .and_then(|i| i.upstream_handle());
        let value = match upstream {
            Some(handle) => {
                intermediates
                    .get_intermediate(ctx, &declared.runtime_type, handle)
                    .await?
                    .obj
            }
            None => {
                let value = run_config
                    .input(task.name(), &declared.name)
                    .or(declared.default_value.as_ref())
                    .cloned()
                    .ok_or_else(|| ExecutionError::MissingInput {
                        step_key: step.key.clone(),
                        input_name: declared.name.clone(),
                    })?;
                declared.runtime_type
                    .type_check(&value)
                    .map_err(|reason| ExecutionError::TypeCheck {
                        step_key: step.key.clone(),
                        name: declared.name.clone(),
                        type_name: declared.runtime_type.name().to_string(),
                        reason,
                    })?;
                value
            }
        };
        inputs.insert(declared.name.clone(), value);
    }

    let mut yielded = task
        .compute()
        .compute(ctx, &inputs)
        .await
        .map_err(|source| ExecutionError::Compute {
            step_key: step.key.clone(),
            source,
        })?;

    let mut values = Vec::with_capacity(task.outputs().len());
    for output in task.outputs() {
        let value = yielded
            .take(&output.name)
            .ok_or_else(|| ExecutionError::MissingOutput {
                step_key: step.key.clone(),
                output_name: output.name.clone(),
            })?;
        output
            .runtime_type
            .type_check(&value)
            .map_err(|reason| ExecutionError::TypeCheck {
                step_key: step.key.clone(),
                name: output.name.clone(),
                type_name: output.runtime_type.name().to_string(),
                reason,
            })?;
        values.push((output, value));
    }
    if let Some(extra) = yielded.names().next() {
        return Err(ExecutionError::UnexpectedOutput {
            step_key: step.key.clone(),
            output_name: extra.to_string(),
        }
        .into());
    }

    let mut handles = Vec::with_capacity(values.len());
    for (output, value) in values {
        let handle = StepOutputHandle::new(&step.key, &output.name);
        intermediates
            .set_intermediate(ctx, &output.runtime_type, &handle, &value)
            .await?;
        handles.push(handle);
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{
        InputSpec, OutputSpec, PipelineBuilder, RuntimeType, TaskDefinition, TaskOutputs,
        DEFAULT_OUTPUT,
    };
    use crate::storage::InMemoryObjectStore;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn add(name: &str, inputs: &[&str]) -> TaskDefinition {
        let names: Vec<String> = inputs.iter().map(|s| (*s).to_string()).collect();
        let mut task = TaskDefinition::from_fn(name, move |_, inputs| {
            let mut total = 1;
            for name in &names {
                total += inputs.required(name)?.as_i64().unwrap_or_default();
            }
            Ok(TaskOutputs::result(json!(total)))
        })
        .with_output(OutputSpec::result(RuntimeType::int()));
        for input in inputs {
            task = task.with_input(InputSpec::new(*input, RuntimeType::int()));
        }
        task
    }

    fn failing(name: &str) -> TaskDefinition {
        TaskDefinition::from_fn(name, |_, _| Err(anyhow!("boom")))
            .with_output(OutputSpec::result(RuntimeType::int()))
    }

    fn store(run_id: &str, backend: &Arc<InMemoryObjectStore>) -> IntermediateStore {
        IntermediateStore::new(run_id, backend.clone())
    }

    fn diamond(b: TaskDefinition) -> Arc<PipelineDefinition> {
        Arc::new(
            PipelineBuilder::new("diamond")
                .task(add("A", &[]))
                .task(b)
                .task(add("C", &["a"]))
                .task(add("D", &["left", "right"]))
                .task(add("E", &[]))
                .depends_on("B", "a", "A", DEFAULT_OUTPUT)
                .depends_on("C", "a", "A", DEFAULT_OUTPUT)
                .depends_on("D", "left", "B", DEFAULT_OUTPUT)
                .depends_on("D", "right", "C", DEFAULT_OUTPUT)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_execute_diamond() {
        let backend = Arc::new(InMemoryObjectStore::new());
        let pipeline = diamond(add("B", &["a"]));
        let plan = compile(&pipeline, None).unwrap();
        let executor = PlanExecutor::new(pipeline, store("run", &backend));

        let result = executor.execute(&plan).await.unwrap();
        assert!(result.success());
        assert_eq!(result.outcomes.len(), 5);

        let ctx = ExecutionContext::for_run_id("run");
        let d = executor
            .intermediates()
            .get_intermediate(&ctx, &RuntimeType::int(), &StepOutputHandle::new("D.compute", DEFAULT_OUTPUT))
            .await
            .unwrap();
        assert_eq!(d.obj, json!(5));
    }

    #[tokio::test]
    async fn test_failure_skips_downstream_only() {
        let backend = Arc::new(InMemoryObjectStore::new());
        let pipeline = diamond(failing("B").with_input(InputSpec::new("a", RuntimeType::int())));
        let plan = compile(&pipeline, None).unwrap();
        let executor = PlanExecutor::new(pipeline, store("run", &backend));

        let result = executor.execute(&plan).await.unwrap();
        assert!(!result.success());
        assert_eq!(result.step_keys_with_status(StepStatus::Failure), vec!["B.compute"]);
        assert_eq!(result.step_keys_with_status(StepStatus::Skipped), vec!["D.compute"]);
        assert_eq!(
            result.step_keys_with_status(StepStatus::Success),
            vec!["A.compute", "C.compute", "E.compute"]
        );

        let failure = result.outcome("B.compute").unwrap();
        assert!(matches!(
            failure.error,
            Some(DagflowError::Execution(ExecutionError::Compute { .. }))
        ));
    }

    #[tokio::test]
    async fn test_panicking_step_fails_only_its_branch() {
        let backend = Arc::new(InMemoryObjectStore::new());
        let panicking = TaskDefinition::from_fn("B", |_, _| -> anyhow::Result<TaskOutputs> {
            panic!("compute blew up")
        })
        .with_input(InputSpec::new("a", RuntimeType::int()))
        .with_output(OutputSpec::result(RuntimeType::int()));
        let pipeline = diamond(panicking);
        let plan = compile(&pipeline, None).unwrap();
        let executor = PlanExecutor::new(pipeline, store("run", &backend));

        let result = executor.execute(&plan).await.unwrap();
        assert_eq!(result.outcomes.len(), 5);
        assert_eq!(result.step_keys_with_status(StepStatus::Failure), vec!["B.compute"]);
        assert_eq!(result.step_keys_with_status(StepStatus::Skipped), vec!["D.compute"]);
        assert_eq!(
            result.step_keys_with_status(StepStatus::Success),
            vec!["A.compute", "C.compute", "E.compute"]
        );
        match &result.outcome("B.compute").unwrap().error {
            Some(DagflowError::Execution(ExecutionError::Join { step_key, .. })) => {
                assert_eq!(step_key, "B.compute");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_external_input_sources() {
        let backend = Arc::new(InMemoryObjectStore::new());
        let pipeline = Arc::new(
            PipelineBuilder::new("external")
                .task(add("configured", &["x"]))
                .task(
                    add("defaulted", &[])
                        .with_input(InputSpec::new("unused", RuntimeType::int()).with_default(json!(1))),
                )
                .task(add("missing", &["y"]))
                .build()
                .unwrap(),
        );
        let plan = compile(&pipeline, None).unwrap();
        let executor = PlanExecutor::new(pipeline, store("run", &backend))
            .with_run_config(RunConfig::new().with_input("configured", "x", json!(41)));

        let result = executor.execute(&plan).await.unwrap();
        assert_eq!(result.outcome("configured.compute").unwrap().status, StepStatus::Success);
        assert_eq!(result.outcome("defaulted.compute").unwrap().status, StepStatus::Success);
        assert!(matches!(
            result.outcome("missing.compute").unwrap().error,
            Some(DagflowError::Execution(ExecutionError::MissingInput { .. }))
        ));
    }

    #[tokio::test]
    async fn test_undeclared_and_missing_outputs_fail() {
        let backend = Arc::new(InMemoryObjectStore::new());
        let pipeline = Arc::new(
            PipelineBuilder::new("outputs")
                .task(
                    TaskDefinition::from_fn("extra", |_, _| {
                        Ok(TaskOutputs::result(json!(1)).with("other", json!(2)))
                    })
                    .with_output(OutputSpec::result(RuntimeType::int())),
                )
                .task(
                    TaskDefinition::from_fn("short", |_, _| Ok(TaskOutputs::new()))
                        .with_output(OutputSpec::result(RuntimeType::int())),
                )
                .task(
                    TaskDefinition::from_fn("wrong", |_, _| Ok(TaskOutputs::result(json!("x"))))
                        .with_output(OutputSpec::result(RuntimeType::int())),
                )
                .build()
                .unwrap(),
        );
        let plan = compile(&pipeline, None).unwrap();
        let result = PlanExecutor::new(pipeline, store("run", &backend))
            .execute(&plan)
            .await
            .unwrap();

        assert!(matches!(
            result.outcome("extra.compute").unwrap().error,
            Some(DagflowError::Execution(ExecutionError::UnexpectedOutput { .. }))
        ));
        assert!(matches!(
            result.outcome("short.compute").unwrap().error,
            Some(DagflowError::Execution(ExecutionError::MissingOutput { .. }))
        ));
        assert!(matches!(
            result.outcome("wrong.compute").unwrap().error,
            Some(DagflowError::Execution(ExecutionError::TypeCheck { .. }))
        ));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_reexecute_copies_parent_outputs() {
        let backend = Arc::new(InMemoryObjectStore::new());
        let pipeline = diamond(add("B", &["a"]));
        let plan = compile(&pipeline, None).unwrap();
        PlanExecutor::new(pipeline.clone(), store("parent", &backend))
            .execute(&plan)
            .await
            .unwrap();

        let child = PlanExecutor::new(pipeline, store("child", &backend));
        let result = child
            .reexecute(&ReexecutionOptions::new("parent", vec!["D.compute".to_string()]))
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.run_id, "child");
        assert_eq!(result.outcomes.len(), 1);

        let ctx = ExecutionContext::for_run_id("child");
        let handle = StepOutputHandle::new("B.compute", DEFAULT_OUTPUT);
        assert!(child.intermediates().has_intermediate(&ctx, &handle).await.unwrap());
        assert!(!child
            .intermediates()
            .has_intermediate(&ctx, &StepOutputHandle::new("E.compute", DEFAULT_OUTPUT))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reexecute_unknown_step() {
        let backend = Arc::new(InMemoryObjectStore::new());
        let executor = PlanExecutor::new(diamond(add("B", &["a"])), store("child", &backend));
        let err = executor
            .reexecute(&ReexecutionOptions::new("parent", vec!["Z.compute".to_string()]))
            .await
            .unwrap_err();
        assert!(matches!(err, DagflowError::InvalidStep(_)));
    }
}
