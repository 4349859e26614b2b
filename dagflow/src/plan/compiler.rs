//! Compiles a pipeline definition into an execution plan.

use super::objects::{
    step_key_for_task, ExecutionPlan, ExecutionStep, StepInput, StepInputSource, StepOutput,
    StepOutputHandle,
};
use crate::definition::{validate_selection, PipelineDefinition, TaskDefinition};
use crate::errors::{CyclicDependencyError, DagflowError};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Compiles `pipeline`, optionally restricted to `selected_task_names`.
///
/// Steps are topologically sorted; independent steps keep declaration order,
/// so compiling the same pipeline always yields the same plan. A selection is
/// never widened: every task a selected task reads from must be selected too.
///
/// # Errors
///
/// Returns [`DagflowError::InvalidSubset`] for unknown or open selections and
/// [`DagflowError::CyclicDependency`] if the wiring contains a cycle.
pub fn compile(
    pipeline: &PipelineDefinition,
    selected_task_names: Option<&[&str]>,
) -> Result<ExecutionPlan, DagflowError> {
    let selected: Option<BTreeSet<&str>> = match selected_task_names {
        Some(names) => Some(validate_selection(pipeline, names)?),
        None => None,
    };
    let tasks: Vec<&TaskDefinition> = pipeline
        .tasks()
        .filter(|t| selected.as_ref().map_or(true, |s| s.contains(t.name())))
        .collect();

    let graph = TaskGraph::new(pipeline, &tasks);
    if let Some(cycle) = graph.find_cycle() {
        return Err(CyclicDependencyError::new(pipeline.name(), cycle).into());
    }
    let order = graph.topological_order();

    let steps: Vec<ExecutionStep> = order
        .into_iter()
        .map(|index| build_step(pipeline, tasks[index]))
        .collect();

    debug!(
        pipeline = pipeline.name(),
        steps = steps.len(),
        subset = selected_task_names.is_some(),
        "Compiled execution plan"
    );
    Ok(ExecutionPlan::new(pipeline.name(), steps))
}

fn build_step(pipeline: &PipelineDefinition, task: &TaskDefinition) -> ExecutionStep {
    let inputs = task
        .inputs()
        .iter()
        .map(|input| {
            let source = match pipeline.dependency(task.name(), &input.name) {
                Some(dep) => StepInputSource::StepOutput {
                    handle: StepOutputHandle::new(step_key_for_task(&dep.task), &dep.output),
                },
                None => StepInputSource::External,
            };
            StepInput {
                name: input.name.clone(),
                type_name: input.runtime_type.name().to_string(),
                source,
            }
        })
        .collect();
    let outputs = task
        .outputs()
        .iter()
        .map(|output| StepOutput {
            name: output.name.clone(),
            type_name: output.runtime_type.name().to_string(),
        })
        .collect();

    ExecutionStep {
        key: step_key_for_task(task.name()),
        task_name: task.name().to_string(),
        inputs,
        outputs,
    }
}

/// Task dependency graph over positions in declaration order.
struct TaskGraph<'a> {
    names: Vec<&'a str>,
    /// node -> nodes it reads from
    upstream: Vec<Vec<usize>>,
}

impl<'a> TaskGraph<'a> {
    fn new(pipeline: &'a PipelineDefinition, tasks: &[&'a TaskDefinition]) -> Self {
        let names: Vec<&'a str> = tasks.iter().map(|t| t.name()).collect();
        let position: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let upstream = names
            .iter()
            .map(|name| {
                pipeline
                    .upstream_tasks(name)
                    .into_iter()
                    .filter_map(|dep| position.get(dep).copied())
                    .collect()
            })
            .collect();
        Self { names, upstream }
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in 0..self.names.len() {
            if !visited.contains(&node) {
                if let Some(cycle) = self.dfs_cycle(node, &mut visited, &mut rec_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: usize,
        visited: &mut HashSet<usize>,
        rec_stack: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        for &dep in &self.upstream[node] {
            if !visited.contains(&dep) {
                if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(&dep) {
                let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|n| self.names[*n].to_string()).collect();
                cycle.push(self.names[dep].to_string());
                return Some(cycle);
            }
        }

        path.pop();
        rec_stack.remove(&node);
        None
    }

    /// Kahn's algorithm, always taking the earliest declared ready node.
    fn topological_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.upstream.iter().map(Vec::len).collect();
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.names.len()];
        for (node, deps) in self.upstream.iter().enumerate() {
            for &dep in deps {
                downstream[dep].push(node);
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.names.len()).filter(|n| remaining[*n] == 0).collect();
        let mut order = Vec::with_capacity(self.names.len());
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &next in &downstream[node] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.insert(next);
                }
            }
        }
        order
    }
}
