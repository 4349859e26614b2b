//! Pipeline definitions and the validating pipeline builder.

use super::task::TaskDefinition;
use crate::errors::{ContractErrorInfo, DefinitionError, InvalidSubsetError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// The upstream output a task input is wired to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyDefinition {
    /// Source task name.
    pub task: String,
    /// Source output name.
    pub output: String,
}

impl DependencyDefinition {
    /// Creates a dependency on `task`'s `output`.
    #[must_use]
    pub fn new(task: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            output: output.into(),
        }
    }
}

/// A named DAG of tasks plus their dependency wiring.
///
/// Tasks keep their declaration order, which the plan compiler uses to break
/// ties between independent tasks.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: String,
    description: Option<String>,
    tasks: IndexMap<String, TaskDefinition>,
    /// task name -> input name -> source
    dependencies: IndexMap<String, IndexMap<String, DependencyDefinition>>,
    selection: Option<BTreeSet<String>>,
}

impl PipelineDefinition {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Iterates tasks in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.tasks.values()
    }

    /// Iterates task names in declaration order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Looks up a task.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    /// Returns true if the pipeline contains the task.
    #[must_use]
    pub fn has_task(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Returns the declaration index of a task.
    #[must_use]
    pub fn task_index(&self, name: &str) -> Option<usize> {
        self.tasks.get_index_of(name)
    }

    /// Number of tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Returns the source wired to a task input, if any.
    #[must_use]
    pub fn dependency(&self, task: &str, input: &str) -> Option<&DependencyDefinition> {
        self.dependencies.get(task).and_then(|deps| deps.get(input))
    }

    /// Iterates `(input name, source)` pairs of a task.
    pub fn dependencies_of<'a>(
        &'a self,
        task: &str,
    ) -> impl Iterator<Item = (&'a str, &'a DependencyDefinition)> + 'a {
        self.dependencies
            .get(task)
            .into_iter()
            .flat_map(|deps| deps.iter().map(|(input, dep)| (input.as_str(), dep)))
    }

    /// Names of the tasks the given task reads from, deduplicated.
    #[must_use]
    pub fn upstream_tasks(&self, task: &str) -> BTreeSet<&str> {
        self.dependencies_of(task).map(|(_, dep)| dep.task.as_str()).collect()
    }

    /// The task names this definition was restricted to, if it is a subset.
    #[must_use]
    pub fn selected_task_names(&self) -> Option<&BTreeSet<String>> {
        self.selection.as_ref()
    }

    /// Restricts the pipeline to the named tasks.
    ///
    /// `None` returns the full pipeline. A selection must name known tasks
    /// and must contain every task a selected task reads from.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSubsetError`] for unknown names or an open selection.
    pub fn subset_for_execution(&self, names: Option<&[&str]>) -> Result<Self, InvalidSubsetError> {
        let Some(names) = names else {
            return Ok(self.clone());
        };
        let selected = validate_selection(self, names)?;

        let tasks = self
            .tasks
            .iter()
            .filter(|(name, _)| selected.contains(name.as_str()))
            .map(|(name, task)| (name.clone(), task.clone()))
            .collect();
        let dependencies = self
            .dependencies
            .iter()
            .filter(|(name, _)| selected.contains(name.as_str()))
            .map(|(name, deps)| (name.clone(), deps.clone()))
            .collect();

        Ok(Self {
            name: self.name.clone(),
            description: self.description.clone(),
            tasks,
            dependencies,
            selection: Some(selected.into_iter().map(str::to_string).collect()),
        })
    }
}

/// Checks that `names` are known tasks whose upstream tasks are all selected.
///
/// Returns the selected names as a set.
pub(crate) fn validate_selection<'a>(
    pipeline: &PipelineDefinition,
    names: &[&'a str],
) -> Result<BTreeSet<&'a str>, InvalidSubsetError> {
    let mut unknown = Vec::new();
    for name in names {
        if !pipeline.has_task(name) && !unknown.iter().any(|u: &String| u == name) {
            unknown.push((*name).to_string());
        }
    }
    if !unknown.is_empty() {
        return Err(InvalidSubsetError::unknown_tasks(pipeline.name(), unknown));
    }

    let selected: BTreeSet<&str> = names.iter().copied().collect();
    for task in pipeline.tasks() {
        if !selected.contains(task.name()) {
            continue;
        }
        for input in task.inputs() {
            if let Some(dep) = pipeline.dependency(task.name(), &input.name) {
                if !selected.contains(dep.task.as_str()) {
                    return Err(InvalidSubsetError::not_closed(
                        pipeline.name(),
                        task.name(),
                        &input.name,
                        &dep.task,
                    ));
                }
            }
        }
    }
    Ok(selected)
}

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    description: Option<String>,
    tasks: Vec<TaskDefinition>,
    dependencies: Vec<(String, String, DependencyDefinition)>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            tasks: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a task.
    #[must_use]
    pub fn task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    /// Wires `task.input` to `source_task.source_output`.
    #[must_use]
    pub fn depends_on(
        mut self,
        task: impl Into<String>,
        input: impl Into<String>,
        source_task: impl Into<String>,
        source_output: impl Into<String>,
    ) -> Self {
        self.dependencies.push((
            task.into(),
            input.into(),
            DependencyDefinition::new(source_task, source_output),
        ));
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of tasks added so far.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Builds the pipeline.
    ///
    /// Cycles are reported by the plan compiler, not here.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] for an empty name or pipeline, duplicate
    /// task names, duplicate input or output names within a task, an input
    /// wired more than once, or a dependency that references an unknown
    /// task, input or output.
    pub fn build(self) -> Result<PipelineDefinition, DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::new("Pipeline name must not be empty").with_error_info(
                ContractErrorInfo::new("DAGFLOW-DEF-EMPTY_NAME", "Unnamed pipeline")
                    .with_fix_hint("Give the pipeline a stable, non-empty name."),
            ));
        }
        if self.tasks.is_empty() {
            return Err(DefinitionError::new(format!("Pipeline '{}' has no tasks", self.name))
                .with_error_info(
                    ContractErrorInfo::new("DAGFLOW-DEF-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Add at least one task to the pipeline before building."),
                ));
        }

        let mut tasks: IndexMap<String, TaskDefinition> = IndexMap::new();
        for task in self.tasks {
            if tasks.contains_key(task.name()) {
                return Err(DefinitionError::duplicate_task(&self.name, task.name()));
            }
            check_unique_names(&self.name, &task)?;
            tasks.insert(task.name().to_string(), task);
        }

        let mut dependencies: IndexMap<String, IndexMap<String, DependencyDefinition>> =
            IndexMap::new();
        for (task_name, input, dep) in self.dependencies {
            let Some(task) = tasks.get(&task_name) else {
                return Err(DefinitionError::unknown_task(&self.name, &task_name, &task_name));
            };
            if task.input(&input).is_none() {
                return Err(DefinitionError::unknown_input(&self.name, &task_name, &input));
            }
            let Some(source) = tasks.get(&dep.task) else {
                return Err(DefinitionError::unknown_task(&self.name, &dep.task, &task_name));
            };
            if source.output(&dep.output).is_none() {
                return Err(DefinitionError::unknown_output(&self.name, &dep.task, &dep.output));
            }
            let inputs = dependencies.entry(task_name).or_default();
            if inputs.contains_key(&input) {
                return Err(DefinitionError::duplicate_input(&self.name, task.name(), &input));
            }
            inputs.insert(input, dep);
        }

        Ok(PipelineDefinition {
            name: self.name,
            description: self.description,
            tasks,
            dependencies,
            selection: None,
        })
    }
}

fn check_unique_names(pipeline: &str, task: &TaskDefinition) -> Result<(), DefinitionError> {
    let mut seen = HashSet::new();
    for input in task.inputs() {
        if !seen.insert(input.name.as_str()) {
            return Err(DefinitionError::new(format!(
                "Pipeline '{pipeline}': task '{}' declares input '{}' more than once",
                task.name(),
                input.name
            ))
            .with_names(vec![task.name().to_string()]));
        }
    }
    seen.clear();
    for output in task.outputs() {
        if !seen.insert(output.name.as_str()) {
            return Err(DefinitionError::new(format!(
                "Pipeline '{pipeline}': task '{}' declares output '{}' more than once",
                task.name(),
                output.name
            ))
            .with_names(vec![task.name().to_string()]));
        }
    }
    Ok(())
}
