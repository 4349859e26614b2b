//! Repository definitions: named collections of pipelines.

use super::PipelineDefinition;
use crate::errors::{ContractErrorInfo, DefinitionError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name given to the repository wrapping a lone pipeline.
pub const EPHEMERAL_REPOSITORY_NAME: &str = "<<unnamed>>";

/// A cron schedule attached to a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    /// Schedule name.
    pub name: String,
    /// Cron expression.
    pub cron_schedule: String,
    /// Target pipeline.
    pub pipeline_name: String,
}

impl ScheduleDefinition {
    /// Creates a schedule.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        cron_schedule: impl Into<String>,
        pipeline_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cron_schedule: cron_schedule.into(),
            pipeline_name: pipeline_name.into(),
        }
    }
}

/// A named set of partitions a pipeline can be run over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSetDefinition {
    /// Partition set name.
    pub name: String,
    /// Target pipeline.
    pub pipeline_name: String,
    /// Partition names.
    #[serde(default)]
    pub partitions: Vec<String>,
}

impl PartitionSetDefinition {
    /// Creates a partition set.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pipeline_name: impl Into<String>,
        partitions: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pipeline_name: pipeline_name.into(),
            partitions,
        }
    }
}

/// A named collection of pipelines, schedules and partition sets.
#[derive(Debug, Clone)]
pub struct RepositoryDefinition {
    name: String,
    pipelines: IndexMap<String, Arc<PipelineDefinition>>,
    schedule_defs: Vec<ScheduleDefinition>,
    partition_set_defs: Vec<PartitionSetDefinition>,
}

impl RepositoryDefinition {
    /// Creates an empty repository.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipelines: IndexMap::new(),
            schedule_defs: Vec::new(),
            partition_set_defs: Vec::new(),
        }
    }

    /// Wraps a single pipeline in an unnamed repository.
    #[must_use]
    pub fn from_pipeline(pipeline: Arc<PipelineDefinition>) -> Self {
        let mut repo = Self::new(EPHEMERAL_REPOSITORY_NAME);
        repo.pipelines.insert(pipeline.name().to_string(), pipeline);
        repo
    }

    /// Adds a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if a pipeline with the same name exists.
    pub fn with_pipeline(
        mut self,
        pipeline: impl Into<Arc<PipelineDefinition>>,
    ) -> Result<Self, DefinitionError> {
        let pipeline = pipeline.into();
        if self.pipelines.contains_key(pipeline.name()) {
            return Err(DefinitionError::new(format!(
                "Repository '{}' contains pipeline '{}' more than once",
                self.name,
                pipeline.name()
            ))
            .with_names(vec![pipeline.name().to_string()])
            .with_error_info(
                ContractErrorInfo::new(
                    "DAGFLOW-DEF-DUPLICATE",
                    format!("Duplicate pipeline '{}'", pipeline.name()),
                )
                .with_fix_hint("Pipeline names must be unique within a repository."),
            ));
        }
        self.pipelines.insert(pipeline.name().to_string(), pipeline);
        Ok(self)
    }

    /// Appends schedules.
    #[must_use]
    pub fn with_schedule_defs(mut self, defs: impl IntoIterator<Item = ScheduleDefinition>) -> Self {
        self.schedule_defs.extend(defs);
        self
    }

    /// Appends partition sets.
    #[must_use]
    pub fn with_partition_set_defs(
        mut self,
        defs: impl IntoIterator<Item = PartitionSetDefinition>,
    ) -> Self {
        self.partition_set_defs.extend(defs);
        self
    }

    /// Returns the repository name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a pipeline.
    #[must_use]
    pub fn get_pipeline(&self, name: &str) -> Option<&Arc<PipelineDefinition>> {
        self.pipelines.get(name)
    }

    /// Returns true if the repository contains the pipeline.
    #[must_use]
    pub fn has_pipeline(&self, name: &str) -> bool {
        self.pipelines.contains_key(name)
    }

    /// Iterates pipeline names in insertion order.
    pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    /// Iterates pipelines in insertion order.
    pub fn pipelines(&self) -> impl Iterator<Item = &Arc<PipelineDefinition>> {
        self.pipelines.values()
    }

    /// Returns the schedules.
    #[must_use]
    pub fn schedule_defs(&self) -> &[ScheduleDefinition] {
        &self.schedule_defs
    }

    /// Returns the partition sets.
    #[must_use]
    pub fn partition_set_defs(&self) -> &[PartitionSetDefinition] {
        &self.partition_set_defs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{OutputSpec, PipelineBuilder, RuntimeType, TaskDefinition, TaskOutputs};
    use serde_json::json;

    fn pipeline(name: &str) -> PipelineDefinition {
        PipelineBuilder::new(name)
            .task(
                TaskDefinition::from_fn("only", |_, _| Ok(TaskOutputs::result(json!(true))))
                    .with_output(OutputSpec::result(RuntimeType::bool())),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_repository_lookup() {
        let repo = RepositoryDefinition::new("repo")
            .with_pipeline(pipeline("a"))
            .unwrap()
            .with_pipeline(pipeline("b"))
            .unwrap();

        assert_eq!(repo.pipeline_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(repo.has_pipeline("b"));
        assert!(repo.get_pipeline("c").is_none());
    }

    #[test]
    fn test_repository_rejects_duplicate_pipeline() {
        let err = RepositoryDefinition::new("repo")
            .with_pipeline(pipeline("a"))
            .unwrap()
            .with_pipeline(pipeline("a"))
            .unwrap_err();
        assert_eq!(err.names, vec!["a".to_string()]);
    }

    #[test]
    fn test_single_pipeline_repository_is_unnamed() {
        let repo = RepositoryDefinition::from_pipeline(Arc::new(pipeline("solo")));
        assert_eq!(repo.name(), EPHEMERAL_REPOSITORY_NAME);
        assert!(repo.has_pipeline("solo"));
    }

    #[test]
    fn test_schedule_and_partition_defs_append() {
        let repo = RepositoryDefinition::new("repo")
            .with_schedule_defs([ScheduleDefinition::new("daily", "0 0 * * *", "a")])
            .with_partition_set_defs([PartitionSetDefinition::new(
                "days",
                "a",
                vec!["2024-01-01".to_string()],
            )]);
        assert_eq!(repo.schedule_defs().len(), 1);
        assert_eq!(repo.partition_set_defs()[0].partitions.len(), 1);
    }
}
