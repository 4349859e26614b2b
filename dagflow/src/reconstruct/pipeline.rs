//! Reconstructable pipelines.

use super::loader::{CodeLoader, EntryPoint};
use super::pointer::{CodePointer, Target};
use super::repository::ReconstructableRepository;
use crate::definition::PipelineDefinition;
use crate::errors::ReconstructionError;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// A pointer to a pipeline entry point, optionally narrowed to a subset of
/// its tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructablePipeline {
    pointer: CodePointer,
    frozen_subset: Option<BTreeSet<String>>,
    #[serde(skip)]
    memo: OnceCell<Arc<PipelineDefinition>>,
}

impl PartialEq for ReconstructablePipeline {
    fn eq(&self, other: &Self) -> bool {
        self.pointer == other.pointer && self.frozen_subset == other.frozen_subset
    }
}

impl ReconstructablePipeline {
    /// Creates a pipeline pointer.
    #[must_use]
    pub fn new(pointer: CodePointer) -> Self {
        Self {
            pointer,
            frozen_subset: None,
            memo: OnceCell::new(),
        }
    }

    /// Pointer to the function `fn_name` defined in the source file `path`.
    #[must_use]
    pub fn for_file(path: impl Into<PathBuf>, fn_name: impl Into<String>) -> Self {
        Self::new(CodePointer::file(path, fn_name))
    }

    /// Pointer to the function `fn_name` in `module`.
    #[must_use]
    pub fn for_module(module: impl Into<String>, fn_name: impl Into<String>) -> Self {
        Self::new(CodePointer::module(module, fn_name))
    }

    fn with_subset(&self, subset: Option<BTreeSet<String>>) -> Self {
        Self {
            pointer: self.pointer.clone(),
            frozen_subset: subset,
            memo: OnceCell::new(),
        }
    }

    /// Returns the pointer.
    #[must_use]
    pub fn pointer(&self) -> &CodePointer {
        &self.pointer
    }

    /// Returns the frozen task subset, if any.
    #[must_use]
    pub fn frozen_subset(&self) -> Option<&BTreeSet<String>> {
        self.frozen_subset.as_ref()
    }

    /// A repository pointer to the same entry point, for code that only
    /// knows how to load repositories.
    #[must_use]
    pub fn get_reconstructable_repository(&self) -> ReconstructableRepository {
        ReconstructableRepository::new(self.pointer.clone())
    }

    /// Human-readable description of the pointer.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.frozen_subset {
            Some(subset) => format!(
                "{} [{}]",
                self.pointer.describe(),
                subset.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
            None => self.pointer.describe(),
        }
    }

    /// True once the definition has been resolved on this instance.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.memo.get().is_some()
    }

    /// Resolves the pipeline definition, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::InvariantViolation`] if the pointer does
    /// not resolve to a pipeline, and [`ReconstructionError::InvalidSubset`]
    /// if the frozen subset is no longer valid for it.
    pub fn get_definition(
        &self,
        loader: &dyn CodeLoader,
    ) -> Result<Arc<PipelineDefinition>, ReconstructionError> {
        self.memo
            .get_or_try_init(|| {
                debug!(pointer = %self.pointer, "Resolving pipeline");
                let target = loader.load_target(&self.pointer)?.resolve(&self.pointer)?;
                let Target::Pipeline(pipeline) = target else {
                    return Err(ReconstructionError::invariant(format!(
                        "Entry point {} resolved to {}; expected a PipelineDefinition",
                        self.pointer.describe(),
                        target.kind_name()
                    )));
                };
                apply_subset(pipeline, self.frozen_subset.as_ref())
            })
            .map(Arc::clone)
    }

    /// Returns a pointer to the same entry point narrowed to `task_names`,
    /// or covering the whole pipeline again when `None`.
    ///
    /// The subset is validated against the resolved definition immediately.
    ///
    /// # Errors
    ///
    /// Returns any resolution error, or [`ReconstructionError::InvalidSubset`]
    /// if the selection is invalid.
    pub fn subset_for_execution(
        &self,
        task_names: Option<&[&str]>,
        loader: &dyn CodeLoader,
    ) -> Result<Self, ReconstructionError> {
        let subset = self.with_subset(task_names.map(to_subset));
        subset.get_definition(loader)?;
        Ok(subset)
    }
}

/// A pointer to a named pipeline inside a reconstructable repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructablePipelineFromRepo {
    repository: ReconstructableRepository,
    pipeline_name: String,
    frozen_subset: Option<BTreeSet<String>>,
    #[serde(skip)]
    memo: OnceCell<Arc<PipelineDefinition>>,
}

impl PartialEq for ReconstructablePipelineFromRepo {
    fn eq(&self, other: &Self) -> bool {
        self.repository == other.repository
            && self.pipeline_name == other.pipeline_name
            && self.frozen_subset == other.frozen_subset
    }
}

impl ReconstructablePipelineFromRepo {
    pub(crate) fn new(repository: ReconstructableRepository, pipeline_name: impl Into<String>) -> Self {
        Self {
            repository,
            pipeline_name: pipeline_name.into(),
            frozen_subset: None,
            memo: OnceCell::new(),
        }
    }

    /// Returns the repository pointer.
    #[must_use]
    pub fn repository(&self) -> &ReconstructableRepository {
        &self.repository
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// Returns the frozen task subset, if any.
    #[must_use]
    pub fn frozen_subset(&self) -> Option<&BTreeSet<String>> {
        self.frozen_subset.as_ref()
    }

    /// Resolves the pipeline through its repository.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::UnknownPipeline`] if the repository has
    /// no pipeline of this name.
    pub fn get_definition(
        &self,
        loader: &dyn CodeLoader,
    ) -> Result<Arc<PipelineDefinition>, ReconstructionError> {
        self.memo
            .get_or_try_init(|| {
                let repo = self.repository.get_definition(loader)?;
                let pipeline = repo.get_pipeline(&self.pipeline_name).cloned().ok_or_else(|| {
                    ReconstructionError::UnknownPipeline {
                        repository: repo.name().to_string(),
                        pipeline: self.pipeline_name.clone(),
                    }
                })?;
                apply_subset(pipeline, self.frozen_subset.as_ref())
            })
            .map(Arc::clone)
    }

    /// Returns a pointer to the same pipeline narrowed to `task_names`, or
    /// covering the whole pipeline again when `None`.
    ///
    /// # Errors
    ///
    /// Returns any resolution error, or [`ReconstructionError::InvalidSubset`]
    /// if the selection is invalid.
    pub fn subset_for_execution(
        &self,
        task_names: Option<&[&str]>,
        loader: &dyn CodeLoader,
    ) -> Result<Self, ReconstructionError> {
        let subset = Self {
            repository: self.repository.clone(),
            pipeline_name: self.pipeline_name.clone(),
            frozen_subset: task_names.map(to_subset),
            memo: OnceCell::new(),
        };
        subset.get_definition(loader)?;
        Ok(subset)
    }
}

fn to_subset(task_names: &[&str]) -> BTreeSet<String> {
    task_names.iter().map(|name| (*name).to_string()).collect()
}

fn apply_subset(
    pipeline: Arc<PipelineDefinition>,
    subset: Option<&BTreeSet<String>>,
) -> Result<Arc<PipelineDefinition>, ReconstructionError> {
    let Some(subset) = subset else {
        return Ok(pipeline);
    };
    let names: Vec<&str> = subset.iter().map(String::as_str).collect();
    Ok(Arc::new(pipeline.subset_for_execution(Some(&names))?))
}

/// Returns a reconstructable pointer for a pipeline entry point.
///
/// The entry point must be nameable from another process, so closures and
/// nested definitions are rejected. A factory is invoked once here and must
/// return a pipeline; the result is kept on the returned pointer.
///
/// # Errors
///
/// Returns [`ReconstructionError::InvariantViolation`] describing why the
/// entry point cannot be reconstructed.
pub fn reconstructable(entry: &EntryPoint) -> Result<ReconstructablePipeline, ReconstructionError> {
    if !entry.target.is_pipeline_producing() {
        return Err(ReconstructionError::invariant(format!(
            "Reconstructable target must be a PipelineDefinition or a function returning one, received {}",
            entry.target.kind_name()
        )));
    }

    let name = entry.name.as_str();
    if name.is_empty() || name.starts_with('<') || entry.qualified_name.contains("{{closure}}") {
        return Err(ReconstructionError::invariant(format!(
            "Reconstructable target cannot be a closure ({}). Use a named function instead.",
            entry.qualified_name
        )));
    }

    if entry.qualified_name != name {
        return Err(ReconstructionError::invariant(format!(
            "Reconstructable target {} must be defined at module scope, not nested in {}. \
             Move it to the top level of module {}.",
            name, entry.qualified_name, entry.module
        )));
    }

    let pointer = CodePointer::module(&entry.module, name);
    let target = entry.target.clone().resolve(&pointer)?;
    let Target::Pipeline(pipeline) = target else {
        return Err(ReconstructionError::invariant(format!(
            "Entry point {} resolved to {}; expected a PipelineDefinition",
            pointer.describe(),
            target.kind_name()
        )));
    };

    Ok(ReconstructablePipeline {
        pointer,
        frozen_subset: None,
        memo: OnceCell::with_value(pipeline),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{
        InputSpec, OutputSpec, PipelineBuilder, RepositoryDefinition, RuntimeType, TaskDefinition,
        TaskOutputs,
    };
    use crate::entry_point;
    use crate::reconstruct::loader::{EntryPointRegistry, MockCodeLoader};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn chain() -> PipelineDefinition {
        let task = |name: &str| {
            TaskDefinition::from_fn(name, |_, _| Ok(TaskOutputs::result(json!(1))))
                .with_input(InputSpec::new("x", RuntimeType::int()).with_default(json!(0)))
                .with_output(OutputSpec::result(RuntimeType::int()))
        };
        PipelineBuilder::new("chain")
            .task(task("a"))
            .task(task("b"))
            .task(task("c"))
            .depends_on("b", "x", "a", "result")
            .depends_on("c", "x", "b", "result")
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolution_is_memoized() {
        let mut loader = MockCodeLoader::new();
        loader
            .expect_load_target()
            .times(1)
            .returning(|_| Ok(Target::factory(chain)));

        let pointer = ReconstructablePipeline::new(CodePointer::module("etl", "chain"));
        let first = pointer.get_definition(&loader).unwrap();
        let second = pointer.get_definition(&loader).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.task_count(), 3);
    }

    #[test]
    fn test_repository_target_is_rejected() {
        let mut loader = MockCodeLoader::new();
        loader
            .expect_load_target()
            .returning(|_| Ok(Target::Repository(Arc::new(RepositoryDefinition::new("r")))));

        let err = ReconstructablePipeline::new(CodePointer::module("etl", "repo"))
            .get_definition(&loader)
            .unwrap_err();
        assert!(err.to_string().contains("RepositoryDefinition"));
        assert!(err.to_string().contains("etl::repo"));
    }

    #[test]
    fn test_subset_is_validated_eagerly() {
        let mut loader = MockCodeLoader::new();
        loader
            .expect_load_target()
            .returning(|_| Ok(Target::factory(chain)));
        let pointer = ReconstructablePipeline::new(CodePointer::module("etl", "chain"));

        let subset = pointer.subset_for_execution(Some(&["a", "b"]), &loader).unwrap();
        assert!(subset.is_resolved());
        assert_eq!(subset.describe(), "etl::chain [a, b]");
        let definition = subset.get_definition(&loader).unwrap();
        assert_eq!(definition.task_count(), 2);
        assert_eq!(
            definition.selected_task_names().unwrap().iter().cloned().collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string()]
        );

        let err = pointer.subset_for_execution(Some(&["b"]), &loader).unwrap_err();
        assert!(matches!(err, ReconstructionError::InvalidSubset(_)));

        let err = pointer.subset_for_execution(Some(&["zzz"]), &loader).unwrap_err();
        assert!(err.to_string().contains("zzz"));

        let full = subset.subset_for_execution(None, &loader).unwrap();
        assert_eq!(full.frozen_subset(), None);
        assert_eq!(full, pointer);
        assert_eq!(full.get_definition(&loader).unwrap().task_count(), 3);
    }

    #[test]
    fn test_file_and_module_constructors() {
        let by_file = ReconstructablePipeline::for_file("jobs/../etl/chain.rs", "chain");
        assert_eq!(by_file.pointer(), &CodePointer::file("jobs/../etl/chain.rs", "chain"));
        let by_module = ReconstructablePipeline::for_module("etl", "chain");
        assert_eq!(by_module.describe(), "etl::chain");

        let registry = EntryPointRegistry::new();
        registry.register_file("etl/chain.rs", "chain", Target::factory(chain));
        assert_eq!(by_file.get_definition(&registry).unwrap().name(), "chain");

        let repo = by_module.get_reconstructable_repository();
        assert_eq!(repo.pointer(), by_module.pointer());
    }

    #[test]
    fn test_repository_from_pipeline_pointer_wraps_the_pipeline() {
        let mut loader = MockCodeLoader::new();
        loader
            .expect_load_target()
            .times(1)
            .returning(|_| Ok(Target::factory(chain)));

        let repo = ReconstructablePipeline::for_module("etl", "chain").get_reconstructable_repository();
        let definition = repo.get_definition(&loader).unwrap();
        assert!(definition.get_pipeline("chain").is_some());
    }

    #[test]
    fn test_pipeline_from_repo() {
        let mut loader = MockCodeLoader::new();
        loader.expect_load_target().times(1).returning(|_| {
            Ok(Target::factory(|| RepositoryDefinition::new("repo").with_pipeline(chain()).map_err(anyhow::Error::from)))
        });
        let repo = ReconstructableRepository::for_module("etl", "define_repo");

        let pipeline = repo.get_reconstructable_pipeline("chain");
        assert_eq!(pipeline.pipeline_name(), "chain");
        assert_eq!(pipeline.get_definition(&loader).unwrap().name(), "chain");

        let err = repo
            .get_reconstructable_pipeline("missing")
            .get_definition(&loader)
            .unwrap_err();
        assert!(matches!(
            err,
            ReconstructionError::UnknownPipeline { ref repository, ref pipeline }
                if repository == "repo" && pipeline == "missing"
        ));
    }

    #[test]
    fn test_reconstructable_entry_point() {
        let entry = entry_point!(chain);
        let pointer = reconstructable(&entry).unwrap();
        assert_eq!(pointer.pointer(), &CodePointer::module(module_path!(), "chain"));
        assert!(pointer.is_resolved());

        let registry = EntryPointRegistry::new().with_entry_point(&entry);
        assert_eq!(pointer.get_definition(&registry).unwrap().name(), "chain");
    }

    #[test]
    fn test_reconstructable_rejects_closures_and_nested_paths() {
        let closure = EntryPoint::from_callable(module_path!(), file!(), || Target::Pipeline(Arc::new(chain())));
        let err = reconstructable(&closure).unwrap_err();
        assert!(err.to_string().contains("closure"));

        let nested = entry_point!(self::chain);
        let err = reconstructable(&nested).unwrap_err();
        assert!(err.to_string().contains("module scope"));

        let not_pipeline = EntryPoint::new("repo", "etl", "etl.rs", Target::value_of::<u8>());
        let err = reconstructable(&not_pipeline).unwrap_err();
        assert!(err.to_string().contains("u8"));
    }

    fn define_repo() -> RepositoryDefinition {
        RepositoryDefinition::new("repo")
    }

    #[test]
    fn test_reconstructable_rejects_factory_returning_repository() {
        let entry = entry_point!(define_repo);
        let err = reconstructable(&entry).unwrap_err();
        assert!(matches!(err, ReconstructionError::InvariantViolation(_)));
        assert!(err.to_string().contains("RepositoryDefinition"));
        assert!(err.to_string().contains("define_repo"));
    }

    #[test]
    fn test_serialized_pointer_round_trip() {
        let mut loader = MockCodeLoader::new();
        loader
            .expect_load_target()
            .returning(|_| Ok(Target::factory(chain)));
        let pointer = ReconstructablePipeline::new(CodePointer::module("etl", "chain"))
            .subset_for_execution(Some(&["a"]), &loader)
            .unwrap();

        let json = serde_json::to_string(&pointer).unwrap();
        let copy: ReconstructablePipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(copy, pointer);
        assert!(!copy.is_resolved());
        assert_eq!(
            copy.get_definition(&loader).unwrap().selected_task_names(),
            pointer.get_definition(&loader).unwrap().selected_task_names()
        );
    }
}
