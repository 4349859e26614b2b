//! Reconstructable repositories.

use super::loader::CodeLoader;
use super::pipeline::ReconstructablePipelineFromRepo;
use super::pointer::{CodePointer, Target};
use crate::definition::RepositoryDefinition;
use crate::errors::ReconstructionError;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A pointer to a repository (or a lone pipeline) that can be resolved in
/// any process.
///
/// The first successful resolution is cached on the instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructableRepository {
    pointer: CodePointer,
    yaml_path: Option<PathBuf>,
    scheduler_pointer: Option<CodePointer>,
    partitions_pointer: Option<CodePointer>,
    #[serde(skip)]
    memo: OnceCell<Arc<RepositoryDefinition>>,
}

impl PartialEq for ReconstructableRepository {
    fn eq(&self, other: &Self) -> bool {
        self.pointer == other.pointer
            && self.yaml_path == other.yaml_path
            && self.scheduler_pointer == other.scheduler_pointer
            && self.partitions_pointer == other.partitions_pointer
    }
}

impl ReconstructableRepository {
    /// Creates a repository pointer.
    #[must_use]
    pub fn new(pointer: CodePointer) -> Self {
        Self {
            pointer,
            yaml_path: None,
            scheduler_pointer: None,
            partitions_pointer: None,
            memo: OnceCell::new(),
        }
    }

    /// Points at an entry point in a source file.
    #[must_use]
    pub fn for_file(path: impl Into<PathBuf>, fn_name: impl Into<String>) -> Self {
        Self::new(CodePointer::file(path, fn_name))
    }

    /// Points at an entry point in a module.
    #[must_use]
    pub fn for_module(module: impl Into<String>, fn_name: impl Into<String>) -> Self {
        Self::new(CodePointer::module(module, fn_name))
    }

    /// Reads a repository config file.
    ///
    /// The file has a `repository` block with either `module` or `file`, plus
    /// `fn`. Relative files are resolved against the config's directory. The
    /// deprecated `scheduler` and `partitions` blocks have the same shape.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::Io`] if the file cannot be read and
    /// [`ReconstructionError::Config`] if it is malformed.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ReconstructionError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ReconstructionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text, path)
    }

    /// Parses repository config text as if read from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::Config`] if the text is malformed.
    pub fn from_yaml_str(text: &str, path: &Path) -> Result<Self, ReconstructionError> {
        let config: RepositoryConfigFile =
            serde_yaml::from_str(text).map_err(|e| config_error(path, e))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));

        let target = config.repository.to_pointer(base_dir, path, "repository")?;
        let mut repo = Self::new(CodePointer::Config {
            config_path: path.to_path_buf(),
            target: Box::new(target),
        });
        repo.yaml_path = Some(path.to_path_buf());

        if let Some(scheduler) = config.scheduler {
            warn!(
                config = %path.display(),
                "The 'scheduler' key in repository config is deprecated; define schedules on the repository instead"
            );
            repo.scheduler_pointer = Some(scheduler.to_pointer(base_dir, path, "scheduler")?);
        }
        if let Some(partitions) = config.partitions {
            warn!(
                config = %path.display(),
                "The 'partitions' key in repository config is deprecated; define partition sets on the repository instead"
            );
            repo.partitions_pointer = Some(partitions.to_pointer(base_dir, path, "partitions")?);
        }
        Ok(repo)
    }

    /// Returns the pointer.
    #[must_use]
    pub fn pointer(&self) -> &CodePointer {
        &self.pointer
    }

    /// Returns the config file the pointer was read from.
    #[must_use]
    pub fn yaml_path(&self) -> Option<&Path> {
        self.yaml_path.as_deref()
    }

    /// Returns the deprecated schedule pointer.
    #[must_use]
    pub fn scheduler_pointer(&self) -> Option<&CodePointer> {
        self.scheduler_pointer.as_ref()
    }

    /// Returns the deprecated partition set pointer.
    #[must_use]
    pub fn partitions_pointer(&self) -> Option<&CodePointer> {
        self.partitions_pointer.as_ref()
    }

    /// Human-readable description of the pointer.
    #[must_use]
    pub fn describe(&self) -> String {
        self.pointer.describe()
    }

    /// True once the definition has been resolved on this instance.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.memo.get().is_some()
    }

    /// Resolves the repository definition, loading it on first use.
    ///
    /// A pointer to a pipeline yields an unnamed repository holding it.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::InvariantViolation`] if the pointer (or
    /// a legacy pointer) resolves to the wrong kind of value.
    pub fn get_definition(
        &self,
        loader: &dyn CodeLoader,
    ) -> Result<Arc<RepositoryDefinition>, ReconstructionError> {
        self.memo
            .get_or_try_init(|| self.load(loader))
            .map(Arc::clone)
    }

    /// Returns a pointer to one pipeline of this repository.
    #[must_use]
    pub fn get_reconstructable_pipeline(
        &self,
        pipeline_name: impl Into<String>,
    ) -> ReconstructablePipelineFromRepo {
        ReconstructablePipelineFromRepo::new(self.clone(), pipeline_name)
    }

    fn load(&self, loader: &dyn CodeLoader) -> Result<Arc<RepositoryDefinition>, ReconstructionError> {
        debug!(pointer = %self.pointer, "Resolving repository");
        let target = loader.load_target(&self.pointer)?.resolve(&self.pointer)?;
        let mut repo = match target {
            Target::Repository(repo) => repo,
            Target::Pipeline(pipeline) => Arc::new(RepositoryDefinition::from_pipeline(pipeline)),
            other => {
                return Err(ReconstructionError::invariant(format!(
                    "Entry point {} resolved to {}; expected a pipeline or a repository",
                    self.pointer.describe(),
                    other.kind_name()
                )))
            }
        };

        if let Some(pointer) = &self.scheduler_pointer {
            let target = loader.load_target(pointer)?.resolve(pointer)?;
            let Target::Schedules(schedules) = target else {
                return Err(ReconstructionError::invariant(format!(
                    "Entry point {} resolved to {}; expected schedule definitions",
                    pointer.describe(),
                    target.kind_name()
                )));
            };
            repo = Arc::new((*repo).clone().with_schedule_defs(schedules));
        }
        if let Some(pointer) = &self.partitions_pointer {
            let target = loader.load_target(pointer)?.resolve(pointer)?;
            let Target::PartitionSets(partition_sets) = target else {
                return Err(ReconstructionError::invariant(format!(
                    "Entry point {} resolved to {}; expected partition set definitions",
                    pointer.describe(),
                    target.kind_name()
                )));
            };
            repo = Arc::new((*repo).clone().with_partition_set_defs(partition_sets));
        }
        Ok(repo)
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryConfigFile {
    repository: PointerConfig,
    #[serde(default)]
    scheduler: Option<PointerConfig>,
    #[serde(default)]
    partitions: Option<PointerConfig>,
}

#[derive(Debug, Deserialize)]
struct PointerConfig {
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(rename = "fn")]
    fn_name: String,
}

impl PointerConfig {
    fn to_pointer(&self, base_dir: &Path, config_path: &Path, key: &str) -> Result<CodePointer, ReconstructionError> {
        match (&self.module, &self.file) {
            (Some(module), None) => Ok(CodePointer::module(module, &self.fn_name)),
            (None, Some(file)) => {
                let file = if file.is_absolute() {
                    file.clone()
                } else {
                    base_dir.join(file)
                };
                Ok(CodePointer::file(file, &self.fn_name))
            }
            (Some(_), Some(_)) => Err(config_error(
                config_path,
                format!("'{key}' must set exactly one of 'module' or 'file', not both"),
            )),
            (None, None) => Err(config_error(
                config_path,
                format!("'{key}' must set one of 'module' or 'file'"),
            )),
        }
    }
}

fn config_error(path: &Path, message: impl std::fmt::Display) -> ReconstructionError {
    ReconstructionError::Config {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{
        OutputSpec, PartitionSetDefinition, PipelineBuilder, PipelineDefinition, RuntimeType,
        ScheduleDefinition, TaskDefinition, TaskOutputs, EPHEMERAL_REPOSITORY_NAME,
    };
    use crate::reconstruct::loader::MockCodeLoader;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    fn pipeline(name: &str) -> PipelineDefinition {
        PipelineBuilder::new(name)
            .task(
                TaskDefinition::from_fn("only", |_, _| Ok(TaskOutputs::result(json!(1))))
                    .with_output(OutputSpec::result(RuntimeType::int())),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolution_is_memoized_per_instance() {
        let mut loader = MockCodeLoader::new();
        loader.expect_load_target().times(1).returning(|_| {
            Ok(Target::factory(|| {
                RepositoryDefinition::new("repo").with_pipeline(pipeline("p")).map_err(anyhow::Error::from)
            }))
        });

        let repo = ReconstructableRepository::for_module("etl", "define_repo");
        assert!(!repo.is_resolved());
        let first = repo.get_definition(&loader).unwrap();
        let second = repo.get_definition(&loader).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(repo.is_resolved());
    }

    #[test]
    fn test_pipeline_pointer_becomes_unnamed_repository() {
        let mut loader = MockCodeLoader::new();
        loader
            .expect_load_target()
            .returning(|_| Ok(Target::Pipeline(Arc::new(pipeline("solo")))));

        let repo = ReconstructableRepository::for_file("pipelines.rs", "solo")
            .get_definition(&loader)
            .unwrap();
        assert_eq!(repo.name(), EPHEMERAL_REPOSITORY_NAME);
        assert!(repo.has_pipeline("solo"));
    }

    #[test]
    fn test_wrong_kind_is_invariant_violation() {
        let mut loader = MockCodeLoader::new();
        loader
            .expect_load_target()
            .returning(|_| Ok(Target::value_of::<String>()));

        let err = ReconstructableRepository::for_module("etl", "not_a_repo")
            .get_definition(&loader)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("etl::not_a_repo"));
        assert!(message.contains("String"));
    }

    #[test]
    fn test_failed_resolution_is_not_cached() {
        let mut loader = MockCodeLoader::new();
        let mut seq = mockall::Sequence::new();
        loader
            .expect_load_target()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|p| Err(ReconstructionError::invariant(p.describe())));
        loader
            .expect_load_target()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Target::Pipeline(Arc::new(pipeline("p")))));

        let repo = ReconstructableRepository::for_module("etl", "flaky");
        assert!(repo.get_definition(&loader).is_err());
        assert!(repo.get_definition(&loader).is_ok());
    }

    #[test]
    fn test_from_yaml_resolves_relative_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("repository.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "repository:\n  file: src/repo.rs\n  fn: define_repo").unwrap();

        let repo = ReconstructableRepository::from_yaml(&path).unwrap();
        assert_eq!(repo.yaml_path(), Some(path.as_path()));
        assert_eq!(
            repo.pointer().innermost(),
            &CodePointer::file(dir.path().join("src/repo.rs"), "define_repo")
        );
        assert!(repo.scheduler_pointer().is_none());
    }

    #[test]
    fn test_from_yaml_rejects_module_and_file() {
        let text = "repository:\n  module: etl\n  file: repo.rs\n  fn: define_repo\n";
        let err = ReconstructableRepository::from_yaml_str(text, Path::new("/cfg/repo.yaml")).unwrap_err();
        assert!(matches!(err, ReconstructionError::Config { .. }));

        let err = ReconstructableRepository::from_yaml_str("repository:\n  fn: x\n", Path::new("r.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("one of 'module' or 'file'"));

        let err = ReconstructableRepository::from_yaml_str("other: 1\n", Path::new("r.yaml")).unwrap_err();
        assert!(matches!(err, ReconstructionError::Config { .. }));
    }

    #[test]
    fn test_from_yaml_missing_file_is_io_error() {
        let err = ReconstructableRepository::from_yaml("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ReconstructionError::Io { .. }));
    }

    #[test]
    fn test_legacy_pointers_are_merged() {
        let text = "repository:\n  module: etl\n  fn: define_repo\n\
                    scheduler:\n  module: etl.schedules\n  fn: define_schedules\n\
                    partitions:\n  module: etl.partitions\n  fn: define_partitions\n";
        let repo = ReconstructableRepository::from_yaml_str(text, Path::new("/cfg/repository.yaml")).unwrap();
        assert_eq!(
            repo.scheduler_pointer(),
            Some(&CodePointer::module("etl.schedules", "define_schedules"))
        );

        let mut loader = MockCodeLoader::new();
        loader.expect_load_target().returning(|pointer| {
            Ok(match pointer.fn_name() {
                "define_repo" => Target::Repository(Arc::new(
                    RepositoryDefinition::new("repo").with_pipeline(pipeline("p")).unwrap(),
                )),
                "define_schedules" => Target::factory(|| {
                    vec![ScheduleDefinition::new("daily", "0 0 * * *", "p")]
                }),
                _ => Target::PartitionSets(vec![PartitionSetDefinition::new("days", "p", Vec::new())]),
            })
        });

        let definition = repo.get_definition(&loader).unwrap();
        assert_eq!(definition.schedule_defs().len(), 1);
        assert_eq!(definition.partition_set_defs()[0].name, "days");
    }

    #[test]
    fn test_legacy_pointer_of_wrong_kind() {
        let text = "repository:\n  module: etl\n  fn: define_repo\n\
                    scheduler:\n  module: etl\n  fn: not_schedules\n";
        let repo = ReconstructableRepository::from_yaml_str(text, Path::new("repository.yaml")).unwrap();

        let mut loader = MockCodeLoader::new();
        loader.expect_load_target().returning(|pointer| {
            Ok(match pointer.fn_name() {
                "define_repo" => Target::Pipeline(Arc::new(pipeline("p"))),
                _ => Target::Pipeline(Arc::new(pipeline("q"))),
            })
        });

        let err = repo.get_definition(&loader).unwrap_err();
        assert!(err.to_string().contains("expected schedule definitions"));
        assert!(err.to_string().contains("etl::not_schedules"));
    }

    #[test]
    fn test_serialized_pointer_resolves_independently() {
        let repo = ReconstructableRepository::for_module("etl", "define_repo");
        let mut loader = MockCodeLoader::new();
        loader
            .expect_load_target()
            .times(2)
            .returning(|_| Ok(Target::Pipeline(Arc::new(pipeline("p")))));
        repo.get_definition(&loader).unwrap();

        let json = serde_json::to_string(&repo).unwrap();
        let copy: ReconstructableRepository = serde_json::from_str(&json).unwrap();
        assert_eq!(copy, repo);
        assert!(!copy.is_resolved());
        copy.get_definition(&loader).unwrap();
    }
}
