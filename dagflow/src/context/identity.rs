//! Run identity for scoping pipeline executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a new unique run id.
#[must_use]
pub fn make_new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Identifies a pipeline run.
///
/// The run id scopes the root under which all of the run's artifacts are
/// stored, so concurrent runs never write to the same keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique ID for this run.
    pub run_id: String,

    /// The run this one re-executes, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,

    /// The pipeline being run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_name: Option<String>,

    /// When the identity was created.
    pub created_at: DateTime<Utc>,
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl RunIdentity {
    /// Creates a new run identity with a generated run id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_run_id(make_new_run_id())
    }

    /// Creates a run identity with a specific run id.
    #[must_use]
    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            parent_run_id: None,
            pipeline_name: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the parent run id.
    #[must_use]
    pub fn with_parent_run_id(mut self, parent_run_id: impl Into<String>) -> Self {
        self.parent_run_id = Some(parent_run_id.into());
        self
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_pipeline_name(mut self, pipeline_name: impl Into<String>) -> Self {
        self.pipeline_name = Some(pipeline_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(make_new_run_id(), make_new_run_id());
        assert_eq!(Uuid::parse_str(&make_new_run_id()).map(|u| u.get_version_num()).ok(), Some(4));
    }

    #[test]
    fn test_run_identity_builder() {
        let identity = RunIdentity::with_run_id("run-2")
            .with_parent_run_id("run-1")
            .with_pipeline_name("inty");

        assert_eq!(identity.run_id, "run-2");
        assert_eq!(identity.parent_run_id.as_deref(), Some("run-1"));
        assert_eq!(identity.pipeline_name.as_deref(), Some("inty"));
    }

    #[test]
    fn test_run_identity_serialization() {
        let identity = RunIdentity::new();
        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("parent_run_id"));

        let deserialized: RunIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(identity, deserialized);
    }
}
