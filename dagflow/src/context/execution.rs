//! Execution context passed to store operations and compute functions.

use super::RunIdentity;
use std::collections::BTreeMap;

/// Context for one run, optionally narrowed to a single step.
///
/// The context carries no mutable state; the artifact store is the only
/// channel between steps.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    run: RunIdentity,
    step_key: Option<String>,
    tags: BTreeMap<String, String>,
}

impl ExecutionContext {
    /// Creates a run-level context.
    #[must_use]
    pub fn new(run: RunIdentity) -> Self {
        Self {
            run,
            step_key: None,
            tags: BTreeMap::new(),
        }
    }

    /// Creates a run-level context for an existing run id.
    #[must_use]
    pub fn for_run_id(run_id: impl Into<String>) -> Self {
        Self::new(RunIdentity::with_run_id(run_id))
    }

    /// Returns a copy of this context narrowed to one step.
    #[must_use]
    pub fn for_step(&self, step_key: impl Into<String>) -> Self {
        Self {
            run: self.run.clone(),
            step_key: Some(step_key.into()),
            tags: self.tags.clone(),
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub fn run(&self) -> &RunIdentity {
        &self.run
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    /// Returns the step key, if this is a step context.
    #[must_use]
    pub fn step_key(&self) -> Option<&str> {
        self.step_key.as_deref()
    }

    /// Returns a tag value.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns all tags.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_context_keeps_run_and_tags() {
        let ctx = ExecutionContext::for_run_id("run-1").with_tag("owner", "etl");
        let step = ctx.for_step("load.compute");

        assert_eq!(step.run_id(), "run-1");
        assert_eq!(step.step_key(), Some("load.compute"));
        assert_eq!(step.tag("owner"), Some("etl"));
        assert_eq!(ctx.step_key(), None);
    }
}
