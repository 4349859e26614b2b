//! Run configuration for externally supplied task inputs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Values for task inputs that are not wired to an upstream output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Task name to input name to value.
    #[serde(default)]
    pub inputs: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl RunConfig {
    /// Creates an empty run configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value for one task input.
    #[must_use]
    pub fn with_input(
        mut self,
        task: impl Into<String>,
        input: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.inputs
            .entry(task.into())
            .or_default()
            .insert(input.into(), value);
        self
    }

    /// Returns the configured value for a task input.
    #[must_use]
    pub fn input(&self, task: &str, input: &str) -> Option<&serde_json::Value> {
        self.inputs.get(task).and_then(|inputs| inputs.get(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_config_inputs() {
        let config = RunConfig::new().with_input("add_one", "num", json!(41));

        assert_eq!(config.input("add_one", "num"), Some(&json!(41)));
        assert_eq!(config.input("add_one", "other"), None);
        assert_eq!(config.input("missing", "num"), None);
    }

    #[test]
    fn test_run_config_from_yaml() {
        let config: RunConfig = serde_yaml::from_str("inputs:\n  load:\n    path: data.csv\n").unwrap();
        assert_eq!(config.input("load", "path"), Some(&json!("data.csv")));
    }
}
