//! Graph Configuration
//!
//! Limits that bound the work a graph does before giving up. The defaults
//! match what a typical device graph needs; `from_json` lets a deployment
//! raise them for unusually deep pipelines.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// How many times a sweep may return to its starting node before it
    /// stops. Two circuits settle properties that nodes create on first
    /// contact.
    pub max_sweep_circuits: usize,
    /// Upper bound on action deliveries per drain of the action queue.
    pub max_action_iterations: usize,
    /// Release count of a new graph. Each `commit` takes one away and global
    /// resolution starts once none are left.
    pub initial_release_count: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_sweep_circuits: 2,
            max_action_iterations: 200,
            initial_release_count: 1,
        }
    }
}

impl GraphConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| GraphError::Config(format!("invalid graph config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject bounds of zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_sweep_circuits == 0 {
            return Err(GraphError::Config(
                "max_sweep_circuits must be at least 1".into(),
            ));
        }
        if self.max_action_iterations == 0 {
            return Err(GraphError::Config(
                "max_action_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = GraphConfig::from_json(r#"{ "max_sweep_circuits": 5 }"#).unwrap();
        assert_eq!(config.max_sweep_circuits, 5);
        assert_eq!(config.max_action_iterations, 200);
        assert_eq!(config.initial_release_count, 1);
    }

    #[test]
    fn rejects_zero_bounds_and_unknown_fields() {
        for text in [
            r#"{ "max_sweep_circuits": 0 }"#,
            r#"{ "max_action_iterations": 0 }"#,
            r#"{ "max_circuits": 3 }"#,
            "not json",
        ] {
            let err = GraphConfig::from_json(text).unwrap_err();
            assert!(matches!(err, GraphError::Config(_)), "{text}");
        }
    }
}
