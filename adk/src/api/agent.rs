//! The Agent resource: configuration only, no execution state of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::ObjectMeta;

/// A behavioral template defining an LLM configuration and a tool set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired configuration.
    pub spec: AgentSpec,
    /// Observed state, written by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
}

/// Agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// LLM model identifier.
    #[serde(default)]
    pub model: String,

    /// System prompt prepended to every planner call.
    #[serde(default)]
    pub system_prompt: String,

    /// Tool names this agent may use. Empty means all registered tools.
    #[serde(default)]
    pub tools: Vec<String>,

    /// Default step budget copied onto child runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,

    /// Default wall-clock budget in seconds copied onto child runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl AgentSpec {
    /// Check the required fields. Violations are terminal validation errors.
    pub fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(Error::validation("Agent must have a model specified"));
        }
        if self.system_prompt.is_empty() {
            return Err(Error::validation(
                "Agent must have a systemPrompt specified",
            ));
        }
        Ok(())
    }

    /// Check an updated spec. Updates only require the model; dropping
    /// the system prompt falls back to the engine's default.
    pub fn validate_update(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(Error::validation("Agent must have a model specified"));
        }
        Ok(())
    }
}

/// Aggregate run counters maintained best-effort by the run engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Always `Active` once the spec has been accepted.
    #[serde(default)]
    pub phase: AgentPhase,
    /// Total terminated runs.
    #[serde(default)]
    pub total_runs: u64,
    /// Runs that reached `Completed`.
    #[serde(default)]
    pub successful_runs: u64,
    /// Runs that reached `Failed`.
    #[serde(default)]
    pub failed_runs: u64,
    /// When the most recent run terminated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_time: Option<DateTime<Utc>>,
}

/// Agent lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentPhase {
    /// The agent is accepted and may be referenced by tasks.
    #[default]
    Active,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_model_and_prompt() {
        let mut spec = AgentSpec {
            model: "demo-model".into(),
            system_prompt: "You are a helpful agent.".into(),
            ..AgentSpec::default()
        };
        assert!(spec.validate().is_ok());

        spec.model.clear();
        assert!(spec.validate().is_err());

        spec.model = "demo-model".into();
        spec.system_prompt.clear();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn update_validation_only_requires_model() {
        let mut spec = AgentSpec {
            model: "demo-model".into(),
            system_prompt: String::new(),
            ..AgentSpec::default()
        };
        assert!(spec.validate_update().is_ok());

        spec.model.clear();
        assert!(spec.validate_update().is_err());
    }

    #[test]
    fn spec_deserializes_from_camel_case() {
        let spec: AgentSpec = serde_json::from_value(serde_json::json!({
            "model": "demo-model",
            "systemPrompt": "prompt",
            "tools": ["calculator"],
            "maxSteps": 5,
            "timeout": 120,
        }))
        .unwrap();
        assert_eq!(spec.max_steps, Some(5));
        assert_eq!(spec.timeout, Some(120));
        assert_eq!(spec.tools, vec!["calculator".to_string()]);
    }
}
