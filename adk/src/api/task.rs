//! The AgentTask resource: a user request executed as a sequence of runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::{ObjectMeta, RunResult};

/// Default retry budget when the spec omits `maxRetries`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A request to accomplish a goal using a referenced agent.
///
/// Tasks own their child runs via controller owner references, so deleting
/// a task cascades to every attempt it spawned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired outcome.
    pub spec: AgentTaskSpec,
    /// Observed state, written by the reconciler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentTaskStatus>,
}

/// What the user wants done, and with which agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskSpec {
    /// Name of the agent to execute with.
    #[serde(default)]
    pub agent_ref: String,

    /// The goal handed to the planner.
    #[serde(default)]
    pub goal: String,

    /// Arbitrary key/value context surfaced to the planner.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,

    /// How many failed runs may be retried before the task fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl AgentTaskSpec {
    /// Check the required fields. Violations are terminal validation errors.
    pub fn validate(&self) -> Result<()> {
        if self.agent_ref.is_empty() {
            return Err(Error::validation("AgentTask must reference an agent"));
        }
        if self.goal.is_empty() {
            return Err(Error::validation("AgentTask must have a goal"));
        }
        Ok(())
    }
}

/// Observed state of a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskStatus {
    /// Current lifecycle phase.
    #[serde(default)]
    pub phase: TaskPhase,

    /// Name of the child run currently executing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_run: Option<String>,

    /// Number of retries issued so far; the first attempt is not a retry.
    #[serde(default)]
    pub retry_count: u32,

    /// Result copied from the successful child run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,

    /// Error copied from the last failed child run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the first child run was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the task reached a terminal phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

/// Task lifecycle phase. `Completed` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPhase {
    /// A child run is in flight.
    #[default]
    Running,
    /// A child run completed; `result` is populated.
    Completed,
    /// The retry budget is exhausted or validation failed; `error` is populated.
    Failed,
}

impl TaskPhase {
    /// Whether this phase is terminal (absorbing).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Name of the `n`-th child run of a task (1-based attempt counter).
#[must_use]
pub fn run_name(task: &str, attempt: u32) -> String {
    format!("{task}-run-{attempt}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_requires_ref_and_goal() {
        let mut spec = AgentTaskSpec {
            agent_ref: "demo".into(),
            goal: "list and compute".into(),
            context: BTreeMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        };
        assert!(spec.validate().is_ok());

        spec.goal.clear();
        assert!(spec.validate().is_err());

        spec.goal = "g".into();
        spec.agent_ref.clear();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn run_names_are_attempt_numbered() {
        assert_eq!(run_name("demo-task", 1), "demo-task-run-1");
        assert_eq!(run_name("demo-task", 4), "demo-task-run-4");
    }
}
