//! The AgentRun resource: one end-to-end execution attempt of a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::ObjectMeta;

/// Default step budget when the spec omits `maxSteps`.
pub const DEFAULT_MAX_STEPS: u32 = 10;

/// Default wall-clock budget in seconds when the spec omits `timeout`.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Largest tool output persisted into history or replayed to the planner.
pub const MAX_OUTPUT_BYTES: usize = 5000;

/// A single execution attempt, owned by its parent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired execution parameters.
    pub spec: AgentRunSpec,
    /// Observed state, written by the run engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentRunStatus>,
}

/// Execution parameters for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunSpec {
    /// Name of the agent supplying model, prompt, and tool set.
    pub agent_ref: String,

    /// Name of the parent task.
    pub task_ref: String,

    /// The goal handed to the planner.
    pub goal: String,

    /// Arbitrary key/value context surfaced to the planner.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,

    /// Step budget.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Wall-clock budget in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Observed state of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunStatus {
    /// Current lifecycle phase.
    #[serde(default)]
    pub phase: RunPhase,

    /// 1-based index of the step being executed; monotonic.
    #[serde(default)]
    pub current_step: u32,

    /// Append-only, step-ordered record of planner and tool activity.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    /// Final result, present once the run reaches `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,

    /// Terminal error, present once the run reaches `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the engine started driving the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the run reached a terminal phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Resource accounting; counters are monotonic within a run.
    #[serde(default)]
    pub resources_used: ResourcesUsed,
}

/// Run lifecycle phase. `Completed` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    /// Waiting on the planner's next decision.
    #[default]
    Planning,
    /// A tool invocation is in flight in the sandbox.
    Executing,
    /// The planner finished; `result` is populated.
    Completed,
    /// The run terminated without completing; `error` is populated.
    Failed,
}

impl RunPhase {
    /// Whether this phase is terminal (absorbing).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Resource accounting for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesUsed {
    /// Total LLM tokens consumed, from the provider's usage counters.
    #[serde(default)]
    pub llm_tokens: u64,
    /// Number of sandbox invocations.
    #[serde(default)]
    pub tool_executions: u64,
    /// Wall-clock seconds between start and the latest status write.
    #[serde(default)]
    pub wall_time_seconds: f64,
}

/// Final outcome of a completed run, copied onto the parent task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Whether the run accomplished its goal.
    pub success: bool,
    /// The planner's final answer.
    pub output: String,
    /// Steps consumed, including the finishing one.
    pub steps_taken: u32,
}

/// One record in a run's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// 1-based step the record belongs to.
    pub step: u32,
    /// Type-discriminated payload.
    #[serde(flatten)]
    pub data: HistoryData,
    /// When the record was appended, ISO-8601 UTC.
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Build a record stamped with the current time.
    #[must_use]
    pub fn now(step: u32, data: HistoryData) -> Self {
        Self {
            step,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Payload of a history record, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HistoryData {
    /// A planner decision.
    Plan {
        /// What the planner chose to do.
        action: PlanAction,
        /// The planner's stated reasoning.
        thought: String,
        /// Tool name, for tool-call decisions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
        /// Tool arguments, for tool-call decisions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
    },
    /// The outcome of a sandbox invocation.
    ToolResult {
        /// Tool that was invoked.
        tool: String,
        /// Whether the invocation succeeded.
        success: bool,
        /// Captured output, truncated to [`MAX_OUTPUT_BYTES`].
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        /// Failure detail when `success` is false.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// An execution error outside the tool-result path.
    Error {
        /// The error string.
        error: String,
        /// Which component raised it.
        source: ErrorSource,
    },
}

/// Component that raised an error history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    /// The planner call failed.
    Planner,
    /// The sandbox failed before producing a tool outcome.
    Sandbox,
}

/// What the planner chose to do, as persisted in plan records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    /// Invoke a tool.
    ToolCall,
    /// Deliver the final answer.
    Finish,
}

/// Truncate to at most [`MAX_OUTPUT_BYTES`], respecting char boundaries.
#[must_use]
pub fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_OUTPUT_BYTES {
        return output.to_owned();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    output[..end].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_apply() {
        let spec: AgentRunSpec = serde_json::from_value(serde_json::json!({
            "agentRef": "demo",
            "taskRef": "demo-task",
            "goal": "do the thing",
        }))
        .unwrap();
        assert_eq!(spec.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(spec.timeout, DEFAULT_TIMEOUT_SECS);
        assert!(spec.context.is_empty());
    }

    #[test]
    fn history_entry_wire_shape() {
        let entry = HistoryEntry::now(
            3,
            HistoryData::ToolResult {
                tool: "calculator".into(),
                success: true,
                output: Some("1024".into()),
                error: None,
            },
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["step"], 3);
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["data"]["tool"], "calculator");
        assert!(value["timestamp"].is_string());

        let back: HistoryEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn error_record_names_its_source() {
        let entry = HistoryEntry::now(
            1,
            HistoryData::Error {
                error: "boom".into(),
                source: ErrorSource::Planner,
            },
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["source"], "planner");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_OUTPUT_BYTES); // 2 bytes per char
        let cut = truncate_output(&long);
        assert!(cut.len() <= MAX_OUTPUT_BYTES);
        assert!(cut.chars().all(|c| c == 'é'));

        let short = "hello";
        assert_eq!(truncate_output(short), "hello");
    }

    #[test]
    fn terminal_phases_are_terminal() {
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::Failed.is_terminal());
        assert!(!RunPhase::Planning.is_terminal());
        assert!(!RunPhase::Executing.is_terminal());
    }
}
