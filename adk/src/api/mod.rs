//! Resource model for the `ai.adk.io/v1` API group.
//!
//! Three persistent resource kinds live in the declarative store:
//!
//! - [`Agent`] — a behavioral template: LLM configuration plus a tool set.
//! - [`AgentTask`] — a user request to accomplish a goal using an agent.
//! - [`AgentRun`] — a single end-to-end execution attempt of a task.
//!
//! All wire types serialize in the store's camelCase JSON dialect and
//! round-trip losslessly through [`serde_json::Value`], which is what the
//! status-patch machinery relies on.

mod agent;
mod meta;
mod run;
mod task;

pub use agent::{Agent, AgentPhase, AgentSpec, AgentStatus};
pub use meta::{ObjectMeta, OwnerReference};
pub use run::{
    AgentRun, AgentRunSpec, AgentRunStatus, DEFAULT_MAX_STEPS, DEFAULT_TIMEOUT_SECS, ErrorSource,
    HistoryData, HistoryEntry, MAX_OUTPUT_BYTES, PlanAction, ResourcesUsed, RunPhase, RunResult,
    truncate_output,
};
pub use task::{AgentTask, AgentTaskSpec, AgentTaskStatus, DEFAULT_MAX_RETRIES, TaskPhase, run_name};

/// API group of every resource kind in this crate.
pub const API_GROUP: &str = "ai.adk.io";

/// API version of every resource kind in this crate.
pub const API_VERSION: &str = "v1";

/// Label carrying the owning agent's name on child runs.
pub const AGENT_LABEL: &str = "ai.adk.io/agent";

/// Label carrying the owning task's name on child runs.
pub const TASK_LABEL: &str = "ai.adk.io/task";

/// `apiVersion` string for resource manifests.
#[must_use]
pub fn api_version() -> String {
    format!("{API_GROUP}/{API_VERSION}")
}
