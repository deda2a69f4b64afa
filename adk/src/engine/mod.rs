//! The per-run execution engine.
//!
//! [`RunEngine`] drives one `AgentRun` through its state machine:
//!
//! 1. Initialize status and resolve the referenced agent
//! 2. Call the planner with goal, context, tools, and history
//! 3. On a tool call, execute it in the sandbox and feed the result back
//! 4. Loop until the planner finishes, the step budget runs out, the
//!    wall-clock budget expires, or the planner fails
//!
//! Every transition and history append is a separate status patch, so the
//! run's progress is observable from the store alone and the engine can
//! resume from persisted state after a restart. Deleting a run mid-flight
//! surfaces as a not-found on the next round-trip, at which point the
//! engine stops issuing patches and abandons the state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::api::{
    Agent, AgentRunSpec, ErrorSource, HistoryData, HistoryEntry, PlanAction, RunPhase,
};
use crate::error::{Error, Result};
use crate::planner::{Exchange, Plan, PlanRequest, PlannerDecision};
use crate::sandbox::ToolExecutor;
use crate::store::ResourceStore;
use crate::tools::ToolRegistry;

/// System prompt used when the agent does not carry one.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI agent.";

/// Per-call ceiling on sandbox execution, seconds.
const TOOL_TIMEOUT_CAP_SECS: u64 = 60;

/// Attempts for a read-modify-write history append before giving up.
const APPEND_RETRIES: usize = 5;

/// Drives `AgentRun` resources to a terminal phase.
pub struct RunEngine {
    store: Arc<dyn ResourceStore>,
    planner: Arc<dyn Plan>,
    executor: Arc<dyn ToolExecutor>,
    registry: Arc<ToolRegistry>,
}

impl std::fmt::Debug for RunEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEngine").finish_non_exhaustive()
    }
}

/// Mutable state accumulated while driving one run.
struct RunState {
    spec: AgentRunSpec,
    start_time: DateTime<Utc>,
    current_step: u32,
    history: Vec<Exchange>,
    total_tokens: u64,
    tool_executions: u64,
}

impl RunState {
    fn elapsed_secs(&self) -> f64 {
        (Utc::now() - self.start_time).num_milliseconds() as f64 / 1000.0
    }

    fn resources(&self) -> Value {
        json!({
            "llmTokens": self.total_tokens,
            "toolExecutions": self.tool_executions,
            "wallTimeSeconds": self.elapsed_secs(),
        })
    }
}

impl RunEngine {
    /// Assemble an engine over its four collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        planner: Arc<dyn Plan>,
        executor: Arc<dyn ToolExecutor>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            store,
            planner,
            executor,
            registry,
        }
    }

    /// Drive one run to a terminal phase, logging the outcome.
    ///
    /// Safe to call for runs in any state: terminal runs are left alone,
    /// partially executed runs resume from their persisted status.
    pub async fn drive(&self, name: &str) {
        match self.drive_inner(name).await {
            Ok(phase) => info!(run = %name, ?phase, "Run reached terminal phase"),
            Err(err) if err.is_not_found() => {
                info!(run = %name, "Run disappeared mid-flight, abandoning state machine");
            }
            Err(err) => error!(run = %name, error = %err, "Run engine failed"),
        }
    }

    async fn drive_inner(&self, name: &str) -> Result<RunPhase> {
        let run = self.store.get_run(name).await?;

        // Terminal phases are absorbing.
        if let Some(status) = &run.status
            && status.phase.is_terminal()
        {
            debug!(run = %name, phase = ?status.phase, "Run already terminal");
            return Ok(status.phase);
        }

        let mut state = self.init_state(name, &run).await?;

        let agent = match self.store.get_agent(&state.spec.agent_ref).await {
            Ok(agent) => agent,
            Err(err) if err.is_not_found() => {
                let message = format!("Agent '{}' not found", state.spec.agent_ref);
                self.store
                    .patch_run_status(
                        name,
                        json!({
                            "phase": "Failed",
                            "error": message,
                            "completionTime": Utc::now(),
                        }),
                    )
                    .await?;
                return Ok(RunPhase::Failed);
            }
            Err(err) => return Err(err),
        };

        self.run_loop(name, &agent, &mut state).await
    }

    /// Initialize status for a fresh run, or rebuild in-memory state from
    /// a partially executed one.
    async fn init_state(&self, name: &str, run: &crate::api::AgentRun) -> Result<RunState> {
        let spec = run.spec.clone();

        if let Some(status) = &run.status
            && let Some(start_time) = status.start_time
        {
            debug!(run = %name, step = status.current_step, "Resuming run from persisted status");
            return Ok(RunState {
                current_step: status.current_step,
                history: rebuild_exchanges(&status.history),
                total_tokens: status.resources_used.llm_tokens,
                tool_executions: status.resources_used.tool_executions,
                start_time,
                spec,
            });
        }

        let start_time = Utc::now();
        self.store
            .patch_run_status(
                name,
                json!({
                    "phase": "Planning",
                    "currentStep": 0,
                    "history": [],
                    "startTime": start_time,
                    "resourcesUsed": {
                        "llmTokens": 0,
                        "toolExecutions": 0,
                        "wallTimeSeconds": 0.0,
                    },
                }),
            )
            .await?;

        Ok(RunState {
            spec,
            start_time,
            current_step: 0,
            history: Vec::new(),
            total_tokens: 0,
            tool_executions: 0,
        })
    }

    async fn run_loop(&self, name: &str, agent: &Agent, state: &mut RunState) -> Result<RunPhase> {
        let tools = self.registry.view_for(&agent.spec.tools);
        let system_prompt = if agent.spec.system_prompt.is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            agent.spec.system_prompt.as_str()
        };

        loop {
            if state.current_step >= state.spec.max_steps {
                let message = format!(
                    "Reached maximum steps ({}) without completing",
                    state.spec.max_steps
                );
                warn!(run = %name, max_steps = state.spec.max_steps, "Step budget exhausted");
                return self.fail(name, &state.spec.agent_ref, state, message).await;
            }
            state.current_step += 1;

            info!(
                run = %name,
                step = state.current_step,
                max_steps = state.spec.max_steps,
                "Run step",
            );
            self.store
                .patch_run_status(
                    name,
                    json!({"phase": "Planning", "currentStep": state.current_step}),
                )
                .await?;

            let elapsed = state.elapsed_secs();
            if elapsed > state.spec.timeout as f64 {
                let message = format!("Run exceeded timeout of {}s", state.spec.timeout);
                warn!(run = %name, timeout = state.spec.timeout, "Wall-clock budget exhausted");
                return self.fail(name, &state.spec.agent_ref, state, message).await;
            }

            let request = PlanRequest {
                model: &agent.spec.model,
                system_prompt,
                goal: &state.spec.goal,
                context: &state.spec.context,
                tools: &tools,
                history: &state.history,
            };
            let outcome = match self.planner.plan(request).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(run = %name, error = %err, "Planner call failed");
                    self.append_history(
                        name,
                        HistoryEntry::now(
                            state.current_step,
                            HistoryData::Error {
                                error: err.to_string(),
                                source: ErrorSource::Planner,
                            },
                        ),
                    )
                    .await?;
                    return self
                        .fail(name, &state.spec.agent_ref, state, err.to_string())
                        .await;
                }
            };
            state.total_tokens += outcome.tokens_used;

            self.append_history(
                name,
                HistoryEntry::now(state.current_step, plan_record(&outcome.decision)),
            )
            .await?;
            state.history.push(Exchange::Assistant(outcome.decision.clone()));

            match outcome.decision {
                PlannerDecision::Finish { answer, .. } => {
                    info!(run = %name, steps = state.current_step, "Run completed");
                    self.store
                        .patch_run_status(
                            name,
                            json!({
                                "phase": "Completed",
                                "result": {
                                    "success": true,
                                    "output": answer,
                                    "steps_taken": state.current_step,
                                },
                                "completionTime": Utc::now(),
                                "resourcesUsed": state.resources(),
                            }),
                        )
                        .await?;
                    self.update_agent_stats(&state.spec.agent_ref, true).await;
                    return Ok(RunPhase::Completed);
                }
                PlannerDecision::ToolCall { tool, args, .. } => {
                    self.store
                        .patch_run_status(name, json!({"phase": "Executing"}))
                        .await?;
                    self.execute_tool(name, state, tool, args, elapsed).await?;
                }
            }
        }
    }

    /// One sandbox invocation. Tool failures are observations fed back to
    /// the planner, not terminal errors.
    async fn execute_tool(
        &self,
        name: &str,
        state: &mut RunState,
        tool: String,
        args: Value,
        elapsed: f64,
    ) -> Result<()> {
        let remaining = (state.spec.timeout as f64 - elapsed).max(0.0) as u64;
        let budget = Duration::from_secs(remaining.min(TOOL_TIMEOUT_CAP_SECS));

        state.tool_executions += 1;
        match self.executor.execute(&tool, &args, budget).await {
            Ok(result) => {
                self.append_history(
                    name,
                    HistoryEntry::now(
                        state.current_step,
                        HistoryData::ToolResult {
                            tool: tool.clone(),
                            success: result.success,
                            output: result
                                .output
                                .as_deref()
                                .map(crate::api::truncate_output),
                            error: result.error.clone(),
                        },
                    ),
                )
                .await?;
                state.history.push(Exchange::Tool {
                    tool,
                    success: result.success,
                    output: result.output,
                    error: result.error,
                });
            }
            Err(err) => {
                error!(run = %name, tool = %tool, error = %err, "Tool execution failed");
                self.append_history(
                    name,
                    HistoryEntry::now(
                        state.current_step,
                        HistoryData::Error {
                            error: err.to_string(),
                            source: ErrorSource::Sandbox,
                        },
                    ),
                )
                .await?;
                state.history.push(Exchange::Tool {
                    tool,
                    success: false,
                    output: None,
                    error: Some(err.to_string()),
                });
            }
        }
        Ok(())
    }

    async fn fail(
        &self,
        name: &str,
        agent_ref: &str,
        state: &RunState,
        message: String,
    ) -> Result<RunPhase> {
        self.store
            .patch_run_status(
                name,
                json!({
                    "phase": "Failed",
                    "error": message,
                    "completionTime": Utc::now(),
                    "resourcesUsed": state.resources(),
                }),
            )
            .await?;
        self.update_agent_stats(agent_ref, false).await;
        Ok(RunPhase::Failed)
    }

    /// Append one history record via read-modify-write on the full array,
    /// retrying on resource-version conflicts.
    async fn append_history(&self, name: &str, entry: HistoryEntry) -> Result<()> {
        for _ in 0..APPEND_RETRIES {
            let run = self.store.get_run(name).await?;
            let version = run.metadata.resource_version.unwrap_or_default();
            let mut history = run.status.map(|status| status.history).unwrap_or_default();
            history.push(entry.clone());
            match self
                .store
                .patch_run_status_guarded(name, version, json!({"history": history}))
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_conflict() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(Error::store(format!(
            "history append for run '{name}' kept conflicting"
        )))
    }

    /// Best-effort aggregate counters on the parent agent. Failures are
    /// logged and swallowed so they cannot corrupt the run's own status.
    async fn update_agent_stats(&self, agent_name: &str, success: bool) {
        let result = async {
            let agent = self.store.get_agent(agent_name).await?;
            let status = agent.status.unwrap_or_default();
            self.store
                .patch_agent_status(
                    agent_name,
                    json!({
                        "totalRuns": status.total_runs + 1,
                        "successfulRuns": status.successful_runs + u64::from(success),
                        "failedRuns": status.failed_runs + u64::from(!success),
                        "lastRunTime": Utc::now(),
                    }),
                )
                .await
        }
        .await;

        if let Err(err) = result {
            warn!(agent = %agent_name, error = %err, "Failed to update agent stats");
        }
    }
}

/// The history record for a planner decision.
fn plan_record(decision: &PlannerDecision) -> HistoryData {
    match decision {
        PlannerDecision::ToolCall {
            thought,
            tool,
            args,
        } => HistoryData::Plan {
            action: PlanAction::ToolCall,
            thought: thought.clone(),
            tool: Some(tool.clone()),
            args: Some(args.clone()),
        },
        PlannerDecision::Finish { thought, .. } => HistoryData::Plan {
            action: PlanAction::Finish,
            thought: thought.clone(),
            tool: None,
            args: None,
        },
    }
}

/// Rebuild the in-memory conversation from persisted history, for resume.
fn rebuild_exchanges(entries: &[HistoryEntry]) -> Vec<Exchange> {
    let mut exchanges = Vec::new();
    let mut last_tool: Option<String> = None;

    for entry in entries {
        match &entry.data {
            HistoryData::Plan {
                action,
                thought,
                tool,
                args,
            } => {
                last_tool.clone_from(tool);
                let decision = match action {
                    PlanAction::ToolCall => PlannerDecision::ToolCall {
                        thought: thought.clone(),
                        tool: tool.clone().unwrap_or_default(),
                        args: args.clone().unwrap_or_else(|| json!({})),
                    },
                    PlanAction::Finish => PlannerDecision::Finish {
                        thought: thought.clone(),
                        answer: String::new(),
                    },
                };
                exchanges.push(Exchange::Assistant(decision));
            }
            HistoryData::ToolResult {
                tool,
                success,
                output,
                error,
            } => {
                exchanges.push(Exchange::Tool {
                    tool: tool.clone(),
                    success: *success,
                    output: output.clone(),
                    error: error.clone(),
                });
            }
            HistoryData::Error { error, source } => {
                // A sandbox-level failure was fed back as a failed tool
                // observation; planner errors terminated the run.
                if matches!(source, ErrorSource::Sandbox) {
                    exchanges.push(Exchange::Tool {
                        tool: last_tool.clone().unwrap_or_default(),
                        success: false,
                        output: None,
                        error: Some(error.clone()),
                    });
                }
            }
        }
    }
    exchanges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_record_captures_tool_calls() {
        let record = plan_record(&PlannerDecision::ToolCall {
            thought: "list".into(),
            tool: "list_directory".into(),
            args: json!({"path": "."}),
        });
        match record {
            HistoryData::Plan {
                action, tool, args, ..
            } => {
                assert_eq!(action, PlanAction::ToolCall);
                assert_eq!(tool.as_deref(), Some("list_directory"));
                assert_eq!(args, Some(json!({"path": "."})));
            }
            _ => panic!("expected plan record"),
        }
    }

    #[test]
    fn rebuild_pairs_sandbox_errors_with_their_tool() {
        let entries = vec![
            HistoryEntry::now(
                1,
                HistoryData::Plan {
                    action: PlanAction::ToolCall,
                    thought: "try".into(),
                    tool: Some("shell".into()),
                    args: Some(json!({"command": "ls"})),
                },
            ),
            HistoryEntry::now(
                1,
                HistoryData::Error {
                    error: "scratch dir vanished".into(),
                    source: ErrorSource::Sandbox,
                },
            ),
        ];
        let exchanges = rebuild_exchanges(&entries);
        assert_eq!(exchanges.len(), 2);
        match &exchanges[1] {
            Exchange::Tool {
                tool,
                success,
                error,
                ..
            } => {
                assert_eq!(tool, "shell");
                assert!(!success);
                assert_eq!(error.as_deref(), Some("scratch dir vanished"));
            }
            Exchange::Assistant(_) => panic!("expected tool exchange"),
        }
    }

    #[test]
    fn rebuild_skips_planner_errors() {
        let entries = vec![HistoryEntry::now(
            1,
            HistoryData::Error {
                error: "endpoint down".into(),
                source: ErrorSource::Planner,
            },
        )];
        assert!(rebuild_exchanges(&entries).is_empty());
    }
}
