//! Shared fixtures for controller integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use adk::api::{Agent, AgentRun, AgentSpec, AgentTask, AgentTaskSpec, ObjectMeta};
use adk::controller::Controller;
use adk::engine::RunEngine;
use adk::error::Result;
use adk::planner::{Plan, PlanRequest, PlannerDecision, PlannerOutcome, parse_decision};
use adk::sandbox::{ExecutionResult, ToolExecutor};
use adk::store::{MemoryStore, ResourceStore};
use adk::tools::ToolRegistry;

/// Executor that replays scripted results and records every invocation.
#[derive(Debug, Default)]
pub struct StubExecutor {
    script: Mutex<VecDeque<ExecutionResult>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StubExecutor {
    pub fn new(script: Vec<ExecutionResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(outputs: &[&str]) -> Self {
        Self::new(
            outputs
                .iter()
                .map(|output| ExecutionResult {
                    success: true,
                    output: Some((*output).to_owned()),
                    error: None,
                    exit_code: 0,
                    duration_ms: 1,
                })
                .collect(),
        )
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for StubExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        args: &Value,
        _timeout: Duration,
    ) -> Result<ExecutionResult> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_owned(), args.clone()));
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ExecutionResult {
                success: true,
                output: Some("ok".to_owned()),
                error: None,
                exit_code: 0,
                duration_ms: 1,
            }))
    }
}

/// Planner that sleeps before every decision, to exercise budgets.
#[derive(Debug)]
pub struct SleepyPlanner {
    pub delay: Duration,
}

#[async_trait]
impl Plan for SleepyPlanner {
    async fn plan(&self, _request: PlanRequest<'_>) -> Result<PlannerOutcome> {
        tokio::time::sleep(self.delay).await;
        Ok(PlannerOutcome {
            decision: PlannerDecision::ToolCall {
                thought: "keep going".into(),
                tool: "list_directory".into(),
                args: serde_json::json!({}),
            },
            tokens_used: 0,
        })
    }
}

/// Planner that returns a fixed raw model reply, run through the parser.
#[derive(Debug)]
pub struct CannedReplyPlanner {
    pub content: String,
    pub tokens: u64,
}

#[async_trait]
impl Plan for CannedReplyPlanner {
    async fn plan(&self, _request: PlanRequest<'_>) -> Result<PlannerOutcome> {
        Ok(PlannerOutcome {
            decision: parse_decision(&self.content),
            tokens_used: self.tokens,
        })
    }
}

/// A store plus a running controller wired to the given seams.
pub struct Harness {
    pub store: Arc<dyn ResourceStore>,
    pub memory: MemoryStore,
}

pub fn start(planner: Arc<dyn Plan>, executor: Arc<dyn ToolExecutor>) -> Harness {
    let memory = MemoryStore::new();
    let store: Arc<dyn ResourceStore> = Arc::new(memory.clone());
    let registry = Arc::new(ToolRegistry::with_builtins());
    let engine = Arc::new(RunEngine::new(
        Arc::clone(&store),
        planner,
        executor,
        registry,
    ));
    let controller = Controller::new(Arc::clone(&store), engine);
    tokio::spawn(controller.run());
    Harness { store, memory }
}

pub fn agent(name: &str, tools: &[&str], max_steps: Option<u32>, timeout: Option<u64>) -> Agent {
    Agent {
        metadata: ObjectMeta::named(name),
        spec: AgentSpec {
            model: "demo-model".into(),
            system_prompt: "You are a demo agent.".into(),
            tools: tools.iter().map(|t| (*t).to_owned()).collect(),
            max_steps,
            timeout,
        },
        status: None,
    }
}

pub fn task(name: &str, agent_ref: &str, max_retries: u32) -> AgentTask {
    AgentTask {
        metadata: ObjectMeta::named(name),
        spec: AgentTaskSpec {
            agent_ref: agent_ref.into(),
            goal: "list and compute".into(),
            context: BTreeMap::new(),
            max_retries,
        },
        status: None,
    }
}

/// Poll until the task settles; panics after ten seconds.
pub async fn await_task_terminal(store: &Arc<dyn ResourceStore>, name: &str) -> AgentTask {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let task = store.get_task(name).await.expect("task should exist");
        if let Some(status) = &task.status {
            if status.phase.is_terminal() {
                return task;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task '{name}' never reached a terminal phase"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until the run settles; panics after ten seconds.
pub async fn await_run_terminal(store: &Arc<dyn ResourceStore>, name: &str) -> AgentRun {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(run) = store.get_run(name).await {
            if let Some(status) = &run.status {
                if status.phase.is_terminal() {
                    return run;
                }
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run '{name}' never reached a terminal phase"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
