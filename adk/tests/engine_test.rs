//! End-to-end run engine scenarios against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use adk::api::{HistoryData, RunPhase, TaskPhase};
use adk::config::Config;
use adk::planner::{MockPlanner, PlannerDecision};
use adk::sandbox::{SandboxExecutor, ToolExecutor};
use adk::store::{Resource, ResourceStore, WatchEvent};
use adk::tools::ToolRegistry;

use common::{CannedReplyPlanner, SleepyPlanner, StubExecutor, await_run_terminal, await_task_terminal};

#[tokio::test]
async fn happy_path_completes_with_two_tool_calls() {
    let planner = Arc::new(MockPlanner::new(vec![
        PlannerDecision::ToolCall {
            thought: "see what files are here".into(),
            tool: "list_directory".into(),
            args: json!({"path": "."}),
        },
        PlannerDecision::ToolCall {
            thought: "compute the demo value".into(),
            tool: "calculator".into(),
            args: json!({"expression": "2**10"}),
        },
        PlannerDecision::Finish {
            thought: "all demo steps are done".into(),
            answer: "Demo completed".into(),
        },
    ]));
    let executor = Arc::new(StubExecutor::succeeding(&["[]", "1024"]));
    let executor_handle: Arc<dyn ToolExecutor> = Arc::clone(&executor);
    let harness = common::start(planner, executor_handle);

    let mut events = harness.memory.watch();

    harness
        .store
        .create_agent(common::agent("demo", &["list_directory", "calculator"], None, None))
        .await
        .unwrap();
    harness
        .store
        .create_task(common::task("demo-task", "demo", 3))
        .await
        .unwrap();

    let task = await_task_terminal(&harness.store, "demo-task").await;
    let task_status = task.status.unwrap();
    assert_eq!(task_status.phase, TaskPhase::Completed);
    assert_eq!(task_status.retry_count, 0);

    let run = harness.store.get_run("demo-task-run-1").await.unwrap();
    let status = run.status.unwrap();
    assert_eq!(status.phase, RunPhase::Completed);
    assert_eq!(status.current_step, 3);
    assert_eq!(status.resources_used.tool_executions, 2);

    let result = status.result.unwrap();
    assert!(result.success);
    assert_eq!(result.output, "Demo completed");
    assert_eq!(result.steps_taken, 3);
    assert_eq!(task_status.result, Some(result));

    // The sandbox saw exactly the planned calls, in order.
    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "list_directory");
    assert_eq!(calls[1].0, "calculator");

    // History is step-ordered and within the step budget.
    let steps: Vec<u32> = status.history.iter().map(|entry| entry.step).collect();
    assert!(steps.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(steps.iter().all(|step| *step <= run.spec.max_steps));

    // Status patches kept counters monotonic, and the terminal phase was
    // never left once reached.
    let mut last_step = 0;
    let mut last_tokens = 0;
    let mut last_tools = 0;
    let mut terminal_seen = false;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), events.next()).await
    {
        if let WatchEvent::Modified(Resource::Run(run)) = event {
            let Some(status) = run.status else { continue };
            assert!(!terminal_seen, "status patched after terminal phase");
            assert!(status.current_step >= last_step);
            assert!(status.resources_used.llm_tokens >= last_tokens);
            assert!(status.resources_used.tool_executions >= last_tools);
            last_step = status.current_step;
            last_tokens = status.resources_used.llm_tokens;
            last_tools = status.resources_used.tool_executions;
            terminal_seen = status.phase.is_terminal();
        }
    }
    assert!(terminal_seen);
}

#[tokio::test]
async fn unknown_tool_failure_is_an_observation_not_a_crash() {
    let planner = Arc::new(MockPlanner::new(vec![
        PlannerDecision::ToolCall {
            thought: "try something that does not exist".into(),
            tool: "nope".into(),
            args: json!({}),
        },
        PlannerDecision::Finish {
            thought: "recovered".into(),
            answer: "done without the tool".into(),
        },
    ]));
    // The real executor resolves the unknown tool against the registry.
    let config = Config {
        use_docker_sandbox: false,
        ..Config::default()
    };
    let executor = Arc::new(SandboxExecutor::new(
        &config,
        Arc::new(ToolRegistry::with_builtins()),
    ));
    let harness = common::start(planner, executor);

    harness
        .store
        .create_agent(common::agent("demo", &[], None, None))
        .await
        .unwrap();
    harness
        .store
        .create_task(common::task("t", "demo", 3))
        .await
        .unwrap();

    let run = await_run_terminal(&harness.store, "t-run-1").await;
    let status = run.status.unwrap();
    assert_eq!(status.phase, RunPhase::Completed);

    let tool_results: Vec<_> = status
        .history
        .iter()
        .filter_map(|entry| match &entry.data {
            HistoryData::ToolResult {
                tool,
                success,
                error,
                ..
            } => Some((tool.clone(), *success, error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(tool_results.len(), 1);
    let (tool, success, error) = &tool_results[0];
    assert_eq!(tool, "nope");
    assert!(!success);
    assert_eq!(error.as_deref(), Some("Unknown tool: nope"));
}

#[tokio::test]
async fn wall_clock_budget_fails_the_run() {
    let planner = Arc::new(SleepyPlanner {
        delay: Duration::from_secs(2),
    });
    let executor = Arc::new(StubExecutor::default());
    let harness = common::start(planner, executor);

    harness
        .store
        .create_agent(common::agent("demo", &[], None, Some(1)))
        .await
        .unwrap();
    harness
        .store
        .create_task(common::task("t", "demo", 0))
        .await
        .unwrap();

    let run = await_run_terminal(&harness.store, "t-run-1").await;
    let status = run.status.unwrap();
    assert_eq!(status.phase, RunPhase::Failed);
    assert_eq!(
        status.error.as_deref(),
        Some("Run exceeded timeout of 1s")
    );

    let task = await_task_terminal(&harness.store, "t").await;
    assert_eq!(task.status.unwrap().phase, TaskPhase::Failed);
}

#[tokio::test]
async fn malformed_reply_finishes_in_one_step() {
    let planner = Arc::new(CannedReplyPlanner {
        content: "hello world".into(),
        tokens: 42,
    });
    let executor = Arc::new(StubExecutor::default());
    let harness = common::start(planner, Arc::clone(&executor) as Arc<dyn ToolExecutor>);

    harness
        .store
        .create_agent(common::agent("demo", &[], None, None))
        .await
        .unwrap();
    harness
        .store
        .create_task(common::task("t", "demo", 3))
        .await
        .unwrap();

    let run = await_run_terminal(&harness.store, "t-run-1").await;
    let status = run.status.unwrap();
    assert_eq!(status.phase, RunPhase::Completed);
    assert_eq!(status.current_step, 1);
    assert_eq!(status.result.unwrap().output, "hello world");
    assert_eq!(status.resources_used.llm_tokens, 42);

    // A run whose first decision finishes performs zero sandbox calls.
    assert!(executor.calls().is_empty());
    assert_eq!(status.resources_used.tool_executions, 0);
}

#[tokio::test]
async fn terminal_runs_update_agent_counters() {
    let planner = Arc::new(MockPlanner::new(vec![PlannerDecision::Finish {
        thought: "trivial".into(),
        answer: "ok".into(),
    }]));
    let executor = Arc::new(StubExecutor::default());
    let harness = common::start(planner, executor);

    harness
        .store
        .create_agent(common::agent("demo", &[], None, None))
        .await
        .unwrap();
    harness
        .store
        .create_task(common::task("t", "demo", 3))
        .await
        .unwrap();

    await_task_terminal(&harness.store, "t").await;

    // Counter updates are best-effort and land right after the terminal
    // patch; poll briefly.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let agent = harness.store.get_agent("demo").await.unwrap();
        if let Some(status) = agent.status {
            if status.total_runs == 1 {
                assert_eq!(status.successful_runs, 1);
                assert_eq!(status.failed_runs, 0);
                assert!(status.last_run_time.is_some());
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "agent counters never updated"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
