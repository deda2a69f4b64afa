//! Controller entry point.
//!
//! Watches Agent, AgentTask, and AgentRun resources and orchestrates agent
//! execution. `--demo` runs a scripted agent loop end-to-end against the
//! in-memory store, without a cluster or an LLM endpoint.

use std::sync::Arc;
use std::time::Duration;

use adk::Config;
use adk::controller::Controller;
use adk::engine::RunEngine;
use adk::identity::IdentityProvider;
use adk::planner::{MockPlanner, Plan, Planner, PlannerDecision};
use adk::sandbox::SandboxExecutor;
use adk::store::{MemoryStore, ResourceStore};
use adk::tools::ToolRegistry;
use tracing::info;

fn init_telemetry() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> adk::Result<()> {
    init_telemetry();

    let demo = std::env::args().any(|arg| arg == "--demo");
    let mut config = Config::from_env();

    info!(
        vllm_endpoint = %config.vllm_endpoint,
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        sandbox_image = %config.sandbox_image,
        "Starting adk controller",
    );

    if demo {
        config.use_docker_sandbox = false;
        return run_demo(&config).await;
    }
    run_controller(&config).await
}

/// Wire the components and serve until the watch stream closes.
async fn run_controller(config: &Config) -> adk::Result<()> {
    let identity = IdentityProvider::from_config(config);
    let rotation = identity
        .enabled()
        .then(|| identity.start_rotation_watcher(None));
    info!(identity = %identity.identity(), "Workload identity ready");

    let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
    let registry = Arc::new(ToolRegistry::with_builtins());
    let executor = Arc::new(SandboxExecutor::new(config, Arc::clone(&registry)));
    let planner: Arc<dyn Plan> = Arc::new(
        Planner::new(&config.vllm_endpoint).with_default_model(&config.default_model),
    );

    let engine = Arc::new(RunEngine::new(
        Arc::clone(&store),
        planner,
        executor,
        registry,
    ));
    let controller = Controller::new(store, engine);
    controller.run().await;

    if let Some(rotation) = rotation {
        rotation.stop().await;
    }
    Ok(())
}

/// Drive a scripted agent loop end-to-end against the in-memory store.
async fn run_demo(config: &Config) -> adk::Result<()> {
    use adk::api::{Agent, AgentSpec, AgentTask, AgentTaskSpec, ObjectMeta};

    let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
    let registry = Arc::new(ToolRegistry::with_builtins());
    let executor = Arc::new(SandboxExecutor::new(config, Arc::clone(&registry)));

    let planner: Arc<dyn Plan> = Arc::new(MockPlanner::new(vec![
        PlannerDecision::ToolCall {
            thought: "First, list the current directory to see what is here.".into(),
            tool: "list_directory".into(),
            args: serde_json::json!({"path": "."}),
        },
        PlannerDecision::ToolCall {
            thought: "Run a quick calculation as a demo.".into(),
            tool: "calculator".into(),
            args: serde_json::json!({"expression": "2 ** 10"}),
        },
        PlannerDecision::Finish {
            thought: "The demo tasks are done.".into(),
            answer: "Demo completed".into(),
        },
    ]));

    let engine = Arc::new(RunEngine::new(
        Arc::clone(&store),
        planner,
        executor,
        registry,
    ));
    let controller = Controller::new(Arc::clone(&store), engine);
    tokio::spawn(async move { controller.run().await });

    store
        .create_agent(Agent {
            metadata: ObjectMeta::named("demo"),
            spec: AgentSpec {
                model: config.default_model.clone(),
                system_prompt: "You are a helpful demo agent.".into(),
                tools: Vec::new(),
                max_steps: Some(5),
                timeout: None,
            },
            status: None,
        })
        .await?;

    store
        .create_task(AgentTask {
            metadata: ObjectMeta::named("demo-task"),
            spec: AgentTaskSpec {
                agent_ref: "demo".into(),
                goal: "List the working directory and compute 2 ** 10".into(),
                context: std::collections::BTreeMap::new(),
                max_retries: 1,
            },
            status: None,
        })
        .await?;

    // Poll until the task settles.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    let task = loop {
        let task = store.get_task("demo-task").await?;
        if let Some(status) = &task.status
            && status.phase.is_terminal()
        {
            break task;
        }
        if tokio::time::Instant::now() >= deadline {
            break task;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    let status = task.status.unwrap_or_default();
    println!("task phase:  {:?}", status.phase);
    if let Some(result) = &status.result {
        println!("result:      {} (steps: {})", result.output, result.steps_taken);
    }
    if let Some(error) = &status.error {
        println!("error:       {error}");
    }
    if let Some(run_name) = &status.current_run {
        let run = store.get_run(run_name).await?;
        if let Some(run_status) = run.status {
            println!("run history ({} entries):", run_status.history.len());
            for entry in run_status.history {
                println!("  step {}: {}", entry.step, serde_json::to_string(&entry.data)?);
            }
        }
    }
    Ok(())
}
