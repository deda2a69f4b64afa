//! Isolated tool execution.
//!
//! [`SandboxExecutor`] resolves one tool invocation to its execution kind,
//! runs the payload under CPU, memory, network, and wall-clock limits, and
//! returns a structured [`ExecutionResult`]. Inline-code and shell payloads
//! run inside a container when a runtime is available; without one the
//! executor falls back to host subprocesses with reduced isolation, which
//! is logged and still timeout-enforced.
//!
//! The executor is stateless across invocations: every call gets its own
//! scratch directory, cleaned up on all exit paths.

mod container;
mod local;

pub(crate) use container::ContainerInvocation;
pub use container::ContainerRuntime;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::tools::{Execution, HttpMethod, ToolDefinition, ToolRegistry};

/// Python driver that loads `args.json`, calls `execute(**args)` from the
/// payload, and prints a single terminal JSON line with the outcome.
const DRIVER: &str = r#"
import json
import os
import sys
import traceback

here = os.path.dirname(os.path.abspath(__file__))
with open(os.path.join(here, "args.json")) as f:
    args = json.load(f)

try:
    from tool import execute
    result = execute(**args)
    print(json.dumps({"success": True, "result": result}))
except Exception as e:
    print(json.dumps({
        "success": False,
        "error": str(e),
        "traceback": traceback.format_exc(),
    }))
    sys.exit(1)
"#;

/// Structured outcome of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Captured output on success (or partial output on failure).
    pub output: Option<String>,
    /// Failure detail.
    pub error: Option<String>,
    /// Process exit code, or HTTP status for http-request tools.
    pub exit_code: i32,
    /// Wall-clock duration of the invocation.
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// A failed result carrying only an error message.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// The timeout failure for an `elapsed` budget of `secs` seconds.
    #[must_use]
    pub fn timed_out(secs: u64) -> Self {
        Self::failure(format!("Execution timed out after {secs}s"))
    }
}

/// Seam between the run engine and tool execution.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one tool invocation within `timeout`.
    ///
    /// Tool-level failures (unknown tool, non-zero exit, timeout) come back
    /// as `Ok` results with `success = false`; an `Err` means the executor
    /// itself could not run the invocation.
    async fn execute(&self, tool_name: &str, args: &Value, timeout: Duration)
    -> Result<ExecutionResult>;
}

/// Executes tools in containers with resource limits, with a host-process
/// fallback when no container runtime is available.
#[derive(Debug)]
pub struct SandboxExecutor {
    registry: Arc<ToolRegistry>,
    runtime: Option<ContainerRuntime>,
    image: String,
    memory_limit: String,
    cpu_limit: f64,
    http: reqwest::Client,
}

impl SandboxExecutor {
    /// Build an executor from configuration and a seeded registry.
    ///
    /// Probes for a container runtime once, up front; the result decides
    /// the isolation level for the process lifetime.
    #[must_use]
    pub fn new(config: &Config, registry: Arc<ToolRegistry>) -> Self {
        let runtime = if config.use_docker_sandbox {
            match ContainerRuntime::detect() {
                Some(runtime) => Some(runtime),
                None => {
                    warn!("container runtime not available, tools will run on the host");
                    None
                }
            }
        } else {
            None
        };

        Self {
            registry,
            runtime,
            image: config.sandbox_image.clone(),
            memory_limit: config.sandbox_memory_limit.clone(),
            cpu_limit: config.sandbox_cpu_limit,
            http: reqwest::Client::new(),
        }
    }

    /// Whether invocations run in containers.
    #[must_use]
    pub const fn is_containerized(&self) -> bool {
        self.runtime.is_some()
    }

    async fn execute_inline_code(
        &self,
        tool: &ToolDefinition,
        code: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let scratch = tempfile::tempdir()?;
        tokio::fs::write(scratch.path().join("tool.py"), code).await?;
        tokio::fs::write(scratch.path().join("args.json"), serde_json::to_vec(args)?).await?;
        tokio::fs::write(scratch.path().join("runner.py"), DRIVER).await?;

        let raw = if let Some(runtime) = &self.runtime {
            let invocation = ContainerInvocation {
                image: self.image.clone(),
                command: vec!["python".into(), "/workspace/runner.py".into()],
                volumes: vec![format!("{}:/workspace:ro", scratch.path().display())],
                workdir: Some("/workspace".into()),
                memory_limit: Some(self.memory_limit.clone()),
                cpu_limit: Some(self.cpu_limit),
                network_disabled: !tool.requires_network,
            };
            runtime.run(&invocation, timeout).await
        } else {
            warn!(tool = %tool.name, "executing tool on the host, container runtime unavailable");
            local::run_python(scratch.path(), timeout).await
        }?;

        Ok(parse_driver_output(raw))
    }

    async fn execute_shell_template(
        &self,
        tool: &ToolDefinition,
        template: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let command = substitute(template, args)?;

        let raw = if let Some(runtime) = &self.runtime {
            let invocation = ContainerInvocation {
                image: self.image.clone(),
                command: vec!["sh".into(), "-c".into(), command],
                volumes: Vec::new(),
                workdir: None,
                memory_limit: Some(self.memory_limit.clone()),
                cpu_limit: Some(self.cpu_limit),
                network_disabled: !tool.requires_network,
            };
            runtime.run(&invocation, timeout).await
        } else {
            warn!(tool = %tool.name, "executing shell tool on the host, container runtime unavailable");
            local::run_shell(&command, timeout).await
        }?;

        if raw.timed_out {
            return Ok(ExecutionResult::timed_out(timeout.as_secs()));
        }
        if let Some(spawn_error) = raw.spawn_error {
            return Ok(ExecutionResult::failure(spawn_error));
        }
        if raw.exit_code == 0 {
            Ok(ExecutionResult {
                success: true,
                output: Some(raw.stdout),
                error: None,
                exit_code: 0,
                duration_ms: raw.duration_ms,
            })
        } else {
            Ok(ExecutionResult {
                success: false,
                output: Some(raw.stdout),
                error: Some(raw.stderr),
                exit_code: raw.exit_code,
                duration_ms: raw.duration_ms,
            })
        }
    }

    async fn execute_http_request(
        &self,
        method: HttpMethod,
        url_template: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let url = substitute(url_template, args)?;
        let started = Instant::now();

        let request = match method {
            HttpMethod::Get => self.http.get(&url).query(&query_pairs(args)),
            HttpMethod::Delete => self.http.delete(&url).query(&query_pairs(args)),
            HttpMethod::Post => self.http.post(&url).json(args),
            HttpMethod::Put => self.http.put(&url).json(args),
        };

        match request.timeout(timeout).send().await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Ok(ExecutionResult {
                    success: status.is_success(),
                    output: Some(body),
                    error: (!status.is_success()).then(|| format!("HTTP status {status}")),
                    exit_code: i32::from(status.as_u16()),
                    duration_ms: elapsed_ms(started),
                })
            }
            Err(source) if source.is_timeout() => Ok(ExecutionResult::timed_out(timeout.as_secs())),
            Err(source) => Ok(ExecutionResult {
                success: false,
                error: Some(source.to_string()),
                duration_ms: elapsed_ms(started),
                ..ExecutionResult::default()
            }),
        }
    }
}

#[async_trait]
impl ToolExecutor for SandboxExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let Some(tool) = self.registry.get(tool_name) else {
            return Ok(ExecutionResult::failure(format!(
                "Unknown tool: {tool_name}"
            )));
        };

        info!(tool = %tool_name, timeout_secs = timeout.as_secs(), "Executing tool");

        let started = Instant::now();
        let mut result = match &tool.execution {
            Execution::InlineCode(code) => {
                self.execute_inline_code(tool, code, args, timeout).await?
            }
            Execution::ShellTemplate(template) => {
                self.execute_shell_template(tool, template, args, timeout)
                    .await?
            }
            Execution::HttpRequest {
                method,
                url_template,
            } => {
                self.execute_http_request(*method, url_template, args, timeout)
                    .await?
            }
        };
        if result.duration_ms == 0 {
            result.duration_ms = elapsed_ms(started);
        }
        Ok(result)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Interpret the raw process outcome of an inline-code run.
///
/// The driver prints one terminal JSON line; anything the payload printed
/// before it is ignored. Output that is not driver JSON is forwarded as-is.
fn parse_driver_output(raw: local::RawOutcome) -> ExecutionResult {
    if raw.timed_out {
        return ExecutionResult::timed_out(raw.budget_secs);
    }
    if raw.spawn_error.is_some() {
        return ExecutionResult {
            success: false,
            error: raw.spawn_error,
            exit_code: raw.exit_code,
            duration_ms: raw.duration_ms,
            ..ExecutionResult::default()
        };
    }

    let last_line = raw.stdout.lines().rev().find(|line| !line.trim().is_empty());
    let parsed = last_line.and_then(|line| serde_json::from_str::<Value>(line.trim()).ok());

    match parsed {
        Some(outcome) if outcome.get("success").and_then(Value::as_bool) == Some(true) => {
            let payload = outcome.get("result").cloned().unwrap_or(Value::Null);
            ExecutionResult {
                success: true,
                output: serde_json::to_string(&payload).ok(),
                error: None,
                exit_code: raw.exit_code,
                duration_ms: raw.duration_ms,
            }
        }
        Some(outcome) => ExecutionResult {
            success: false,
            output: None,
            error: Some(
                outcome
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_owned(),
            ),
            exit_code: raw.exit_code,
            duration_ms: raw.duration_ms,
        },
        // Payload bypassed the driver protocol; forward what it printed.
        None if raw.exit_code == 0 => ExecutionResult {
            success: true,
            output: Some(raw.stdout),
            error: None,
            exit_code: 0,
            duration_ms: raw.duration_ms,
        },
        None => ExecutionResult {
            success: false,
            output: Some(raw.stdout),
            error: Some(raw.stderr),
            exit_code: raw.exit_code,
            duration_ms: raw.duration_ms,
        },
    }
}

/// Substitute named `{placeholder}` occurrences with argument values.
///
/// String arguments substitute verbatim; other JSON values substitute as
/// their compact JSON rendering. A placeholder with no matching argument
/// is an executor error, mirroring strict template formatting.
fn substitute(template: &str, args: &Value) -> Result<String> {
    let empty = serde_json::Map::new();
    let map = args.as_object().unwrap_or(&empty);
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let Some(close) = tail.find('}') else {
            return Err(Error::sandbox(format!(
                "unbalanced '{{' in template '{template}'"
            )));
        };
        let name = &tail[..close];
        match map.get(name) {
            Some(Value::String(text)) => result.push_str(text),
            Some(other) => result.push_str(&other.to_string()),
            None => {
                return Err(Error::sandbox(format!(
                    "missing argument '{name}' for template '{template}'"
                )));
            }
        }
        rest = &tail[close + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

/// Flatten arguments into query pairs for GET/DELETE http tools.
fn query_pairs(args: &Value) -> Vec<(String, String)> {
    args.as_object()
        .map(|map| {
            map.iter()
                .map(|(key, value)| {
                    let rendered = match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), rendered)
                })
                .collect()
        })
        .unwrap_or_default()
}
