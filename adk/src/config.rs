//! Controller configuration loaded from the environment.

use std::env;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenAI-compatible chat-completions endpoint.
    pub vllm_endpoint: String,

    /// Namespace to watch; `None` watches all namespaces.
    pub namespace: Option<String>,

    /// Container image tool payloads run in.
    pub sandbox_image: String,

    /// CPU limit per sandbox invocation, in cores.
    pub sandbox_cpu_limit: f64,

    /// Memory limit per sandbox invocation (e.g. `512Mi`).
    pub sandbox_memory_limit: String,

    /// Default sandbox timeout in seconds.
    pub sandbox_timeout: u64,

    /// Whether tool payloads run in containers (false: host fallback).
    pub use_docker_sandbox: bool,

    /// Workload-API socket path for SPIFFE identity, when deployed.
    pub spiffe_socket: Option<String>,

    /// Model used when an agent does not name one.
    pub default_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vllm_endpoint: "http://vllm-service:8000/v1".into(),
            namespace: None,
            sandbox_image: "python:3.11-slim".into(),
            sandbox_cpu_limit: 1.0,
            sandbox_memory_limit: "512Mi".into(),
            sandbox_timeout: 60,
            use_docker_sandbox: true,
            spiffe_socket: None,
            default_model: "codellama/CodeLlama-7b-Instruct-hf".into(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            vllm_endpoint: env::var("VLLM_ENDPOINT").unwrap_or(defaults.vllm_endpoint),
            namespace: env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty()),
            sandbox_image: env::var("SANDBOX_IMAGE").unwrap_or(defaults.sandbox_image),
            sandbox_cpu_limit: env::var("SANDBOX_CPU_LIMIT")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.sandbox_cpu_limit),
            sandbox_memory_limit: env::var("SANDBOX_MEMORY_LIMIT")
                .unwrap_or(defaults.sandbox_memory_limit),
            sandbox_timeout: env::var("SANDBOX_TIMEOUT")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.sandbox_timeout),
            use_docker_sandbox: env::var("USE_DOCKER_SANDBOX")
                .map(|raw| raw.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.use_docker_sandbox),
            spiffe_socket: env::var("SPIFFE_SOCKET").ok().filter(|s| !s.is_empty()),
            default_model: env::var("DEFAULT_MODEL").unwrap_or(defaults.default_model),
        }
    }
}
