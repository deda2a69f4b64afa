//! Container runtime integration.
//!
//! Drives the Docker CLI (`docker run`) rather than the daemon socket,
//! which works in restricted environments where the socket is not
//! mounted. Any Docker-compatible CLI (e.g. Podman with the docker shim)
//! satisfies the contract: volume mounts, memory limits, CPU quota,
//! network disable, and synchronous run-to-completion with captured
//! stdout/stderr.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

use super::local::{self, RawOutcome};

/// CPU scheduler period used when converting a core count into a quota.
const CPU_PERIOD_MICROS: u64 = 100_000;

/// One resolved container invocation.
#[derive(Debug, Clone)]
pub(crate) struct ContainerInvocation {
    /// Image to run.
    pub image: String,
    /// Command executed inside the container.
    pub command: Vec<String>,
    /// Volume specs (`host:container:mode`).
    pub volumes: Vec<String>,
    /// Working directory inside the container.
    pub workdir: Option<String>,
    /// Memory limit (`512Mi`, `1Gi`, `256m`, ...).
    pub memory_limit: Option<String>,
    /// CPU limit in cores, converted to period/quota.
    pub cpu_limit: Option<f64>,
    /// Whether networking is disabled.
    pub network_disabled: bool,
}

/// Container runtime backed by a Docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    binary: String,
}

impl ContainerRuntime {
    /// Probe for a usable runtime; `None` when the daemon is unreachable.
    #[must_use]
    pub fn detect() -> Option<Self> {
        Self::detect_binary("docker")
    }

    fn detect_binary(binary: &str) -> Option<Self> {
        let probe = std::process::Command::new(binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match probe {
            Ok(status) if status.success() => Some(Self {
                binary: binary.to_owned(),
            }),
            _ => None,
        }
    }

    /// Build the full `docker run` argument list for an invocation.
    ///
    /// Exposed to unit tests so limit plumbing can be checked without a
    /// live daemon.
    pub(crate) fn build_run_args(invocation: &ContainerInvocation, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_owned(),
            "--rm".to_owned(),
            "--name".to_owned(),
            name.to_owned(),
        ];

        if invocation.network_disabled {
            args.push("--network=none".to_owned());
        }
        if let Some(memory) = &invocation.memory_limit {
            args.push(format!("--memory={}", normalize_memory(memory)));
        }
        if let Some(cores) = invocation.cpu_limit {
            args.push(format!("--cpu-period={CPU_PERIOD_MICROS}"));
            args.push(format!(
                "--cpu-quota={}",
                (cores * CPU_PERIOD_MICROS as f64) as u64
            ));
        }
        for volume in &invocation.volumes {
            args.push("-v".to_owned());
            args.push(volume.clone());
        }
        if let Some(workdir) = &invocation.workdir {
            args.push("-w".to_owned());
            args.push(workdir.clone());
        }

        args.push(invocation.image.clone());
        args.extend(invocation.command.iter().cloned());
        args
    }

    /// Run the invocation to completion within `timeout`.
    ///
    /// On expiry the named container is force-removed so nothing keeps
    /// running behind the engine's back.
    pub(crate) async fn run(
        &self,
        invocation: &ContainerInvocation,
        timeout: Duration,
    ) -> Result<RawOutcome> {
        let name = format!("adk-sandbox-{}", Uuid::new_v4());
        let args = Self::build_run_args(invocation, &name);
        debug!(image = %invocation.image, container = %name, "starting sandbox container");

        let mut command = Command::new(&self.binary);
        command.args(&args);
        let mut outcome = local::run_with_timeout(command, timeout).await?;

        if outcome.timed_out {
            self.force_remove(&name).await;
        } else if outcome.exit_code != 0 && image_missing(&outcome.stderr) {
            outcome.stderr = format!("Sandbox image not found: {}", invocation.image);
        }
        Ok(outcome)
    }

    async fn force_remove(&self, name: &str) {
        let removed = Command::new(&self.binary)
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(source) = removed {
            warn!(container = %name, error = %source, "failed to remove expired sandbox container");
        }
    }
}

/// Whether the CLI stderr indicates the image could not be resolved.
fn image_missing(stderr: &str) -> bool {
    stderr.contains("pull access denied")
        || stderr.contains("manifest unknown")
        || stderr.contains("No such image")
        || stderr.contains("repository does not exist")
}

/// Convert store-style quantities (`512Mi`, `1Gi`) to CLI suffixes.
fn normalize_memory(limit: &str) -> String {
    limit
        .trim()
        .replace("Ki", "k")
        .replace("Mi", "m")
        .replace("Gi", "g")
}
