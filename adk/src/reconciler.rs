//! Task reconciliation: materialize `AgentTask`s as `AgentRun` sequences.
//!
//! The reconciler creates the first child run when a task appears, then
//! watches child terminal transitions: success finalizes the task, failure
//! creates the next attempt until the retry budget is exhausted. Retries
//! are strictly sequential — attempt N+1 exists only after attempt N has
//! reached a terminal phase.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::api::{
    AGENT_LABEL, AgentRun, AgentRunSpec, AgentTask, ObjectMeta, OwnerReference, RunPhase,
    TASK_LABEL, api_version, run_name,
};
use crate::api::{DEFAULT_MAX_STEPS, DEFAULT_TIMEOUT_SECS};
use crate::error::{Error, Result};
use crate::store::ResourceStore;

/// Creates child runs and surfaces their outcome on the parent task.
pub struct TaskReconciler {
    store: Arc<dyn ResourceStore>,
}

impl std::fmt::Debug for TaskReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskReconciler").finish_non_exhaustive()
    }
}

impl TaskReconciler {
    /// Create a reconciler over the store.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Handle a newly created task: validate, create the first child run,
    /// and mark the task `Running`.
    ///
    /// Validation failures and a missing agent are terminal — the task is
    /// failed and no run is created. A store failure while creating the
    /// run is returned to the caller as retryable.
    pub async fn task_created(&self, task: &AgentTask) -> Result<()> {
        let name = &task.metadata.name;
        info!(task = %name, "AgentTask created");

        if let Err(err) = task.spec.validate() {
            return self.fail_task(name, &err.to_string()).await;
        }

        let agent = match self.store.get_agent(&task.spec.agent_ref).await {
            Ok(agent) => agent,
            Err(err) if err.is_not_found() => {
                let message = format!("Agent '{}' not found", task.spec.agent_ref);
                return self.fail_task(name, &message).await;
            }
            Err(err) => return Err(err),
        };

        let first_run = run_name(name, 1);
        let run = AgentRun {
            metadata: ObjectMeta::named(&first_run)
                .with_label(AGENT_LABEL, &task.spec.agent_ref)
                .with_label(TASK_LABEL, name)
                .with_owner(OwnerReference {
                    api_version: api_version(),
                    kind: "AgentTask".into(),
                    name: name.clone(),
                    uid: task.metadata.uid.clone(),
                    controller: true,
                    block_owner_deletion: true,
                }),
            spec: AgentRunSpec {
                agent_ref: task.spec.agent_ref.clone(),
                task_ref: name.clone(),
                goal: task.spec.goal.clone(),
                context: task.spec.context.clone(),
                max_steps: agent.spec.max_steps.unwrap_or(DEFAULT_MAX_STEPS),
                timeout: agent.spec.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS),
            },
            status: None,
        };

        if let Err(err) = self.store.create_run(run).await {
            error!(task = %name, error = %err, "Failed to create first run");
            return Err(err);
        }
        info!(task = %name, run = %first_run, "Created AgentRun");

        self.store
            .patch_task_status(
                name,
                json!({
                    "phase": "Running",
                    "currentRun": first_run,
                    "retryCount": 0,
                    "startTime": Utc::now(),
                }),
            )
            .await
    }

    /// Handle a child run reaching a terminal phase.
    ///
    /// Intermediate phases and stale events (a run that is no longer the
    /// task's current attempt, or a task already terminal) are ignored.
    pub async fn run_phase_changed(&self, run: &AgentRun) -> Result<()> {
        let Some(run_status) = &run.status else {
            return Ok(());
        };
        if !run_status.phase.is_terminal() {
            return Ok(());
        }

        let task_name = &run.spec.task_ref;
        let task = match self.store.get_task(task_name).await {
            Ok(task) => task,
            Err(err) if err.is_not_found() => {
                warn!(run = %run.metadata.name, task = %task_name, "Parent task not found");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let task_status = task.status.clone().unwrap_or_default();
        if task_status.phase.is_terminal() {
            return Ok(());
        }
        if task_status.current_run.as_deref() != Some(run.metadata.name.as_str()) {
            return Ok(());
        }

        info!(
            run = %run.metadata.name,
            task = %task_name,
            phase = ?run_status.phase,
            "Child run reached terminal phase",
        );

        match run_status.phase {
            RunPhase::Completed => {
                self.store
                    .patch_task_status(
                        task_name,
                        json!({
                            "phase": "Completed",
                            "result": run_status.result.clone(),
                            "completionTime": Utc::now(),
                        }),
                    )
                    .await
            }
            RunPhase::Failed => {
                let retry_count = task_status.retry_count;
                if retry_count < task.spec.max_retries {
                    self.retry(&task, run, retry_count).await
                } else {
                    error!(
                        task = %task_name,
                        retries = task.spec.max_retries,
                        "Task failed after exhausting retries",
                    );
                    self.store
                        .patch_task_status(
                            task_name,
                            json!({
                                "phase": "Failed",
                                "error": run_status
                                    .error
                                    .clone()
                                    .unwrap_or_else(|| "Unknown error".to_owned()),
                                "completionTime": Utc::now(),
                            }),
                        )
                        .await
                }
            }
            RunPhase::Planning | RunPhase::Executing => Ok(()),
        }
    }

    /// Create the next attempt, copying the failed run's spec.
    async fn retry(&self, task: &AgentTask, failed: &AgentRun, retry_count: u32) -> Result<()> {
        let task_name = &task.metadata.name;
        let next_run = run_name(task_name, retry_count + 2);

        let run = AgentRun {
            metadata: ObjectMeta::named(&next_run)
                .with_label(AGENT_LABEL, &failed.spec.agent_ref)
                .with_label(TASK_LABEL, task_name)
                .with_owner(OwnerReference {
                    api_version: api_version(),
                    kind: "AgentTask".into(),
                    name: task_name.clone(),
                    uid: task.metadata.uid.clone(),
                    controller: true,
                    block_owner_deletion: true,
                }),
            spec: AgentRunSpec {
                agent_ref: failed.spec.agent_ref.clone(),
                task_ref: task_name.clone(),
                goal: task.spec.goal.clone(),
                context: task.spec.context.clone(),
                // The failed attempt's budgets carry over; the agent is
                // not re-read mid-task.
                max_steps: failed.spec.max_steps,
                timeout: failed.spec.timeout,
            },
            status: None,
        };

        self.store.create_run(run).await?;
        info!(task = %task_name, run = %next_run, attempt = retry_count + 2, "Retrying task");

        self.store
            .patch_task_status(
                task_name,
                json!({
                    "phase": "Running",
                    "currentRun": next_run,
                    "retryCount": retry_count + 1,
                }),
            )
            .await
    }

    /// Terminally fail a task without creating any run.
    async fn fail_task(&self, name: &str, message: &str) -> Result<()> {
        error!(task = %name, error = %message, "Task failed validation");
        self.store
            .patch_task_status(
                name,
                json!({
                    "phase": "Failed",
                    "error": message,
                    "completionTime": Utc::now(),
                }),
            )
            .await?;
        Err(Error::validation(message))
    }
}
