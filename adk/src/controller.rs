//! Watch-driven dispatch.
//!
//! The [`Controller`] consumes the store's watch stream and routes events:
//! agent creation and updates validate the spec and assert an `Active`
//! status, task creation goes to the reconciler, run creation enqueues a
//! state machine on the engine, and terminal run transitions feed back
//! into the reconciler's retry loop.
//!
//! Reconciler handlers are short store round-trips and run inline, which
//! serializes them per resource; engine state machines are long-lived and
//! run on their own tasks, one per run name.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tracing::{debug, error, info};

use crate::api::{Agent, AgentPhase};
use crate::engine::RunEngine;
use crate::reconciler::TaskReconciler;
use crate::store::{Resource, ResourceStore, WatchEvent, WatchStream};

/// Routes watch events to the engine and reconciler.
///
/// Subscribes to the watch stream at construction, so resources created
/// after [`Controller::new`] returns are never missed even when
/// [`Controller::run`] is spawned later.
pub struct Controller {
    store: Arc<dyn ResourceStore>,
    engine: Arc<RunEngine>,
    reconciler: TaskReconciler,
    events: WatchStream,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

impl Controller {
    /// Assemble a controller over its collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>, engine: Arc<RunEngine>) -> Self {
        let reconciler = TaskReconciler::new(Arc::clone(&store));
        let events = store.watch();
        Self {
            store,
            engine,
            reconciler,
            events,
        }
    }

    /// Consume the watch stream until the store closes it.
    pub async fn run(mut self) {
        info!("Controller watching for resource events");
        while let Some(event) = self.events.next().await {
            self.dispatch(event).await;
        }
        info!("Watch stream closed, controller stopping");
    }

    async fn dispatch(&self, event: WatchEvent) {
        match event {
            WatchEvent::Added(Resource::Agent(agent)) => self.agent_created(&agent).await,
            WatchEvent::Added(Resource::Task(task)) => {
                if let Err(err) = self.reconciler.task_created(&task).await {
                    error!(task = %task.metadata.name, error = %err, "Task reconciliation failed");
                }
            }
            WatchEvent::Added(Resource::Run(run)) => {
                let engine = Arc::clone(&self.engine);
                let name = run.metadata.name.clone();
                tokio::spawn(async move {
                    engine.drive(&name).await;
                });
            }
            WatchEvent::Modified(Resource::Run(run)) => {
                if let Err(err) = self.reconciler.run_phase_changed(&run).await {
                    error!(run = %run.metadata.name, error = %err, "Run transition handling failed");
                }
            }
            WatchEvent::Modified(Resource::Agent(agent)) => self.agent_updated(&agent).await,
            WatchEvent::Modified(Resource::Task(task)) => {
                debug!(task = %task.metadata.name, "Task status updated");
            }
            WatchEvent::Deleted(resource) => {
                debug!(kind = resource.kind(), name = resource.name(), "Resource deleted");
            }
        }
    }

    async fn agent_created(&self, agent: &Agent) {
        let name = &agent.metadata.name;
        if let Err(err) = agent.spec.validate() {
            error!(agent = %name, error = %err, "Agent rejected");
            return;
        }
        info!(
            agent = %name,
            model = %agent.spec.model,
            tools = ?agent.spec.tools,
            "Agent configured",
        );
        if agent.status.is_none() {
            let patch = json!({
                "phase": "Active",
                "totalRuns": 0,
                "successfulRuns": 0,
                "failedRuns": 0,
            });
            if let Err(err) = self.store.patch_agent_status(name, patch).await {
                error!(agent = %name, error = %err, "Failed to activate agent");
            }
        }
    }

    /// Re-validate an updated agent and re-assert its `Active` status.
    ///
    /// Updates only require the model; an update may drop the system
    /// prompt. Status patches also arrive here via the watch stream, so
    /// the `Active` re-assertion is skipped when the status already says
    /// so — patching unconditionally would loop through the stream.
    async fn agent_updated(&self, agent: &Agent) {
        let name = &agent.metadata.name;
        if let Err(err) = agent.spec.validate_update() {
            error!(agent = %name, error = %err, "Agent update is invalid");
            return;
        }
        debug!(agent = %name, model = %agent.spec.model, "Agent updated");

        let already_active = agent
            .status
            .as_ref()
            .is_some_and(|status| status.phase == AgentPhase::Active);
        if !already_active
            && let Err(err) = self
                .store
                .patch_agent_status(name, json!({"phase": "Active"}))
                .await
        {
            error!(agent = %name, error = %err, "Failed to re-activate agent");
        }
    }
}
