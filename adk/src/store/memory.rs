//! In-process store implementation.
//!
//! Backs the test suite and the local demo mode. Versioning, merge-patch,
//! ownership cascade, and watch fan-out behave like the real store so the
//! components above cannot tell the difference.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::api::{Agent, AgentRun, AgentTask};
use crate::error::{Error, Result};

use super::{Resource, ResourceStore, WatchEvent, WatchStream, merge_patch};

/// Buffered watch events per subscriber before old events are dropped.
const WATCH_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct State {
    agents: BTreeMap<String, Agent>,
    tasks: BTreeMap<String, AgentTask>,
    runs: BTreeMap<String, AgentRun>,
    revision: u64,
}

/// An in-memory [`ResourceStore`].
///
/// Cheap to clone; clones share the same state and event stream.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            events,
        }
    }

    fn emit(&self, event: WatchEvent) {
        // Send only fails when nobody is watching, which is fine.
        let _ = self.events.send(event);
    }

    fn stamp(meta: &mut crate::api::ObjectMeta, revision: u64) {
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = Some(revision);
        meta.creation_timestamp = Some(Utc::now());
    }
}

/// Merge `patch` into an optional typed status subresource.
fn patched_status<S>(current: &Option<S>, patch: &Value) -> Result<Option<S>>
where
    S: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(current)?;
    merge_patch(&mut value, patch);
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_agent(&self, name: &str) -> Result<Agent> {
        let state = self.state.read().expect("store lock poisoned");
        state
            .agents
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("Agent", name))
    }

    async fn get_task(&self, name: &str) -> Result<AgentTask> {
        let state = self.state.read().expect("store lock poisoned");
        state
            .tasks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("AgentTask", name))
    }

    async fn get_run(&self, name: &str) -> Result<AgentRun> {
        let state = self.state.read().expect("store lock poisoned");
        state
            .runs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("AgentRun", name))
    }

    async fn create_agent(&self, mut agent: Agent) -> Result<Agent> {
        let created = {
            let mut state = self.state.write().expect("store lock poisoned");
            if state.agents.contains_key(&agent.metadata.name) {
                return Err(Error::store(format!(
                    "Agent '{}' already exists",
                    agent.metadata.name
                )));
            }
            state.revision += 1;
            Self::stamp(&mut agent.metadata, state.revision);
            state
                .agents
                .insert(agent.metadata.name.clone(), agent.clone());
            agent
        };
        self.emit(WatchEvent::Added(Resource::Agent(created.clone())));
        Ok(created)
    }

    async fn create_task(&self, mut task: AgentTask) -> Result<AgentTask> {
        let created = {
            let mut state = self.state.write().expect("store lock poisoned");
            if state.tasks.contains_key(&task.metadata.name) {
                return Err(Error::store(format!(
                    "AgentTask '{}' already exists",
                    task.metadata.name
                )));
            }
            state.revision += 1;
            Self::stamp(&mut task.metadata, state.revision);
            state.tasks.insert(task.metadata.name.clone(), task.clone());
            task
        };
        self.emit(WatchEvent::Added(Resource::Task(created.clone())));
        Ok(created)
    }

    async fn create_run(&self, mut run: AgentRun) -> Result<AgentRun> {
        let created = {
            let mut state = self.state.write().expect("store lock poisoned");
            if state.runs.contains_key(&run.metadata.name) {
                return Err(Error::store(format!(
                    "AgentRun '{}' already exists",
                    run.metadata.name
                )));
            }
            state.revision += 1;
            Self::stamp(&mut run.metadata, state.revision);
            state.runs.insert(run.metadata.name.clone(), run.clone());
            run
        };
        self.emit(WatchEvent::Added(Resource::Run(created.clone())));
        Ok(created)
    }

    async fn patch_agent_status(&self, name: &str, patch: Value) -> Result<()> {
        let updated = {
            let mut state = self.state.write().expect("store lock poisoned");
            if !state.agents.contains_key(name) {
                return Err(Error::not_found("Agent", name));
            }
            state.revision += 1;
            let revision = state.revision;
            let agent = state
                .agents
                .get_mut(name)
                .unwrap_or_else(|| unreachable!("existence checked above"));
            agent.status = patched_status(&agent.status, &patch)?;
            agent.metadata.resource_version = Some(revision);
            agent.clone()
        };
        self.emit(WatchEvent::Modified(Resource::Agent(updated)));
        Ok(())
    }

    async fn patch_task_status(&self, name: &str, patch: Value) -> Result<()> {
        let updated = {
            let mut state = self.state.write().expect("store lock poisoned");
            if !state.tasks.contains_key(name) {
                return Err(Error::not_found("AgentTask", name));
            }
            state.revision += 1;
            let revision = state.revision;
            let task = state
                .tasks
                .get_mut(name)
                .unwrap_or_else(|| unreachable!("existence checked above"));
            task.status = patched_status(&task.status, &patch)?;
            task.metadata.resource_version = Some(revision);
            task.clone()
        };
        self.emit(WatchEvent::Modified(Resource::Task(updated)));
        Ok(())
    }

    async fn patch_run_status(&self, name: &str, patch: Value) -> Result<()> {
        let updated = {
            let mut state = self.state.write().expect("store lock poisoned");
            if !state.runs.contains_key(name) {
                return Err(Error::not_found("AgentRun", name));
            }
            state.revision += 1;
            let revision = state.revision;
            let run = state
                .runs
                .get_mut(name)
                .unwrap_or_else(|| unreachable!("existence checked above"));
            run.status = patched_status(&run.status, &patch)?;
            run.metadata.resource_version = Some(revision);
            run.clone()
        };
        self.emit(WatchEvent::Modified(Resource::Run(updated)));
        Ok(())
    }

    async fn patch_run_status_guarded(
        &self,
        name: &str,
        expected_version: u64,
        patch: Value,
    ) -> Result<()> {
        let updated = {
            let mut state = self.state.write().expect("store lock poisoned");
            let current = state
                .runs
                .get(name)
                .ok_or_else(|| Error::not_found("AgentRun", name))?;
            if current.metadata.resource_version != Some(expected_version) {
                return Err(Error::conflict("AgentRun", name));
            }
            state.revision += 1;
            let revision = state.revision;
            let run = state
                .runs
                .get_mut(name)
                .unwrap_or_else(|| unreachable!("existence checked above"));
            run.status = patched_status(&run.status, &patch)?;
            run.metadata.resource_version = Some(revision);
            run.clone()
        };
        self.emit(WatchEvent::Modified(Resource::Run(updated)));
        Ok(())
    }

    async fn delete_task(&self, name: &str) -> Result<()> {
        let (owned, task) = {
            let mut state = self.state.write().expect("store lock poisoned");
            let task = state
                .tasks
                .remove(name)
                .ok_or_else(|| Error::not_found("AgentTask", name))?;
            let owned_names: Vec<String> = state
                .runs
                .values()
                .filter(|run| {
                    run.metadata.owner_references.iter().any(|owner| {
                        owner.controller && owner.kind == "AgentTask" && owner.name == name
                    })
                })
                .map(|run| run.metadata.name.clone())
                .collect();
            let owned: Vec<AgentRun> = owned_names
                .iter()
                .filter_map(|run_name| state.runs.remove(run_name))
                .collect();
            state.revision += 1;
            (owned, task)
        };
        for run in owned {
            self.emit(WatchEvent::Deleted(Resource::Run(run)));
        }
        self.emit(WatchEvent::Deleted(Resource::Task(task)));
        Ok(())
    }

    async fn delete_run(&self, name: &str) -> Result<()> {
        let run = {
            let mut state = self.state.write().expect("store lock poisoned");
            let run = state
                .runs
                .remove(name)
                .ok_or_else(|| Error::not_found("AgentRun", name))?;
            state.revision += 1;
            run
        };
        self.emit(WatchEvent::Deleted(Resource::Run(run)));
        Ok(())
    }

    fn watch(&self) -> WatchStream {
        let mut rx = self.events.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "watch stream lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
