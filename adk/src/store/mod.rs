//! The declarative resource store, named by interface.
//!
//! The store is the sole coordination medium between components: the
//! reconciler and run engine never talk to each other directly, they read
//! and patch resources and react to the watch stream.
//!
//! [`ResourceStore`] models the store contract the controller needs —
//! reads, creates, JSON merge-patches against the status subresource, a
//! resource-version-guarded update for read-modify-write sequences, and a
//! watch stream. [`MemoryStore`] is the in-process implementation backing
//! tests and local development.

mod memory;

pub use memory::MemoryStore;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::api::{Agent, AgentRun, AgentTask};
use crate::error::Result;

/// One resource, of any of the three kinds.
#[derive(Debug, Clone)]
pub enum Resource {
    /// An [`Agent`].
    Agent(Agent),
    /// An [`AgentTask`].
    Task(AgentTask),
    /// An [`AgentRun`].
    Run(AgentRun),
}

impl Resource {
    /// Name of the underlying resource.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Agent(a) => &a.metadata.name,
            Self::Task(t) => &t.metadata.name,
            Self::Run(r) => &r.metadata.name,
        }
    }

    /// Kind of the underlying resource.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Agent(_) => "Agent",
            Self::Task(_) => "AgentTask",
            Self::Run(_) => "AgentRun",
        }
    }
}

/// A boxed watch stream, `Sync` so it can live behind `&self` in async tasks
/// spawned onto a multi-threaded runtime.
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send + Sync>>;

/// One event on the watch stream.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A resource was created.
    Added(Resource),
    /// A resource (typically its status) was updated.
    Modified(Resource),
    /// A resource was deleted.
    Deleted(Resource),
}

impl WatchEvent {
    /// The resource the event refers to.
    #[must_use]
    pub const fn resource(&self) -> &Resource {
        match self {
            Self::Added(r) | Self::Modified(r) | Self::Deleted(r) => r,
        }
    }
}

/// Contract the controller requires from the declarative store.
///
/// Status patches are JSON merge-patch against the status subresource:
/// objects merge recursively, `null` removes a key, arrays replace
/// wholesale. Every successful mutation bumps the resource version and
/// emits a watch event.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an agent by name.
    async fn get_agent(&self, name: &str) -> Result<Agent>;

    /// Fetch a task by name.
    async fn get_task(&self, name: &str) -> Result<AgentTask>;

    /// Fetch a run by name.
    async fn get_run(&self, name: &str) -> Result<AgentRun>;

    /// Create an agent. Fails if the name is taken.
    async fn create_agent(&self, agent: Agent) -> Result<Agent>;

    /// Create a task. Fails if the name is taken.
    async fn create_task(&self, task: AgentTask) -> Result<AgentTask>;

    /// Create a run. Fails if the name is taken.
    async fn create_run(&self, run: AgentRun) -> Result<AgentRun>;

    /// Merge-patch an agent's status subresource.
    async fn patch_agent_status(&self, name: &str, patch: Value) -> Result<()>;

    /// Merge-patch a task's status subresource.
    async fn patch_task_status(&self, name: &str, patch: Value) -> Result<()>;

    /// Merge-patch a run's status subresource.
    async fn patch_run_status(&self, name: &str, patch: Value) -> Result<()>;

    /// Merge-patch a run's status with a resource-version precondition.
    ///
    /// Returns [`Error::Conflict`](crate::Error::Conflict) when the run has
    /// moved past `expected_version`; callers re-read and retry.
    async fn patch_run_status_guarded(
        &self,
        name: &str,
        expected_version: u64,
        patch: Value,
    ) -> Result<()>;

    /// Delete a task, cascading to runs it owns via controller references.
    async fn delete_task(&self, name: &str) -> Result<()>;

    /// Delete a run.
    async fn delete_run(&self, name: &str) -> Result<()>;

    /// Subscribe to the event stream. Events for one resource arrive in
    /// the order the store applied them.
    fn watch(&self) -> WatchStream;
}

/// Apply a JSON merge-patch to `target` in place.
///
/// Follows the merge-patch shape the store's status subresource speaks:
/// objects merge key-by-key, `null` removes, everything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            let map = target
                .as_object_mut()
                .unwrap_or_else(|| unreachable!("target coerced to object above"));
            for (key, value) in entries {
                if value.is_null() {
                    map.remove(key);
                } else {
                    merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        other => *target = other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_merges_objects() {
        let mut target = json!({"phase": "Planning", "currentStep": 1});
        merge_patch(&mut target, &json!({"currentStep": 2}));
        assert_eq!(target, json!({"phase": "Planning", "currentStep": 2}));
    }

    #[test]
    fn merge_patch_null_removes() {
        let mut target = json!({"error": "boom", "phase": "Failed"});
        merge_patch(&mut target, &json!({"error": null}));
        assert_eq!(target, json!({"phase": "Failed"}));
    }

    #[test]
    fn merge_patch_replaces_arrays() {
        let mut target = json!({"history": [1, 2]});
        merge_patch(&mut target, &json!({"history": [1, 2, 3]}));
        assert_eq!(target, json!({"history": [1, 2, 3]}));
    }

    #[test]
    fn merge_patch_seeds_missing_status() {
        let mut target = Value::Null;
        merge_patch(&mut target, &json!({"phase": "Running"}));
        assert_eq!(target, json!({"phase": "Running"}));
    }
}
