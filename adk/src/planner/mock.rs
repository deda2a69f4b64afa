//! Scripted planner for tests and the local demo.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::Result;

use super::{Plan, PlanRequest, PlannerDecision, PlannerOutcome};

/// A planner that replays a predefined decision sequence.
///
/// Once the script is exhausted every further call finishes, so runs
/// driven by a mock always terminate.
#[derive(Debug, Default)]
pub struct MockPlanner {
    script: Vec<PlannerDecision>,
    cursor: AtomicUsize,
}

impl MockPlanner {
    /// Create a mock replaying `script` in order.
    #[must_use]
    pub fn new(script: Vec<PlannerDecision>) -> Self {
        Self {
            script,
            cursor: AtomicUsize::new(0),
        }
    }

    /// How many planning calls have been made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plan for MockPlanner {
    async fn plan(&self, _request: PlanRequest<'_>) -> Result<PlannerOutcome> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let decision = self.script.get(index).cloned().unwrap_or_else(|| {
            PlannerDecision::Finish {
                thought: "No more actions".to_owned(),
                answer: "Completed all predefined actions".to_owned(),
            }
        });
        Ok(PlannerOutcome {
            decision,
            tokens_used: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request<'a>(context: &'a BTreeMap<String, serde_json::Value>) -> PlanRequest<'a> {
        PlanRequest {
            model: "mock",
            system_prompt: "",
            goal: "goal",
            context,
            tools: &[],
            history: &[],
        }
    }

    #[tokio::test]
    async fn replays_script_then_finishes() {
        let context = BTreeMap::new();
        let planner = MockPlanner::new(vec![PlannerDecision::ToolCall {
            thought: "list".into(),
            tool: "list_directory".into(),
            args: serde_json::json!({"path": "/tmp"}),
        }]);

        let first = planner.plan(request(&context)).await.unwrap();
        assert!(matches!(first.decision, PlannerDecision::ToolCall { .. }));

        let second = planner.plan(request(&context)).await.unwrap();
        match second.decision {
            PlannerDecision::Finish { answer, .. } => {
                assert_eq!(answer, "Completed all predefined actions");
            }
            PlannerDecision::ToolCall { .. } => panic!("expected finish"),
        }
        assert_eq!(planner.calls(), 2);
    }

    #[tokio::test]
    async fn empty_script_finishes_immediately() {
        let context = BTreeMap::new();
        let planner = MockPlanner::new(Vec::new());
        let outcome = planner.plan(request(&context)).await.unwrap();
        assert!(matches!(outcome.decision, PlannerDecision::Finish { .. }));
    }
}
