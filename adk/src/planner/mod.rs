//! LLM-backed action planning.
//!
//! The planner translates agent state into a chat-completions request,
//! invokes the model, and parses the structured JSON reply into a
//! [`PlannerDecision`]: either call a tool or finish with an answer.
//!
//! Parsing is deliberately forgiving — a reply that is not valid JSON
//! (fenced or not) becomes a `Finish` decision carrying the raw content,
//! so non-conforming models still terminate runs cleanly.

mod client;
mod mock;

pub use client::Planner;
pub use mock::MockPlanner;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::api::truncate_output;
use crate::error::Result;
use crate::tools::ToolView;

/// The planner's next action.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerDecision {
    /// Invoke `tool` with `args`.
    ToolCall {
        /// The planner's stated reasoning.
        thought: String,
        /// Tool to invoke.
        tool: String,
        /// Arguments object.
        args: Value,
    },
    /// The goal is accomplished (or abandoned); deliver `answer`.
    Finish {
        /// The planner's stated reasoning.
        thought: String,
        /// Final answer text.
        answer: String,
    },
}

impl PlannerDecision {
    /// The reasoning attached to the decision.
    #[must_use]
    pub fn thought(&self) -> &str {
        match self {
            Self::ToolCall { thought, .. } | Self::Finish { thought, .. } => thought,
        }
    }

    /// Re-serialize a tool call the way the model emitted it, for replay.
    #[must_use]
    pub fn replay_content(&self) -> String {
        match self {
            Self::ToolCall {
                thought,
                tool,
                args,
            } => json!({
                "action": "tool_call",
                "thought": thought,
                "tool": tool,
                "args": args,
            })
            .to_string(),
            Self::Finish { thought, .. } => thought.clone(),
        }
    }
}

/// A planner decision plus the tokens the call consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerOutcome {
    /// The parsed decision.
    pub decision: PlannerDecision,
    /// `usage.total_tokens` from the reply, zero when absent.
    pub tokens_used: u64,
}

/// One entry of the in-memory conversation replayed to the planner.
#[derive(Debug, Clone)]
pub enum Exchange {
    /// A prior planner decision.
    Assistant(PlannerDecision),
    /// A prior tool outcome fed back as an observation.
    Tool {
        /// Tool that was invoked.
        tool: String,
        /// Whether it succeeded.
        success: bool,
        /// Captured output on success.
        output: Option<String>,
        /// Failure detail otherwise.
        error: Option<String>,
    },
}

/// Everything one planning call needs.
#[derive(Debug)]
pub struct PlanRequest<'a> {
    /// Model identifier.
    pub model: &'a str,
    /// The agent's system prompt.
    pub system_prompt: &'a str,
    /// The goal being pursued.
    pub goal: &'a str,
    /// Task context, surfaced as a labeled JSON block when non-empty.
    pub context: &'a BTreeMap<String, Value>,
    /// Tools the agent may call.
    pub tools: &'a [ToolView],
    /// Conversation so far.
    pub history: &'a [Exchange],
}

/// Seam between the run engine and the planner.
#[async_trait]
pub trait Plan: Send + Sync {
    /// Decide the next action. Transport errors surface as `Err`; retry
    /// policy belongs to the caller.
    async fn plan(&self, request: PlanRequest<'_>) -> Result<PlannerOutcome>;
}

/// Message role on the chat-completions wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction.
    System,
    /// User turn.
    User,
    /// Model turn.
    Assistant,
}

/// One chat message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role.
    pub role: Role,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Build the message sequence for one planning call.
///
/// Order: system prompt with tool catalog and response-format contract,
/// optional context block, the goal, then the replayed history.
#[must_use]
pub fn build_messages(request: &PlanRequest<'_>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::new(
        Role::System,
        render_system_prompt(request.system_prompt, request.tools),
    )];

    if !request.context.is_empty() {
        let rendered =
            serde_json::to_string_pretty(request.context).unwrap_or_else(|_| "{}".into());
        messages.push(ChatMessage::new(
            Role::User,
            format!("Context:\n```json\n{rendered}\n```"),
        ));
    }

    messages.push(ChatMessage::new(
        Role::User,
        format!("Goal: {}", request.goal),
    ));

    for exchange in request.history {
        match exchange {
            Exchange::Assistant(decision) => {
                messages.push(ChatMessage::new(Role::Assistant, decision.replay_content()));
            }
            Exchange::Tool {
                tool,
                success,
                output,
                error,
            } => {
                let mut observation = json!({"tool": tool, "success": success});
                if *success {
                    observation["output"] =
                        Value::String(truncate_output(output.as_deref().unwrap_or_default()));
                } else {
                    observation["error"] = Value::String(
                        error.clone().unwrap_or_else(|| "Unknown error".to_owned()),
                    );
                }
                let rendered = serde_json::to_string_pretty(&observation)
                    .unwrap_or_else(|_| observation.to_string());
                messages.push(ChatMessage::new(
                    Role::User,
                    format!("Tool result:\n```json\n{rendered}\n```"),
                ));
            }
        }
    }

    messages
}

fn render_system_prompt(system_prompt: &str, tools: &[ToolView]) -> String {
    format!(
        r#"{system_prompt}

## Available Tools

{tools}

## Response Format

You must respond with a JSON object in one of these formats:

For tool calls:
```json
{{
    "action": "tool_call",
    "thought": "Your reasoning for this action",
    "tool": "tool_name",
    "args": {{"arg1": "value1", "arg2": "value2"}}
}}
```

When the task is complete:
```json
{{
    "action": "finish",
    "thought": "Summary of what was accomplished",
    "answer": "Final answer or result"
}}
```

Always respond with valid JSON only, no other text.
"#,
        tools = render_tools(tools)
    )
}

fn render_tools(tools: &[ToolView]) -> String {
    if tools.is_empty() {
        return "No tools available.".to_owned();
    }
    let sections: Vec<String> = tools
        .iter()
        .map(|tool| {
            let parameters = serde_json::to_string_pretty(&tool.parameters)
                .unwrap_or_else(|_| tool.parameters.to_string());
            format!(
                "### {}\n{}\n\nParameters:\n```json\n{}\n```\n",
                tool.name, tool.description, parameters
            )
        })
        .collect();
    sections.join("\n")
}

/// Parse a model reply into a decision. Never fails: unparsable content
/// becomes a `Finish` decision carrying the content as the answer.
#[must_use]
pub fn parse_decision(content: &str) -> PlannerDecision {
    let cleaned = strip_fence(content);

    let Ok(data) = serde_json::from_str::<Value>(cleaned) else {
        return PlannerDecision::Finish {
            thought: "Failed to parse response, treating as final answer".to_owned(),
            answer: cleaned.to_owned(),
        };
    };

    let thought = data
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    match data.get("action").and_then(Value::as_str) {
        Some("tool_call") => PlannerDecision::ToolCall {
            thought,
            tool: data
                .get("tool")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            args: data.get("args").cloned().unwrap_or_else(|| json!({})),
        },
        _ => {
            let answer = data
                .get("answer")
                .and_then(Value::as_str)
                .map_or_else(|| thought.clone(), str::to_owned);
            PlannerDecision::Finish { thought, answer }
        }
    }
}

/// Strip one surrounding triple-backtick fence, optionally labeled.
fn strip_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_call_json() {
        let decision = parse_decision(
            r#"{"action": "tool_call", "thought": "Need to read", "tool": "read_file", "args": {"path": "/tmp/test.txt"}}"#,
        );
        assert_eq!(
            decision,
            PlannerDecision::ToolCall {
                thought: "Need to read".into(),
                tool: "read_file".into(),
                args: json!({"path": "/tmp/test.txt"}),
            }
        );
    }

    #[test]
    fn parses_finish_json() {
        let decision = parse_decision(
            r#"{"action": "finish", "thought": "Done!", "answer": "The result is 42"}"#,
        );
        assert_eq!(
            decision,
            PlannerDecision::Finish {
                thought: "Done!".into(),
                answer: "The result is 42".into(),
            }
        );
    }

    #[test]
    fn parses_markdown_fenced_json() {
        let decision = parse_decision(
            "```json\n{\"action\": \"finish\", \"thought\": \"Done\", \"answer\": \"Success\"}\n```",
        );
        assert_eq!(
            decision,
            PlannerDecision::Finish {
                thought: "Done".into(),
                answer: "Success".into(),
            }
        );
    }

    #[test]
    fn plain_text_becomes_finish() {
        let decision = parse_decision("This is not JSON, just a plain response");
        match decision {
            PlannerDecision::Finish { answer, .. } => {
                assert_eq!(answer, "This is not JSON, just a plain response");
            }
            PlannerDecision::ToolCall { .. } => panic!("expected finish"),
        }
    }

    #[test]
    fn missing_args_default_to_empty_object() {
        let decision =
            parse_decision(r#"{"action": "tool_call", "thought": "go", "tool": "shell"}"#);
        match decision {
            PlannerDecision::ToolCall { args, .. } => assert_eq!(args, json!({})),
            PlannerDecision::Finish { .. } => panic!("expected tool call"),
        }
    }

    #[test]
    fn finish_without_answer_falls_back_to_thought() {
        let decision = parse_decision(r#"{"action": "finish", "thought": "all done"}"#);
        assert_eq!(
            decision,
            PlannerDecision::Finish {
                thought: "all done".into(),
                answer: "all done".into(),
            }
        );
    }

    #[test]
    fn tool_call_replay_round_trips() {
        let decision = PlannerDecision::ToolCall {
            thought: "compute".into(),
            tool: "calculator".into(),
            args: json!({"expression": "2**10"}),
        };
        assert_eq!(parse_decision(&decision.replay_content()), decision);
    }

    #[test]
    fn message_order_is_system_context_goal_history() {
        let context: BTreeMap<String, Value> =
            [("cluster".to_owned(), json!("demo"))].into_iter().collect();
        let history = vec![
            Exchange::Assistant(PlannerDecision::ToolCall {
                thought: "list".into(),
                tool: "list_directory".into(),
                args: json!({"path": "."}),
            }),
            Exchange::Tool {
                tool: "list_directory".into(),
                success: true,
                output: Some("[]".into()),
                error: None,
            },
        ];
        let request = PlanRequest {
            model: "demo-model",
            system_prompt: "You are a demo agent.",
            goal: "list and compute",
            context: &context,
            tools: &[],
            history: &history,
        };

        let messages = build_messages(&request);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.starts_with("You are a demo agent."));
        assert!(messages[0].content.contains("No tools available."));
        assert!(messages[1].content.starts_with("Context:"));
        assert_eq!(messages[2].content, "Goal: list and compute");
        assert_eq!(messages[3].role, Role::Assistant);
        assert!(messages[3].content.contains("\"action\":\"tool_call\""));
        assert!(messages[4].content.starts_with("Tool result:"));
        assert!(messages[4].content.contains("\"success\": true"));
    }

    #[test]
    fn failed_tool_replays_error_not_output() {
        let history = vec![Exchange::Tool {
            tool: "nope".into(),
            success: false,
            output: None,
            error: Some("Unknown tool: nope".into()),
        }];
        let context = BTreeMap::new();
        let request = PlanRequest {
            model: "demo-model",
            system_prompt: "prompt",
            goal: "goal",
            context: &context,
            tools: &[],
            history: &history,
        };
        let messages = build_messages(&request);
        let replay = &messages.last().unwrap().content;
        assert!(replay.contains("Unknown tool: nope"));
        assert!(!replay.contains("\"output\""));
    }
}
