//! HTTP planner over an OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::{ChatMessage, Plan, PlanRequest, PlannerOutcome, build_messages, parse_decision};

/// Sampling temperature for planning calls; low for determinism.
const TEMPERATURE: f32 = 0.1;

/// Completion budget per planning call.
const MAX_TOKENS: u32 = 1024;

/// Stateless facade over the LLM endpoint.
///
/// Does not retry on transport errors — that policy belongs to the run
/// engine.
#[derive(Debug, Clone)]
pub struct Planner {
    http: reqwest::Client,
    endpoint: String,
    default_model: String,
}

impl Planner {
    /// Create a planner for an endpoint base URL (e.g. `http://vllm:8000/v1`).
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            default_model: String::new(),
        }
    }

    /// Model used when a request does not name one.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantReply,
}

#[derive(Debug, Deserialize)]
struct AssistantReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

#[async_trait]
impl Plan for Planner {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<PlannerOutcome> {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model
        };
        let messages = build_messages(&request);
        let body = ChatCompletionRequest {
            model,
            messages: &messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self.http.post(self.chat_url()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::planner(format!(
                "chat completion failed with status {status}: {detail}"
            )));
        }

        let reply: ChatCompletionResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::planner("chat completion reply carried no content"))?;
        let tokens_used = reply.usage.map_or(0, |usage| usage.total_tokens);

        debug!(model, tokens_used, "planner reply received");

        Ok(PlannerOutcome {
            decision: parse_decision(&content),
            tokens_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_url_handles_trailing_slash() {
        let planner = Planner::new("http://vllm:8000/v1/");
        assert_eq!(planner.chat_url(), "http://vllm:8000/v1/chat/completions");
    }

    #[test]
    fn request_body_wire_shape() {
        let messages = vec![ChatMessage {
            role: super::super::Role::User,
            content: "Goal: demo".into(),
        }];
        let body = ChatCompletionRequest {
            model: "demo-model",
            messages: &messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "demo-model");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 1024);
    }
}
