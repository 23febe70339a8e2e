use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod remote;

/// Narrow seam over the upstream chat-completion API.
///
/// Implementations only move bytes: they send the request with bearer auth and hand back
/// the raw status and body. Interpreting the body is left to the caller, so a non-success
/// status is a normal return value rather than an error.
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn send_completion(
        &self,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<UpstreamResponse>;
}

/// Request body for an OpenAI-compatible chat completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    pub messages: Vec<Message>,
}

impl CompletionRequest {
    /// Two-message exchange: a system instruction followed by the user prompt.
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            response_format: None,
            messages: vec![Message::system(system), Message::user(user)],
        }
    }

    /// Ask the upstream to force syntactically valid JSON output.
    pub fn json_object(mut self) -> Self {
        self.response_format = Some(ResponseFormat {
            kind: "json_object".to_string(),
        });
        self
    }

    /// Content of the last user message, i.e. the constructed prompt.
    pub fn user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Raw upstream reply: HTTP status plus the unparsed body
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as a chat completion.
    pub fn completion(&self) -> Result<ChatCompletion> {
        let body: Value =
            serde_json::from_str(&self.body).context("Failed to parse LLM response")?;
        if body.is_null() {
            anyhow::bail!("LLM response body is null");
        }
        Ok(ChatCompletion { body })
    }
}

/// Lenient view of a chat-completion response.
///
/// Lookups walk the raw JSON, so any level may be missing, null or of an unexpected shape.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    body: Value,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_tokens: Option<usize>,
    #[serde(default)]
    pub completion_tokens: Option<usize>,
    #[serde(default)]
    pub total_tokens: Option<usize>,
}

impl ChatCompletion {
    /// `choices[0].message.content`, unless absent or null. Not necessarily a string.
    pub fn first_content(&self) -> Option<&Value> {
        self.body
            .pointer("/choices/0/message/content")
            .filter(|content| !content.is_null())
    }

    /// [`first_content`](Self::first_content) when it is a string.
    pub fn first_text(&self) -> Option<&str> {
        self.first_content().and_then(Value::as_str)
    }

    pub fn model(&self) -> Option<&str> {
        self.body.get("model").and_then(Value::as_str)
    }

    /// Token counts, or all-`None` when the upstream omitted or mangled them.
    pub fn usage(&self) -> UsageMetadata {
        self.body
            .get("usage")
            .and_then(|usage| UsageMetadata::deserialize(usage).ok())
            .unwrap_or_default()
    }

    pub fn log_usage(&self) {
        let usage = self.usage();
        tracing::debug!(
            model = self.model().unwrap_or("unknown"),
            prompt_tokens = usage.prompt_tokens.unwrap_or(0),
            completion_tokens = usage.completion_tokens.unwrap_or(0),
            total_tokens = usage.total_tokens.unwrap_or(0),
            "completion received"
        );
    }
}
