// Provider-agnostic LLM chat-completion client.
//
// This crate only ever sends one prompt and reads back one string reply
// (intent JSON, Cypher generation, synthesis), so there is no streaming or
// native-tool-call machinery here, just a single async call behind a trait
// object with `Arc<str>` message bodies.

use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: Arc<str>,
}

impl Message {
    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct LlmError(pub String);

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "llm error: {}", self.0)
    }
}

impl Error for LlmError {}

/// A single chat-completion call: supply the full prompt, get a single
/// string reply. Temperature is low (deterministic-leaning) and callers
/// bound the token ceiling per call.
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
    ) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}

/// Direct HTTP client against an OpenAI-compatible `/chat/completions`
/// endpoint, built as a plain `reqwest`-based request/response pair so it
/// works against any OpenAI-compatible base URL, not just OpenAI's own.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        OpenAiCompatibleClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(serde::Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(serde::Deserialize)]
struct ChatResponseBody {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: WireReplyMessage,
}

#[derive(serde::Deserialize)]
struct WireReplyMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatCompletionClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[Message], max_tokens: u32) -> Result<String, LlmError> {
        let wire_messages = messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: m.content.to_string(),
            })
            .collect();

        let body = ChatRequestBody {
            model: &self.model,
            messages: wire_messages,
            temperature: 0.1,
            max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError(format!("http {status}: {text}")));
        }

        let parsed: ChatResponseBody = response
            .json()
            .await
            .map_err(|e| LlmError(format!("invalid response body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError("empty completion".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
