//! Model backend access for parley.
//!
//! Provides:
//! - the `AiClient` trait and the request/response types it speaks
//! - an Anthropic Messages API client with SSE streaming
//! - the Model Invocation Gateway (bounded retry on throttling)
//! - the model catalog (alias resolution and pricing)
//! - token usage tracking

pub mod catalog;
pub mod claude;
pub mod gateway;
pub mod streaming;
pub mod token_tracker;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use catalog::{ModelCatalog, ModelPrice};
pub use claude::{ClaudeClient, ClaudeConfig};
pub use gateway::{ModelGateway, RetryPolicy};
pub use parley_common::StopReason;
pub use token_tracker::TokenTracker;

/// Channel that receives streamed tokens in backend order.
pub type TokenSender = mpsc::UnboundedSender<String>;

#[async_trait]
pub trait AiClient: Send + Sync {
    async fn send_message(&self, request: &ChatRequest) -> Result<AiResponse, AiError>;

    /// Stream a response. Every text token is sent on `tokens` as soon as it
    /// arrives; the full response is returned once the backend stops.
    async fn send_message_streaming(
        &self,
        request: &ChatRequest,
        tokens: TokenSender,
    ) -> Result<AiResponse, AiError>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Concatenated text of all text parts.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPart {
    Text(String),
    /// Base64-encoded image.
    Image { media_type: String, data: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.6,
            top_p: 0.999,
            top_k: 250,
            stop_sequences: vec!["Human: ".into(), "Assistant: ".into()],
        }
    }
}

/// One model call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Backend model identifier (already resolved from an alias).
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub params: GenerationParams,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            tools: Vec::new(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AiResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("API error: {0}")]
    ApiError(String),
    /// The backend is throttling requests. The only retryable class.
    #[error("Rate limited")]
    RateLimited,
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    /// The backend failed after tokens were already delivered.
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("Timeout")]
    Timeout,
}

impl AiError {
    /// Transient throttling that the gateway may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limited_is_transient() {
        assert!(AiError::RateLimited.is_transient());
        assert!(!AiError::ApiError("throttling".into()).is_transient());
        assert!(!AiError::NetworkError("reset".into()).is_transient());
        assert!(!AiError::Timeout.is_transient());
        assert!(!AiError::StreamInterrupted("overloaded".into()).is_transient());
    }

    #[test]
    fn text_content_skips_images() {
        let msg = Message {
            role: Role::User,
            content: vec![
                ContentPart::Text("look at ".into()),
                ContentPart::Image {
                    media_type: "image/png".into(),
                    data: "iVBOR".into(),
                },
                ContentPart::Text("this".into()),
            ],
        };
        assert_eq!(msg.text_content(), "look at this");
    }

    #[test]
    fn total_tokens_saturates() {
        let usage = TokenUsage {
            input_tokens: u64::MAX,
            output_tokens: 1,
        };
        assert_eq!(usage.total_tokens(), u64::MAX);
    }

    #[test]
    fn request_builder_sets_fields() {
        let request = ChatRequest::new("claude-3-haiku-20240307", vec![Message::user("hi")])
            .with_system("be brief");
        assert_eq!(request.system.as_deref(), Some("be brief"));
        assert!(request.tools.is_empty());
        assert_eq!(request.params.max_tokens, 2000);
    }
}
