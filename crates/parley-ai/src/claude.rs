//! Anthropic Claude API client.
//!
//! Implements the `AiClient` trait via the Anthropic Messages API.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::streaming::{parse_sse_stream, SseEvent};
use crate::{
    AiClient, AiError, AiResponse, ChatRequest, ContentPart, Role, StopReason, TokenSender,
    TokenUsage, ToolCall, ToolDefinition,
};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude API client configuration.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub api_url: String,
    pub timeout: Duration,
}

impl ClaudeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: CLAUDE_API_URL.to_string(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Create config from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self, AiError> {
        let key = std::env::var(var)
            .map_err(|_| AiError::ApiError(format!("{var} not set; required for the model API")))?;
        Ok(Self::new(key))
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Claude API client.
pub struct ClaudeClient {
    config: ClaudeConfig,
    http: reqwest::Client,
}

impl ClaudeClient {
    pub fn new(config: ClaudeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { config, http }
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, AiError> {
        let response = self
            .http
            .post(&self.config.api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout
                } else {
                    AiError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        // 429 rate limit and 529 overloaded are both throttling.
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 529 {
            return Err(AiError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::ApiError(format!("HTTP {status}: {text}")));
        }
        Ok(response)
    }
}

/// Build the JSON request body for the Messages API.
pub(crate) fn build_request_body(request: &ChatRequest, stream: bool) -> serde_json::Value {
    let mut msgs: Vec<serde_json::Value> = Vec::new();
    let mut system_from_messages: Option<String> = None;

    for msg in &request.messages {
        let role = match msg.role {
            Role::User | Role::Tool => "user",
            Role::Assistant => "assistant",
            Role::System => {
                // system is separate in Claude API
                if system_from_messages.is_none() {
                    system_from_messages = Some(msg.text_content());
                }
                continue;
            }
        };
        let blocks: Vec<serde_json::Value> = msg
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) if text.is_empty() => None,
                ContentPart::Text(text) => Some(serde_json::json!({
                    "type": "text",
                    "text": text,
                })),
                ContentPart::Image { media_type, data } => Some(serde_json::json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": media_type,
                        "data": data,
                    },
                })),
            })
            .collect();
        if blocks.is_empty() {
            continue;
        }
        msgs.push(serde_json::json!({
            "role": role,
            "content": blocks,
        }));
    }

    // A trailing assistant turn is a prefill; the API rejects trailing whitespace there.
    if let Some(last) = msgs.last_mut() {
        if last["role"] == "assistant" {
            if let Some(blocks) = last["content"].as_array_mut() {
                if let Some(text) = blocks
                    .last_mut()
                    .and_then(|b| b.get_mut("text"))
                    .and_then(|t| t.as_str().map(|s| s.trim_end().to_string()))
                {
                    if let Some(block) = blocks.last_mut() {
                        block["text"] = serde_json::json!(text);
                    }
                }
            }
        }
    }

    let params = &request.params;
    let mut body = serde_json::json!({
        "model": request.model,
        "max_tokens": params.max_tokens,
        "temperature": params.temperature,
        "top_p": params.top_p,
        "top_k": params.top_k,
        "messages": msgs,
    });

    if !params.stop_sequences.is_empty() {
        body["stop_sequences"] = serde_json::json!(params.stop_sequences);
    }

    if let Some(system) = request.system.as_ref().or(system_from_messages.as_ref()) {
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }
    }

    if !request.tools.is_empty() {
        let tool_defs: Vec<_> = request.tools.iter().map(to_claude_tool).collect();
        body["tools"] = serde_json::json!(tool_defs);
    }

    if stream {
        body["stream"] = serde_json::json!(true);
    }

    body
}

/// Convert a tool definition to the Claude API format.
pub fn to_claude_tool(tool: &ToolDefinition) -> serde_json::Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

/// Parse a non-streaming response.
pub(crate) fn parse_response(json: &serde_json::Value) -> Result<AiResponse, AiError> {
    let blocks = json["content"]
        .as_array()
        .ok_or_else(|| AiError::ParseError("response has no content array".into()))?;

    let content = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect::<String>();

    let tool_calls = blocks
        .iter()
        .filter(|b| b["type"] == "tool_use")
        .map(|b| ToolCall {
            id: b["id"].as_str().unwrap_or("").to_string(),
            name: b["name"].as_str().unwrap_or("").to_string(),
            arguments: b["input"].clone(),
        })
        .collect();

    let usage = TokenUsage {
        input_tokens: json["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: json["usage"]["output_tokens"].as_u64().unwrap_or(0),
    };

    let stop_reason = json["stop_reason"]
        .as_str()
        .map(StopReason::from_backend)
        .unwrap_or(StopReason::EndTurn);

    Ok(AiResponse {
        content,
        tool_calls,
        usage,
        stop_reason,
    })
}

/// Folds streamed events into a final response.
#[derive(Default)]
pub(crate) struct StreamAccumulator {
    content: String,
    tool_calls: Vec<ToolCall>,
    usage: TokenUsage,
    stop_reason: Option<StopReason>,
    error: Option<String>,
    // Current tool_use block being built
    tool_id: String,
    tool_name: String,
    tool_json: String,
}

impl StreamAccumulator {
    /// Consume one event; returns the text token it carried, if any.
    pub(crate) fn handle(&mut self, event: &SseEvent) -> Option<String> {
        let event_type = event.event.as_deref().unwrap_or("");
        let data: serde_json::Value = match serde_json::from_str(&event.data) {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, event = event_type, "Skipping unparsable stream event");
                return None;
            }
        };
        // Some proxies omit the `event:` line; the payload carries the type too.
        let event_type = if event_type.is_empty() {
            data["type"].as_str().unwrap_or("")
        } else {
            event_type
        };

        match event_type {
            "message_start" => {
                if let Some(u) = data["message"].get("usage") {
                    self.usage.input_tokens = u["input_tokens"].as_u64().unwrap_or(0);
                }
            }
            "content_block_start" => {
                if data["content_block"]["type"] == "tool_use" {
                    self.tool_id = data["content_block"]["id"].as_str().unwrap_or("").to_string();
                    self.tool_name = data["content_block"]["name"]
                        .as_str()
                        .unwrap_or("")
                        .to_string();
                    self.tool_json.clear();
                }
            }
            "content_block_delta" => match data["delta"]["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    if let Some(t) = data["delta"]["text"].as_str() {
                        if !t.is_empty() {
                            self.content.push_str(t);
                            return Some(t.to_string());
                        }
                    }
                }
                "input_json_delta" => {
                    if let Some(part) = data["delta"]["partial_json"].as_str() {
                        self.tool_json.push_str(part);
                    }
                }
                _ => {}
            },
            "content_block_stop" => {
                if !self.tool_name.is_empty() {
                    let arguments = if self.tool_json.is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&self.tool_json).unwrap_or(serde_json::Value::Null)
                    };
                    self.tool_calls.push(ToolCall {
                        id: std::mem::take(&mut self.tool_id),
                        name: std::mem::take(&mut self.tool_name),
                        arguments,
                    });
                    self.tool_json.clear();
                }
            }
            "message_delta" => {
                if let Some(u) = data.get("usage") {
                    self.usage.output_tokens = u["output_tokens"].as_u64().unwrap_or(0);
                }
                if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(StopReason::from_backend(reason));
                }
            }
            "error" => {
                let message = data["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                self.error = Some(message);
            }
            _ => {}
        }
        None
    }

    pub(crate) fn finish(self) -> Result<AiResponse, AiError> {
        if let Some(message) = self.error {
            return Err(AiError::StreamInterrupted(message));
        }
        let stop_reason = self.stop_reason.ok_or_else(|| {
            AiError::StreamInterrupted("stream ended without a stop reason".into())
        })?;
        if self.usage.input_tokens == 0 && self.usage.output_tokens == 0 {
            warn!("No usage data received in streaming response");
        }
        Ok(AiResponse {
            content: self.content,
            tool_calls: self.tool_calls,
            usage: self.usage,
            stop_reason,
        })
    }
}

#[async_trait]
impl AiClient for ClaudeClient {
    async fn send_message(&self, request: &ChatRequest) -> Result<AiResponse, AiError> {
        let body = build_request_body(request, false);

        debug!(model = %request.model, "Claude API request");

        let response = self.post(&body).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AiError::ParseError(e.to_string()))?;

        parse_response(&json)
    }

    async fn send_message_streaming(
        &self,
        request: &ChatRequest,
        tokens: TokenSender,
    ) -> Result<AiResponse, AiError> {
        let body = build_request_body(request, true);

        debug!(model = %request.model, "Claude API streaming request");

        let response = self.post(&body).await?;

        let mut acc = StreamAccumulator::default();
        parse_sse_stream(response, |event: SseEvent| {
            if let Some(token) = acc.handle(&event) {
                // A closed receiver means the turn was abandoned.
                let _ = tokens.send(token);
            }
        })
        .await
        .map_err(|e| AiError::StreamInterrupted(e.to_string()))?;

        acc.finish()
    }
}
