//! Server-to-client wire types.
//!
//! After the initial request the only artifacts crossing the connection are
//! [`StreamEvent`]s (discriminated by `status`) and one [`FrameAck`] per
//! client frame.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Why token generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Normal completion.
    EndTurn,
    /// Truncated by the length limit; the client may request continuation.
    MaxTokens,
    StopSequence,
    /// A content guardrail stopped generation. Not a system failure.
    GuardrailIntervened,
    /// The agent loop produced its final answer.
    AgentFinish,
}

impl StopReason {
    /// Map a backend stop reason string. Unknown values count as normal completion.
    pub fn from_backend(value: &str) -> Self {
        match value {
            "max_tokens" | "length" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            "guardrail_intervened" | "refusal" => Self::GuardrailIntervened,
            "agent_finish" => Self::AgentFinish,
            _ => Self::EndTurn,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::GuardrailIntervened => "guardrail_intervened",
            Self::AgentFinish => "agent_finish",
        }
    }

    /// Whether the answer was cut short and can be continued.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::MaxTokens)
    }
}

/// Progress event delivered to the client during a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamEvent {
    FetchingKnowledge,
    Streaming {
        completion: String,
    },
    StreamingEnd {
        completion: String,
        stop_reason: StopReason,
    },
    Error {
        reason: String,
    },
}

impl StreamEvent {
    pub fn token(token: impl Into<String>) -> Self {
        Self::Streaming {
            completion: token.into(),
        }
    }

    pub fn end(stop_reason: StopReason) -> Self {
        Self::StreamingEnd {
            completion: String::new(),
            stop_reason,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!("{{\"status\":\"ERROR\",\"reason\":\"{e}\"}}"))
    }
}

/// Ordered channel the orchestrator writes and the connection task drains.
pub type EventSender = mpsc::UnboundedSender<StreamEvent>;

/// Per-frame result, the equivalent of an HTTP status + body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAck {
    pub status_code: u16,
    pub body: String,
}

impl FrameAck {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!("{{\"statusCode\":{},\"body\":\"\"}}", self.status_code))
    }
}
