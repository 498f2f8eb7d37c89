use parley_ai::AiError;

/// Errors that end a chat turn or a protocol step.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// END arrived for a connection with no owner record.
    #[error("no session for connection {0}")]
    SessionNotFound(String),

    #[error("bot {0} not found")]
    BotNotFound(String),

    #[error("conversation {0} not found")]
    ConversationNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Terminal backend failure, including throttling past the retry budget.
    #[error("model backend error: {0}")]
    Backend(#[from] AiError),

    #[error("tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("invalid token")]
    AuthInvalid,

    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// HTTP-equivalent status for the frame acknowledgement.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::SessionNotFound(_) | Self::InvalidInput(_) => 400,
            Self::AuthInvalid => 403,
            Self::BotNotFound(_) | Self::ConversationNotFound(_) => 404,
            Self::Backend(_) | Self::ToolExecution { .. } | Self::Storage(_) => 500,
        }
    }

    /// `reason` field of the client-facing `ERROR` event.
    pub fn reason(&self) -> String {
        match self {
            Self::BotNotFound(_) => "bot_not_found".to_string(),
            other => other.to_string(),
        }
    }

    /// Body of the frame acknowledgement.
    pub fn ack_body(&self) -> String {
        match self {
            Self::BotNotFound(id) => format!("bot {id} not found."),
            Self::InvalidInput(_) => "Invalid request.".to_string(),
            Self::AuthInvalid => "Invalid token.".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_not_found_maps_to_404_and_wire_reason() {
        let err = ChatError::BotNotFound("b1".into());
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.reason(), "bot_not_found");
        assert_eq!(err.ack_body(), "bot b1 not found.");
    }

    #[test]
    fn status_codes() {
        assert_eq!(ChatError::SessionNotFound("c".into()).status_code(), 400);
        assert_eq!(ChatError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(ChatError::AuthInvalid.status_code(), 403);
        assert_eq!(ChatError::Backend(AiError::RateLimited).status_code(), 500);
        assert_eq!(
            ChatError::ToolExecution {
                tool: "calculator".into(),
                message: "boom".into()
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn backend_error_display() {
        let err: ChatError = AiError::Timeout.into();
        assert_eq!(err.to_string(), "model backend error: Timeout");
        assert_eq!(err.ack_body(), "model backend error: Timeout");
    }

    #[test]
    fn invalid_input_ack_hides_detail() {
        let err = ChatError::InvalidInput("missing message".into());
        assert_eq!(err.ack_body(), "Invalid request.");
        assert!(err.reason().contains("missing message"));
    }
}
