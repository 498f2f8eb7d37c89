use serde::{Deserialize, Serialize};

/// Generation backend connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub api_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Model alias used when a request names none.
    pub default_model: String,
    /// Model alias for query rewriting. Falls back to the request's model.
    pub rewrite_model: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com/v1/messages".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            default_model: "claude-v3-haiku".into(),
            rewrite_model: None,
            request_timeout_secs: 300,
        }
    }
}

/// Retry discipline for throttled backend calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before retry `n` is `n * backoff_step_secs`.
    pub backoff_step_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step_secs: 5,
        }
    }
}

/// Agent loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Valid range: 1-100.
    pub max_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_iterations: 15 }
    }
}

/// One model catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelEntry {
    pub alias: String,
    pub model_id: String,
    #[serde(default)]
    pub input_price_per_1k: f64,
    #[serde(default)]
    pub output_price_per_1k: f64,
}
