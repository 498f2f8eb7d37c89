//! Bot seed definitions.

use serde::{Deserialize, Serialize};

/// Agent tool names a bot may declare.
pub const AGENT_TOOLS: &[&str] = &["today", "calculator"];

/// A bot made available at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub id: String,
    /// Owning user. Empty means the bot is shared with every user.
    pub owner: String,
    pub title: String,
    pub instruction: String,
    pub display_retrieved_chunks: bool,
    /// Agent tool names. A non-empty list switches the bot to agent mode.
    pub tools: Vec<String>,
    pub generation: GenerationConfig,
    pub search: SearchConfig,
    /// Knowledge documents indexed for this bot.
    pub documents: Vec<DocumentConfig>,
}

/// Sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub top_k: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            top_k: 250,
            top_p: 0.999,
            temperature: 0.6,
            stop_sequences: vec!["Human: ".into(), "Assistant: ".into()],
        }
    }
}

/// Retrieval parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { max_results: 20 }
    }
}

/// One knowledge document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Where the content came from (`s3://...` or a URL).
    pub source: String,
    pub content: String,
}
