//! Builds the shared [`AppState`] from a loaded configuration.

use std::sync::Arc;
use std::time::Duration;

use parley_ai::{
    AiClient, AiError, ClaudeClient, ClaudeConfig, GenerationParams, ModelCatalog, ModelGateway,
    ModelPrice, RetryPolicy,
};
use parley_chat::{
    Bot, DocumentSearch, InMemoryBotRepository, InMemoryConversationRepository, KnowledgeDocument,
    Orchestrator, ToolKind, TurnSettings,
};
use parley_common::ConfigError;
use parley_config::{BotConfig, ParleyConfig};

use crate::auth::{JwtVerifier, TokenVerifier};
use crate::connection::AppState;
use crate::reassembler::Reassembler;
use crate::session::SessionStore;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] AiError),

    #[error("{0} is not set; required to verify tokens")]
    MissingSecret(String),

    #[error("bot {bot}: unknown tool {tool:?}")]
    UnknownTool { bot: String, tool: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Catalog with configured entries layered over the builtin aliases.
pub fn build_catalog(config: &ParleyConfig) -> ModelCatalog {
    let mut catalog = ModelCatalog::builtin();
    for entry in &config.models {
        catalog.insert(
            entry.alias.clone(),
            entry.model_id.clone(),
            ModelPrice {
                input_per_1k: entry.input_price_per_1k,
                output_per_1k: entry.output_price_per_1k,
            },
        );
    }
    catalog
}

pub fn build_bot(config: &BotConfig) -> Result<Bot, StartupError> {
    let tools = config
        .tools
        .iter()
        .map(|name| {
            ToolKind::from_name(name).ok_or_else(|| StartupError::UnknownTool {
                bot: config.id.clone(),
                tool: name.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let generation = &config.generation;
    let mut bot = Bot::new(config.id.clone());
    bot.owner = config.owner.clone();
    bot.title = config.title.clone();
    bot.instruction = config.instruction.clone();
    bot.generation = GenerationParams {
        max_tokens: generation.max_tokens,
        temperature: generation.temperature,
        top_p: generation.top_p,
        top_k: generation.top_k,
        stop_sequences: generation.stop_sequences.clone(),
    };
    bot.max_results = config.search.max_results;
    bot.tools = tools;
    bot.knowledge = config
        .documents
        .iter()
        .map(|d| KnowledgeDocument {
            source: d.source.clone(),
            content: d.content.clone(),
        })
        .collect();
    bot.display_retrieved_chunks = config.display_retrieved_chunks;
    Ok(bot)
}

/// Wire collaborators around an already constructed model client.
pub fn build_state(
    config: &ParleyConfig,
    client: Arc<dyn AiClient>,
    verifier: Arc<dyn TokenVerifier>,
) -> Result<AppState, StartupError> {
    let bots = config
        .bots
        .iter()
        .map(build_bot)
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!(bots = bots.len(), "Loaded bots");

    let policy = RetryPolicy::new(
        config.retry.max_retries,
        Duration::from_secs(config.retry.backoff_step_secs),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryBotRepository::new(bots)),
        Arc::new(InMemoryConversationRepository::new()),
        Arc::new(DocumentSearch::new()),
        ModelGateway::new(client, policy),
        Arc::new(build_catalog(config)),
        TurnSettings {
            max_iterations: config.agent.max_iterations,
            rewrite_model: config.model.rewrite_model.clone(),
        },
    );

    let store = SessionStore::new(Duration::from_secs(config.session.ttl_secs));
    Ok(AppState {
        reassembler: Reassembler::new(store, config.session.page_size),
        verifier,
        orchestrator: Arc::new(orchestrator),
        default_model: config.model.default_model.clone(),
    })
}

/// Production wiring: Claude client and JWT verification from the environment.
pub fn build_from_env(config: &ParleyConfig) -> Result<AppState, StartupError> {
    let claude = ClaudeConfig::from_env(&config.model.api_key_env)?
        .with_api_url(config.model.api_url.clone())
        .with_timeout(Duration::from_secs(config.model.request_timeout_secs));
    let verifier = JwtVerifier::from_env(&config.auth.jwt_secret_env)
        .ok_or_else(|| StartupError::MissingSecret(config.auth.jwt_secret_env.clone()))?;
    build_state(config, Arc::new(ClaudeClient::new(claude)), Arc::new(verifier))
}

#[cfg(test)]
mod tests {
    use parley_config::{DocumentConfig, ModelEntry};

    use super::*;

    #[test]
    fn bot_from_config() {
        let config = BotConfig {
            id: "kb".into(),
            title: "Phones".into(),
            instruction: "You sell phones.".into(),
            display_retrieved_chunks: true,
            tools: vec!["calculator".into()],
            documents: vec![DocumentConfig {
                source: "s3://bucket/phones.md".into(),
                content: "The X1 costs 300 dollars.".into(),
            }],
            ..Default::default()
        };
        let bot = build_bot(&config).unwrap();
        assert_eq!(bot.id, "kb");
        assert_eq!(bot.tools, vec![ToolKind::Calculator]);
        assert!(bot.has_knowledge());
        assert!(bot.display_retrieved_chunks);
        assert_eq!(bot.generation.max_tokens, 2000);
        assert_eq!(bot.max_results, 20);
    }

    #[test]
    fn unknown_tool_fails_startup() {
        let config = BotConfig {
            id: "b1".into(),
            tools: vec!["shell".into()],
            ..Default::default()
        };
        let err = build_bot(&config).unwrap_err();
        assert!(matches!(err, StartupError::UnknownTool { .. }));
        assert!(err.to_string().contains("shell"));
    }

    #[test]
    fn configured_models_override_builtin() {
        let config = ParleyConfig {
            models: vec![ModelEntry {
                alias: "claude-v3-haiku".into(),
                model_id: "claude-3-haiku-custom".into(),
                input_price_per_1k: 1.0,
                output_price_per_1k: 2.0,
            }],
            ..Default::default()
        };
        let catalog = build_catalog(&config);
        assert_eq!(catalog.resolve("claude-v3-haiku"), "claude-3-haiku-custom");
        assert_eq!(catalog.price("claude-v3-haiku").unwrap().output_per_1k, 2.0);
        assert!(catalog.contains("claude-v3-opus"));
    }
}
