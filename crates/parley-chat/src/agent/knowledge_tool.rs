use std::sync::Arc;

use parley_ai::{ChatRequest, Message, ModelCatalog, ModelGateway};
use tracing::debug;

use super::meters::{ChunkCollector, UsageMeter};
use super::tools::ToolError;
use crate::knowledge::{build_rag_prompt, filter_used, KnowledgeSearch};
use crate::model::Bot;

/// Answers a question from the bot's knowledge with one model call.
///
/// Usage goes to the shared [`UsageMeter`]; cited chunks to the
/// [`ChunkCollector`].
pub struct KnowledgeTool {
    bot: Bot,
    search: Arc<dyn KnowledgeSearch>,
    gateway: ModelGateway,
    model_alias: String,
    model_id: String,
    meter: UsageMeter,
    chunks: ChunkCollector,
}

impl KnowledgeTool {
    pub fn new(
        bot: Bot,
        search: Arc<dyn KnowledgeSearch>,
        gateway: ModelGateway,
        catalog: &ModelCatalog,
        model_alias: &str,
        meter: UsageMeter,
        chunks: ChunkCollector,
    ) -> Self {
        Self {
            bot,
            search,
            gateway,
            model_alias: model_alias.to_string(),
            model_id: catalog.resolve(model_alias).to_string(),
            meter,
            chunks,
        }
    }

    pub(crate) async fn answer(&self, query: &str) -> Result<String, ToolError> {
        let results = self
            .search
            .search(&self.bot, query)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        debug!(bot = %self.bot.id, results = results.len(), "Knowledge tool search");

        let system = build_rag_prompt(
            &self.bot.instruction,
            &results,
            self.bot.display_retrieved_chunks,
        );
        let request = ChatRequest::new(self.model_id.clone(), vec![Message::user(query)])
            .with_system(system)
            .with_params(self.bot.generation.clone());

        let response = self
            .gateway
            .invoke(&request)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        self.meter.record(&self.model_alias, &response.usage);
        self.chunks.extend(filter_used(&response.content, &results));

        Ok(response.content)
    }
}
