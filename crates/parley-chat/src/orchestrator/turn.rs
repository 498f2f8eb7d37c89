use parley_ai::{AiResponse, ChatRequest};
use parley_common::{EventSender, StopReason, StreamEvent};
use tokio::sync::mpsc;
use tracing::{error, info};

use super::{emit, enter, Orchestrator, TurnState};
use crate::agent::{format_steps, AgentExecutor, AgentTool, ChunkCollector, KnowledgeTool, UsageMeter};
use crate::error::ChatError;
use crate::history::{to_model_messages, trace_to_root};
use crate::knowledge::{filter_used, insert_knowledge};
use crate::model::{Bot, ChatInput, Conversation};
use crate::mutator::TurnResult;
use crate::repository::{prepare_conversation, PreparedTurn};

impl Orchestrator {
    pub(super) async fn drive(
        &self,
        user_id: &str,
        input: &ChatInput,
        events: &EventSender,
    ) -> Result<(), ChatError> {
        enter(TurnState::Routing);
        let PreparedTurn {
            pending_message_id,
            mut conversation,
            bot,
        } = prepare_conversation(&*self.bots, &*self.conversations, user_id, input).await?;

        let result = match bot.as_ref().filter(|b| b.is_agent_enabled()) {
            Some(agent_bot) => {
                enter(TurnState::AgentLoop);
                if input.continue_generate {
                    return Err(ChatError::InvalidInput(
                        "agent answers cannot be continued".into(),
                    ));
                }
                info!(bot = %agent_bot.id, tools = agent_bot.tools.len(), "Bot has agent tools, using the agent");
                self.agent_turn(agent_bot, input).await?
            }
            None => {
                enter(TurnState::DirectStream);
                self.direct_turn(&conversation, &pending_message_id, bot.as_ref(), input, events)
                    .await?
            }
        };

        enter(TurnState::Mutating);
        let stop_reason = result.stop_reason;
        if stop_reason == StopReason::GuardrailIntervened {
            error!(conversation = %conversation.id, "Guardrail intervened");
        }
        self.mutator
            .commit(
                user_id,
                &mut conversation,
                &pending_message_id,
                input.continue_generate,
                bot.as_ref(),
                result,
            )
            .await?;

        emit(events, StreamEvent::end(stop_reason));
        enter(TurnState::Done);
        Ok(())
    }

    async fn agent_turn(&self, bot: &Bot, input: &ChatInput) -> Result<TurnResult, ChatError> {
        let model = input.message.model.as_str();
        let meter = UsageMeter::new();
        let chunks = ChunkCollector::new();

        let mut tools: Vec<AgentTool> = bot.tools.iter().copied().map(AgentTool::from_kind).collect();
        if bot.has_knowledge() {
            info!(bot = %bot.id, "Bot has knowledge, adding the knowledge tool");
            tools.push(AgentTool::Knowledge(KnowledgeTool::new(
                bot.clone(),
                self.search.clone(),
                self.gateway.clone(),
                &self.catalog,
                model,
                meter.clone(),
                chunks.clone(),
            )));
        }

        let executor = AgentExecutor::new(
            self.gateway.clone(),
            tools,
            model,
            self.catalog.resolve(model),
        )
        .with_system(bot.instruction.clone())
        .with_params(bot.generation.clone())
        .with_max_iterations(self.settings.max_iterations)
        .with_meter(meter.clone());

        let outcome = executor.run(input.text()).await?;
        let price = meter
            .snapshot()
            .cost_with(|model, usage| self.catalog.cost(model, usage));

        Ok(TurnResult {
            text: outcome.output,
            stop_reason: StopReason::AgentFinish,
            model: model.to_string(),
            price,
            used_chunks: chunks.take(),
            thinking_log: Some(format_steps(&outcome.steps)),
        })
    }

    async fn direct_turn(
        &self,
        conversation: &Conversation,
        pending_message_id: &str,
        bot: Option<&Bot>,
        input: &ChatInput,
        events: &EventSender,
    ) -> Result<TurnResult, ChatError> {
        let model = input.message.model.as_str();
        let mut price = 0.0;
        let mut search_results = Vec::new();
        let mut with_context = None;

        if let Some(bot) = bot.filter(|b| b.has_knowledge()) {
            emit(events, StreamEvent::FetchingKnowledge);
            let rewrite_model = self.settings.rewrite_model.as_deref().unwrap_or(model);
            let rewrite = self
                .rewriter
                .rewrite(conversation, pending_message_id, rewrite_model)
                .await;
            price += self.catalog.cost(rewrite_model, &rewrite.usage);

            search_results = self.search.search(bot, &rewrite.query).await?;
            info!(query = %rewrite.query, results = search_results.len(), "Retrieved knowledge");
            with_context = Some(insert_knowledge(
                conversation,
                &search_results,
                bot.display_retrieved_chunks,
            ));
        }

        let source = with_context.as_ref().unwrap_or(conversation);
        let chain = trace_to_root(pending_message_id, &source.message_map);
        let mut request = ChatRequest::new(self.catalog.resolve(model), to_model_messages(&chain));
        if let Some(instruction) = source.instruction() {
            request = request.with_system(instruction);
        }
        if let Some(bot) = bot {
            request = request.with_params(bot.generation.clone());
        }

        let response = self.stream(&request, events).await?;
        price += self.catalog.cost(model, &response.usage);
        info!(
            stop_reason = response.stop_reason.as_str(),
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Stream finished"
        );

        Ok(TurnResult {
            used_chunks: filter_used(&response.content, &search_results),
            text: response.content,
            stop_reason: response.stop_reason,
            model: model.to_string(),
            price,
            thinking_log: None,
        })
    }

    /// Stream one call, forwarding each token as a `STREAMING` event in arrival order.
    async fn stream(&self, request: &ChatRequest, events: &EventSender) -> Result<AiResponse, ChatError> {
        let (tokens_tx, mut tokens_rx) = mpsc::unbounded_channel::<String>();
        let call = self.gateway.invoke_streaming(request, tokens_tx);
        tokio::pin!(call);

        let result = loop {
            tokio::select! {
                biased;
                Some(token) = tokens_rx.recv() => emit(events, StreamEvent::token(token)),
                result = &mut call => break result,
            }
        };
        // Tokens sent just before the call returned.
        while let Ok(token) = tokens_rx.try_recv() {
            emit(events, StreamEvent::token(token));
        }
        Ok(result?)
    }
}
