//! Streaming Orchestrator: runs one chat turn from request to `STREAMING_END`.
//!
//! ```text
//! ROUTING -> AGENT_LOOP | DIRECT_STREAM -> MUTATING -> DONE
//!        \__________________ ERROR ________________/
//! ```
//!
//! Progress goes out through an [`EventSender`] in the order it happens.
//! The conversation is persisted before `STREAMING_END` is sent.

mod turn;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use parley_ai::{ModelCatalog, ModelGateway};
use parley_common::{new_correlation_id, EventSender, FrameAck, StreamEvent};
use tracing::{debug, error, warn, Instrument};

use crate::error::ChatError;
use crate::knowledge::KnowledgeSearch;
use crate::model::ChatInput;
use crate::mutator::ConversationMutator;
use crate::repository::{BotRepository, ConversationRepository};
use crate::rewriter::QueryRewriter;

/// States of a turn, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Routing,
    AgentLoop,
    DirectStream,
    Mutating,
    Done,
    Error,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routing => "ROUTING",
            Self::AgentLoop => "AGENT_LOOP",
            Self::DirectStream => "DIRECT_STREAM",
            Self::Mutating => "MUTATING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }
}

/// Per-deployment knobs for turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSettings {
    pub max_iterations: u32,
    /// Model alias for query rewriting; `None` uses the request's model.
    pub rewrite_model: Option<String>,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            rewrite_model: None,
        }
    }
}

pub struct Orchestrator {
    bots: Arc<dyn BotRepository>,
    conversations: Arc<dyn ConversationRepository>,
    search: Arc<dyn KnowledgeSearch>,
    gateway: ModelGateway,
    catalog: Arc<ModelCatalog>,
    rewriter: QueryRewriter,
    mutator: ConversationMutator,
    settings: TurnSettings,
}

impl Orchestrator {
    pub fn new(
        bots: Arc<dyn BotRepository>,
        conversations: Arc<dyn ConversationRepository>,
        search: Arc<dyn KnowledgeSearch>,
        gateway: ModelGateway,
        catalog: Arc<ModelCatalog>,
        settings: TurnSettings,
    ) -> Self {
        Self {
            rewriter: QueryRewriter::new(gateway.clone(), catalog.clone()),
            mutator: ConversationMutator::new(conversations.clone()),
            bots,
            conversations,
            search,
            gateway,
            catalog,
            settings,
        }
    }

    /// Run one turn. Every outcome, including failure, is reported through
    /// `events` and summarised in the returned acknowledgement.
    pub async fn run_turn(&self, user_id: &str, input: &ChatInput, events: &EventSender) -> FrameAck {
        let span = tracing::info_span!("turn", turn = %new_correlation_id(), user = user_id);
        async {
            match self.drive(user_id, input, events).await {
                Ok(()) => {
                    self.record_last_used(user_id, input).await;
                    FrameAck::ok("Message sent.")
                }
                Err(e) => self.fail(e, input, events),
            }
        }
        .instrument(span)
        .await
    }

    fn fail(&self, e: ChatError, input: &ChatInput, events: &EventSender) -> FrameAck {
        enter(TurnState::Error);
        error!(error = %e, bot = ?input.bot_id, "Turn failed");
        match e {
            // The request named no bot, so this is the conversation's own bot
            // gone missing. Only the acknowledgement reports it.
            ChatError::BotNotFound(_) if input.bot_id.is_none() => {
                FrameAck::new(400, "Invalid request.")
            }
            e => {
                emit(events, StreamEvent::error(e.reason()));
                FrameAck::new(e.status_code(), e.ack_body())
            }
        }
    }

    async fn record_last_used(&self, user_id: &str, input: &ChatInput) {
        if let Some(bot_id) = input.bot_id.as_deref() {
            if let Err(e) = self.bots.record_last_used(user_id, bot_id).await {
                warn!(bot_id, error = %e, "Failed to record bot last-used time");
            }
        }
    }
}

pub(crate) fn enter(state: TurnState) {
    debug!(state = state.as_str(), "Turn state");
}

/// Send an event; a closed channel means the client is gone.
pub(crate) fn emit(events: &EventSender, event: StreamEvent) {
    if events.send(event).is_err() {
        debug!("Event channel closed, client disconnected");
    }
}
