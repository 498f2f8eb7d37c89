//! Conversation Mutator: writes a finished turn into the DAG and persists it.

use std::sync::Arc;

use parley_common::{new_id, StopReason};
use tracing::{debug, info};

use crate::error::ChatError;
use crate::knowledge::source_link;
use crate::model::{Bot, ChatRole, ContentBlock, Conversation, MessageNode, RetrievedChunk};
use crate::repository::ConversationRepository;

/// What a turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub text: String,
    pub stop_reason: StopReason,
    /// Model alias the answer came from.
    pub model: String,
    /// Cost of the turn in USD.
    pub price: f64,
    /// Chunks the answer cited.
    pub used_chunks: Vec<RetrievedChunk>,
    pub thinking_log: Option<String>,
}

/// Apply `result` to `conversation`; returns the id of the message holding
/// the answer.
///
/// A continuation extends the current last message under its existing id.
/// Otherwise a new assistant message is linked under `pending_message_id`.
pub fn apply_turn_result(
    conversation: &mut Conversation,
    pending_message_id: &str,
    continuation: bool,
    bot: Option<&Bot>,
    result: TurnResult,
) -> Result<String, ChatError> {
    let message_id = if continuation {
        let last_id = conversation.last_message_id.clone();
        let last = conversation
            .message_map
            .get_mut(&last_id)
            .ok_or_else(|| ChatError::InvalidInput(format!("message {last_id} not found")))?;
        match last.content.iter_mut().find(|c| c.is_text()) {
            Some(block) => block.body.push_str(&result.text),
            None => last.content.insert(0, ContentBlock::text(result.text.clone())),
        }
        last_id
    } else {
        let cite = bot.is_some_and(|b| b.has_knowledge() && b.display_retrieved_chunks);
        let used_chunks = (cite && !result.used_chunks.is_empty()).then(|| {
            result
                .used_chunks
                .iter()
                .map(|c| {
                    let (content_type, source) = source_link(&c.source);
                    RetrievedChunk {
                        content: c.content.clone(),
                        content_type,
                        source,
                        rank: c.rank,
                    }
                })
                .collect()
        });

        let mut node = MessageNode::new(
            ChatRole::Assistant,
            vec![ContentBlock::text(result.text.clone())],
            result.model.clone(),
        );
        node.used_chunks = used_chunks;
        node.thinking_log = result.thinking_log.clone();

        let id = new_id();
        conversation.append_child(pending_message_id, id.clone(), node)?;
        id
    };

    conversation.total_price += result.price;
    conversation.should_continue = result.stop_reason.is_truncated();
    debug!(
        conversation = %conversation.id,
        message = %message_id,
        continuation,
        should_continue = conversation.should_continue,
        "Applied turn result"
    );
    Ok(message_id)
}

/// Applies turn results and persists the snapshot.
#[derive(Clone)]
pub struct ConversationMutator {
    conversations: Arc<dyn ConversationRepository>,
}

impl ConversationMutator {
    pub fn new(conversations: Arc<dyn ConversationRepository>) -> Self {
        Self { conversations }
    }

    /// Apply and store. Returns once the snapshot is durable, so the caller
    /// may then announce completion.
    pub async fn commit(
        &self,
        user_id: &str,
        conversation: &mut Conversation,
        pending_message_id: &str,
        continuation: bool,
        bot: Option<&Bot>,
        result: TurnResult,
    ) -> Result<String, ChatError> {
        let message_id =
            apply_turn_result(conversation, pending_message_id, continuation, bot, result)?;
        self.conversations
            .store_conversation(user_id, conversation)
            .await?;
        info!(conversation = %conversation.id, message = %message_id, "Stored conversation");
        Ok(message_id)
    }
}
