use parley_common::new_id;
use tracing::debug;

use super::{BotRepository, ConversationRepository};
use crate::error::ChatError;
use crate::model::{
    Bot, ChatInput, ChatRole, ContentBlock, Conversation, MessageNode, INSTRUCTION_ID, SYSTEM_ID,
};

/// A conversation ready for a turn.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    /// The user message the answer will hang from, or the message being
    /// continued.
    pub pending_message_id: String,
    pub conversation: Conversation,
    pub bot: Option<Bot>,
}

/// Load or create the conversation for `input` and insert the pending user
/// message.
///
/// New conversations get the synthetic root and, with a bot, an instruction
/// entry under it. In continuation mode nothing is inserted and the pending
/// message is the current last message.
pub async fn prepare_conversation(
    bots: &dyn BotRepository,
    conversations: &dyn ConversationRepository,
    user_id: &str,
    input: &ChatInput,
) -> Result<PreparedTurn, ChatError> {
    let existing = match input.conversation_id.as_deref() {
        Some(id) => match conversations.find_conversation(user_id, id).await {
            Ok(conversation) => Some(conversation),
            Err(ChatError::ConversationNotFound(_)) => None,
            Err(e) => return Err(e),
        },
        None => None,
    };

    let (mut conversation, bot) = match existing {
        Some(conversation) => {
            let bot = match conversation.bot_id.as_deref() {
                Some(bot_id) => Some(bots.find_bot(user_id, bot_id).await?),
                None => None,
            };
            (conversation, bot)
        }
        None => {
            if input.continue_generate {
                return Err(ChatError::InvalidInput(
                    "continuation requested for an unknown conversation".into(),
                ));
            }
            new_conversation(bots, user_id, input).await?
        }
    };

    if input.continue_generate {
        let last = conversation.last_message_id.clone();
        match conversation.get(&last) {
            Some(node) if node.role == ChatRole::Assistant => {}
            _ => {
                return Err(ChatError::InvalidInput(
                    "nothing to continue: last message is not an answer".into(),
                ))
            }
        }
        return Ok(PreparedTurn {
            pending_message_id: last,
            conversation,
            bot,
        });
    }

    let message_id = input.message.message_id.clone().unwrap_or_else(new_id);
    let parent = match input.message.parent_message_id.as_deref() {
        // Editing the first message of a bot conversation keeps the instruction in the chain.
        Some(SYSTEM_ID) if conversation.message_map.contains_key(INSTRUCTION_ID) => {
            INSTRUCTION_ID.to_string()
        }
        Some(parent) => parent.to_string(),
        None if conversation.last_message_id.is_empty() => SYSTEM_ID.to_string(),
        None => conversation.last_message_id.clone(),
    };

    let node = MessageNode::new(
        ChatRole::User,
        input.message.content.clone(),
        input.message.model.clone(),
    );
    conversation.append_child(&parent, message_id.clone(), node)?;
    debug!(conversation = %conversation.id, message = %message_id, parent = %parent, "Inserted user message");

    Ok(PreparedTurn {
        pending_message_id: message_id,
        conversation,
        bot,
    })
}

async fn new_conversation(
    bots: &dyn BotRepository,
    user_id: &str,
    input: &ChatInput,
) -> Result<(Conversation, Option<Bot>), ChatError> {
    let id = input.conversation_id.clone().unwrap_or_else(new_id);
    let mut conversation = Conversation::new(id, &input.message.model);

    let bot = match input.bot_id.as_deref() {
        Some(bot_id) => {
            let bot = bots.find_bot(user_id, bot_id).await?;
            let instruction = MessageNode::new(
                ChatRole::Instruction,
                vec![ContentBlock::text(bot.instruction.clone())],
                input.message.model.clone(),
            );
            conversation.append_child(SYSTEM_ID, INSTRUCTION_ID, instruction)?;
            conversation.bot_id = Some(bot.id.clone());
            Some(bot)
        }
        None => None,
    };

    Ok((conversation, bot))
}
