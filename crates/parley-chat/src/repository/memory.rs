use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{BotRepository, ConversationRepository};
use crate::error::ChatError;
use crate::model::{now_millis, Bot, Conversation};

/// Bots held in memory, keyed by id.
#[derive(Default)]
pub struct InMemoryBotRepository {
    bots: RwLock<HashMap<String, Bot>>,
}

impl InMemoryBotRepository {
    pub fn new(bots: impl IntoIterator<Item = Bot>) -> Self {
        Self {
            bots: RwLock::new(bots.into_iter().map(|b| (b.id.clone(), b)).collect()),
        }
    }

    pub async fn count(&self) -> usize {
        self.bots.read().await.len()
    }
}

#[async_trait]
impl BotRepository for InMemoryBotRepository {
    async fn find_bot(&self, user_id: &str, bot_id: &str) -> Result<Bot, ChatError> {
        let bots = self.bots.read().await;
        bots.get(bot_id)
            .filter(|b| b.is_visible_to(user_id))
            .cloned()
            .ok_or_else(|| ChatError::BotNotFound(bot_id.to_string()))
    }

    async fn record_last_used(&self, user_id: &str, bot_id: &str) -> Result<(), ChatError> {
        let mut bots = self.bots.write().await;
        let bot = bots
            .get_mut(bot_id)
            .filter(|b| b.is_visible_to(user_id))
            .ok_or_else(|| ChatError::BotNotFound(bot_id.to_string()))?;
        bot.last_used_time = Some(now_millis());
        debug!(bot_id, "Recorded bot last-used time");
        Ok(())
    }
}

/// Conversations held in memory, keyed by `(user, conversation)`.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<(String, String), Conversation>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.conversations.read().await.len()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, ChatError> {
        let key = (user_id.to_string(), conversation_id.to_string());
        self.conversations
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))
    }

    async fn store_conversation(
        &self,
        user_id: &str,
        conversation: &Conversation,
    ) -> Result<(), ChatError> {
        let key = (user_id.to_string(), conversation.id.clone());
        self.conversations
            .write()
            .await
            .insert(key, conversation.clone());
        Ok(())
    }
}
