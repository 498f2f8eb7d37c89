//! Bot and conversation persistence.
//!
//! The stores are collaborators behind traits; the in-memory versions back
//! the server binary and the tests.

mod memory;
mod prepare;


use async_trait::async_trait;

use crate::error::ChatError;
use crate::model::{Bot, Conversation};

pub use memory::{InMemoryBotRepository, InMemoryConversationRepository};
pub use prepare::{prepare_conversation, PreparedTurn};

#[async_trait]
pub trait BotRepository: Send + Sync {
    /// A bot visible to `user_id`, or `BotNotFound`.
    async fn find_bot(&self, user_id: &str, bot_id: &str) -> Result<Bot, ChatError>;

    async fn record_last_used(&self, user_id: &str, bot_id: &str) -> Result<(), ChatError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// A stored conversation, or `ConversationNotFound`.
    async fn find_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, ChatError>;

    /// Replace the stored snapshot.
    async fn store_conversation(
        &self,
        user_id: &str,
        conversation: &Conversation,
    ) -> Result<(), ChatError>;
}
