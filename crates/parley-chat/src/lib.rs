//! Chat turn processing for parley.
//!
//! Owns the conversation DAG and everything that happens between a
//! reassembled request and the final `STREAMING_END`:
//! - collaborators (bot and conversation stores, knowledge search)
//! - the Query Rewriter
//! - the agent loop and its closed tool set
//! - the Conversation Mutator
//! - the Streaming Orchestrator

pub mod agent;
pub mod error;
pub mod history;
pub mod knowledge;
pub mod model;
pub mod mutator;
pub mod orchestrator;
pub mod repository;
pub mod rewriter;

pub use error::ChatError;
pub use knowledge::{DocumentSearch, KnowledgeSearch};
pub use model::{
    Bot, ChatInput, ChatRole, ContentBlock, Conversation, KnowledgeDocument, MessageInput,
    MessageNode, RetrievedChunk, ToolKind, INSTRUCTION_ID, SYSTEM_ID,
};
pub use mutator::{ConversationMutator, TurnResult};
pub use orchestrator::{Orchestrator, TurnSettings, TurnState};
pub use repository::{
    BotRepository, ConversationRepository, InMemoryBotRepository, InMemoryConversationRepository,
};
pub use rewriter::QueryRewriter;
