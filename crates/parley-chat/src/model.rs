//! Conversation DAG, bots and the chat request.

use std::collections::HashMap;

use parley_ai::GenerationParams;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Id of the synthetic root every conversation starts with.
pub const SYSTEM_ID: &str = "system";
/// Id of the entry carrying a bot's instruction (child of [`SYSTEM_ID`]).
pub const INSTRUCTION_ID: &str = "instruction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
    Instruction,
}

/// One content block of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// `text` or `image`.
    pub content_type: String,
    #[serde(default)]
    pub media_type: Option<String>,
    /// Text, or base64 data for images.
    pub body: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl ContentBlock {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            content_type: "text".into(),
            media_type: None,
            body: body.into(),
            file_name: None,
        }
    }

    pub fn is_text(&self) -> bool {
        self.content_type == "text"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub thumbs_up: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub comment: String,
}

/// A chunk returned by knowledge search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    /// `s3` or `url`.
    pub content_type: String,
    pub source: String,
    /// 1-based relevance rank; also the citation marker `[^rank]`.
    pub rank: u32,
}

/// A node of the conversation DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNode {
    pub role: ChatRole,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub children: Vec<String>,
    pub parent: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub create_time: i64,
    #[serde(default)]
    pub feedback: Option<Feedback>,
    #[serde(default)]
    pub used_chunks: Option<Vec<RetrievedChunk>>,
    #[serde(default)]
    pub thinking_log: Option<String>,
}

impl MessageNode {
    pub fn new(role: ChatRole, content: Vec<ContentBlock>, model: impl Into<String>) -> Self {
        Self {
            role,
            content,
            model: model.into(),
            children: Vec::new(),
            parent: None,
            create_time: now_millis(),
            feedback: None,
            used_chunks: None,
            thinking_log: None,
        }
    }

    /// Body of the last text block, or empty.
    pub fn last_text(&self) -> &str {
        self.content
            .iter()
            .rev()
            .find(|c| c.is_text())
            .map(|c| c.body.as_str())
            .unwrap_or("")
    }
}

/// A stored conversation: a rooted, append-only message DAG plus totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub create_time: i64,
    pub message_map: HashMap<String, MessageNode>,
    pub last_message_id: String,
    /// Running cost in USD.
    pub total_price: f64,
    /// The last answer was cut off by the length limit.
    pub should_continue: bool,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl Conversation {
    /// A new conversation holding only the synthetic root.
    pub fn new(id: impl Into<String>, model: &str) -> Self {
        let mut message_map = HashMap::new();
        message_map.insert(
            SYSTEM_ID.to_string(),
            MessageNode::new(ChatRole::System, vec![ContentBlock::text("")], model),
        );
        Self {
            id: id.into(),
            title: "New conversation".into(),
            create_time: now_millis(),
            message_map,
            last_message_id: String::new(),
            total_price: 0.0,
            should_continue: false,
            bot_id: None,
        }
    }

    pub fn get(&self, id: &str) -> Option<&MessageNode> {
        self.message_map.get(id)
    }

    /// Bot instruction text, if the conversation has one.
    pub fn instruction(&self) -> Option<&str> {
        self.message_map
            .get(INSTRUCTION_ID)
            .map(|m| m.last_text())
            .filter(|s| !s.is_empty())
    }

    /// Insert `node` under `parent` and make it the last message.
    ///
    /// Fails if the parent does not exist or the id is taken.
    pub fn append_child(
        &mut self,
        parent: &str,
        id: impl Into<String>,
        mut node: MessageNode,
    ) -> Result<(), ChatError> {
        let id = id.into();
        if self.message_map.contains_key(&id) {
            return Err(ChatError::InvalidInput(format!("message {id} already exists")));
        }
        let parent_node = self
            .message_map
            .get_mut(parent)
            .ok_or_else(|| ChatError::InvalidInput(format!("parent message {parent} not found")))?;
        parent_node.children.push(id.clone());
        node.parent = Some(parent.to_string());
        self.message_map.insert(id.clone(), node);
        self.last_message_id = id;
        Ok(())
    }
}

/// A knowledge document attached to a bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub source: String,
    pub content: String,
}

/// Built-in agent tools a bot may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Today,
    Calculator,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "today" => Some(Self::Today),
            "calculator" => Some(Self::Calculator),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Calculator => "calculator",
        }
    }
}

/// A bot: instruction, sampling parameters, tools and knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    /// Empty means shared with every user.
    pub owner: String,
    pub title: String,
    pub instruction: String,
    pub generation: GenerationParams,
    pub max_results: usize,
    pub tools: Vec<ToolKind>,
    pub knowledge: Vec<KnowledgeDocument>,
    pub display_retrieved_chunks: bool,
    #[serde(default)]
    pub last_used_time: Option<i64>,
}

impl Bot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: String::new(),
            title: String::new(),
            instruction: String::new(),
            generation: GenerationParams::default(),
            max_results: 20,
            tools: Vec::new(),
            knowledge: Vec::new(),
            display_retrieved_chunks: false,
            last_used_time: None,
        }
    }

    pub fn has_knowledge(&self) -> bool {
        !self.knowledge.is_empty()
    }

    pub fn is_agent_enabled(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.owner.is_empty() || self.owner == user_id
    }
}

/// The message part of a chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInput {
    #[serde(default = "default_role")]
    pub role: ChatRole,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

fn default_role() -> ChatRole {
    ChatRole::User
}

/// A reassembled chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInput {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: MessageInput,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub continue_generate: bool,
}

impl ChatInput {
    /// Parse a reassembled payload. An empty model falls back to `default_model`.
    pub fn from_json(payload: &str, default_model: &str) -> Result<Self, ChatError> {
        let mut input: ChatInput = serde_json::from_str(payload)
            .map_err(|e| ChatError::InvalidInput(format!("malformed chat input: {e}")))?;
        if input.message.model.is_empty() {
            input.message.model = default_model.to_string();
        }
        if input.message.role != ChatRole::User {
            return Err(ChatError::InvalidInput("message role must be user".into()));
        }
        if !input.continue_generate && input.message.content.is_empty() {
            return Err(ChatError::InvalidInput("message has no content".into()));
        }
        Ok(input)
    }

    /// Text of the user message (last text block).
    pub fn text(&self) -> &str {
        self.message
            .content
            .iter()
            .rev()
            .find(|c| c.is_text())
            .map(|c| c.body.as_str())
            .unwrap_or("")
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_input() {
        let input = ChatInput::from_json(
            r#"{"bot_id":"b1","message":{"content":[{"content_type":"text","body":"hi"}]}}"#,
            "claude-v3-haiku",
        )
        .unwrap();
        assert_eq!(input.bot_id.as_deref(), Some("b1"));
        assert_eq!(input.message.model, "claude-v3-haiku");
        assert_eq!(input.message.role, ChatRole::User);
        assert_eq!(input.text(), "hi");
        assert!(!input.continue_generate);
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        let err = ChatInput::from_json(r#"{"bot_id":"b1","mess"#, "m").unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }

    #[test]
    fn assistant_role_is_rejected() {
        let err = ChatInput::from_json(
            r#"{"message":{"role":"assistant","content":[{"content_type":"text","body":"x"}]}}"#,
            "m",
        )
        .unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }

    #[test]
    fn continuation_may_omit_content() {
        let input = ChatInput::from_json(
            r#"{"conversation_id":"c1","continue_generate":true,"message":{"content":[],"model":"claude-v3-opus"}}"#,
            "m",
        )
        .unwrap();
        assert!(input.continue_generate);
        assert_eq!(input.message.model, "claude-v3-opus");
    }

    #[test]
    fn append_child_links_both_ways() {
        let mut conv = Conversation::new("c1", "m");
        let node = MessageNode::new(ChatRole::User, vec![ContentBlock::text("hi")], "m");
        conv.append_child(SYSTEM_ID, "u1", node).unwrap();

        assert_eq!(conv.last_message_id, "u1");
        assert_eq!(conv.get("u1").unwrap().parent.as_deref(), Some(SYSTEM_ID));
        assert_eq!(conv.get(SYSTEM_ID).unwrap().children, vec!["u1".to_string()]);
    }

    #[test]
    fn append_child_rejects_orphans_and_duplicates() {
        let mut conv = Conversation::new("c1", "m");
        let node = MessageNode::new(ChatRole::User, vec![ContentBlock::text("hi")], "m");
        assert!(conv.append_child("missing", "u1", node.clone()).is_err());
        conv.append_child(SYSTEM_ID, "u1", node.clone()).unwrap();
        assert!(conv.append_child(SYSTEM_ID, "u1", node).is_err());
        assert_eq!(conv.get(SYSTEM_ID).unwrap().children.len(), 1);
    }

    #[test]
    fn last_text_skips_images() {
        let node = MessageNode::new(
            ChatRole::User,
            vec![
                ContentBlock::text("describe this"),
                ContentBlock {
                    content_type: "image".into(),
                    media_type: Some("image/png".into()),
                    body: "iVBOR".into(),
                    file_name: None,
                },
            ],
            "m",
        );
        assert_eq!(node.last_text(), "describe this");
    }

    #[test]
    fn tool_kind_names_round_trip() {
        for kind in [ToolKind::Today, ToolKind::Calculator] {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("knowledge_base_tool"), None);
    }

    #[test]
    fn bot_visibility() {
        let mut bot = Bot::new("b1");
        assert!(bot.is_visible_to("anyone"));
        bot.owner = "alice".into();
        assert!(bot.is_visible_to("alice"));
        assert!(!bot.is_visible_to("bob"));
    }
}
