use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley_ai::{
    AiClient, AiError, AiResponse, ChatRequest, ModelCatalog, ModelGateway, RetryPolicy, Role,
    StopReason, TokenSender, TokenUsage, ToolCall,
};
use parley_common::{EventSender, StreamEvent};
use tokio::sync::mpsc;

use super::*;
use crate::knowledge::DocumentSearch;
use crate::model::{Bot, ChatInput, Conversation, KnowledgeDocument, ToolKind};
use crate::repository::{InMemoryBotRepository, InMemoryConversationRepository};

/// Marker the probing repository pushes into the event channel on store.
const STORED: &str = "<stored>";

enum Streamed {
    Tokens(Vec<&'static str>, StopReason),
    Fail(AiError),
}

/// Plays back non-streaming replies and streamed token sequences.
#[derive(Default)]
struct ScriptedClient {
    replies: Mutex<VecDeque<AiResponse>>,
    streams: Mutex<VecDeque<Streamed>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    fn reply(self, response: AiResponse) -> Self {
        self.replies.lock().unwrap().push_back(response);
        self
    }

    fn stream(self, streamed: Streamed) -> Self {
        self.streams.lock().unwrap().push_back(streamed);
        self
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn usage() -> TokenUsage {
    TokenUsage {
        input_tokens: 1000,
        output_tokens: 1000,
    }
}

fn text_reply(text: &str) -> AiResponse {
    AiResponse {
        content: text.into(),
        tool_calls: vec![],
        usage: usage(),
        stop_reason: StopReason::EndTurn,
    }
}

#[async_trait]
impl AiClient for ScriptedClient {
    async fn send_message(&self, request: &ChatRequest) -> Result<AiResponse, AiError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AiError::ApiError("no scripted reply".into()))
    }

    async fn send_message_streaming(
        &self,
        request: &ChatRequest,
        tokens: TokenSender,
    ) -> Result<AiResponse, AiError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.streams.lock().unwrap().pop_front();
        match next {
            Some(Streamed::Tokens(parts, stop_reason)) => {
                for part in &parts {
                    let _ = tokens.send(part.to_string());
                    tokio::task::yield_now().await;
                }
                Ok(AiResponse {
                    content: parts.concat(),
                    tool_calls: vec![],
                    usage: usage(),
                    stop_reason,
                })
            }
            Some(Streamed::Fail(e)) => Err(e),
            None => Err(AiError::ApiError("no scripted stream".into())),
        }
    }
}

/// Conversation store that marks the moment of persistence in the event stream.
struct RecordingRepository {
    inner: InMemoryConversationRepository,
    store_marker: EventSender,
}

#[async_trait]
impl ConversationRepository for RecordingRepository {
    async fn find_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, ChatError> {
        self.inner.find_conversation(user_id, conversation_id).await
    }

    async fn store_conversation(
        &self,
        user_id: &str,
        conversation: &Conversation,
    ) -> Result<(), ChatError> {
        let _ = self.store_marker.send(StreamEvent::error(STORED));
        self.inner.store_conversation(user_id, conversation).await
    }
}

struct Harness {
    orchestrator: Orchestrator,
    client: Arc<ScriptedClient>,
    bots: Arc<InMemoryBotRepository>,
    conversations: Arc<RecordingRepository>,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl Harness {
    fn new(client: ScriptedClient, bots: Vec<Bot>) -> Self {
        let client = Arc::new(client);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let bots = Arc::new(InMemoryBotRepository::new(bots));
        let conversations = Arc::new(RecordingRepository {
            inner: InMemoryConversationRepository::new(),
            store_marker: events_tx.clone(),
        });
        let gateway = ModelGateway::new(client.clone(), RetryPolicy::new(3, Duration::ZERO));
        let orchestrator = Orchestrator::new(
            bots.clone(),
            conversations.clone(),
            Arc::new(DocumentSearch::new()),
            gateway,
            Arc::new(ModelCatalog::builtin()),
            TurnSettings::default(),
        );
        Self {
            orchestrator,
            client,
            bots,
            conversations,
            events_tx,
            events_rx,
        }
    }

    async fn run(&mut self, input: &ChatInput) -> (FrameAck, Vec<StreamEvent>) {
        let ack = self
            .orchestrator
            .run_turn("alice", input, &self.events_tx)
            .await;
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        (ack, events)
    }

    async fn stored(&self, id: &str) -> Option<Conversation> {
        self.conversations.inner.find_conversation("alice", id).await.ok()
    }
}

fn input(json: serde_json::Value) -> ChatInput {
    ChatInput::from_json(&json.to_string(), "claude-v3-haiku").unwrap()
}

fn user_message(conversation: &str, bot: Option<&str>, text: &str) -> ChatInput {
    let mut value = serde_json::json!({
        "conversation_id": conversation,
        "message": {"content": [{"content_type": "text", "body": text}]},
    });
    if let Some(bot) = bot {
        value["bot_id"] = serde_json::json!(bot);
    }
    input(value)
}

fn knowledge_bot() -> Bot {
    let mut bot = Bot::new("kb");
    bot.instruction = "You sell phones.".into();
    bot.display_retrieved_chunks = true;
    bot.knowledge.push(KnowledgeDocument {
        source: "s3://docs/phones.md".into(),
        content: "The iPhone 13 has a 6.1 inch display.".into(),
    });
    bot
}

fn statuses(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| match e {
            StreamEvent::FetchingKnowledge => "FETCHING_KNOWLEDGE".to_string(),
            StreamEvent::Streaming { completion } => format!("STREAMING({completion})"),
            StreamEvent::StreamingEnd { stop_reason, .. } => {
                format!("STREAMING_END({})", stop_reason.as_str())
            }
            StreamEvent::Error { reason } if reason == STORED => "stored".to_string(),
            StreamEvent::Error { reason } => format!("ERROR({reason})"),
        })
        .collect()
}

#[tokio::test]
async fn missing_bot_reports_bot_not_found() {
    let mut h = Harness::new(ScriptedClient::default(), vec![]);
    let (ack, events) = h.run(&user_message("c1", Some("b1"), "hi")).await;

    assert_eq!(ack, FrameAck::new(404, "bot b1 not found."));
    assert_eq!(events, vec![StreamEvent::error("bot_not_found")]);
    assert_eq!(
        events[0].to_json(),
        r#"{"status":"ERROR","reason":"bot_not_found"}"#
    );
    assert!(h.stored("c1").await.is_none());
}

#[tokio::test]
async fn vanished_conversation_bot_is_invalid_request() {
    let mut h = Harness::new(
        ScriptedClient::default().stream(Streamed::Tokens(vec!["ok"], StopReason::EndTurn)),
        vec![Bot::new("b1")],
    );
    let (ack, _) = h.run(&user_message("c1", Some("b1"), "hi")).await;
    assert!(ack.is_success());

    // Same conversation, bot id omitted, bot deleted in the meantime.
    let mut follow_up = Harness::new(ScriptedClient::default(), vec![]);
    let stored = h.stored("c1").await.unwrap();
    follow_up
        .conversations
        .inner
        .store_conversation("alice", &stored)
        .await
        .unwrap();
    let (ack, events) = follow_up.run(&user_message("c1", None, "again")).await;
    assert_eq!(ack, FrameAck::new(400, "Invalid request."));
    assert!(
        !events.iter().any(|e| matches!(e, StreamEvent::Error { .. })),
        "unexpected events: {events:?}"
    );
}

#[tokio::test]
async fn knowledge_turn_event_order_and_persist_before_end() {
    let client = ScriptedClient::default()
        .reply(text_reply("\"iPhone 13 display\""))
        .stream(Streamed::Tokens(
            vec!["It is ", "6.1 inches", " [^1]."],
            StopReason::EndTurn,
        ));
    let mut h = Harness::new(client, vec![knowledge_bot()]);

    let (ack, events) = h.run(&user_message("c1", Some("kb"), "How big is the iPhone 13?")).await;

    assert_eq!(ack, FrameAck::ok("Message sent."));
    assert_eq!(
        statuses(&events),
        vec![
            "FETCHING_KNOWLEDGE",
            "STREAMING(It is )",
            "STREAMING(6.1 inches)",
            "STREAMING( [^1].)",
            "stored",
            "STREAMING_END(end_turn)",
        ]
    );

    let conv = h.stored("c1").await.unwrap();
    let answer = conv.get(&conv.last_message_id).unwrap();
    assert_eq!(answer.last_text(), "It is 6.1 inches [^1].");
    let cited = answer.used_chunks.as_ref().unwrap();
    assert_eq!(cited.len(), 1);
    assert_eq!(cited[0].content_type, "s3");

    let requests = h.client.requests();
    assert_eq!(requests.len(), 2);
    // The streamed call carries the RAG prompt, not the bare instruction.
    let system = requests[1].system.as_deref().unwrap();
    assert!(system.contains("The iPhone 13 has a 6.1 inch display."));
    assert!(system.contains("You sell phones."));
    // The stored instruction is untouched.
    assert_eq!(conv.instruction(), Some("You sell phones."));
    // Rewrite + stream, haiku prices, 1k in / 1k out each.
    assert!((conv.total_price - 2.0 * (0.00025 + 0.00125)).abs() < 1e-12);
}

#[tokio::test]
async fn rewrite_failure_still_answers() {
    let client = ScriptedClient::default()
        .stream(Streamed::Tokens(vec!["6.1 inches"], StopReason::EndTurn));
    let mut h = Harness::new(client, vec![knowledge_bot()]);

    let (ack, events) = h.run(&user_message("c1", Some("kb"), "iPhone 13 size?")).await;

    assert!(ack.is_success());
    assert_eq!(statuses(&events)[0], "FETCHING_KNOWLEDGE");
    assert_eq!(statuses(&events).last().unwrap(), "STREAMING_END(end_turn)");
}

#[tokio::test]
async fn plain_turn_skips_retrieval() {
    let client = ScriptedClient::default().stream(Streamed::Tokens(vec!["Hi", "!"], StopReason::EndTurn));
    let mut h = Harness::new(client, vec![]);

    let (_, events) = h.run(&user_message("c1", None, "hello")).await;

    assert_eq!(
        statuses(&events),
        vec!["STREAMING(Hi)", "STREAMING(!)", "stored", "STREAMING_END(end_turn)"]
    );
    let requests = h.client.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].system.is_none());
    assert_eq!(requests[0].model, "claude-3-haiku-20240307");
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[0].messages[0].role, Role::User);
}

#[tokio::test]
async fn truncated_answer_continues_in_place() {
    let client = ScriptedClient::default()
        .stream(Streamed::Tokens(vec!["Once upon"], StopReason::MaxTokens))
        .stream(Streamed::Tokens(vec![" a time."], StopReason::EndTurn));
    let mut h = Harness::new(client, vec![]);

    let (_, events) = h.run(&user_message("c1", None, "tell me a story")).await;
    assert_eq!(statuses(&events).last().unwrap(), "STREAMING_END(max_tokens)");
    let first = h.stored("c1").await.unwrap();
    assert!(first.should_continue);
    let answer_id = first.last_message_id.clone();

    let cont = input(serde_json::json!({
        "conversation_id": "c1",
        "continue_generate": true,
        "message": {"content": [], "parent_message_id": answer_id},
    }));
    let (ack, _) = h.run(&cont).await;
    assert!(ack.is_success());

    let second = h.stored("c1").await.unwrap();
    assert_eq!(second.last_message_id, answer_id);
    assert_eq!(second.message_map.len(), first.message_map.len());
    assert_eq!(second.get(&answer_id).unwrap().last_text(), "Once upon a time.");
    assert!(!second.should_continue);

    // The continuation request ends with the partial answer as a prefill.
    let requests = h.client.requests();
    let last = requests[1].messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text_content(), "Once upon");
}

#[tokio::test]
async fn answer_hangs_from_pending_message() {
    let client = ScriptedClient::default().stream(Streamed::Tokens(vec!["ok"], StopReason::EndTurn));
    let mut h = Harness::new(client, vec![]);
    let mut request = user_message("c1", None, "hi");
    request.message.message_id = Some("u1".into());

    h.run(&request).await;

    let conv = h.stored("c1").await.unwrap();
    let answer = conv.get(&conv.last_message_id).unwrap();
    assert_eq!(answer.parent.as_deref(), Some("u1"));
    let children = &conv.get("u1").unwrap().children;
    assert_eq!(children, &vec![conv.last_message_id.clone()]);
}

#[tokio::test]
async fn agent_turn_ends_without_tokens() {
    let client = ScriptedClient::default()
        .reply(AiResponse {
            content: "Let me check the date.".into(),
            tool_calls: vec![ToolCall {
                id: "t1".into(),
                name: "today".into(),
                arguments: serde_json::json!({}),
            }],
            usage: usage(),
            stop_reason: StopReason::EndTurn,
        })
        .reply(text_reply("Today is a fine day."));
    let mut bot = Bot::new("agent");
    bot.tools = vec![ToolKind::Today, ToolKind::Calculator];
    let mut h = Harness::new(client, vec![bot]);

    let (ack, events) = h.run(&user_message("c1", Some("agent"), "what day is it?")).await;

    assert!(ack.is_success());
    assert_eq!(statuses(&events), vec!["stored", "STREAMING_END(agent_finish)"]);

    let conv = h.stored("c1").await.unwrap();
    let answer = conv.get(&conv.last_message_id).unwrap();
    assert_eq!(answer.last_text(), "Today is a fine day.");
    let trace = answer.thinking_log.as_deref().unwrap();
    assert!(trace.contains("Action: today"));
    assert!(trace.contains("Let me check the date."));
    // Two haiku calls at 1k/1k each.
    assert!((conv.total_price - 2.0 * 0.0015).abs() < 1e-12);
    assert!(!conv.should_continue);

    let requests = h.client.requests();
    let names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["today", "calculator"]);
}

#[tokio::test]
async fn agent_bot_with_knowledge_gets_knowledge_tool() {
    let client = ScriptedClient::default()
        .reply(AiResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "t1".into(),
                name: "knowledge_base_tool".into(),
                arguments: serde_json::json!({"query": "iPhone 13 display"}),
            }],
            usage: usage(),
            stop_reason: StopReason::EndTurn,
        })
        .reply(text_reply("6.1 inches [^1]"))
        .reply(text_reply("It has a 6.1 inch display [^1]."));
    let mut bot = knowledge_bot();
    bot.tools = vec![ToolKind::Today];
    let mut h = Harness::new(client, vec![bot]);

    let (ack, _) = h.run(&user_message("c1", Some("kb"), "iPhone 13 size?")).await;
    assert!(ack.is_success());

    let conv = h.stored("c1").await.unwrap();
    let answer = conv.get(&conv.last_message_id).unwrap();
    assert_eq!(answer.used_chunks.as_ref().map(Vec::len), Some(1));
    // Agent call, knowledge call, agent call.
    assert!((conv.total_price - 3.0 * 0.0015).abs() < 1e-12);
}

#[tokio::test]
async fn backend_failure_is_terminal_and_not_persisted() {
    let client = ScriptedClient::default().stream(Streamed::Fail(AiError::ApiError("HTTP 400: bad".into())));
    let mut h = Harness::new(client, vec![]);

    let (ack, events) = h.run(&user_message("c1", None, "hello")).await;

    assert_eq!(ack.status_code, 500);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::Error { reason } if reason.contains("HTTP 400")));
    assert!(h.stored("c1").await.is_none());
    assert_eq!(h.client.requests().len(), 1);
}

#[tokio::test]
async fn throttled_stream_is_retried() {
    let client = ScriptedClient::default()
        .stream(Streamed::Fail(AiError::RateLimited))
        .stream(Streamed::Tokens(vec!["ok"], StopReason::EndTurn));
    let mut h = Harness::new(client, vec![]);

    let (ack, events) = h.run(&user_message("c1", None, "hello")).await;

    assert!(ack.is_success());
    assert_eq!(statuses(&events), vec!["STREAMING(ok)", "stored", "STREAMING_END(end_turn)"]);
}

#[tokio::test]
async fn guardrail_stop_is_a_normal_end() {
    let client = ScriptedClient::default()
        .stream(Streamed::Tokens(vec!["Sorry"], StopReason::GuardrailIntervened));
    let mut h = Harness::new(client, vec![]);

    let (ack, events) = h.run(&user_message("c1", None, "something bad")).await;

    assert!(ack.is_success());
    assert_eq!(
        statuses(&events).last().unwrap(),
        "STREAMING_END(guardrail_intervened)"
    );
    assert!(h.stored("c1").await.is_some());
}

#[tokio::test]
async fn successful_turn_records_last_used() {
    let client = ScriptedClient::default().stream(Streamed::Tokens(vec!["ok"], StopReason::EndTurn));
    let mut h = Harness::new(client, vec![Bot::new("b1")]);

    h.run(&user_message("c1", Some("b1"), "hi")).await;

    let bot = h.bots.find_bot("alice", "b1").await.unwrap();
    assert!(bot.last_used_time.is_some());
}

#[tokio::test]
async fn bad_parent_is_invalid_request() {
    let mut h = Harness::new(ScriptedClient::default(), vec![]);
    let mut request = user_message("c1", None, "hi");
    request.message.parent_message_id = Some("ghost".into());

    let (ack, events) = h.run(&request).await;

    assert_eq!(ack, FrameAck::new(400, "Invalid request."));
    assert_eq!(events.len(), 1);
    assert!(h.client.requests().is_empty());
}
