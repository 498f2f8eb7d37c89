//! Query Rewriter: turns the conversation so far into one retrieval query.

use std::sync::Arc;

use parley_ai::{ChatRequest, GenerationParams, Message, ModelCatalog, ModelGateway, TokenUsage};
use tracing::{info, warn};

use crate::history::trace_to_root;
use crate::model::{ChatRole, Conversation};

const REWRITE_SYSTEM: &str =
    "You are a helpful assistant whose job is to understand what the user is asking about.";

const REWRITE_TEMPLATE: &str = r#"Based on the following conversation:
{conversation}

What is the relevant information to give to the vector search engine?

Here are a few examples of how you can respond:
<examples>
    <example>
        <input>
            User: I'd like to buy an iphone.
            Assistant: Sure, which model are you interested in?
            User: I am interested in iPhone 13.
        </input>
        <output>
            "iPhone 13"
        </output>
    </example>
    <example>
        <input>
            User: I am interested in a tshirt.
            Assistant: Happy to help! What style, fit, size and colour are you after?
            User: casual, black, vneck, slim, L.
        </input>
        <output>
            "Black casual vneck large tshirt"
        </output>
    </example>
    <example>
        <input>
            User: I need a software engineering job.
            Assistant: Here are some openings: Staff Software Engineer, Software Engineer, Senior Software Engineer in Test.
            User: Give me details about the third option.
        </input>
        <output>
            "Senior Software Engineer in Test"
        </output>
    </example>
</examples>

If there are multiple subjects, provide them all. If there is no specific subject, give as much detail as possible about what the user is looking for.
Format your answer as a single line of text."#;

/// Outcome of a rewrite, with the usage it incurred.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    pub query: String,
    pub usage: TokenUsage,
    /// True when the model call failed and the raw user text was used.
    pub fell_back: bool,
}

#[derive(Clone)]
pub struct QueryRewriter {
    gateway: ModelGateway,
    catalog: Arc<ModelCatalog>,
}

impl QueryRewriter {
    pub fn new(gateway: ModelGateway, catalog: Arc<ModelCatalog>) -> Self {
        Self { gateway, catalog }
    }

    /// Derive a retrieval query for the turn pending at `pending_message_id`.
    ///
    /// Never fails: any backend error or an empty answer falls back to the
    /// text of the last user message.
    pub async fn rewrite(
        &self,
        conversation: &Conversation,
        pending_message_id: &str,
        model_alias: &str,
    ) -> Rewrite {
        let fallback = last_user_text(conversation, pending_message_id);
        let prompt = REWRITE_TEMPLATE.replace(
            "{conversation}",
            &transcript(conversation, pending_message_id),
        );
        let request = ChatRequest::new(
            self.catalog.resolve(model_alias),
            vec![Message::user(prompt)],
        )
        .with_system(REWRITE_SYSTEM)
        .with_params(GenerationParams {
            max_tokens: 200,
            temperature: 0.0,
            stop_sequences: Vec::new(),
            ..GenerationParams::default()
        });

        match self.gateway.invoke(&request).await {
            Ok(response) => {
                let query = clean(&response.content);
                if query.is_empty() {
                    warn!("Query rewrite returned nothing, using the user message");
                    return Rewrite {
                        query: fallback,
                        usage: response.usage,
                        fell_back: true,
                    };
                }
                info!(query = %query, "Rewrote retrieval query");
                Rewrite {
                    query,
                    usage: response.usage,
                    fell_back: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "Query rewrite failed, using the user message");
                Rewrite {
                    query: fallback,
                    usage: TokenUsage::default(),
                    fell_back: true,
                }
            }
        }
    }
}

/// Role-labelled transcript of the chain ending at `pending_message_id`.
pub fn transcript(conversation: &Conversation, pending_message_id: &str) -> String {
    let mut out = String::new();
    for node in trace_to_root(pending_message_id, &conversation.message_map) {
        let label = match node.role {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
            ChatRole::System | ChatRole::Instruction => continue,
        };
        out.push_str(&format!("{label}: {}\n\n", node.last_text()));
    }
    out
}

/// Text of the nearest user message at or above `pending_message_id`.
fn last_user_text(conversation: &Conversation, pending_message_id: &str) -> String {
    trace_to_root(pending_message_id, &conversation.message_map)
        .into_iter()
        .rev()
        .find(|n| n.role == ChatRole::User)
        .map(|n| n.last_text().to_string())
        .unwrap_or_default()
}

fn clean(answer: &str) -> String {
    answer
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentBlock, MessageNode, SYSTEM_ID};
    use async_trait::async_trait;
    use parley_ai::{AiClient, AiError, AiResponse, RetryPolicy, StopReason, TokenSender};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedClient {
        reply: Result<String, ()>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl AiClient for FixedClient {
        async fn send_message(&self, request: &ChatRequest) -> Result<AiResponse, AiError> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(text) => Ok(AiResponse {
                    content: text.clone(),
                    tool_calls: vec![],
                    usage: TokenUsage {
                        input_tokens: 40,
                        output_tokens: 4,
                    },
                    stop_reason: StopReason::EndTurn,
                }),
                Err(()) => Err(AiError::ApiError("HTTP 400".into())),
            }
        }

        async fn send_message_streaming(
            &self,
            request: &ChatRequest,
            _tokens: TokenSender,
        ) -> Result<AiResponse, AiError> {
            self.send_message(request).await
        }
    }

    fn rewriter(reply: Result<&str, ()>) -> (QueryRewriter, Arc<FixedClient>) {
        let client = Arc::new(FixedClient {
            reply: reply.map(str::to_string),
            seen: Mutex::new(Vec::new()),
        });
        let gateway = ModelGateway::new(client.clone(), RetryPolicy::new(0, Duration::ZERO));
        (
            QueryRewriter::new(gateway, Arc::new(ModelCatalog::builtin())),
            client,
        )
    }

    fn conversation() -> Conversation {
        let mut conv = Conversation::new("c", "m");
        let turns = [
            (ChatRole::User, "I'd like to buy a phone."),
            (ChatRole::Assistant, "Which model?"),
            (ChatRole::User, "The iPhone 13."),
        ];
        let mut parent = SYSTEM_ID.to_string();
        for (i, (role, text)) in turns.into_iter().enumerate() {
            let id = format!("m{i}");
            conv.append_child(
                &parent,
                id.clone(),
                MessageNode::new(role, vec![ContentBlock::text(text)], "m"),
            )
            .unwrap();
            parent = id;
        }
        conv
    }

    #[test]
    fn transcript_labels_turns() {
        let text = transcript(&conversation(), "m2");
        assert_eq!(
            text,
            "User: I'd like to buy a phone.\n\nAssistant: Which model?\n\nUser: The iPhone 13.\n\n"
        );
    }

    #[tokio::test]
    async fn uses_model_answer() {
        let (rewriter, client) = rewriter(Ok("\"iPhone 13\"\n"));
        let rewrite = rewriter.rewrite(&conversation(), "m2", "claude-v3-haiku").await;

        assert_eq!(rewrite.query, "iPhone 13");
        assert!(!rewrite.fell_back);
        assert_eq!(rewrite.usage.input_tokens, 40);

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].model, "claude-3-haiku-20240307");
        assert!(seen[0].messages[0].text_content().contains("User: The iPhone 13."));
    }

    #[tokio::test]
    async fn falls_back_on_backend_error() {
        let (rewriter, _) = rewriter(Err(()));
        let rewrite = rewriter.rewrite(&conversation(), "m2", "claude-v3-haiku").await;
        assert_eq!(rewrite.query, "The iPhone 13.");
        assert!(rewrite.fell_back);
    }

    #[tokio::test]
    async fn falls_back_on_empty_answer() {
        let (rewriter, _) = rewriter(Ok("  \n\"\"  "));
        let rewrite = rewriter.rewrite(&conversation(), "m2", "claude-v3-haiku").await;
        assert_eq!(rewrite.query, "The iPhone 13.");
        assert!(rewrite.fell_back);
    }

    #[tokio::test]
    async fn fallback_from_assistant_pending_finds_user_text() {
        let (rewriter, _) = rewriter(Err(()));
        let rewrite = rewriter.rewrite(&conversation(), "m1", "claude-v3-haiku").await;
        assert_eq!(rewrite.query, "I'd like to buy a phone.");
    }
}
