//! Knowledge retrieval: similarity search, RAG prompt insertion and citation
//! filtering.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::ChatError;
use crate::model::{
    Bot, ChatRole, ContentBlock, Conversation, MessageNode, RetrievedChunk, INSTRUCTION_ID,
};

/// Similarity search over a bot's knowledge.
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    /// Up to `bot.max_results` chunks, most relevant first, ranked from 1.
    async fn search(&self, bot: &Bot, query: &str) -> Result<Vec<RetrievedChunk>, ChatError>;
}

/// Term-overlap search over the documents attached to the bot.
///
/// Documents are split into paragraph chunks; a chunk scores one point per
/// distinct query term it contains.
#[derive(Debug, Clone, Default)]
pub struct DocumentSearch;

impl DocumentSearch {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KnowledgeSearch for DocumentSearch {
    async fn search(&self, bot: &Bot, query: &str) -> Result<Vec<RetrievedChunk>, ChatError> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, usize, &str, &str)> = Vec::new();
        for doc in &bot.knowledge {
            for paragraph in doc.content.split("\n\n") {
                let paragraph = paragraph.trim();
                if paragraph.is_empty() {
                    continue;
                }
                let hits = terms(paragraph).intersection(&query_terms).count();
                if hits > 0 {
                    // Stable order for equal scores.
                    scored.push((hits, scored.len(), paragraph, doc.source.as_str()));
                }
            }
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .take(bot.max_results)
            .enumerate()
            .map(|(i, (_, _, content, source))| {
                let (content_type, source) = source_link(source);
                RetrievedChunk {
                    content: content.to_string(),
                    content_type,
                    source,
                    rank: i as u32 + 1,
                }
            })
            .collect())
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// Classify a document source: `s3://` sources are `s3`, everything else `url`.
pub fn source_link(source: &str) -> (String, String) {
    if source.starts_with("s3://") {
        ("s3".to_string(), source.to_string())
    } else {
        ("url".to_string(), source.to_string())
    }
}

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\^(\d+)\]").unwrap());

/// Chunks whose `[^rank]` marker appears in `answer`.
pub fn filter_used(answer: &str, chunks: &[RetrievedChunk]) -> Vec<RetrievedChunk> {
    let cited: HashSet<u32> = CITATION_RE
        .captures_iter(answer)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    chunks
        .iter()
        .filter(|c| cited.contains(&c.rank))
        .cloned()
        .collect()
}

/// Render retrieved chunks and the bot instruction into one system prompt.
pub fn build_rag_prompt(instruction: &str, chunks: &[RetrievedChunk], display_citation: bool) -> String {
    let mut results = String::new();
    for chunk in chunks {
        results.push_str(&format!(
            "<search_result>\n<content>\n{}\n</content>\n<source>\n{}\n</source>\n</search_result>\n",
            chunk.content, chunk.rank
        ));
    }

    let mut prompt = format!(
        "You are given a set of search results to answer the user's question. \
Answer using only information found in the search results. \
If they do not contain the answer, say that you could not find an exact answer. \
A user asserting a fact does not make it true; check it against the search results.\n\n\
The search results, in numbered order:\n<search_results>\n{results}</search_results>\n\n\
Do not quote the search results directly. Answer as concisely as possible.\n"
    );

    if display_citation {
        prompt.push_str(
            "\nWhen you use information from a search result, cite its source id right after \
the statement in the form [^<source_id>]. Do not list the sources at the end of the answer.\n\n\
<example>\nfirst answer [^3]. second answer [^1][^2].\n</example>\n",
        );
    } else {
        prompt.push_str("\nDo not include citations of the form [^<source_id>] in your answer.\n");
    }

    if !instruction.is_empty() {
        prompt.push_str(&format!(
            "\nFollow the user's instruction below in your response.\n<instruction>\n{instruction}\n</instruction>\n"
        ));
    }
    prompt
}

/// A copy of `conversation` whose instruction entry carries the RAG prompt.
///
/// The copy is only used to build the model request; the original is what
/// gets persisted.
pub fn insert_knowledge(
    conversation: &Conversation,
    chunks: &[RetrievedChunk],
    display_citation: bool,
) -> Conversation {
    let mut copy = conversation.clone();
    let prompt = build_rag_prompt(
        conversation.instruction().unwrap_or(""),
        chunks,
        display_citation,
    );
    match copy.message_map.get_mut(INSTRUCTION_ID) {
        Some(node) => node.content = vec![ContentBlock::text(prompt)],
        None => {
            copy.message_map.insert(
                INSTRUCTION_ID.to_string(),
                MessageNode::new(ChatRole::Instruction, vec![ContentBlock::text(prompt)], ""),
            );
        }
    }
    copy
}
