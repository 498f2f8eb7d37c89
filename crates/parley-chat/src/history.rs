//! Parent-chain traversal over the message map.

use std::collections::HashMap;

use parley_ai::{ContentPart, Message, Role};

use crate::model::{ChatRole, MessageNode};

/// Messages from the root down to `node_id`, root first.
///
/// Walks parent links iteratively. A missing id yields an empty chain; a
/// dangling parent link ends the chain at the last node found.
pub fn trace_to_root<'a>(
    node_id: &str,
    message_map: &'a HashMap<String, MessageNode>,
) -> Vec<&'a MessageNode> {
    let mut chain = Vec::new();
    let mut current = message_map.get(node_id);
    while let Some(node) = current {
        chain.push(node);
        // Bounded by the map size so a corrupt map with a cycle still terminates.
        if chain.len() > message_map.len() {
            break;
        }
        current = node.parent.as_deref().and_then(|p| message_map.get(p));
    }
    chain.reverse();
    chain
}

/// Convert a chain into model messages. Root and instruction entries are
/// dropped; the instruction travels as the system prompt.
pub fn to_model_messages(chain: &[&MessageNode]) -> Vec<Message> {
    chain
        .iter()
        .filter_map(|node| {
            let role = match node.role {
                ChatRole::User => Role::User,
                ChatRole::Assistant => Role::Assistant,
                ChatRole::System | ChatRole::Instruction => return None,
            };
            let content = node
                .content
                .iter()
                .map(|block| {
                    if block.is_text() {
                        ContentPart::Text(block.body.clone())
                    } else {
                        ContentPart::Image {
                            media_type: block
                                .media_type
                                .clone()
                                .unwrap_or_else(|| "image/png".to_string()),
                            data: block.body.clone(),
                        }
                    }
                })
                .collect();
            Some(Message { role, content })
        })
        .collect()
}
