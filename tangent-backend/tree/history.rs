//! Reconstructs the message sequence sent to the model for a node.
//!
//! The walk goes upward through incoming edges. Anchors are stepped over via
//! their `parent_id`; an isolated ancestor contributes its own turns and then
//! ends the walk.

use crate::chat::ChatMessage;

use super::error::TreeError;
use super::store::ConversationTree;
use super::{MessageNode, Node};

/// Build the user-side content for a node, wrapping quoted context when present.
pub fn format_user_turn(context_text: Option<&str>, user_message: &str) -> String {
    match context_text {
        Some(context) if !context.is_empty() => format!(
            "<context_attachment>\n{context}\n</context_attachment>\n\nUser follow-up: {user_message}"
        ),
        _ => user_message.to_string(),
    }
}

/// The node's own user turn, if it carries a message or quoted context.
pub fn own_turn(node: &MessageNode) -> Option<ChatMessage> {
    let has_context = node.context_text.as_deref().is_some_and(|c| !c.is_empty());
    if node.user_message.is_empty() && !has_context {
        return None;
    }
    Some(ChatMessage::user(format_user_turn(
        node.context_text.as_deref(),
        &node.user_message,
    )))
}

/// Turns contributed by the ancestors of `target_id`, oldest first.
///
/// Empty when the target itself is isolated.
pub fn ancestor_turns(tree: &ConversationTree, target_id: &str) -> Result<Vec<ChatMessage>, TreeError> {
    let target = tree.message(target_id)?;
    if target.is_isolated {
        return Ok(Vec::new());
    }

    // Collected newest-first, reversed at the end.
    let mut turns: Vec<ChatMessage> = Vec::new();
    let mut steps = 0usize;
    let mut next = parent_of(tree, target_id)?;

    while let Some(id) = next {
        steps += 1;
        if steps > tree.len() {
            return Err(TreeError::Cycle(target_id.to_string()));
        }

        let node = tree
            .node(&id)
            .ok_or_else(|| TreeError::NotFound(id.clone()))?;

        match node {
            Node::Anchor(anchor) => {
                next = Some(anchor.parent_id.clone());
            }
            Node::Message(message) => {
                if !message.assistant_message.is_empty() && !message.has_placeholder_reply() {
                    turns.push(ChatMessage::assistant(message.assistant_message.clone()));
                }
                if let Some(turn) = own_turn(message) {
                    turns.push(turn);
                }
                if message.is_isolated {
                    break;
                }
                next = parent_of(tree, &id)?;
            }
        }
    }

    turns.reverse();
    Ok(turns)
}

/// Full history for `target_id`: ancestor turns followed by the target's own
/// user turn.
pub fn assemble(tree: &ConversationTree, target_id: &str) -> Result<Vec<ChatMessage>, TreeError> {
    let mut turns = ancestor_turns(tree, target_id)?;
    if let Some(turn) = own_turn(tree.message(target_id)?) {
        turns.push(turn);
    }
    Ok(turns)
}

fn parent_of(tree: &ConversationTree, id: &str) -> Result<Option<String>, TreeError> {
    if tree.node(id).is_none() {
        return Err(TreeError::NotFound(id.to_string()));
    }
    Ok(tree.incoming_edge(id).map(|e| e.source.clone()))
}
