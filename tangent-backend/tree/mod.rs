pub mod error;
pub mod history;
pub mod layout;
pub mod store;

use serde::{Deserialize, Serialize};

pub const ROOT_ID: &str = "root";

/// Shown in a node's assistant slot while a send is in flight and no chunk
/// has arrived yet.
pub const THINKING_PLACEHOLDER: &str = "...";

pub const ROOT_INVITATION: &str = "What are you curious about today?\n\n\
Type your question or idea below and press Send (or Enter) to explore it with Grok.\n\n\
Select text in a response → right-click to branch.";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// One message exchange on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNode {
    pub id: String,
    #[serde(default)]
    pub user_message: String,
    #[serde(default)]
    pub assistant_message: String,
    /// Quoted selection carried over from the node this one was branched from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_text: Option<String>,
    /// When set, history assembly does not look past this node.
    #[serde(default)]
    pub is_isolated: bool,
    #[serde(default)]
    pub stream_finished: bool,
    pub position: Position,
}

impl MessageNode {
    pub fn empty(id: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            user_message: String::new(),
            assistant_message: String::new(),
            context_text: None,
            is_isolated: false,
            stream_finished: false,
            position,
        }
    }

    pub fn root() -> Self {
        Self {
            assistant_message: ROOT_INVITATION.to_string(),
            ..Self::empty(ROOT_ID, Position::new(400.0, 200.0))
        }
    }

    /// True for assistant text that is a UI placeholder rather than a model reply.
    pub fn has_placeholder_reply(&self) -> bool {
        self.assistant_message == THINKING_PLACEHOLDER
            || self.assistant_message == ROOT_INVITATION
    }
}

/// Structural marker for the point inside a parent where a branch starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorNode {
    pub id: String,
    pub parent_id: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Message(MessageNode),
    Anchor(AnchorNode),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Message(m) => &m.id,
            Node::Anchor(a) => &a.id,
        }
    }

    pub fn as_message(&self) -> Option<&MessageNode> {
        match self {
            Node::Message(m) => Some(m),
            Node::Anchor(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn between(source: &str, target: &str) -> Self {
        Self {
            id: format!("e{source}-{target}"),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_handles(mut self, source_handle: &str, target_handle: &str) -> Self {
        self.source_handle = Some(source_handle.to_string());
        self.target_handle = Some(target_handle.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_serialization_is_tagged() {
        let node = Node::Anchor(AnchorNode {
            id: "a1".to_string(),
            parent_id: "root".to_string(),
            position: Position::new(1.0, 2.0),
        });
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "anchor");
        assert_eq!(json["parent_id"], "root");
    }

    #[test]
    fn test_message_node_defaults_on_deserialize() {
        let json = r#"{"type":"message","id":"n1","position":{"x":0.0,"y":0.0}}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        let msg = node.as_message().unwrap();
        assert!(msg.user_message.is_empty());
        assert!(msg.context_text.is_none());
        assert!(!msg.is_isolated);
        assert!(!msg.stream_finished);
    }

    #[test]
    fn test_edge_id_format() {
        let edge = Edge::between("root", "n1").with_handles("output", "input");
        assert_eq!(edge.id, "eroot-n1");
        assert_eq!(edge.source_handle.as_deref(), Some("output"));
    }

    #[test]
    fn test_root_reply_counts_as_placeholder() {
        assert!(MessageNode::root().has_placeholder_reply());
        let mut node = MessageNode::empty("n1", Position::new(0.0, 0.0));
        node.assistant_message = THINKING_PLACEHOLDER.to_string();
        assert!(node.has_placeholder_reply());
        node.assistant_message = "Hi".to_string();
        assert!(!node.has_placeholder_reply());
    }
}
