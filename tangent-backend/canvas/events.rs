use serde::Serialize;

use crate::tree::{Edge, MessageNode, Node};

/// Change notification emitted after every tree mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeEvent {
    NodeCreated { node: Node },
    EdgeCreated { edge: Edge },
    NodePatched { node: MessageNode },
    NodesRemoved { node_ids: Vec<String>, edge_ids: Vec<String> },
    /// A stream finished on this node; the presentation layer should measure
    /// it and call back with its rendered height.
    LayoutRequested { node_id: String },
}

impl TreeEvent {
    pub fn as_sse_event(&self) -> &'static str {
        match self {
            TreeEvent::NodeCreated { .. } => "node_created",
            TreeEvent::EdgeCreated { .. } => "edge_created",
            TreeEvent::NodePatched { .. } => "node_patched",
            TreeEvent::NodesRemoved { .. } => "nodes_removed",
            TreeEvent::LayoutRequested { .. } => "layout_requested",
        }
    }
}
