use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use super::error::TreeError;
use super::{Edge, MessageNode, Node};

/// Everything removed by one `delete_subtree` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub node_ids: Vec<String>,
    pub edge_ids: Vec<String>,
}

impl Removal {
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty() && self.edge_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Authoritative set of nodes and edges for one canvas.
///
/// Knows nothing about the chat service. Every mutation keeps the graph an
/// arborescence: edges only between existing nodes, at most one incoming edge
/// per node, and no edge survives the removal of either endpoint.
#[derive(Debug, Default)]
pub struct ConversationTree {
    nodes: HashMap<String, Node>,
    order: Vec<String>,
    edges: Vec<Edge>,
}

impl ConversationTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create the invitation root if the tree has no nodes. Returns the root
    /// when it was created by this call.
    pub fn ensure_root(&mut self) -> Option<MessageNode> {
        if !self.is_empty() {
            return None;
        }
        let root = MessageNode::root();
        self.order.push(root.id.clone());
        self.nodes.insert(root.id.clone(), Node::Message(root.clone()));
        Some(root)
    }

    pub fn create_node(&mut self, node: Node) -> Result<(), TreeError> {
        let id = node.id().to_string();
        if self.nodes.contains_key(&id) {
            return Err(TreeError::DuplicateId(id));
        }
        self.order.push(id.clone());
        self.nodes.insert(id, node);
        Ok(())
    }

    pub fn create_edge(&mut self, edge: Edge) -> Result<(), TreeError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(TreeError::DanglingEdge {
                    edge: edge.id.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        if self.edges.iter().any(|e| e.id == edge.id) {
            return Err(TreeError::DuplicateId(edge.id));
        }
        // A second parent would break the single-incoming-edge invariant.
        if self.incoming_edge(&edge.target).is_some() {
            return Err(TreeError::DuplicateId(edge.id));
        }
        // Covers self-loops too: `descendants` starts at the target itself.
        if self.descendants(&edge.target).contains(&edge.source) {
            return Err(TreeError::Cycle(edge.id));
        }
        if matches!(self.nodes.get(&edge.source), Some(Node::Anchor(_)))
            && !self.outgoing_edges(&edge.source).is_empty()
        {
            return Err(TreeError::AnchorOccupied(edge.source));
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn message(&self, id: &str) -> Result<&MessageNode, TreeError> {
        match self.nodes.get(id) {
            Some(Node::Message(m)) => Ok(m),
            Some(Node::Anchor(_)) => Err(TreeError::NotAMessage(id.to_string())),
            None => Err(TreeError::NotFound(id.to_string())),
        }
    }

    /// Apply `update` to a single message node and return its new state.
    pub fn patch_node<F>(&mut self, id: &str, update: F) -> Result<MessageNode, TreeError>
    where
        F: FnOnce(&mut MessageNode),
    {
        match self.nodes.get_mut(id) {
            Some(Node::Message(m)) => {
                update(m);
                Ok(m.clone())
            }
            Some(Node::Anchor(_)) => Err(TreeError::NotAMessage(id.to_string())),
            None => Err(TreeError::NotFound(id.to_string())),
        }
    }

    pub fn incoming_edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.target == id)
    }

    pub fn outgoing_edges(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == id).collect()
    }

    /// `id` plus every node reachable through outgoing edges, breadth first.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for edge in self.outgoing_edges(&current) {
                queue.push_back(edge.target.clone());
            }
            out.push(current);
        }
        out
    }

    /// Remove `id`, its descendants, and the anchor that leads into it.
    ///
    /// Deleting an id that is already gone yields an empty removal, so
    /// overlapping deletes compose as a union.
    pub fn delete_subtree(&mut self, id: &str) -> Removal {
        if !self.nodes.contains_key(id) {
            return Removal::default();
        }

        let mut doomed: HashSet<String> = self.descendants(id).into_iter().collect();
        if let Some(incoming) = self.incoming_edge(id) {
            if matches!(self.nodes.get(&incoming.source), Some(Node::Anchor(_))) {
                doomed.insert(incoming.source.clone());
            }
        }

        let mut removal = Removal::default();
        self.edges.retain(|e| {
            let touches = doomed.contains(&e.source) || doomed.contains(&e.target);
            if touches {
                removal.edge_ids.push(e.id.clone());
            }
            !touches
        });
        self.order.retain(|n| {
            if doomed.contains(n) {
                removal.node_ids.push(n.clone());
                false
            } else {
                true
            }
        });
        for node_id in &removal.node_ids {
            self.nodes.remove(node_id);
        }
        removal
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            nodes: self
                .order
                .iter()
                .filter_map(|id| self.nodes.get(id).cloned())
                .collect(),
            edges: self.edges.clone(),
        }
    }
}
