pub mod coordinator;
pub mod events;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, broadcast};
use uuid::Uuid;

use crate::chat::ChatMessage;
use crate::chat::client::ChatClient;
use crate::tree::error::TreeError;
use crate::tree::store::{ConversationTree, Removal, TreeSnapshot};
use crate::tree::{
    AnchorNode, Edge, MessageNode, Node, Position, ROOT_ID, THINKING_PLACEHOLDER, history, layout,
};

use self::coordinator::{StreamCoordinator, StreamPhase};
use self::events::TreeEvent;

#[derive(thiserror::Error, Debug)]
pub enum CanvasError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("the root node cannot be deleted")]
    RootProtected,

    #[error("node {0} is already streaming a response")]
    AlreadyStreaming(String),

    #[error("nothing to send from node {0}")]
    EmptyMessage(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchRequest {
    pub selection: String,
    #[serde(default)]
    pub isolated: bool,
    /// Point inside the source node where the selection sits. When given, the
    /// branch hangs off an anchor node at that point.
    #[serde(default)]
    pub anchor: Option<Position>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchOutcome {
    pub node: MessageNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<AnchorNode>,
    pub edges: Vec<Edge>,
}

/// State shared between the command API and in-flight streams.
///
/// Lock order is `tree` before `phases` or `pending_layout`.
pub(crate) struct Shared {
    pub(crate) tree: RwLock<ConversationTree>,
    pub(crate) events_tx: broadcast::Sender<TreeEvent>,
    /// Nodes whose stream completed and still await follow-up placement.
    pub(crate) pending_layout: Mutex<HashSet<String>>,
    pub(crate) phases: Mutex<HashMap<String, StreamPhase>>,
}

impl Shared {
    pub(crate) fn new(tree: ConversationTree) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            tree: RwLock::new(tree),
            events_tx,
            pending_layout: Mutex::new(HashSet::new()),
            phases: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn emit(&self, event: TreeEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    pub(crate) async fn patch<F>(&self, node_id: &str, update: F) -> Result<MessageNode, TreeError>
    where
        F: FnOnce(&mut MessageNode),
    {
        let node = self.tree.write().await.patch_node(node_id, update)?;
        self.emit(TreeEvent::NodePatched { node: node.clone() });
        Ok(node)
    }

    /// Record the phase of a live node. Returns false, recording nothing,
    /// when the node has been deleted.
    pub(crate) async fn set_phase(&self, node_id: &str, phase: StreamPhase) -> bool {
        let tree = self.tree.read().await;
        if tree.node(node_id).is_none() {
            return false;
        }
        self.phases.lock().await.insert(node_id.to_string(), phase);
        true
    }

    pub(crate) async fn phase(&self, node_id: &str) -> StreamPhase {
        self.phases
            .lock()
            .await
            .get(node_id)
            .copied()
            .unwrap_or(StreamPhase::Idle)
    }

    /// Mark a live node as awaiting follow-up placement. Returns false when
    /// the node has been deleted.
    pub(crate) async fn request_layout(&self, node_id: &str) -> bool {
        let tree = self.tree.read().await;
        if tree.node(node_id).is_none() {
            return false;
        }
        self.pending_layout.lock().await.insert(node_id.to_string());
        self.emit(TreeEvent::LayoutRequested {
            node_id: node_id.to_string(),
        });
        true
    }
}

/// Typed command API over one conversation tree.
///
/// Presentation layers issue commands here and follow the tree through
/// [`Canvas::subscribe`].
#[derive(Clone)]
pub struct Canvas {
    shared: Arc<Shared>,
    coordinator: Arc<StreamCoordinator>,
}

impl Canvas {
    /// A canvas holding only the root node, so commands can target `root`
    /// straight away.
    pub fn new(chat: Arc<dyn ChatClient>, idle_timeout: Duration) -> Self {
        let mut tree = ConversationTree::new();
        tree.ensure_root();
        let shared = Arc::new(Shared::new(tree));
        let coordinator = Arc::new(StreamCoordinator::new(shared.clone(), chat, idle_timeout));
        Self {
            shared,
            coordinator,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.shared.events_tx.subscribe()
    }

    pub async fn snapshot(&self) -> TreeSnapshot {
        self.shared.tree.read().await.snapshot()
    }

    pub async fn node(&self, node_id: &str) -> Result<(Node, StreamPhase), CanvasError> {
        let node = self
            .shared
            .tree
            .read()
            .await
            .node(node_id)
            .cloned()
            .ok_or_else(|| TreeError::NotFound(node_id.to_string()))?;
        Ok((node, self.shared.phase(node_id).await))
    }

    pub async fn history(&self, node_id: &str) -> Result<Vec<ChatMessage>, CanvasError> {
        let tree = self.shared.tree.read().await;
        Ok(history::assemble(&tree, node_id)?)
    }

    pub async fn edit_user_message(
        &self,
        node_id: &str,
        text: String,
    ) -> Result<MessageNode, CanvasError> {
        Ok(self
            .shared
            .patch(node_id, move |m| m.user_message = text)
            .await?)
    }

    /// Write `text` as the node's user message and stream a fresh reply into it.
    ///
    /// Returns once the node is in the sending state; the stream itself runs
    /// on its own task.
    #[tracing::instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn send(&self, node_id: &str, text: &str) -> Result<(), CanvasError> {
        let text = text.trim().to_string();

        let (node, messages) = {
            let mut tree = self.shared.tree.write().await;
            let mut phases = self.shared.phases.lock().await;
            if matches!(
                phases.get(node_id),
                Some(StreamPhase::Sending | StreamPhase::Streaming)
            ) {
                return Err(CanvasError::AlreadyStreaming(node_id.to_string()));
            }

            let current = tree.message(node_id)?;
            let has_context = current.context_text.as_deref().is_some_and(|c| !c.is_empty());
            if text.is_empty() && !has_context {
                return Err(CanvasError::EmptyMessage(node_id.to_string()));
            }

            let node = tree.patch_node(node_id, |m| {
                m.user_message = text;
                m.assistant_message = THINKING_PLACEHOLDER.to_string();
                m.stream_finished = false;
            })?;
            let messages = history::assemble(&tree, node_id)?;
            phases.insert(node_id.to_string(), StreamPhase::Sending);
            (node, messages)
        };

        self.shared.pending_layout.lock().await.remove(node_id);
        self.shared.emit(TreeEvent::NodePatched { node });

        let coordinator = self.coordinator.clone();
        let node_id = node_id.to_string();
        tokio::spawn(async move {
            coordinator.run(&node_id, messages).await;
        });
        Ok(())
    }

    /// Spawn a child of `source_id` seeded with the selected text.
    ///
    /// A blank selection is ignored and yields `None`.
    pub async fn branch(
        &self,
        source_id: &str,
        request: BranchRequest,
    ) -> Result<Option<BranchOutcome>, CanvasError> {
        let selection = request.selection.trim();
        if selection.is_empty() {
            tracing::debug!(source_id, "ignoring branch with empty selection");
            return Ok(None);
        }

        let outcome = {
            let mut tree = self.shared.tree.write().await;
            let source_position = tree.message(source_id)?.position;

            let mut child = MessageNode::empty(
                Uuid::new_v4().to_string(),
                layout::branch_position(source_position, request.anchor),
            );
            child.context_text = Some(selection.to_string());
            child.is_isolated = request.isolated;

            let anchor = request.anchor.map(|position| AnchorNode {
                id: Uuid::new_v4().to_string(),
                parent_id: source_id.to_string(),
                position,
            });

            let edges = match &anchor {
                Some(anchor) => vec![
                    Edge::between(source_id, &anchor.id),
                    Edge::between(&anchor.id, &child.id),
                ],
                None => vec![Edge::between(source_id, &child.id).with_handles("output", "input")],
            };

            if let Some(anchor) = &anchor {
                tree.create_node(Node::Anchor(anchor.clone()))?;
            }
            tree.create_node(Node::Message(child.clone()))?;
            for edge in &edges {
                tree.create_edge(edge.clone())?;
            }

            BranchOutcome {
                node: child,
                anchor,
                edges,
            }
        };

        tracing::info!(
            source_id,
            node_id = %outcome.node.id,
            isolated = request.isolated,
            anchored = outcome.anchor.is_some(),
            "branched"
        );

        if let Some(anchor) = &outcome.anchor {
            self.shared.emit(TreeEvent::NodeCreated {
                node: Node::Anchor(anchor.clone()),
            });
        }
        self.shared.emit(TreeEvent::NodeCreated {
            node: Node::Message(outcome.node.clone()),
        });
        for edge in &outcome.edges {
            self.shared.emit(TreeEvent::EdgeCreated { edge: edge.clone() });
        }

        Ok(Some(outcome))
    }

    /// Remove a node, its descendants, and the anchor it hangs from.
    pub async fn delete(&self, node_id: &str) -> Result<Removal, CanvasError> {
        if node_id == ROOT_ID {
            return Err(CanvasError::RootProtected);
        }

        // Held until the bookkeeping is cleared so a finishing stream cannot
        // re-register a removed node in between.
        let mut tree = self.shared.tree.write().await;
        let removal = tree.delete_subtree(node_id);
        if removal.is_empty() {
            return Ok(removal);
        }

        {
            let mut pending = self.shared.pending_layout.lock().await;
            let mut phases = self.shared.phases.lock().await;
            for id in &removal.node_ids {
                pending.remove(id);
                phases.remove(id);
            }
        }

        tracing::info!(node_id, removed = removal.node_ids.len(), "deleted subtree");
        self.shared.emit(TreeEvent::NodesRemoved {
            node_ids: removal.node_ids.clone(),
            edge_ids: removal.edge_ids.clone(),
        });
        drop(tree);
        Ok(removal)
    }

    /// Place the empty follow-up node below a completed node once its rendered
    /// height is known. Runs at most once per completion.
    pub async fn place_follow_up(
        &self,
        node_id: &str,
        rendered_height: f64,
    ) -> Result<Option<MessageNode>, CanvasError> {
        if !self.shared.pending_layout.lock().await.remove(node_id) {
            return Ok(None);
        }

        let (child, edge) = {
            let mut tree = self.shared.tree.write().await;
            let parent_position = tree.message(node_id)?.position;
            let child = MessageNode::empty(
                Uuid::new_v4().to_string(),
                layout::follow_up_position(parent_position, rendered_height),
            );
            let edge = Edge::between(node_id, &child.id).with_handles("output", "input");
            tree.create_node(Node::Message(child.clone()))?;
            tree.create_edge(edge.clone())?;
            (child, edge)
        };

        tracing::debug!(node_id, follow_up = %child.id, "placed follow-up node");
        self.shared.emit(TreeEvent::NodeCreated {
            node: Node::Message(child.clone()),
        });
        self.shared.emit(TreeEvent::EdgeCreated { edge });
        Ok(Some(child))
    }
}
