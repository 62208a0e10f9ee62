use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;

use crate::chat::ChatMessage;
use crate::chat::client::ChatClient;
use crate::chat::error::ChatError;
use crate::tree::error::TreeError;

use super::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
}

/// Drives one request/response cycle per send and patches the target node
/// as chunks arrive.
pub struct StreamCoordinator {
    shared: Arc<Shared>,
    chat: Arc<dyn ChatClient>,
    idle_timeout: Duration,
}

impl StreamCoordinator {
    pub(crate) fn new(shared: Arc<Shared>, chat: Arc<dyn ChatClient>, idle_timeout: Duration) -> Self {
        Self {
            shared,
            chat,
            idle_timeout,
        }
    }

    /// Stream a reply into `node_id`. The caller has already put the node in
    /// the `Sending` state.
    #[tracing::instrument(skip_all, fields(node_id = %node_id, turns = messages.len()))]
    pub async fn run(&self, node_id: &str, messages: Vec<ChatMessage>) -> StreamPhase {
        // The idle budget also covers the wait for response headers.
        let mut stream = match tokio::time::timeout(self.idle_timeout, self.chat.stream(&messages)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.fail(node_id, e).await,
            Err(_) => {
                let err = ChatError::Transport(format!(
                    "no response within {:?}",
                    self.idle_timeout
                ));
                return self.fail(node_id, err).await;
            }
        };

        let mut phase = StreamPhase::Sending;
        let mut accumulated = String::new();

        loop {
            let next = match tokio::time::timeout(self.idle_timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let err = ChatError::Transport(format!(
                        "stream stalled: no data within {:?}",
                        self.idle_timeout
                    ));
                    return self.fail(node_id, err).await;
                }
            };

            match next {
                Some(Ok(delta)) => {
                    if phase == StreamPhase::Sending {
                        tracing::debug!("first chunk received");
                        phase = StreamPhase::Streaming;
                        if !self.shared.set_phase(node_id, phase).await {
                            return self.abandon(node_id, TreeError::NotFound(node_id.to_string())).await;
                        }
                    }
                    accumulated.push_str(&delta);
                    let text = accumulated.clone();
                    if let Err(e) = self
                        .shared
                        .patch(node_id, move |m| m.assistant_message = text)
                        .await
                    {
                        return self.abandon(node_id, e).await;
                    }
                }
                Some(Err(e)) => return self.fail(node_id, e).await,
                None => break,
            }
        }

        let chars = accumulated.chars().count();
        let finished = self
            .shared
            .patch(node_id, move |m| {
                m.assistant_message = accumulated;
                m.stream_finished = true;
            })
            .await;
        if let Err(e) = finished {
            return self.abandon(node_id, e).await;
        }

        // A delete can land between the last patch and here.
        if !self.shared.set_phase(node_id, StreamPhase::Completed).await
            || !self.shared.request_layout(node_id).await
        {
            return self.abandon(node_id, TreeError::NotFound(node_id.to_string())).await;
        }
        tracing::info!(chars, "stream completed");
        StreamPhase::Completed
    }

    async fn fail(&self, node_id: &str, err: ChatError) -> StreamPhase {
        tracing::error!(error = %err, "stream failed");
        let message = format!("Something went wrong while generating a response: {err}");
        if let Err(e) = self
            .shared
            .patch(node_id, move |m| {
                m.assistant_message = message;
                m.stream_finished = false;
            })
            .await
        {
            return self.abandon(node_id, e).await;
        }
        if !self.shared.set_phase(node_id, StreamPhase::Failed).await {
            return self.abandon(node_id, TreeError::NotFound(node_id.to_string())).await;
        }
        StreamPhase::Failed
    }

    /// The node went away mid-stream (deleted); nothing left to update.
    async fn abandon(&self, node_id: &str, err: TreeError) -> StreamPhase {
        tracing::debug!(error = %err, "node gone, dropping stream");
        self.shared.phases.lock().await.remove(node_id);
        StreamPhase::Failed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::canvas::events::TreeEvent;
    use crate::chat::client::ChatStream;
    use crate::chat::error::Result as ChatResult;
    use crate::tree::store::ConversationTree;
    use crate::tree::{MessageNode, Node, Position, THINKING_PLACEHOLDER};
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    /// Replays a fixed list of chunk results.
    pub(crate) struct ScriptedClient {
        pub chunks: Vec<std::result::Result<String, String>>,
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn stream(&self, _messages: &[ChatMessage]) -> ChatResult<ChatStream> {
            let items: Vec<ChatResult<String>> = self
                .chunks
                .iter()
                .cloned()
                .map(|c| c.map_err(ChatError::Transport))
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> ChatResult<String> {
            let mut out = String::new();
            for chunk in &self.chunks {
                out.push_str(chunk.as_ref().map_err(|e| ChatError::Transport(e.clone()))?);
            }
            Ok(out)
        }
    }

    /// Accepts the request and never produces a chunk.
    pub(crate) struct StalledClient;

    #[async_trait]
    impl ChatClient for StalledClient {
        async fn stream(&self, _messages: &[ChatMessage]) -> ChatResult<ChatStream> {
            Ok(Box::pin(futures::stream::pending::<ChatResult<String>>()))
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> ChatResult<String> {
            futures::future::pending().await
        }
    }

    /// Echoes the last message back one character at a time, pausing
    /// between characters so concurrent streams interleave.
    pub(crate) struct EchoClient {
        pub pause: Duration,
    }

    #[async_trait]
    impl ChatClient for EchoClient {
        async fn stream(&self, messages: &[ChatMessage]) -> ChatResult<ChatStream> {
            let text = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let pause = self.pause;
            Ok(Box::pin(async_stream::stream! {
                for ch in text.chars() {
                    tokio::time::sleep(pause).await;
                    yield Ok(ch.to_string());
                }
            }))
        }

        async fn complete(&self, messages: &[ChatMessage]) -> ChatResult<String> {
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    /// Connects but never returns response headers.
    pub(crate) struct SilentUpstreamClient;

    #[async_trait]
    impl ChatClient for SilentUpstreamClient {
        async fn stream(&self, _messages: &[ChatMessage]) -> ChatResult<ChatStream> {
            futures::future::pending().await
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> ChatResult<String> {
            futures::future::pending().await
        }
    }

    struct RefusingClient;

    #[async_trait]
    impl ChatClient for RefusingClient {
        async fn stream(&self, _messages: &[ChatMessage]) -> ChatResult<ChatStream> {
            Err(ChatError::Upstream {
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                body: "boom".into(),
            })
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> ChatResult<String> {
            Err(ChatError::Malformed("nope".into()))
        }
    }

    async fn shared_with_node(id: &str) -> Arc<Shared> {
        let shared = Arc::new(Shared::new(ConversationTree::new()));
        let mut node = MessageNode::empty(id, Position::new(0.0, 0.0));
        node.assistant_message = THINKING_PLACEHOLDER.into();
        shared
            .tree
            .write()
            .await
            .create_node(Node::Message(node))
            .unwrap();
        shared
    }

    fn coordinator(shared: &Arc<Shared>, chat: Arc<dyn ChatClient>) -> StreamCoordinator {
        StreamCoordinator::new(shared.clone(), chat, Duration::from_millis(50))
    }

    fn drain_patches(rx: &mut broadcast::Receiver<TreeEvent>) -> Vec<MessageNode> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TreeEvent::NodePatched { node } = event {
                out.push(node);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_chunks_patch_running_total() {
        let shared = shared_with_node("n1").await;
        let mut rx = shared.events_tx.subscribe();
        let chat = Arc::new(ScriptedClient {
            chunks: vec![Ok("Hel".into()), Ok("lo".into())],
        });

        let phase = coordinator(&shared, chat).run("n1", vec![]).await;
        assert_eq!(phase, StreamPhase::Completed);

        let patches = drain_patches(&mut rx);
        let texts: Vec<_> = patches.iter().map(|n| n.assistant_message.as_str()).collect();
        assert_eq!(texts, vec!["Hel", "Hello", "Hello"]);
        assert!(!patches[1].stream_finished);
        assert!(patches[2].stream_finished);

        let node = shared.tree.read().await.message("n1").unwrap().clone();
        assert_eq!(node.assistant_message, "Hello");
        assert!(node.stream_finished);
    }

    #[tokio::test]
    async fn test_completion_requests_layout_once() {
        let shared = shared_with_node("n1").await;
        let mut rx = shared.events_tx.subscribe();
        let chat = Arc::new(ScriptedClient {
            chunks: vec![Ok("done".into())],
        });

        coordinator(&shared, chat).run("n1", vec![]).await;

        let mut layout_requests = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TreeEvent::LayoutRequested { ref node_id } if node_id == "n1") {
                layout_requests += 1;
            }
        }
        assert_eq!(layout_requests, 1);
        assert!(shared.pending_layout.lock().await.contains("n1"));
    }

    #[tokio::test]
    async fn test_mid_stream_error_writes_message() {
        let shared = shared_with_node("n1").await;
        let chat = Arc::new(ScriptedClient {
            chunks: vec![Ok("partial".into()), Err("connection reset".into())],
        });

        let phase = coordinator(&shared, chat).run("n1", vec![]).await;
        assert_eq!(phase, StreamPhase::Failed);

        let node = shared.tree.read().await.message("n1").unwrap().clone();
        assert!(node.assistant_message.contains("connection reset"));
        assert!(!node.stream_finished);
        assert!(shared.pending_layout.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_upstream_refusal_fails_without_streaming() {
        let shared = shared_with_node("n1").await;
        let phase = coordinator(&shared, Arc::new(RefusingClient)).run("n1", vec![]).await;
        assert_eq!(phase, StreamPhase::Failed);
        let node = shared.tree.read().await.message("n1").unwrap().clone();
        assert!(node.assistant_message.contains("boom"));
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out() {
        let shared = shared_with_node("n1").await;
        let phase = coordinator(&shared, Arc::new(StalledClient)).run("n1", vec![]).await;
        assert_eq!(phase, StreamPhase::Failed);
        let node = shared.tree.read().await.message("n1").unwrap().clone();
        assert!(node.assistant_message.contains("stalled"));
    }

    #[tokio::test]
    async fn test_deleted_node_drops_stream() {
        let shared = shared_with_node("n1").await;
        shared.tree.write().await.delete_subtree("n1");
        let chat = Arc::new(ScriptedClient {
            chunks: vec![Ok("late".into())],
        });
        let phase = coordinator(&shared, chat).run("n1", vec![]).await;
        assert_eq!(phase, StreamPhase::Failed);
        assert!(shared.tree.read().await.is_empty());
        assert!(shared.pending_layout.lock().await.is_empty());
        assert!(shared.phases.lock().await.get("n1").is_none());
    }

    #[tokio::test]
    async fn test_phase_tracks_outcome() {
        let shared = shared_with_node("n1").await;
        let chat = Arc::new(ScriptedClient {
            chunks: vec![Ok("x".into())],
        });
        coordinator(&shared, chat).run("n1", vec![]).await;
        assert_eq!(shared.phase("n1").await, StreamPhase::Completed);
        assert_eq!(shared.phase("other").await, StreamPhase::Idle);
    }

    #[tokio::test]
    async fn test_silent_upstream_times_out_and_frees_node() {
        let shared = shared_with_node("n1").await;
        assert!(shared.set_phase("n1", StreamPhase::Sending).await);

        let phase = coordinator(&shared, Arc::new(SilentUpstreamClient))
            .run("n1", vec![])
            .await;
        assert_eq!(phase, StreamPhase::Failed);
        assert_eq!(shared.phase("n1").await, StreamPhase::Failed);

        let node = shared.tree.read().await.message("n1").unwrap().clone();
        assert_ne!(node.assistant_message, THINKING_PLACEHOLDER);
        assert!(node.assistant_message.contains("no response within"));
    }

    #[tokio::test]
    async fn test_delete_before_completion_skips_layout() {
        let shared = shared_with_node("n1").await;
        let mut rx = shared.events_tx.subscribe();
        shared.tree.write().await.delete_subtree("n1");

        assert!(!shared.set_phase("n1", StreamPhase::Completed).await);
        assert!(!shared.request_layout("n1").await);
        assert!(shared.phases.lock().await.is_empty());
        assert!(shared.pending_layout.lock().await.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
