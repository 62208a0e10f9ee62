use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::ChatMessage;
use super::error::Result;

/// Ordered text deltas for one completion. Ends when the service signals
/// end-of-data.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Start a streaming completion over `messages`.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChatStream>;

    /// Non-streaming fallback returning the whole answer.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}
