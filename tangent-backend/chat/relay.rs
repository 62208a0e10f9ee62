use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;

use super::ChatMessage;
use super::client::{ChatClient, ChatStream};
use super::decode::{Utf8Decoder, strip_data_lines};
use super::error::{ChatError, Result};

/// Client for another relay that speaks the `/stream` + `/generate` contract
/// (for example an edge worker in front of the model).
pub struct RelayChatClient {
    client: Client,
    base_url: String,
}

impl RelayChatClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, route: &str, messages: &[ChatMessage]) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(format!("{}/{route}", self.base_url))
            .json(messages)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Upstream { status, body });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatClient for RelayChatClient {
    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChatStream> {
        let resp = self.post("stream", messages).await?;
        let is_sse = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));
        if is_sse {
            return Ok(Box::pin(sse_deltas(resp)));
        }
        let mut body = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut decoder = Utf8Decoder::new();
            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(ChatError::from(e));
                        return;
                    }
                };
                let text = decoder.decode(&bytes);
                if text.is_empty() {
                    continue;
                }
                let delta = strip_data_lines(&text);
                if !delta.is_empty() {
                    yield Ok(delta);
                }
            }
            let rest = decoder.finish();
            if !rest.is_empty() {
                yield Ok(rest);
            }
        };

        Ok(Box::pin(stream))
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let resp = self.post("generate", messages).await?;
        Ok(resp.text().await?)
    }
}

/// Each event's data is one delta; multi-line data arrives already joined
/// with `\n`.
fn sse_deltas(resp: reqwest::Response) -> impl futures::Stream<Item = Result<String>> {
    let mut events = resp.bytes_stream().eventsource();
    async_stream::stream! {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) if event.data.is_empty() => continue,
                Ok(event) => yield Ok(event.data),
                Err(e) => {
                    yield Err(ChatError::Transport(e.to_string()));
                    return;
                }
            }
        }
    }
}
