use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;

use super::AppState;
use crate::canvas::events::TreeEvent;

/// Wire form of one change: the event's own fields plus when it went out.
#[derive(Debug, Serialize)]
pub struct ChangeEnvelope<'a> {
    #[serde(flatten)]
    pub event: &'a TreeEvent,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Live feed of every tree mutation, one SSE event per `TreeEvent`.
pub(crate) async fn stream_changes(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.canvas.subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse_event_name = event.as_sse_event();
                    let envelope = ChangeEnvelope { event: &event, timestamp: chrono::Utc::now() };
                    let data = serde_json::to_string(&envelope).unwrap_or_default();
                    yield Ok(Event::default().event(sse_event_name).data(data));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "changes SSE subscriber lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/changes", get(stream_changes))
}
