//! `/stream` and `/generate`: forward a chat history to the model and hand
//! the reply straight back. The API key never leaves the server.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use hyper::StatusCode;
use hyper::header;

use super::AppState;
use crate::chat::ChatMessage;

pub(crate) const INTERNAL_ERROR_BODY: &str = "An internal server error occurred.";

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

#[tracing::instrument(skip_all, fields(turns = messages.len()))]
pub(crate) async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(messages): Json<Vec<ChatMessage>>,
) -> Response {
    let mut deltas = match state.chat.stream(&messages).await {
        Ok(deltas) => deltas,
        Err(e) => {
            tracing::error!(error = %e, "relay stream failed to start");
            return internal_error();
        }
    };

    if wants_event_stream(&headers) {
        let events = async_stream::stream! {
            while let Some(item) = deltas.next().await {
                match item {
                    Ok(delta) => yield Ok::<_, std::convert::Infallible>(Event::default().data(delta)),
                    Err(e) => {
                        tracing::error!(error = %e, "relay stream broke off");
                        break;
                    }
                }
            }
        };
        return Sse::new(events).into_response();
    }

    let body = deltas.inspect(|item| {
        if let Err(e) = item {
            tracing::error!(error = %e, "relay stream broke off");
        }
    });
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}

#[tracing::instrument(skip_all, fields(turns = messages.len()))]
pub(crate) async fn generate(
    State(state): State<AppState>,
    Json(messages): Json<Vec<ChatMessage>>,
) -> Response {
    match state.chat.complete(&messages).await {
        Ok(answer) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            answer,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "relay generate failed");
            internal_error()
        }
    }
}
