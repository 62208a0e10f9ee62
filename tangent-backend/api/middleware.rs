use axum::{
    body::Body,
    http::{Request, Uri, uri::PathAndQuery},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::Span;

pub async fn enrich_current_span_middleware(req: Request<Body>, next: Next) -> Response {
    let uri: &Uri = req.uri();

    let host = req
        .headers()
        .get("host")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("UNKNOWN");

    let current_span = Span::current();

    current_span.record("http.uri", uri.path());
    current_span.record("http.host", host);
    if let Some(query) = uri.query() {
        current_span.record("http.query", query);
    }

    next.run(req).await
}

/// Redirect `/foo/` to `/foo`. The bare `/` passes through.
pub async fn strip_trailing_slash(req: Request<Body>, next: Next) -> Response {
    match trimmed_location(req.uri()) {
        Some(location) => Redirect::permanent(&location).into_response(),
        None => next.run(req).await,
    }
}

fn trimmed_location(uri: &Uri) -> Option<String> {
    let path = uri.path().strip_suffix('/').filter(|p| !p.is_empty())?;
    let target = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    // Re-parse so a mangled path falls through to the router instead of
    // producing a bad Location header.
    target.parse::<PathAndQuery>().ok().map(|pq| pq.to_string())
}
