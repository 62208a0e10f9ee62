pub mod changes;
pub mod middleware;
pub mod nodes;
pub mod relay;
mod routes;

use axum::Router;
use std::sync::Arc;

use crate::canvas::Canvas;
use crate::chat::client::ChatClient;

#[derive(Clone)]
pub struct AppState {
    /// The one conversation tree this server hosts.
    pub canvas: Canvas,
    /// Used directly by the `/stream` and `/generate` relay routes.
    pub chat: Arc<dyn ChatClient>,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
