pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tree", get(handlers::get_tree))
        .route(
            "/nodes/{id}",
            get(handlers::get_node)
                .patch(handlers::update_node)
                .delete(handlers::delete_node),
        )
        .route("/nodes/{id}/send", post(handlers::send_message))
        .route("/nodes/{id}/branch", post(handlers::branch_node))
        .route("/nodes/{id}/layout", post(handlers::place_follow_up))
        .route("/nodes/{id}/history", get(handlers::get_history))
}
