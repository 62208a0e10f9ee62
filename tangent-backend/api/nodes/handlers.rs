use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::AppState;
use crate::canvas::{BranchRequest, CanvasError};
use crate::tree::error::TreeError;
use crate::tree::store::{Removal, TreeSnapshot};

type ApiError = (StatusCode, Json<Value>);

fn api_error(err: CanvasError) -> ApiError {
    let status = match &err {
        CanvasError::Tree(TreeError::NotFound(_)) => StatusCode::NOT_FOUND,
        CanvasError::Tree(TreeError::NotAMessage(_)) | CanvasError::EmptyMessage(_) => {
            StatusCode::BAD_REQUEST
        }
        CanvasError::RootProtected | CanvasError::AlreadyStreaming(_) => StatusCode::CONFLICT,
        CanvasError::Tree(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "tree invariant violated");
    } else {
        tracing::debug!(error = %err, "rejected command");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

pub(crate) async fn get_tree(State(state): State<AppState>) -> Json<TreeSnapshot> {
    Json(state.canvas.snapshot().await)
}

pub(crate) async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (node, phase) = state.canvas.node(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "node": node, "phase": phase })))
}

#[derive(Deserialize)]
pub(crate) struct SendRequest {
    #[serde(default)]
    text: String,
}

pub(crate) async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.canvas.send(&id, &body.text).await.map_err(api_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "node_id": id, "phase": "sending" })),
    ))
}

pub(crate) async fn branch_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<BranchRequest>,
) -> Result<Response, ApiError> {
    match state.canvas.branch(&id, body).await.map_err(api_error)? {
        Some(outcome) => Ok((StatusCode::CREATED, Json(outcome)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Deserialize)]
pub(crate) struct UpdateNodeRequest {
    user_message: String,
}

pub(crate) async fn update_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateNodeRequest>,
) -> Result<Json<Value>, ApiError> {
    let node = state
        .canvas
        .edit_user_message(&id, body.user_message)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "node": node })))
}

pub(crate) async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Removal>, ApiError> {
    let removal = state.canvas.delete(&id).await.map_err(api_error)?;
    Ok(Json(removal))
}

#[derive(Deserialize)]
pub(crate) struct LayoutRequest {
    height: f64,
}

pub(crate) async fn place_follow_up(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<LayoutRequest>,
) -> Result<Response, ApiError> {
    match state
        .canvas
        .place_follow_up(&id, body.height)
        .await
        .map_err(api_error)?
    {
        Some(node) => Ok((StatusCode::CREATED, Json(json!({ "node": node }))).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub(crate) async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let messages = state.canvas.history(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "messages": messages })))
}
