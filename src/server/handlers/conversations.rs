use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    pub title: String,
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.store.list_conversations().await?;
    Ok(Json(json!({ "conversations": conversations })))
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .store
        .create_conversation(payload.title, payload.metadata.unwrap_or_else(|| json!({})))
        .await?;
    tracing::info!(conversation_id = %conversation.id, "Created conversation");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "conversation": conversation })),
    ))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .store
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn update_conversation(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<UpdateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    let conversation = state
        .store
        .update_title(&conversation_id, &payload.title)
        .await?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.delete_conversation(&conversation_id).await? {
        return Err(ApiError::NotFound("Conversation not found".to_string()));
    }
    tracing::info!(conversation_id = %conversation_id, "Deleted conversation");
    Ok(Json(json!({ "message": "Conversation deleted successfully" })))
}
