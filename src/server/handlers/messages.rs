use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::history::MessageDeletion;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.store.list_messages(&conversation_id).await?;
    Ok(Json(json!({ "messages": messages })))
}

/// Runs one chat turn. The turn is detached from the request so a client
/// disconnect cannot stop it halfway through.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = payload.content.unwrap_or_default();
    let metadata = payload.metadata.unwrap_or_else(|| json!({}));
    let chat = state.chat.clone();

    let turn = tokio::spawn(async move {
        chat.handle_user_message(&conversation_id, &content, metadata)
            .await
    })
    .await
    .map_err(ApiError::internal)??;

    Ok(Json(turn))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path((conversation_id, message_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let body = match state
        .store
        .delete_message(&conversation_id, &message_id)
        .await?
    {
        MessageDeletion::Pair { pair_id, removed } => {
            tracing::info!(conversation_id = %conversation_id, pair_id = %pair_id, removed, "Deleted message pair");
            json!({ "success": true, "deletedPairId": pair_id })
        }
        MessageDeletion::Single { id } => json!({ "success": true, "deletedId": id }),
    };
    Ok(Json(body))
}
