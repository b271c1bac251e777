use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IndexDocumentRequest {
    pub file_id: String,
    pub name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Upserts extracted text for an uploaded file, keyed by its file id.
pub async fn index_document(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IndexDocumentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.file_id.trim().is_empty() {
        return Err(ApiError::BadRequest("file_id is required".to_string()));
    }

    state
        .documents
        .index_document(
            &payload.file_id,
            &payload.name,
            payload.user_id.as_deref(),
            &payload.content,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "file_id": payload.file_id,
            "indexed": !payload.content.trim().is_empty()
        })),
    ))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.documents.delete_document(&file_id).await?;
    Ok(Json(json!({ "file_id": file_id, "deleted": deleted })))
}
