use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::errors::AppError;
use crate::services::AppState;

/// Page size applied when the caller omits `limit`.
const DEFAULT_PAGE_SIZE: u64 = 10;
const MAX_PAGE_SIZE: u64 = 100;

#[derive(Deserialize)]
pub struct AddDocumentRequest {
    pub text: String,
}

#[derive(Serialize)]
pub struct AddDocumentResponse {
    pub id: i64,
    pub message: String,
}

#[instrument(skip(state, payload))]
pub async fn add_document(
    State(state): State<AppState>,
    Json(payload): Json<AddDocumentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.text.trim().is_empty() {
        return Err(AppError::ValidationError(
            "'text' must be a non-empty string".to_string(),
        ));
    }

    let id = state.rag_service.add_document(&payload.text).await?;

    Ok((
        StatusCode::CREATED,
        Json(AddDocumentResponse {
            id,
            message: "Document added and indexed successfully.".to_string(),
        }),
    ))
}

#[derive(Deserialize)]
pub struct ListParams {
    page: Option<u64>,
    limit: Option<u64>,
    search: Option<String>,
}

#[instrument(skip(state, params))]
pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let result = state
        .rag_service
        .list_documents(page, page_size, params.search.as_deref())
        .await?;

    Ok(Json(result))
}

#[instrument(skip(state))]
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.rag_service.delete_document(id).await?;

    Ok(Json(serde_json::json!({
        "message": "Document deleted successfully."
    })))
}
