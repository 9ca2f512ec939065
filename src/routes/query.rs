use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::errors::AppError;
use crate::services::AppState;

#[derive(Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub context: Vec<String>,
}

/// Single-shot RAG question answering. The retrieved context is exposed to
/// the caller for transparency.
#[instrument(skip(state, payload))]
pub async fn run_query(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.query.trim().is_empty() {
        return Err(AppError::ValidationError("'query' is required".to_string()));
    }

    let outcome = state.rag_service.answer_query(&payload.query).await?;

    Ok(Json(QueryResponse {
        answer: outcome.answer,
        context: outcome.context,
    }))
}
