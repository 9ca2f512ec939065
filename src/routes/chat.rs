use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::errors::AppError;
use crate::gateway::{ChatMessage, ChatParams, GatewayReply, ModelOutput};
use crate::services::AppState;

/// Default role prompt for the direct fortune-telling passthrough.
const FORTUNE_SYSTEM_PROMPT: &str = "당신은 30년 경력의 전문 사주명리학자입니다. 정확한 \
    사주명리학 지식을 바탕으로 한국어 응답만 제공하세요.";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    pub message: String,
    pub system_prompt: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub conversation_id: String,
    pub answer: String,
    pub history_saved: bool,
}

#[instrument(skip(state, payload))]
pub async fn start_chat(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequestBody>,
) -> Result<impl IntoResponse, AppError> {
    chat_round(state, None, payload).await
}

#[instrument(skip(state, payload))]
pub async fn continue_chat(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<ChatRequestBody>,
) -> Result<impl IntoResponse, AppError> {
    chat_round(state, Some(conversation_id), payload).await
}

async fn chat_round(
    state: AppState,
    conversation_id: Option<String>,
    payload: ChatRequestBody,
) -> Result<Json<ChatResponse>, AppError> {
    if payload.message.trim().is_empty() {
        return Err(AppError::ValidationError("'message' is required".to_string()));
    }

    let outcome = state
        .rag_service
        .chat(conversation_id, &payload.message, payload.system_prompt)
        .await?;

    Ok(Json(ChatResponse {
        conversation_id: outcome.conversation_id,
        answer: outcome.answer,
        history_saved: outcome.history_saved,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FortuneRequest {
    pub user_prompt: String,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub seed: Option<u64>,
}

/// Direct model passthrough, no retrieval. Streaming replies pass the byte
/// stream through untouched with metadata in response headers; JSON replies
/// get the uniform gateway envelope.
#[instrument(skip(state, payload))]
pub async fn fortune(
    State(state): State<AppState>,
    Json(payload): Json<FortuneRequest>,
) -> Result<Response, AppError> {
    if payload.user_prompt.trim().is_empty() {
        return Err(AppError::ValidationError("'userPrompt' is required".to_string()));
    }

    let system_prompt = payload
        .system_prompt
        .unwrap_or_else(|| FORTUNE_SYSTEM_PROMPT.to_string());
    let params = ChatParams {
        messages: vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(payload.user_prompt),
        ],
        max_tokens: payload.max_tokens,
        temperature: payload.temperature,
        top_p: payload.top_p,
        frequency_penalty: payload.frequency_penalty,
        presence_penalty: payload.presence_penalty,
        seed: payload.seed,
        stream: payload.stream,
    };

    let GatewayReply { output, meta } = state.gateway.invoke(params).await?;

    match output {
        ModelOutput::Json(result) => Ok(Json(meta.envelope(result)).into_response()),
        ModelOutput::Stream(stream) => {
            let mut response = Response::new(Body::from_stream(stream));
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/event-stream"),
            );
            headers.insert(
                "X-AI-Model",
                HeaderValue::from_str(&meta.model_used)
                    .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
            );
            headers.insert(
                "X-Gateway-Enabled",
                HeaderValue::from_static(if meta.gateway_enabled { "true" } else { "false" }),
            );
            headers.insert("X-Stream-Response", HeaderValue::from_static("true"));
            Ok(response)
        }
    }
}
