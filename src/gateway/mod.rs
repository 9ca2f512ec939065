//! Model gateway: chat model invocation with a priority-ordered fallback
//! chain, parameter clamping, and a uniform response envelope.
//!
//! The hosted model sometimes answers with a JSON object and sometimes with a
//! raw byte stream (SSE). Both are represented by the [`ModelOutput`] tagged
//! union so downstream code branches on an explicit tag.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::AiConfig;
use crate::errors::AppError;

/// Clamp domains for generation parameters.
const MAX_TOKENS_MIN: u32 = 1;
const MAX_TOKENS_MAX: u32 = 4096;
const TEMPERATURE_MIN: f32 = 0.0;
const TEMPERATURE_MAX: f32 = 2.0;
const TOP_P_MIN: f32 = 0.0;
const TOP_P_MAX: f32 = 1.0;
const PENALTY_MIN: f32 = -2.0;
const PENALTY_MAX: f32 = 2.0;

const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Conservative caps applied on every fallback attempt.
const FALLBACK_MAX_TOKENS: u32 = 1024;
const FALLBACK_TEMPERATURE_MAX: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Tolerant parse for rows read back from the store; unknown roles are
    /// treated as user turns rather than poisoning the whole history.
    pub fn parse(value: &str) -> Role {
        match value {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Caller-supplied generation parameters, before clamping.
#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub seed: Option<u64>,
    pub stream: bool,
}

/// Wire payload for one model invocation. Numeric parameters are always
/// inside their valid domain by the time this exists; unset optionals are
/// omitted from the payload, never sent as null.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl ChatRequest {
    pub fn from_params(params: &ChatParams) -> Self {
        Self {
            messages: params.messages.clone(),
            max_tokens: params
                .max_tokens
                .unwrap_or(DEFAULT_MAX_TOKENS)
                .clamp(MAX_TOKENS_MIN, MAX_TOKENS_MAX),
            temperature: params
                .temperature
                .unwrap_or(DEFAULT_TEMPERATURE)
                .clamp(TEMPERATURE_MIN, TEMPERATURE_MAX),
            top_p: params.top_p.map(|v| v.clamp(TOP_P_MIN, TOP_P_MAX)),
            frequency_penalty: params
                .frequency_penalty
                .map(|v| v.clamp(PENALTY_MIN, PENALTY_MAX)),
            presence_penalty: params
                .presence_penalty
                .map(|v| v.clamp(PENALTY_MIN, PENALTY_MAX)),
            seed: params.seed,
            stream: params.stream,
        }
    }

    /// Re-clamp with the conservative caps used for fallback attempts.
    pub fn conservative(&self) -> Self {
        let mut request = self.clone();
        request.max_tokens = request.max_tokens.min(FALLBACK_MAX_TOKENS);
        request.temperature = request.temperature.min(FALLBACK_TEMPERATURE_MAX);
        request
    }
}

pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Tagged union over the two shapes a model call can produce.
pub enum ModelOutput {
    Json(Value),
    Stream(ByteStream),
}

impl std::fmt::Debug for ModelOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelOutput::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ModelOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl ModelOutput {
    /// The model's answer text, for JSON outputs carrying a `response` field.
    pub fn response_text(&self) -> Option<&str> {
        match self {
            ModelOutput::Json(payload) => payload.get("response").and_then(Value::as_str),
            ModelOutput::Stream(_) => None,
        }
    }
}

/// One chat model backend. `use_gateway` routes the call through the AI
/// Gateway when the deployment has one configured.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn run(
        &self,
        model: &str,
        request: &ChatRequest,
        use_gateway: bool,
    ) -> Result<ModelOutput, AppError>;
}

/// Workers AI REST client.
pub struct WorkersAiChat {
    client: reqwest::Client,
    config: AiConfig,
}

impl WorkersAiChat {
    pub fn new(config: AiConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }

    fn run_url(&self, model: &str, use_gateway: bool) -> String {
        match (&self.config.gateway_base, use_gateway) {
            (Some(gateway_base), true) => format!("{}/workers-ai/{}", gateway_base, model),
            _ => format!("{}/ai/run/{}", self.config.api_base, model),
        }
    }
}

#[async_trait]
impl ChatModel for WorkersAiChat {
    async fn run(
        &self,
        model: &str,
        request: &ChatRequest,
        use_gateway: bool,
    ) -> Result<ModelOutput, AppError> {
        let res = self
            .client
            .post(self.run_url(model, use_gateway))
            .bearer_auth(&self.config.api_token)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::ModelError(format!("Request failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(AppError::ModelError(format!("API error: {}", res.status())));
        }

        if request.stream {
            use futures::{StreamExt, TryStreamExt};
            let stream = res
                .bytes_stream()
                .map_err(std::io::Error::other)
                .boxed();
            return Ok(ModelOutput::Stream(stream));
        }

        let body: Value = res
            .json()
            .await
            .map_err(|e| AppError::ModelError(format!("Parse error: {}", e)))?;

        // The REST API wraps the model result in {result: ...}; direct
        // bindings return the result bare. Accept both.
        let payload = match body.get("result") {
            Some(result) => result.clone(),
            None => body,
        };
        Ok(ModelOutput::Json(payload))
    }
}

/// A `null`, `{}`, or empty-`response` payload after a nominally successful
/// call counts as a failure, not a valid empty answer.
fn is_empty_payload(payload: &Value) -> bool {
    payload.is_null()
        || payload.as_object().is_some_and(|o| o.is_empty())
        || payload
            .get("response")
            .and_then(Value::as_str)
            .is_some_and(str::is_empty)
}

/// Which model actually served the request, and how.
#[derive(Debug, Clone)]
pub struct ReplyMeta {
    pub model_used: String,
    pub fallback_used: bool,
    pub gateway_enabled: bool,
}

impl ReplyMeta {
    /// Uniform JSON envelope for non-streaming replies; identical in shape
    /// regardless of which model answered.
    pub fn envelope(&self, payload: Value) -> Value {
        serde_json::json!({
            "result": payload,
            "model_used": self.model_used,
            "fallback_used": self.fallback_used,
            "gateway_enabled": self.gateway_enabled,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug)]
pub struct GatewayReply {
    pub output: ModelOutput,
    pub meta: ReplyMeta,
}

/// Primary-then-fallbacks invocation. The first success wins; if every
/// fallback also fails, the primary model's error is the one surfaced.
pub struct ModelGateway {
    client: Arc<dyn ChatModel>,
    primary_model: String,
    fallback_models: Vec<String>,
    fallback_enabled: bool,
    gateway_enabled: bool,
}

impl ModelGateway {
    pub fn new(client: Arc<dyn ChatModel>, config: &AiConfig) -> Self {
        Self {
            client,
            primary_model: config.chat_model.clone(),
            fallback_models: config.fallback_models.clone(),
            fallback_enabled: config.fallback_enabled,
            gateway_enabled: config.gateway_base.is_some(),
        }
    }

    pub async fn invoke(&self, params: ChatParams) -> Result<GatewayReply, AppError> {
        let request = ChatRequest::from_params(&params);

        let primary_err = match self.attempt(&self.primary_model, &request).await {
            Ok(output) => {
                return Ok(GatewayReply {
                    output,
                    meta: ReplyMeta {
                        model_used: self.primary_model.clone(),
                        fallback_used: false,
                        gateway_enabled: self.gateway_enabled,
                    },
                })
            }
            Err(err) => err,
        };

        if !self.fallback_enabled {
            return Err(primary_err);
        }

        tracing::warn!(
            model = %self.primary_model,
            error = %primary_err,
            "Primary model failed, trying fallback chain"
        );

        let fallback_request = request.conservative();
        for model in &self.fallback_models {
            match self.attempt(model, &fallback_request).await {
                Ok(output) => {
                    metrics::counter!("saju_rag_model_fallbacks_total").increment(1);
                    tracing::info!(model = %model, "Fallback model answered");
                    return Ok(GatewayReply {
                        output,
                        meta: ReplyMeta {
                            model_used: model.clone(),
                            fallback_used: true,
                            gateway_enabled: self.gateway_enabled,
                        },
                    });
                }
                Err(err) => {
                    tracing::warn!(model = %model, error = %err, "Fallback model failed");
                }
            }
        }

        Err(primary_err)
    }

    async fn attempt(&self, model: &str, request: &ChatRequest) -> Result<ModelOutput, AppError> {
        let output = self.client.run(model, request, self.gateway_enabled).await?;
        if let ModelOutput::Json(payload) = &output {
            if is_empty_payload(payload) {
                return Err(AppError::EmptyResponse);
            }
        }
        Ok(output)
    }
}
