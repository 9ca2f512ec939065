use async_trait::async_trait;

use crate::config::AiConfig;
use crate::errors::AppError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Convert text into a fixed-dimension vector. An empty result slot from
    /// the service is an error, never a silent zero vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

/// Workers AI embedding client. POSTs `{"text": [text]}` to the hosted
/// embedding model and reads the first result slot.
pub struct WorkersAiEmbedder {
    client: reqwest::Client,
    config: AiConfig,
}

impl WorkersAiEmbedder {
    pub fn new(config: AiConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }
}

#[async_trait]
impl Embedder for WorkersAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let url = format!("{}/ai/run/{}", self.config.api_base, self.config.embedding_model);
        let payload = serde_json::json!({ "text": [text] });

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::EmbeddingError(format!("Request failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(AppError::EmbeddingError(format!("API error: {}", res.status())));
        }

        let body: serde_json::Value = res
            .json()
            .await
            .map_err(|e| AppError::EmbeddingError(format!("Parse error: {}", e)))?;

        // REST responses wrap the model result in {result: {data: [[..]]}};
        // accept the bare {data: [[..]]} shape as well.
        let data = body
            .get("result")
            .unwrap_or(&body)
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|v| v.as_array())
            .ok_or_else(|| AppError::EmbeddingError("No vector in response".to_string()))?;

        Ok(data
            .iter()
            .map(|v| v.as_f64().unwrap_or_default() as f32)
            .collect())
    }
}

/// Deterministic in-process embedder for local runs and tests. The same text
/// always embeds to the same vector and distinct texts diverge, which is all
/// the similarity scan needs.
pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        use std::hash::{Hash, Hasher};

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish() | 1;

        // xorshift over the text hash, mapped into [-1, 1]
        let mut values = Vec::with_capacity(self.dim);
        for _ in 0..self.dim {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            values.push(((state % 2000) as f32 / 1000.0) - 1.0);
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        Ok(values)
    }
}
