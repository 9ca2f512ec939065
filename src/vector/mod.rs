//! Vector index clients: the hosted Vectorize index for deployments and an
//! in-process cosine scan for local runs and tests.
//!
//! The index stores only ids and vectors; document text lives in the
//! relational store. Ids are stringified on the wire because the hosted
//! index keys entries by string.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::{AiConfig, VectorizeConfig};
use crate::errors::AppError;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector stored under `id`.
    async fn upsert(&self, id: i64, values: &[f32]) -> Result<(), AppError>;

    /// Ids of the `top_k` nearest entries, ordered by descending similarity.
    async fn query(&self, values: &[f32], top_k: usize) -> Result<Vec<i64>, AppError>;

    /// Remove entries by id. Unknown ids are a no-op, not an error.
    async fn delete_by_ids(&self, ids: &[i64]) -> Result<(), AppError>;
}

/// Vectorize v2 REST client.
pub struct VectorizeClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl VectorizeClient {
    pub fn new(ai: &AiConfig, config: &VectorizeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/vectorize/v2/indexes/{}", ai.api_base, config.index_name),
            api_token: ai.api_token.clone(),
        }
    }

    async fn post(&self, path: &str, body: String, content_type: &str) -> Result<Value, AppError> {
        let res = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_token)
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::RetrievalError(format!("Vector index request failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(AppError::RetrievalError(format!(
                "Vector index API error: {}",
                res.status()
            )));
        }

        res.json()
            .await
            .map_err(|e| AppError::RetrievalError(format!("Vector index parse error: {}", e)))
    }
}

#[async_trait]
impl VectorIndex for VectorizeClient {
    async fn upsert(&self, id: i64, values: &[f32]) -> Result<(), AppError> {
        // The upsert endpoint takes newline-delimited JSON, one entry per line.
        let line = serde_json::json!({ "id": id.to_string(), "values": values }).to_string();
        self.post("upsert", line, "application/x-ndjson").await?;
        Ok(())
    }

    async fn query(&self, values: &[f32], top_k: usize) -> Result<Vec<i64>, AppError> {
        let body = serde_json::json!({ "vector": values, "topK": top_k }).to_string();
        let response = self.post("query", body, "application/json").await?;

        let matches = response
            .get("result")
            .unwrap_or(&response)
            .get("matches")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::RetrievalError("No matches in query response".to_string()))?;

        Ok(matches
            .iter()
            .filter_map(|m| m.get("id").and_then(Value::as_str))
            .filter_map(|id| id.parse::<i64>().ok())
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<(), AppError> {
        let ids: Vec<String> = ids.iter().map(i64::to_string).collect();
        let body = serde_json::json!({ "ids": ids }).to_string();
        self.post("delete_by_ids", body, "application/json").await?;
        Ok(())
    }
}

/// Brute-force cosine similarity scan behind a read-write lock.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<i64, Vec<f32>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: i64, values: &[f32]) -> Result<(), AppError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::RetrievalError("Vector index lock poisoned".to_string()))?;
        entries.insert(id, values.to_vec());
        Ok(())
    }

    async fn query(&self, values: &[f32], top_k: usize) -> Result<Vec<i64>, AppError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| AppError::RetrievalError("Vector index lock poisoned".to_string()))?;

        let mut scored: Vec<(i64, f32)> = entries
            .iter()
            .map(|(id, vector)| (*id, cosine_similarity(values, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<(), AppError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::RetrievalError("Vector index lock poisoned".to_string()))?;
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }
}
