use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ai: AiConfig,
    pub vectorize: VectorizeConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
}

/// Workers AI settings: embedding model, chat model and its fallback chain.
#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    /// Account-scoped REST base, e.g. https://api.cloudflare.com/client/v4/accounts/{id}
    pub api_base: String,
    /// Bearer token. The literal value "mock" switches the embedder and the
    /// vector index to their in-process implementations for local runs.
    pub api_token: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub chat_model: String,
    pub fallback_models: Vec<String>,
    pub fallback_enabled: bool,
    /// AI Gateway base URL. When set, chat calls are routed through it.
    pub gateway_base: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorizeConfig {
    pub index_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl AppConfig {
    pub fn build() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("server.rust_log", "info,saju_rag=debug")?
            .set_default("database.url", "sqlite://saju.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.connect_timeout", 30)?
            .set_default("ai.api_base", "https://api.cloudflare.com/client/v4/accounts/unset")?
            .set_default("ai.api_token", "mock")?
            .set_default("ai.embedding_model", "@cf/baai/bge-base-en-v1.5")?
            .set_default("ai.embedding_dim", 768)?
            .set_default("ai.chat_model", "@cf/meta/llama-3.1-8b-instruct")?
            .set_default(
                "ai.fallback_models",
                vec![
                    "@cf/meta/llama-3-8b-instruct",
                    "@cf/mistral/mistral-7b-instruct-v0.2",
                    "@cf/qwen/qwen1.5-7b-chat-awq",
                ],
            )?
            .set_default("ai.fallback_enabled", true)?
            .set_default("vectorize.index_name", "saju-knowledge")?
            .set_default("retrieval.top_k", 5)?
            // E.g. `APP_SERVER__PORT=8080` sets `server.port`
            .add_source(Environment::default().separator("__").prefix("APP"));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_without_env() {
        let config = AppConfig::build().expect("defaults should satisfy the schema");
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.ai.embedding_dim, 768);
        assert!(config.ai.fallback_enabled);
        assert_eq!(config.ai.fallback_models.len(), 3);
        assert!(config.ai.gateway_base.is_none());
    }
}
