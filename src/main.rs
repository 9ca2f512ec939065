mod config;
mod db;
mod embeddings;
mod errors;
mod gateway;
mod metrics;
mod routes;
mod services;
mod vector;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::db::{ConversationStore, DocumentStore};
use crate::embeddings::Embedder;
use crate::vector::VectorIndex;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    dotenvy::dotenv().ok();
    let config = config::AppConfig::build()?;

    // 2. Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.server.rust_log))
        .init();

    tracing::info!("Starting saju-rag...");

    // 3. Initialize database and run startup DDL
    let repo = db::Repository::new(&config.database).await?;
    repo.migrate().await?;
    tracing::info!("Connected to database");

    // 4. Embedder and vector index: the "mock" token switches both to their
    // in-process implementations for local runs
    let use_mock = config.ai.api_token == "mock";
    let embedder: Arc<dyn Embedder> = if use_mock {
        Arc::new(embeddings::MockEmbedder::new(config.ai.embedding_dim))
    } else {
        Arc::new(embeddings::WorkersAiEmbedder::new(config.ai.clone()))
    };
    let index: Arc<dyn VectorIndex> = if use_mock {
        Arc::new(vector::InMemoryVectorIndex::new())
    } else {
        Arc::new(vector::VectorizeClient::new(&config.ai, &config.vectorize))
    };

    // 5. Chat model behind the fallback gateway
    let chat_model = Arc::new(gateway::WorkersAiChat::new(config.ai.clone()));
    let model_gateway = Arc::new(gateway::ModelGateway::new(chat_model, &config.ai));

    // 6. App state (services)
    let documents: Arc<dyn DocumentStore> = Arc::new(repo.clone());
    let conversations: Arc<dyn ConversationStore> = Arc::new(repo.clone());
    let state = services::AppState::new(
        documents,
        conversations,
        embedder,
        index,
        model_gateway,
        config.retrieval.top_k,
    );

    // 7. Router and server
    let app = routes::create_router(state, repo);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
