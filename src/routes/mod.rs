pub mod chat;
pub mod documents;
pub mod health;
pub mod query;

use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::Router;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::db::Repository;
use crate::metrics;
use crate::services::AppState;

/// Maximum concurrent requests (backpressure control)
const MAX_CONCURRENT_REQUESTS: usize = 100;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub fn create_router(state: AppState, repo: Repository) -> Router {
    let (prometheus_layer, metrics_router) = metrics::setup_metrics();

    // Health routes (no middleware beyond the shared stack)
    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/readiness", get(health::readiness_check))
        .with_state(repo);

    let api_routes = Router::new()
        .route(
            "/api/rag/documents",
            post(documents::add_document).get(documents::list_documents),
        )
        .route("/api/rag/documents/{id}", delete(documents::delete_document))
        .route("/api/rag/query", post(query::run_query))
        .route("/api/ai/saju-chat", post(chat::start_chat))
        .route("/api/ai/saju-chat/{id}", post(chat::continue_chat))
        .route("/api/ai/fortune", post(chat::fortune))
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .merge(metrics_router)
        .layer(
            ServiceBuilder::new()
                // Prometheus metrics (outermost - captures all requests)
                .layer(prometheus_layer)
                .layer(TraceLayer::new_for_http())
                // Request timeout
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(REQUEST_TIMEOUT_SECS),
                ))
                // Concurrency limit for backpressure
                .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
                // Request ID propagation
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                // The original surface answered every route with permissive CORS
                .layer(CorsLayer::permissive()),
        )
}
