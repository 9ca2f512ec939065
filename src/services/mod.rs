use std::sync::Arc;

use crate::db::{ConversationStore, DocumentStore};
use crate::embeddings::Embedder;
use crate::gateway::ModelGateway;
use crate::services::rag::RagService;
use crate::vector::VectorIndex;

pub mod rag;

// A container for all services to be injected into routes
#[derive(Clone)]
pub struct AppState {
    pub rag_service: Arc<RagService>,
    pub gateway: Arc<ModelGateway>,
}

impl AppState {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        conversations: Arc<dyn ConversationStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        gateway: Arc<ModelGateway>,
        top_k: usize,
    ) -> Self {
        Self {
            rag_service: Arc::new(RagService::new(
                documents,
                conversations,
                embedder,
                index,
                gateway.clone(),
                top_k,
            )),
            gateway,
        }
    }
}
