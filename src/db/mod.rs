pub mod models;
pub mod repository;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::gateway::ChatMessage;
pub use repository::{DocumentPage, PaginationMeta, Repository};

/// Relational store of knowledge documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert unless a row with identical text exists. `None` signals the
    /// duplicate, it is not an error.
    async fn insert_document_if_absent(&self, text: &str) -> Result<Option<i64>, AppError>;

    /// Batch fetch of document texts. Order is not guaranteed to match the
    /// input ids; the empty input short-circuits without touching the store.
    async fn get_documents_by_ids(&self, ids: &[i64]) -> Result<Vec<String>, AppError>;

    /// Returns false when no row with that id exists.
    async fn delete_document(&self, id: i64) -> Result<bool, AppError>;

    async fn list_documents(
        &self,
        page: u64,
        page_size: u64,
        search: Option<&str>,
    ) -> Result<DocumentPage, AppError>;
}

/// Append-only store of per-conversation message turns.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Chronological history for a conversation; unknown ids yield an empty
    /// sequence (the new-conversation path).
    async fn get_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AppError>;

    /// Append the user question and assistant answer of one chat round.
    async fn append_turns(
        &self,
        conversation_id: &str,
        user_id: i64,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<(), AppError>;
}
