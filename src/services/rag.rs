//! The RAG orchestrator: embed the query, retrieve similar document ids,
//! hydrate their text, assemble the prompt, and dispatch to the model
//! gateway. Steps run strictly in sequence because each depends on the
//! previous step's output.

use std::sync::Arc;
use uuid::Uuid;

use crate::db::{ConversationStore, DocumentPage, DocumentStore};
use crate::embeddings::Embedder;
use crate::errors::AppError;
use crate::gateway::{ChatMessage, ChatParams, ModelGateway};
use crate::not_found;
use crate::vector::VectorIndex;

/// Separator between retrieved documents inside the context message.
const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Sent instead of an empty context message, so the model is told retrieval
/// found nothing rather than silently receiving no guidance.
const NO_CONTEXT_MARKER: &str = "No context provided.";

const DEFAULT_QUERY_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's \
    question based on the provided context. If the context doesn't contain the answer, say \
    that you don't know.";

// TODO: take this from the authenticated session once auth is wired in
const DEFAULT_USER_ID: i64 = 1;

pub struct RagService {
    documents: Arc<dyn DocumentStore>,
    conversations: Arc<dyn ConversationStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    gateway: Arc<ModelGateway>,
    top_k: usize,
}

#[derive(Debug)]
pub struct QueryOutcome {
    pub answer: String,
    pub context: Vec<String>,
}

#[derive(Debug)]
pub struct ChatOutcome {
    pub conversation_id: String,
    pub answer: String,
    /// False when the turn pair could not be persisted; the answer is still
    /// returned, degraded rather than failed.
    pub history_saved: bool,
}

impl RagService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        conversations: Arc<dyn ConversationStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        gateway: Arc<ModelGateway>,
        top_k: usize,
    ) -> Self {
        Self { documents, conversations, embedder, index, gateway, top_k }
    }

    /// Store a document and index its embedding. The vector entry must exist
    /// exactly when the document row does, so a failed embed or upsert rolls
    /// the row back before the error propagates.
    pub async fn add_document(&self, text: &str) -> Result<i64, AppError> {
        let Some(id) = self.documents.insert_document_if_absent(text).await? else {
            return Err(AppError::DuplicateDocument);
        };

        let vector = match self.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(err) => {
                self.discard_document(id).await;
                return Err(err);
            }
        };

        if let Err(err) = self.index.upsert(id, &vector).await {
            self.discard_document(id).await;
            return Err(err);
        }

        metrics::counter!("saju_rag_documents_added_total").increment(1);
        tracing::info!(doc_id = id, "Document added and indexed");
        Ok(id)
    }

    async fn discard_document(&self, id: i64) {
        if let Err(err) = self.documents.delete_document(id).await {
            tracing::warn!(doc_id = id, error = %err, "Failed to roll back document row");
        }
    }

    pub async fn delete_document(&self, id: i64) -> Result<(), AppError> {
        if !self.documents.delete_document(id).await? {
            return Err(not_found!("document", id));
        }
        self.index.delete_by_ids(&[id]).await?;

        metrics::counter!("saju_rag_documents_deleted_total").increment(1);
        tracing::info!(doc_id = id, "Document deleted");
        Ok(())
    }

    pub async fn list_documents(
        &self,
        page: u64,
        page_size: u64,
        search: Option<&str>,
    ) -> Result<DocumentPage, AppError> {
        self.documents.list_documents(page, page_size, search).await
    }

    /// Single-shot question answering. The retrieved context is returned to
    /// the caller alongside the answer.
    pub async fn answer_query(&self, query: &str) -> Result<QueryOutcome, AppError> {
        let context = self.retrieve_context(query).await?;

        let messages = vec![
            ChatMessage::system(DEFAULT_QUERY_SYSTEM_PROMPT),
            Self::context_message(&context),
            ChatMessage::user(query),
        ];

        let answer = self.generate(messages).await?;
        metrics::counter!("saju_rag_queries_total").increment(1);
        Ok(QueryOutcome { answer, context })
    }

    /// One chat round. Prompt order is fixed: optional system prompt, prior
    /// history, retrieved context, then the live query last so the model
    /// weighs the context most against it.
    pub async fn chat(
        &self,
        conversation_id: Option<String>,
        message: &str,
        system_prompt: Option<String>,
    ) -> Result<ChatOutcome, AppError> {
        let history = match &conversation_id {
            Some(id) => self.conversations.get_history(id).await?,
            None => Vec::new(),
        };
        let conversation_id =
            conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let context = self.retrieve_context(message).await?;

        let mut messages = Vec::with_capacity(history.len() + 3);
        if let Some(prompt) = system_prompt {
            messages.push(ChatMessage::system(prompt));
        }
        messages.extend(history);
        messages.push(Self::context_message(&context));
        messages.push(ChatMessage::user(message));

        let answer = self.generate(messages).await?;

        let history_saved = match self
            .conversations
            .append_turns(&conversation_id, DEFAULT_USER_ID, message, &answer)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %err,
                    "Failed to persist conversation turns"
                );
                false
            }
        };

        metrics::counter!("saju_rag_chat_turns_total").increment(1);
        Ok(ChatOutcome { conversation_id, answer, history_saved })
    }

    /// Embed, similarity-search, hydrate. Zero matches is a valid outcome.
    async fn retrieve_context(&self, query: &str) -> Result<Vec<String>, AppError> {
        let vector = self.embedder.embed(query).await?;
        let ids = self.index.query(&vector, self.top_k).await?;
        self.documents.get_documents_by_ids(&ids).await
    }

    fn context_message(context: &[String]) -> ChatMessage {
        if context.is_empty() {
            ChatMessage::system(NO_CONTEXT_MARKER)
        } else {
            ChatMessage::system(format!("Context:\n{}", context.join(CONTEXT_SEPARATOR)))
        }
    }

    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String, AppError> {
        let reply = self
            .gateway
            .invoke(ChatParams { messages, ..Default::default() })
            .await?;
        let answer = reply
            .output
            .response_text()
            .ok_or(AppError::EmptyResponse)?
            .to_string();
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AiConfig;
    use crate::db::PaginationMeta;
    use crate::gateway::{ChatModel, ChatRequest, ModelOutput, Role};
    use crate::embeddings::MockEmbedder;
    use crate::vector::InMemoryVectorIndex;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    struct MemoryDocumentStore {
        rows: Mutex<Vec<(i64, String)>>,
        next_id: AtomicI64,
    }

    impl MemoryDocumentStore {
        fn new() -> Arc<Self> {
            Arc::new(Self { rows: Mutex::new(Vec::new()), next_id: AtomicI64::new(1) })
        }

        fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryDocumentStore {
        async fn insert_document_if_absent(&self, text: &str) -> Result<Option<i64>, AppError> {
            let mut rows = self.rows.lock().unwrap();
            if rows.iter().any(|(_, t)| t == text) {
                return Ok(None);
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            rows.push((id, text.to_string()));
            Ok(Some(id))
        }

        async fn get_documents_by_ids(&self, ids: &[i64]) -> Result<Vec<String>, AppError> {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|(id, _)| ids.contains(id))
                .map(|(_, text)| text.clone())
                .collect())
        }

        async fn delete_document(&self, id: i64) -> Result<bool, AppError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|(row_id, _)| *row_id != id);
            Ok(rows.len() < before)
        }

        async fn list_documents(
            &self,
            page: u64,
            page_size: u64,
            _search: Option<&str>,
        ) -> Result<DocumentPage, AppError> {
            let rows = self.rows.lock().unwrap();
            Ok(DocumentPage {
                data: Vec::new(),
                pagination: PaginationMeta {
                    total_items: rows.len() as u64,
                    total_pages: (rows.len() as u64).div_ceil(page_size.max(1)),
                    current_page: page,
                    page_size,
                },
            })
        }
    }

    struct MemoryConversationStore {
        turns: Mutex<HashMap<String, Vec<ChatMessage>>>,
        fail_appends: bool,
    }

    impl MemoryConversationStore {
        fn new() -> Arc<Self> {
            Arc::new(Self { turns: Mutex::new(HashMap::new()), fail_appends: false })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { turns: Mutex::new(HashMap::new()), fail_appends: true })
        }

        fn preload(&self, conversation_id: &str, turns: Vec<ChatMessage>) {
            self.turns.lock().unwrap().insert(conversation_id.to_string(), turns);
        }

        fn turn_count(&self, conversation_id: &str) -> usize {
            self.turns
                .lock()
                .unwrap()
                .get(conversation_id)
                .map_or(0, Vec::len)
        }
    }

    #[async_trait]
    impl ConversationStore for MemoryConversationStore {
        async fn get_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AppError> {
            Ok(self
                .turns
                .lock()
                .unwrap()
                .get(conversation_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn append_turns(
            &self,
            conversation_id: &str,
            _user_id: i64,
            user_message: &str,
            assistant_message: &str,
        ) -> Result<(), AppError> {
            if self.fail_appends {
                return Err(AppError::RetrievalError("store offline".to_string()));
            }
            let mut turns = self.turns.lock().unwrap();
            let entry = turns.entry(conversation_id.to_string()).or_default();
            entry.push(ChatMessage::user(user_message));
            entry.push(ChatMessage::assistant(assistant_message));
            Ok(())
        }
    }

    /// Answers every invocation with a fixed response and records the
    /// requests it saw, so tests can assert on the assembled messages.
    struct RecordingModel {
        answer: String,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl RecordingModel {
        fn new(answer: &str) -> Arc<Self> {
            Arc::new(Self { answer: answer.to_string(), requests: Mutex::new(Vec::new()) })
        }

        fn last_messages(&self) -> Vec<ChatMessage> {
            self.requests
                .lock()
                .unwrap()
                .last()
                .expect("model was never invoked")
                .messages
                .clone()
        }
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        async fn run(
            &self,
            _model: &str,
            request: &ChatRequest,
            _use_gateway: bool,
        ) -> Result<ModelOutput, AppError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(ModelOutput::Json(json!({ "response": self.answer })))
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Err(AppError::EmbeddingError("no vector in result slot".to_string()))
        }
    }

    fn ai_config() -> AiConfig {
        AiConfig {
            api_base: "http://localhost".to_string(),
            api_token: "mock".to_string(),
            embedding_model: "@cf/baai/bge-base-en-v1.5".to_string(),
            embedding_dim: 16,
            chat_model: "test-model".to_string(),
            fallback_models: Vec::new(),
            fallback_enabled: false,
            gateway_base: None,
        }
    }

    struct Fixture {
        service: RagService,
        documents: Arc<MemoryDocumentStore>,
        conversations: Arc<MemoryConversationStore>,
        index: Arc<InMemoryVectorIndex>,
        model: Arc<RecordingModel>,
    }

    fn fixture_with(
        embedder: Arc<dyn Embedder>,
        conversations: Arc<MemoryConversationStore>,
    ) -> Fixture {
        let documents = MemoryDocumentStore::new();
        let index = Arc::new(InMemoryVectorIndex::new());
        let model = RecordingModel::new("Your fortune looks bright.");
        let gateway = Arc::new(ModelGateway::new(model.clone(), &ai_config()));
        let service = RagService::new(
            documents.clone(),
            conversations.clone(),
            embedder,
            index.clone(),
            gateway,
            5,
        );
        Fixture { service, documents, conversations, index, model }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MockEmbedder::new(16)), MemoryConversationStore::new())
    }

    #[tokio::test]
    async fn second_identical_add_is_a_duplicate_not_a_second_row() {
        let fx = fixture();
        fx.service.add_document("The day pillar rules the self.").await.unwrap();

        let err = fx
            .service
            .add_document("The day pillar rules the self.")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateDocument));
        assert_eq!(fx.documents.len(), 1);
    }

    #[tokio::test]
    async fn add_and_delete_keep_document_and_vector_paired() {
        let fx = fixture();
        let id = fx.service.add_document("Wood controls earth.").await.unwrap();

        let embedding = MockEmbedder::new(16).embed("Wood controls earth.").await.unwrap();
        assert_eq!(fx.index.query(&embedding, 5).await.unwrap(), vec![id]);

        fx.service.delete_document(id).await.unwrap();
        assert!(fx.index.query(&embedding, 5).await.unwrap().is_empty());
        assert_eq!(fx.documents.len(), 0);
    }

    #[tokio::test]
    async fn embed_failure_rolls_back_the_document_row() {
        let fx = fixture_with(Arc::new(FailingEmbedder), MemoryConversationStore::new());

        let err = fx.service.add_document("orphan candidate").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingError(_)));
        assert_eq!(fx.documents.len(), 0);
    }

    #[tokio::test]
    async fn deleting_an_unknown_document_is_not_found() {
        let fx = fixture();
        let err = fx.service.delete_document(42).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn empty_retrieval_sends_the_no_context_marker() {
        let fx = fixture();

        let outcome = fx.service.answer_query("What is my fortune?").await.unwrap();
        assert!(outcome.context.is_empty());
        assert_eq!(outcome.answer, "Your fortune looks bright.");

        let messages = fx.model.last_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::System);
        assert_eq!(messages[1].content, "No context provided.");
        assert_eq!(messages[2], ChatMessage::user("What is my fortune?"));
    }

    #[tokio::test]
    async fn chat_messages_follow_the_fixed_order() {
        let conversations = MemoryConversationStore::new();
        conversations.preload(
            "conv-1",
            vec![
                ChatMessage::user("What does my year pillar mean?"),
                ChatMessage::assistant("It shapes your early life."),
            ],
        );
        let fx = fixture_with(Arc::new(MockEmbedder::new(16)), conversations);
        fx.service
            .add_document("The month pillar colors career luck.")
            .await
            .unwrap();

        fx.service
            .chat(
                Some("conv-1".to_string()),
                "And next month?",
                Some("You are a seasoned Saju master.".to_string()),
            )
            .await
            .unwrap();

        let messages = fx.model.last_messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0], ChatMessage::system("You are a seasoned Saju master."));
        assert_eq!(messages[1], ChatMessage::user("What does my year pillar mean?"));
        assert_eq!(messages[2], ChatMessage::assistant("It shapes your early life."));
        assert_eq!(messages[3].role, Role::System);
        assert!(messages[3].content.starts_with("Context:\n"));
        assert!(messages[3].content.contains("The month pillar colors career luck."));
        assert_eq!(messages[4], ChatMessage::user("And next month?"));
    }

    #[tokio::test]
    async fn chat_rounds_share_a_conversation() {
        let fx = fixture();

        let first = fx.service.chat(None, "What is my fortune?", None).await.unwrap();
        assert!(first.history_saved);
        assert_eq!(fx.conversations.turn_count(&first.conversation_id), 2);

        let second = fx
            .service
            .chat(Some(first.conversation_id.clone()), "And next month?", None)
            .await
            .unwrap();
        assert_eq!(second.conversation_id, first.conversation_id);
        assert_eq!(fx.conversations.turn_count(&first.conversation_id), 4);

        // The second round's prompt replays the first round before the new query.
        let messages = fx.model.last_messages();
        assert_eq!(messages[0], ChatMessage::user("What is my fortune?"));
        assert_eq!(messages[1], ChatMessage::assistant("Your fortune looks bright."));
        assert_eq!(messages.last(), Some(&ChatMessage::user("And next month?")));
    }

    #[tokio::test]
    async fn failed_history_append_degrades_instead_of_failing() {
        let fx = fixture_with(Arc::new(MockEmbedder::new(16)), MemoryConversationStore::failing());

        let outcome = fx.service.chat(None, "Will it rain?", None).await.unwrap();
        assert!(!outcome.history_saved);
        assert_eq!(outcome.answer, "Your fortune looks bright.");
    }
}
