use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::Serialize;

use super::models::{conversation_turns, documents};
use super::{ConversationStore, DocumentStore};
use crate::config::DatabaseConfig;
use crate::errors::AppError;
use crate::gateway::{ChatMessage, Role};

/// Startup DDL, the analog of the D1 migration script. Idempotent; the
/// UNIQUE constraint on `text` backs the dedup check under concurrency.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        text TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversation_turns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_conversation_turns_conversation_id
        ON conversation_turns (conversation_id)
    "#,
];

#[derive(Clone)]
pub struct Repository {
    db: DatabaseConnection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total_items: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub page_size: u64,
}

/// Pagination envelope matching the document listing response shape.
#[derive(Debug, Serialize)]
pub struct DocumentPage {
    pub data: Vec<documents::Model>,
    pub pagination: PaginationMeta,
}

impl Repository {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DbErr> {
        let mut opt = sea_orm::ConnectOptions::new(&config.url);
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout))
            .sqlx_logging(true);

        let db = sea_orm::Database::connect(opt).await?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> Result<(), DbErr> {
        for statement in MIGRATIONS {
            self.db.execute_unprepared(statement).await?;
        }
        Ok(())
    }

    /// Readiness probe.
    pub async fn ping(&self) -> Result<(), DbErr> {
        self.db.ping().await
    }
}

#[async_trait]
impl DocumentStore for Repository {
    async fn insert_document_if_absent(&self, text: &str) -> Result<Option<i64>, AppError> {
        let existing = documents::Entity::find()
            .filter(documents::Column::Text.eq(text))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Ok(None);
        }

        let now = chrono::Utc::now();
        let row = documents::ActiveModel {
            text: Set(text.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        match row.insert(&self.db).await {
            Ok(model) => Ok(Some(model.id)),
            // A concurrent identical insert can slip past the lookup; the
            // UNIQUE constraint turns that race into the duplicate signal.
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_documents_by_ids(&self, ids: &[i64]) -> Result<Vec<String>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = documents::Entity::find()
            .filter(documents::Column::Id.is_in(ids.to_vec()))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|row| row.text).collect())
    }

    async fn delete_document(&self, id: i64) -> Result<bool, AppError> {
        let result = documents::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn list_documents(
        &self,
        page: u64,
        page_size: u64,
        search: Option<&str>,
    ) -> Result<DocumentPage, AppError> {
        let mut query = documents::Entity::find();
        if let Some(term) = search.filter(|t| !t.is_empty()) {
            query = query.filter(documents::Column::Text.contains(term));
        }

        let paginator = query
            .order_by_desc(documents::Column::Id)
            .paginate(&self.db, page_size);
        let totals = paginator.num_items_and_pages().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(DocumentPage {
            data,
            pagination: PaginationMeta {
                total_items: totals.number_of_items,
                total_pages: totals.number_of_pages,
                current_page: page,
                page_size,
            },
        })
    }
}

#[async_trait]
impl ConversationStore for Repository {
    async fn get_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let rows = conversation_turns::Entity::find()
            .filter(conversation_turns::Column::ConversationId.eq(conversation_id))
            .order_by_asc(conversation_turns::Column::CreatedAt)
            .order_by_asc(conversation_turns::Column::Id)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ChatMessage {
                role: Role::parse(&row.role),
                content: row.content,
            })
            .collect())
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        user_id: i64,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<(), AppError> {
        let now = chrono::Utc::now();
        let turns = [(Role::User, user_message), (Role::Assistant, assistant_message)]
            .into_iter()
            .map(|(role, content)| conversation_turns::ActiveModel {
                conversation_id: Set(conversation_id.to_string()),
                user_id: Set(user_id),
                role: Set(role.as_str().to_string()),
                content: Set(content.to_string()),
                created_at: Set(now),
                ..Default::default()
            });

        conversation_turns::Entity::insert_many(turns)
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One connection keeps every query in the same in-memory database.
    async fn test_repo() -> Repository {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: 5,
        };
        let repo = Repository::new(&config).await.unwrap();
        repo.migrate().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn duplicate_text_insert_returns_none() {
        let repo = test_repo().await;

        let first = repo.insert_document_if_absent("metal cuts wood").await.unwrap();
        assert!(first.is_some());

        let second = repo.insert_document_if_absent("metal cuts wood").await.unwrap();
        assert!(second.is_none());

        let page = repo.list_documents(1, 10, None).await.unwrap();
        assert_eq!(page.pagination.total_items, 1);
    }

    #[tokio::test]
    async fn list_documents_computes_totals_and_pages() {
        let repo = test_repo().await;
        for i in 0..5 {
            repo.insert_document_if_absent(&format!("entry number {i}"))
                .await
                .unwrap();
        }

        let page = repo.list_documents(2, 2, None).await.unwrap();
        assert_eq!(page.pagination.total_items, 5);
        assert_eq!(page.pagination.total_pages, 3);
        assert_eq!(page.pagination.current_page, 2);
        assert_eq!(page.pagination.page_size, 2);
        assert_eq!(page.data.len(), 2);
        // Newest first within and across pages
        assert!(page.data[0].id > page.data[1].id);

        let last = repo.list_documents(3, 2, None).await.unwrap();
        assert_eq!(last.data.len(), 1);
    }

    #[tokio::test]
    async fn list_documents_filters_by_search_term() {
        let repo = test_repo().await;
        repo.insert_document_if_absent("the year pillar governs ancestry")
            .await
            .unwrap();
        repo.insert_document_if_absent("the month pillar governs parents")
            .await
            .unwrap();
        repo.insert_document_if_absent("unrelated note").await.unwrap();

        let found = repo
            .list_documents(1, 10, Some("pillar"))
            .await
            .unwrap();
        assert_eq!(found.pagination.total_items, 2);
        assert!(found.data.iter().all(|doc| doc.text.contains("pillar")));

        // Empty search term behaves like no filter
        let all = repo.list_documents(1, 10, Some("")).await.unwrap();
        assert_eq!(all.pagination.total_items, 3);
    }

    #[tokio::test]
    async fn empty_id_batch_fetches_nothing() {
        let repo = test_repo().await;
        repo.insert_document_if_absent("some text").await.unwrap();

        let texts = repo.get_documents_by_ids(&[]).await.unwrap();
        assert!(texts.is_empty());
    }

    #[tokio::test]
    async fn fetch_by_ids_returns_matching_texts() {
        let repo = test_repo().await;
        let a = repo.insert_document_if_absent("alpha").await.unwrap().unwrap();
        repo.insert_document_if_absent("beta").await.unwrap();

        let texts = repo.get_documents_by_ids(&[a, 9999]).await.unwrap();
        assert_eq!(texts, vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn delete_reports_false_for_unknown_id() {
        let repo = test_repo().await;
        let id = repo.insert_document_if_absent("ephemeral").await.unwrap().unwrap();

        assert!(repo.delete_document(id).await.unwrap());
        assert!(!repo.delete_document(id).await.unwrap());
        assert!(!repo.delete_document(424242).await.unwrap());
    }

    #[tokio::test]
    async fn same_millisecond_turns_keep_insert_order() {
        let repo = test_repo().await;

        // Back-to-back appends land within the same timestamp resolution;
        // the id tiebreak must keep the turns in insert order.
        repo.append_turns("conv-a", 1, "first question", "first answer")
            .await
            .unwrap();
        repo.append_turns("conv-a", 1, "second question", "second answer")
            .await
            .unwrap();
        repo.append_turns("conv-b", 1, "other question", "other answer")
            .await
            .unwrap();

        let history = repo.get_history("conv-a").await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "first question",
                "first answer",
                "second question",
                "second answer"
            ]
        );
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn history_is_empty_for_unknown_conversation() {
        let repo = test_repo().await;
        let history = repo.get_history("missing").await.unwrap();
        assert!(history.is_empty());
    }
}
