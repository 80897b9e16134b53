use crate::auth::SessionContext;
use crate::docstore::{fields, new_document_id, DocumentStore, Query};
use crate::error::AppError;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn toggled(self) -> Self {
        match self {
            Self::Pending => Self::Completed,
            Self::Completed => Self::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    #[serde(rename = "$id")]
    pub id: String,
    pub task: String,
    pub created_at: String,
    pub status: TaskStatus,
    pub sender_id: String,
}

/// Per-user task list stored as documents.
pub struct TodoService {
    store: Arc<dyn DocumentStore>,
    collection: String,
    session: Arc<SessionContext>,
}

impl TodoService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        session: Arc<SessionContext>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            session,
        }
    }

    /// Tasks owned by the signed-in user.
    pub async fn list(&self) -> Result<Vec<TodoItem>> {
        let user = self.session.require_user()?;
        let docs = self
            .store
            .list_documents(&self.collection, &[Query::equal("sender_id", user.account_id)])
            .await
            .context("Failed to load your tasks")?;
        docs.iter().map(|doc| doc.decode()).collect()
    }

    pub async fn add(&self, task: &str) -> Result<TodoItem> {
        let user = self
            .session
            .current_user()
            .ok_or_else(|| AppError::Auth("Please sign in to add tasks".to_string()))?;
        let task = task.trim();
        if task.is_empty() {
            return Err(AppError::invalid_input("Task cannot be empty").into());
        }

        let doc = self
            .store
            .create_document(
                &self.collection,
                &new_document_id(),
                fields(json!({
                    "task": task,
                    "created_at": Utc::now().to_rfc3339(),
                    "status": TaskStatus::Pending.as_str(),
                    "sender_id": user.account_id,
                })),
            )
            .await
            .context("Failed to add task")?;

        info!("Added task {}", doc.id);
        doc.decode()
    }

    /// Flip between pending and completed.
    pub async fn toggle(&self, item: &TodoItem) -> Result<TodoItem> {
        let next = item.status.toggled();
        let doc = self
            .store
            .update_document(
                &self.collection,
                &item.id,
                fields(json!({ "status": next.as_str() })),
            )
            .await
            .context("Failed to update task status")?;
        doc.decode()
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.store
            .delete_document(&self.collection, id)
            .await
            .context("Failed to delete task")?;
        info!("Deleted task {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserProfile;
    use crate::docstore::MemoryDocumentStore;

    fn signed_in(account_id: &str) -> Arc<SessionContext> {
        let session = Arc::new(SessionContext::new());
        session.sign_in_as(UserProfile {
            id: format!("profile-{}", account_id),
            account_id: account_id.to_string(),
            email: String::new(),
            username: account_id.to_string(),
        });
        session
    }

    fn service(store: &Arc<MemoryDocumentStore>, session: Arc<SessionContext>) -> TodoService {
        TodoService::new(store.clone(), "todos", session)
    }

    #[test]
    fn test_status_toggle_and_wire_names() {
        assert_eq!(TaskStatus::Pending.toggled(), TaskStatus::Completed);
        assert_eq!(TaskStatus::Completed.toggled(), TaskStatus::Pending);
        assert_eq!(serde_json::to_value(TaskStatus::Completed).unwrap(), "completed");
    }

    #[tokio::test]
    async fn test_add_trims_and_defaults_to_pending() {
        let store = Arc::new(MemoryDocumentStore::new());
        let todos = service(&store, signed_in("acc1"));

        let item = todos.add("  buy merch  ").await.unwrap();

        assert_eq!(item.task, "buy merch");
        assert_eq!(item.status, TaskStatus::Pending);
        assert_eq!(item.sender_id, "acc1");
        assert!(chrono::DateTime::parse_from_rfc3339(&item.created_at).is_ok());
    }

    #[tokio::test]
    async fn test_add_empty_task_rejected() {
        let store = Arc::new(MemoryDocumentStore::new());
        let todos = service(&store, signed_in("acc1"));

        let err = todos.add("   ").await.unwrap_err();
        assert_eq!(err.to_string(), "Task cannot be empty");
        assert!(store.list_documents("todos", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_requires_user() {
        let store = Arc::new(MemoryDocumentStore::new());
        let todos = service(&store, Arc::new(SessionContext::new()));

        let err = todos.add("anything").await.unwrap_err();
        assert_eq!(err.to_string(), "Please sign in to add tasks");
    }

    #[tokio::test]
    async fn test_list_only_own_tasks() {
        let store = Arc::new(MemoryDocumentStore::new());
        service(&store, signed_in("acc1")).add("mine").await.unwrap();
        service(&store, signed_in("acc2")).add("theirs").await.unwrap();

        let mine = service(&store, signed_in("acc1")).list().await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].task, "mine");
    }

    #[tokio::test]
    async fn test_list_signed_out() {
        let store = Arc::new(MemoryDocumentStore::new());
        let err = service(&store, Arc::new(SessionContext::new()))
            .list()
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<AppError>(), Some(&AppError::NotSignedIn));
    }

    #[tokio::test]
    async fn test_toggle_round_trip() {
        let store = Arc::new(MemoryDocumentStore::new());
        let todos = service(&store, signed_in("acc1"));
        let item = todos.add("stream").await.unwrap();

        let done = todos.toggle(&item).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        let undone = todos.toggle(&done).await.unwrap();
        assert_eq!(undone.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = Arc::new(MemoryDocumentStore::new());
        let todos = service(&store, signed_in("acc1"));
        let item = todos.add("stream").await.unwrap();

        todos.remove(&item.id).await.unwrap();
        assert!(todos.list().await.unwrap().is_empty());

        let err = todos.remove(&item.id).await.unwrap_err();
        assert!(err.to_string().contains("Failed to delete task"));
    }
}
