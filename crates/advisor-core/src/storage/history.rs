//! Conversation history persistence
//!
//! Stores the user text and the assistant reply of every answered turn,
//! keyed by engine thread id. The reply carries its call records.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::database::Database;
use crate::error::AdvisorError;
use crate::interceptor::ToolCallRecord;

/// Who wrote a history message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

impl HistoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryRole::User => "user",
            HistoryRole::Assistant => "assistant",
        }
    }

    fn parse(role: &str) -> Option<Self> {
        match role {
            "user" => Some(HistoryRole::User),
            "assistant" => Some(HistoryRole::Assistant),
            _ => None,
        }
    }
}

/// One persisted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub role: HistoryRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    pub created_at: DateTime<Utc>,
}

/// Summary of a stored thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub id: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Trait for conversation history stores
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a message to a thread's history
    async fn append(&self, thread_id: &str, message: &HistoryMessage) -> Result<(), AdvisorError>;

    /// Load a thread's history, oldest first. Unknown threads have no history.
    async fn load(&self, thread_id: &str) -> Result<Vec<HistoryMessage>, AdvisorError>;
}

/// SQLite-backed history store
#[derive(Clone)]
pub struct SqliteHistoryStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteHistoryStore {
    /// Open (or create) the history database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::new(path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Most recently updated threads first
    pub fn list_threads(&self, limit: usize) -> Result<Vec<ThreadSummary>> {
        let db = self.db.lock();
        let mut stmt = db.conn().prepare(
            "SELECT t.id, t.updated_at, COUNT(m.id)
             FROM threads t LEFT JOIN messages m ON m.thread_id = t.id
             GROUP BY t.id ORDER BY t.updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut threads = Vec::new();
        for row in rows {
            let (id, updated_at, count) = row?;
            threads.push(ThreadSummary {
                id,
                message_count: count as usize,
                updated_at: parse_timestamp(&updated_at)?,
            });
        }
        Ok(threads)
    }

    /// Delete a thread's history. Returns `false` if nothing was stored.
    pub fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        let db = self.db.lock();
        let removed = db
            .conn()
            .execute("DELETE FROM messages WHERE thread_id = ?1", [thread_id])?;
        let known = db
            .conn()
            .execute("DELETE FROM threads WHERE id = ?1", [thread_id])?;
        Ok(removed > 0 || known > 0)
    }

    fn append_blocking(&self, thread_id: &str, message: &HistoryMessage) -> Result<()> {
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.tool_calls)?)
        };
        let created_at = message.created_at.to_rfc3339();

        let db = self.db.lock();
        db.conn().execute(
            "INSERT INTO messages (thread_id, role, content, tool_calls, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                thread_id,
                message.role.as_str(),
                message.content,
                tool_calls,
                created_at
            ],
        )?;
        db.conn().execute(
            "INSERT INTO threads (id, created_at, updated_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
            params![thread_id, created_at],
        )?;
        Ok(())
    }

    fn load_blocking(&self, thread_id: &str) -> Result<Vec<HistoryMessage>> {
        let db = self.db.lock();
        let mut stmt = db.conn().prepare(
            "SELECT role, content, tool_calls, created_at
             FROM messages WHERE thread_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([thread_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, tool_calls, created_at) = row?;
            let Some(role) = HistoryRole::parse(&role) else {
                tracing::warn!(thread = thread_id, role = %role, "Skipping message with unknown role");
                continue;
            };
            messages.push(HistoryMessage {
                role,
                content,
                tool_calls: match tool_calls {
                    Some(json) => serde_json::from_str(&json)?,
                    None => Vec::new(),
                },
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(messages)
    }

    /// Whether any history is stored for the thread
    pub fn contains(&self, thread_id: &str) -> Result<bool> {
        let db = self.db.lock();
        let found = db
            .conn()
            .query_row("SELECT 1 FROM threads WHERE id = ?1", [thread_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, thread_id: &str, message: &HistoryMessage) -> Result<(), AdvisorError> {
        let store = self.clone();
        let thread_id = thread_id.to_string();
        let message = message.clone();
        tokio::task::spawn_blocking(move || store.append_blocking(&thread_id, &message))
            .await
            .map_err(|e| AdvisorError::Storage(e.to_string()))?
            .map_err(storage_error)
    }

    async fn load(&self, thread_id: &str) -> Result<Vec<HistoryMessage>, AdvisorError> {
        let store = self.clone();
        let thread_id = thread_id.to_string();
        tokio::task::spawn_blocking(move || store.load_blocking(&thread_id))
            .await
            .map_err(|e| AdvisorError::Storage(e.to_string()))?
            .map_err(storage_error)
    }
}

fn storage_error(err: anyhow::Error) -> AdvisorError {
    AdvisorError::Storage(format!("{:#}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::ToolParameter;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteHistoryStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = SqliteHistoryStore::open(&temp_dir.path().join("history.db"))
            .expect("Failed to open history");
        (store, temp_dir)
    }

    fn message(role: HistoryRole, content: &str) -> HistoryMessage {
        HistoryMessage {
            role,
            content: content.to_string(),
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_load_in_order() {
        let (store, _temp) = create_test_store();
        let mut reply = message(HistoryRole::Assistant, "Your installment is 42 EUR.");
        reply.tool_calls = vec![ToolCallRecord {
            function_name: "scenario-agent".into(),
            group_name: "AgentsPlugin".into(),
            parameters: vec![ToolParameter {
                key: "usage".into(),
                value: "300kWh".into(),
            }],
            response: Some("42 EUR".into()),
        }];

        store
            .append("thread_1", &message(HistoryRole::User, "installment?"))
            .await
            .unwrap();
        store.append("thread_1", &reply).await.unwrap();
        store
            .append("thread_2", &message(HistoryRole::User, "joke please"))
            .await
            .unwrap();

        let history = store.load("thread_1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, HistoryRole::User);
        assert_eq!(history[1].tool_calls, reply.tool_calls);
        assert!(store.load("thread_unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_row_is_storage_error() {
        let (store, _temp) = create_test_store();
        store
            .append("thread_1", &message(HistoryRole::Assistant, "reply"))
            .await
            .unwrap();
        store
            .db
            .lock()
            .conn()
            .execute("UPDATE messages SET tool_calls = '{not json'", [])
            .unwrap();

        let err = store.load("thread_1").await.unwrap_err();
        assert!(matches!(err, AdvisorError::Storage(_)));
    }

    #[tokio::test]
    async fn test_list_and_delete_threads() {
        let (store, _temp) = create_test_store();
        let mut older = message(HistoryRole::User, "first");
        older.created_at = Utc::now() - Duration::minutes(5);
        store.append("thread_old", &older).await.unwrap();
        store
            .append("thread_new", &message(HistoryRole::User, "second"))
            .await
            .unwrap();
        store
            .append("thread_new", &message(HistoryRole::Assistant, "reply"))
            .await
            .unwrap();

        let threads = store.list_threads(10).unwrap();
        let ids: Vec<&str> = threads.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["thread_new", "thread_old"]);
        assert_eq!(threads[0].message_count, 2);

        assert!(store.contains("thread_old").unwrap());
        assert!(store.delete_thread("thread_old").unwrap());
        assert!(!store.delete_thread("thread_old").unwrap());
        assert!(!store.contains("thread_old").unwrap());
    }
}
