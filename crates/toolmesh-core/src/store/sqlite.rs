//! SQLite conversation store
//!
//! Message parts are stored as a JSON column. Message ids are unique within
//! their conversation. Blocking database work runs on tokio's blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::types::{default_title, generate_message_id, Conversation, ConversationMessage, ConversationRole};

use super::traits::{ConversationStore, StoreError, StoreResult};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS conversations (
    id             TEXT PRIMARY KEY,
    title          TEXT NOT NULL,
    model_provider TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    activity       INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    id              TEXT NOT NULL,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    role            TEXT NOT NULL,
    parts           TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    UNIQUE (conversation_id, id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, seq);
";

const SELECT_CONVERSATION: &str = "
SELECT c.id, c.title, c.model_provider, c.created_at, c.updated_at,
       (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
FROM conversations c";

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        model_provider: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        message_count: row.get::<_, i64>(5)? as usize,
    })
}

fn next_activity(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(activity), 0) + 1 FROM conversations", [], |row| row.get(0))
}

fn insert_conversation(
    conn: &Connection,
    id: &str,
    title: &str,
    model_provider: Option<&str>,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO conversations (id, title, model_provider, created_at, updated_at, activity)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
        params![id, title, model_provider, now, next_activity(conn)?],
    )?;
    Ok(())
}

fn fetch_conversation(conn: &Connection, id: &str) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        &format!("{} WHERE c.id = ?1", SELECT_CONVERSATION),
        params![id],
        conversation_from_row,
    )
    .optional()
}

/// Conversation store backed by a SQLite database file
pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConversationStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Other(e.to_string()))?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory database
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut conn.lock()))
            .await
            .map_err(|e| StoreError::Other(format!("store task failed: {}", e)))?
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create(&self, title: Option<&str>, model_provider: Option<&str>) -> StoreResult<Conversation> {
        let title = title.map(str::to_string).unwrap_or_else(default_title);
        let model_provider = model_provider.map(str::to_string);
        self.with_conn(move |conn| {
            let id = generate_message_id();
            insert_conversation(conn, &id, &title, model_provider.as_deref(), Utc::now())?;
            fetch_conversation(conn, &id)?.ok_or(StoreError::NotFound(id))
        })
        .await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let id = id.to_string();
        self.with_conn(move |conn| Ok(fetch_conversation(conn, &id)?)).await
    }

    async fn save(
        &self,
        conversation_id: &str,
        model_provider: Option<&str>,
        messages: &[ConversationMessage],
    ) -> StoreResult<usize> {
        let conversation_id = conversation_id.to_string();
        let model_provider = model_provider.map(str::to_string);
        let rows = messages
            .iter()
            .map(|m| -> StoreResult<_> { Ok((m.id.clone(), m.role, serde_json::to_string(&m.parts)?, m.created_at)) })
            .collect::<StoreResult<Vec<_>>>()?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            insert_conversation(&tx, &conversation_id, &default_title(), model_provider.as_deref(), now)?;

            let mut added = 0;
            {
                let mut insert = tx.prepare(
                    "INSERT OR IGNORE INTO messages (id, conversation_id, role, parts, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for (id, role, parts, created_at) in &rows {
                    added += insert.execute(params![id, conversation_id, role.as_str(), parts, created_at])?;
                }
            }

            if added > 0 {
                tx.execute(
                    "UPDATE conversations
                     SET updated_at = ?2, activity = ?3, model_provider = COALESCE(?4, model_provider)
                     WHERE id = ?1",
                    params![conversation_id, now, next_activity(&tx)?, model_provider],
                )?;
            }
            tx.commit()?;
            Ok(added)
        })
        .await
    }

    async fn load(&self, id: &str) -> StoreResult<Vec<ConversationMessage>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, role, parts, created_at FROM messages WHERE conversation_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, DateTime<Utc>>(3)?,
                ))
            })?;

            let messages = rows
                .map(|row| -> StoreResult<ConversationMessage> {
                    let (id, role, parts, created_at) = row?;
                    let role = ConversationRole::parse(&role)
                        .ok_or_else(|| StoreError::Other(format!("message {} has unknown role '{}'", id, role)))?;
                    Ok(ConversationMessage {
                        id,
                        role,
                        parts: serde_json::from_str(&parts)?,
                        created_at,
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }

    async fn list(&self) -> StoreResult<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY c.activity DESC", SELECT_CONVERSATION))?;
            let conversations = stmt
                .query_map([], conversation_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(conversations)
        })
        .await
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
            let removed = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn rename(&self, id: &str, title: &str) -> StoreResult<Conversation> {
        let id = id.to_string();
        let title = title.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE conversations SET title = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, title, Utc::now()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(id));
            }
            fetch_conversation(conn, &id)?.ok_or(StoreError::NotFound(id))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::exercise_store;
    use crate::types::{MessagePart, ToolCallPart};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        exercise_store(&SqliteConversationStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_survives_reopen_with_tool_parts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("conversations.db");

        let assistant = ConversationMessage::new(
            ConversationRole::Assistant,
            vec![
                MessagePart::ToolCall(ToolCallPart {
                    call_id: "call_0_0".into(),
                    tool_name: "calculate".into(),
                    input: json!({ "expression": "2 + 2" }),
                    output: Some("The result of 2 + 2 is 4".into()),
                    error_text: None,
                }),
                MessagePart::text("It is 4."),
            ],
        );
        let messages = vec![ConversationMessage::user_text("what is 2 + 2?"), assistant];

        {
            let store = SqliteConversationStore::open(&path).unwrap();
            assert_eq!(store.save("c1", Some("openai"), &messages).await.unwrap(), 2);
        }

        let store = SqliteConversationStore::open(&path).unwrap();
        let loaded = store.load("c1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, messages[0].id);
        assert_eq!(loaded[1].parts, messages[1].parts);

        let conversation = store.get("c1").await.unwrap().unwrap();
        assert_eq!(conversation.model_provider.as_deref(), Some("openai"));
        assert_eq!(conversation.message_count, 2);
    }
}
