//! Conversation persistence
//!
//! Conversations are saved per user as named message histories. Signed-in
//! users get the SQLite-backed store; anonymous sessions use the
//! in-memory store, which lives only as long as the process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use uuid::Uuid;

use crate::message::Message;
use crate::{Error, Result};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// A saved conversation
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Seam over conversation persistence
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation for `user_id` and return it
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be written.
    async fn create(&self, user_id: &str, name: &str) -> Result<ConversationRecord>;

    /// List a user's conversations, most recently updated first
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    async fn list(&self, user_id: &str) -> Result<Vec<ConversationRecord>>;

    /// Fetch one conversation, `None` if it does not exist for the user
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    async fn get(&self, user_id: &str, id: &str) -> Result<Option<ConversationRecord>>;

    /// Replace a conversation's message history
    ///
    /// # Errors
    ///
    /// Returns error if the conversation does not exist or the write fails.
    async fn update_messages(
        &self,
        user_id: &str,
        id: &str,
        messages: &[Message],
    ) -> Result<()>;

    /// Rename a conversation
    ///
    /// # Errors
    ///
    /// Returns error if the conversation does not exist or the write fails.
    async fn rename(&self, user_id: &str, id: &str, name: &str) -> Result<()>;

    /// Delete a conversation; deleting a missing one is a no-op
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    async fn delete(&self, user_id: &str, id: &str) -> Result<()>;
}

/// Initialize the conversation database
///
/// # Errors
///
/// Returns error if the database cannot be opened or migrated.
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    init_schema(&conn)?;

    Ok(pool)
}

fn init_schema(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                messages TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_user
                ON conversations(user_id, updated_at DESC);

            PRAGMA user_version = 1;
            ",
        )?;
    }

    Ok(())
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

/// SQLite-backed conversation store
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
        let messages_json: String = row.get(3)?;
        let messages = serde_json::from_str(&messages_json).unwrap_or_default();

        Ok(ConversationRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            messages,
            created_at: parse_datetime(&row.get::<_, String>(4)?),
            updated_at: parse_datetime(&row.get::<_, String>(5)?),
        })
    }
}

const RECORD_COLUMNS: &str = "id, user_id, name, messages, created_at, updated_at";

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create(&self, user_id: &str, name: &str) -> Result<ConversationRecord> {
        let conn = self.conn()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO conversations (id, user_id, name, messages, created_at, updated_at)
             VALUES (?1, ?2, ?3, '[]', ?4, ?4)",
            [&id, user_id, name, &now.to_rfc3339()],
        )?;

        tracing::debug!(conversation = %id, user = %user_id, "conversation created");

        Ok(ConversationRecord {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ConversationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM conversations
             WHERE user_id = ?1 ORDER BY updated_at DESC"
        ))?;

        let records = stmt
            .query_map([user_id], |row| Self::row_to_record(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<ConversationRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM conversations
                     WHERE user_id = ?1 AND id = ?2"
                ),
                [user_id, id],
                |row| Self::row_to_record(row),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(record)
    }

    async fn update_messages(
        &self,
        user_id: &str,
        id: &str,
        messages: &[Message],
    ) -> Result<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(messages)?;

        let changed = conn.execute(
            "UPDATE conversations SET messages = ?1, updated_at = ?2
             WHERE user_id = ?3 AND id = ?4",
            [&json, &Utc::now().to_rfc3339(), user_id, id],
        )?;

        if changed == 0 {
            return Err(Error::Database(format!("conversation {id} not found")));
        }
        Ok(())
    }

    async fn rename(&self, user_id: &str, id: &str, name: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE conversations SET name = ?1, updated_at = ?2
             WHERE user_id = ?3 AND id = ?4",
            [name, &Utc::now().to_rfc3339(), user_id, id],
        )?;

        if changed == 0 {
            return Err(Error::Database(format!("conversation {id} not found")));
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM conversations WHERE user_id = ?1 AND id = ?2",
            [user_id, id],
        )?;
        Ok(())
    }
}

/// In-memory conversation store for anonymous sessions
#[derive(Default)]
pub struct MemoryStore {
    records: StdMutex<HashMap<String, ConversationRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create(&self, user_id: &str, name: &str) -> Result<ConversationRecord> {
        let now = Utc::now();
        let record = ConversationRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.records
            .lock()
            .expect("store mutex poisoned")
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ConversationRecord>> {
        let records = self.records.lock().expect("store mutex poisoned");
        let mut list: Vec<ConversationRecord> = records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<ConversationRecord>> {
        let records = self.records.lock().expect("store mutex poisoned");
        Ok(records
            .get(id)
            .filter(|r| r.user_id == user_id)
            .cloned())
    }

    async fn update_messages(
        &self,
        user_id: &str,
        id: &str,
        messages: &[Message],
    ) -> Result<()> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        let record = records
            .get_mut(id)
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| Error::Database(format!("conversation {id} not found")))?;

        record.messages = messages.to_vec();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn rename(&self, user_id: &str, id: &str, name: &str) -> Result<()> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        let record = records
            .get_mut(id)
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| Error::Database(format!("conversation {id} not found")))?;

        record.name = name.to_string();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        records.retain(|_, r| !(r.id == id && r.user_id == user_id));
        Ok(())
    }
}
