//! SQLite-backed conversation store.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::store::{
    Conversation, ConversationStore, ConversationSummary, Message, MessageDeletion, NewMessage,
    Role, StoreError,
};

const SCHEMA_VERSION: i64 = 1;
const DEFAULT_TITLE: &str = "New chat";
const MAX_TITLE_LEN: usize = 160;
const PREVIEW_LEN: usize = 100;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, pair_id, role, content, metadata, created_at";

#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await?;

        let store = Self { pool };
        store.init_db().await?;
        Ok(store)
    }

    async fn init_db(&self) -> Result<(), StoreError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;

        if version < SCHEMA_VERSION {
            self.create_schema().await?;
        }

        Ok(())
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL CHECK(length(trim(title)) > 0),
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                pair_id TEXT,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant', 'system')),
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            )",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_updated_at ON conversations(updated_at DESC)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation_order ON messages(conversation_id, created_at, seq)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation_pair ON messages(conversation_id, pair_id)",
        )
        .execute(&mut *tx)
        .await?;

        let pragma = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
        sqlx::query(&pragma).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, title, metadata, created_at, updated_at FROM conversations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| conversation_from_row(&row)).transpose()?)
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_conversation(
        &self,
        title: Option<String>,
        metadata: Value,
    ) -> Result<Conversation, StoreError> {
        let id = Uuid::new_v4().to_string();
        let title = normalize_title(title);
        let metadata = serde_json::to_string(&normalize_metadata(metadata))?;

        sqlx::query("INSERT INTO conversations (id, title, metadata) VALUES (?1, ?2, ?3)")
            .bind(&id)
            .bind(title)
            .bind(metadata)
            .execute(&self.pool)
            .await?;

        self.fetch_conversation(&id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Conversation {} vanished", id)))
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let rows = sqlx::query(
            "\
            SELECT c.id, c.title, c.metadata, c.created_at, c.updated_at,
                   (SELECT COUNT(*) FROM messages WHERE conversation_id = c.id) AS message_count,
                   (SELECT content FROM messages WHERE conversation_id = c.id
                    ORDER BY created_at DESC, seq DESC LIMIT 1) AS last_message
            FROM conversations c
            ORDER BY c.updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let last_message: Option<String> = row.try_get("last_message")?;
                Ok(ConversationSummary {
                    conversation: conversation_from_row(row)?,
                    message_count: row.try_get("message_count")?,
                    preview: last_message
                        .unwrap_or_default()
                        .chars()
                        .take(PREVIEW_LEN)
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        self.fetch_conversation(id).await
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<Conversation, StoreError> {
        let title = normalize_title(Some(title.to_string()));

        let result = sqlx::query(
            "UPDATE conversations SET title = ?1, updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?2",
        )
        .bind(title)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(conversation_not_found(id));
        }

        self.fetch_conversation(id)
            .await?
            .ok_or_else(|| conversation_not_found(id))
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let id = Uuid::new_v4().to_string();
        let metadata = serde_json::to_string(&normalize_metadata(message.metadata))?;

        // The INSERT is the first statement so the transaction takes the write
        // lock up front; a missing conversation surfaces as a foreign key error.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "\
            INSERT INTO messages (id, conversation_id, pair_id, role, content, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&id)
        .bind(&message.conversation_id)
        .bind(&message.pair_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(metadata)
        .execute(&mut *tx)
        .await
        .map_err(|err| missing_conversation(err, &message.conversation_id))?;

        touch_conversation_tx(&mut tx, &message.conversation_id).await?;

        let query = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
        let row = sqlx::query(&query).bind(&id).fetch_one(&mut *tx).await?;
        let inserted = message_from_row(&row)?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let query = format!(
            "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, seq ASC",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    async fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<MessageDeletion, StoreError> {
        // One statement: the message plus, when it has one, its pair partner.
        let rows = sqlx::query(
            "\
            DELETE FROM messages
            WHERE conversation_id = ?1
              AND (id = ?2 OR pair_id = (
                  SELECT pair_id FROM messages WHERE id = ?2 AND conversation_id = ?1
              ))
            RETURNING id, pair_id",
        )
        .bind(conversation_id)
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        let mut target = None;
        for row in &rows {
            let id: String = row.try_get("id")?;
            if id == message_id {
                let pair_id: Option<String> = row.try_get("pair_id")?;
                target = Some(pair_id);
            }
        }

        match target {
            None => Err(StoreError::NotFound(
                "Message not found in this conversation".to_string(),
            )),
            Some(Some(pair_id)) => Ok(MessageDeletion::Pair {
                pair_id,
                removed: rows.len() as u64,
            }),
            Some(None) => Ok(MessageDeletion::Single {
                id: message_id.to_string(),
            }),
        }
    }

    async fn delete_message_pair(
        &self,
        conversation_id: &str,
        pair_id: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE conversation_id = ?1 AND pair_id = ?2")
            .bind(conversation_id)
            .bind(pair_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation, sqlx::Error> {
    let raw_metadata: String = row.try_get("metadata")?;

    Ok(Conversation {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        metadata: parse_metadata(&raw_metadata),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, sqlx::Error> {
    let raw_metadata: String = row.try_get("metadata")?;
    let raw_role: String = row.try_get("role")?;
    let role = raw_role
        .parse::<Role>()
        .map_err(|err| sqlx::Error::Decode(err.into()))?;

    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        pair_id: row.try_get("pair_id")?,
        role,
        content: row.try_get("content")?,
        metadata: parse_metadata(&raw_metadata),
        created_at: row.try_get("created_at")?,
    })
}

fn missing_conversation(err: sqlx::Error, conversation_id: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            conversation_not_found(conversation_id)
        }
        _ => StoreError::Database(err),
    }
}

async fn touch_conversation_tx(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE conversations SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
    )
    .bind(conversation_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn conversation_not_found(id: &str) -> StoreError {
    StoreError::NotFound(format!("Conversation not found: {}", id))
}

fn parse_metadata(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw)
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Map::new()))
}

fn normalize_metadata(metadata: Value) -> Value {
    match metadata {
        Value::Object(_) => metadata,
        _ => Value::Object(Map::new()),
    }
}

fn normalize_title(title: Option<String>) -> String {
    let Some(raw) = title else {
        return DEFAULT_TITLE.to_string();
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    trimmed.chars().take(MAX_TITLE_LEN).collect()
}
