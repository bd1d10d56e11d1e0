//! SQLite store.
//!
//! One database file with four tables keyed by user:
//! - `conversations`: one JSON-encoded conversation per row
//! - `current_conversation`: the pointer
//! - `preferences`: key/value rows
//! - `knowledge`: the digest

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::SecondsFormat;
use parley_core::error::StoreError;
use parley_core::message::{Conversation, ConversationId, UserId};
use parley_core::store::{ConversationStore, sort_conversations};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("Failed to create store directory: {e}")))?;
        }
        let options = SqliteConnectOptions::new().filename(path);
        let store = Self::connect_with(options).await?;
        info!("SQLite store initialized at {}", path.display());
        Ok(store)
    }

    /// Connect from a URL such as `sqlite://parley.db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite url: {e}")))?;
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                user_id     TEXT NOT NULL,
                id          TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                body        TEXT NOT NULL,
                PRIMARY KEY (user_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS current_conversation (
                user_id          TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("current_conversation table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                user_id  TEXT NOT NULL,
                key      TEXT NOT NULL,
                value    TEXT NOT NULL,
                PRIMARY KEY (user_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("preferences table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge (
                user_id  TEXT PRIMARY KEY,
                body     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("knowledge table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_created ON conversations(user_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("created_at index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_conversations(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError> {
        let rows = sqlx::query("SELECT id, body FROM conversations WHERE user_id = ? ORDER BY created_at, id")
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("select conversations: {e}")))?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in &rows {
            let body: String = row
                .try_get("body")
                .map_err(|e| StoreError::QueryFailed(format!("body column: {e}")))?;
            match serde_json::from_str::<Conversation>(&body) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    warn!(user = %user, conversation_id = %id, error = %e, "Skipping corrupted conversation row");
                }
            }
        }
        sort_conversations(&mut conversations);
        Ok(conversations)
    }

    async fn get_conversation(
        &self,
        user: &UserId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query("SELECT body FROM conversations WHERE user_id = ? AND id = ?")
            .bind(user.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("select conversation: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let body: String = row
            .try_get("body")
            .map_err(|e| StoreError::QueryFailed(format!("body column: {e}")))?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| StoreError::Corrupted {
                user: user.to_string(),
                reason: format!("conversation {id}: {e}"),
            })
    }

    async fn set_conversation(&self, user: &UserId, conversation: &Conversation) -> Result<(), StoreError> {
        let body = serde_json::to_string(conversation)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize conversation: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO conversations (user_id, id, created_at, body)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, id) DO UPDATE SET body = excluded.body
            "#,
        )
        .bind(user.as_str())
        .bind(conversation.id.as_str())
        .bind(conversation.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("upsert conversation: {e}")))?;

        Ok(())
    }

    async fn delete_conversation(&self, user: &UserId, id: &ConversationId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM conversations WHERE user_id = ? AND id = ?")
            .bind(user.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("delete conversation: {e}")))?;
        Ok(())
    }

    async fn get_current_conversation_id(&self, user: &UserId) -> Result<Option<ConversationId>, StoreError> {
        let row = sqlx::query("SELECT conversation_id FROM current_conversation WHERE user_id = ?")
            .bind(user.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("select pointer: {e}")))?;

        row.map(|r| {
            r.try_get::<String, _>("conversation_id")
                .map(ConversationId)
                .map_err(|e| StoreError::QueryFailed(format!("conversation_id column: {e}")))
        })
        .transpose()
    }

    async fn set_current_conversation(&self, user: &UserId, id: &ConversationId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO current_conversation (user_id, conversation_id) VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET conversation_id = excluded.conversation_id
            "#,
        )
        .bind(user.as_str())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("set pointer: {e}")))?;
        Ok(())
    }

    async fn get_preferences(&self, user: &UserId) -> Result<BTreeMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT key, value FROM preferences WHERE user_id = ?")
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("select preferences: {e}")))?;

        rows.iter()
            .map(|row| -> Result<(String, String), StoreError> {
                let key: String = row
                    .try_get("key")
                    .map_err(|e| StoreError::QueryFailed(format!("key column: {e}")))?;
                let value: String = row
                    .try_get("value")
                    .map_err(|e| StoreError::QueryFailed(format!("value column: {e}")))?;
                Ok((key, value))
            })
            .collect()
    }

    async fn set_preference(&self, user: &UserId, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO preferences (user_id, key, value) VALUES (?, ?, ?)
            ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(user.as_str())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("set preference: {e}")))?;
        Ok(())
    }

    async fn delete_preference(&self, user: &UserId, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM preferences WHERE user_id = ? AND key = ?")
            .bind(user.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("delete preference: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_knowledge(&self, user: &UserId) -> Result<String, StoreError> {
        let row = sqlx::query("SELECT body FROM knowledge WHERE user_id = ?")
            .bind(user.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("select knowledge: {e}")))?;

        match row {
            Some(row) => row
                .try_get("body")
                .map_err(|e| StoreError::QueryFailed(format!("body column: {e}"))),
            None => Ok(String::new()),
        }
    }

    async fn set_knowledge(&self, user: &UserId, knowledge: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO knowledge (user_id, body) VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET body = excluded.body
            "#,
        )
        .bind(user.as_str())
        .bind(knowledge)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("set knowledge: {e}")))?;
        Ok(())
    }
}
