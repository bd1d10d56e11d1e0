//! File-based store: one JSON document holding every user.
//!
//! The document is loaded on open and rewritten after every mutation, so
//! reads are served from memory and every successful write is durable.
//!
//! Storage location: `~/.parley/conversations.json` by default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::error::StoreError;
use parley_core::message::{Conversation, ConversationId, UserId};
use parley_core::store::ConversationStore;
use tokio::sync::RwLock;
use tracing::debug;

use crate::in_memory::UserRecord;

type Document = BTreeMap<String, UserRecord>;

pub struct FileStore {
    path: PathBuf,
    users: Arc<RwLock<Document>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file starts empty and is created
    /// on first write; a file that does not parse is an error rather than
    /// something to overwrite.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let users = Self::load_from_disk(&path)?;
        debug!(path = %path.display(), users = users.len(), "File store loaded");
        Ok(Self {
            path,
            users: Arc::new(RwLock::new(users)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Result<Document, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(Document::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            StoreError::Storage(format!("Store file {} is corrupted: {e}", path.display()))
        })
    }

    /// Write the whole document via a temp file and rename.
    async fn flush(&self, users: &Document) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Storage(format!("Failed to create store directory: {e}")))?;
        }

        let content = serde_json::to_string_pretty(users)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize store: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write store file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to replace store file: {e}")))?;

        Ok(())
    }

    /// Apply a mutation to one user's record and flush while still holding
    /// the write lock, so the file always reflects a whole sequence of writes.
    async fn mutate<T>(
        &self,
        user: &UserId,
        f: impl FnOnce(&mut UserRecord) -> T,
    ) -> Result<T, StoreError> {
        let mut users = self.users.write().await;
        let out = f(users.entry(user.to_string()).or_default());
        self.flush(&users).await?;
        Ok(out)
    }

    async fn read<T>(&self, user: &UserId, f: impl FnOnce(&UserRecord) -> T) -> T
    where
        T: Default,
    {
        self.users
            .read()
            .await
            .get(user.as_str())
            .map(f)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_conversations(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError> {
        Ok(self.read(user, UserRecord::sorted_conversations).await)
    }

    async fn set_conversation(&self, user: &UserId, conversation: &Conversation) -> Result<(), StoreError> {
        self.mutate(user, |r| r.upsert(conversation)).await
    }

    async fn delete_conversation(&self, user: &UserId, id: &ConversationId) -> Result<(), StoreError> {
        self.mutate(user, |r| {
            r.remove(id);
        })
        .await
    }

    async fn get_current_conversation_id(&self, user: &UserId) -> Result<Option<ConversationId>, StoreError> {
        Ok(self.read(user, |r| r.current_conversation.clone()).await)
    }

    async fn set_current_conversation(&self, user: &UserId, id: &ConversationId) -> Result<(), StoreError> {
        self.mutate(user, |r| r.current_conversation = Some(id.clone()))
            .await
    }

    async fn get_preferences(&self, user: &UserId) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.read(user, |r| r.preferences.clone()).await)
    }

    async fn set_preference(&self, user: &UserId, key: &str, value: &str) -> Result<(), StoreError> {
        self.mutate(user, |r| {
            r.preferences.insert(key.to_string(), value.to_string());
        })
        .await
    }

    async fn delete_preference(&self, user: &UserId, key: &str) -> Result<bool, StoreError> {
        self.mutate(user, |r| r.preferences.remove(key).is_some())
            .await
    }

    async fn get_knowledge(&self, user: &UserId) -> Result<String, StoreError> {
        Ok(self.read(user, |r| r.knowledge.clone()).await)
    }

    async fn set_knowledge(&self, user: &UserId, knowledge: &str) -> Result<(), StoreError> {
        self.mutate(user, |r| r.knowledge = knowledge.to_string())
            .await
    }
}
