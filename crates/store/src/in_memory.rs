//! In-memory store: useful for testing and ephemeral sessions.
//!
//! [`UserRecord`] is also the on-disk shape used by the file backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::error::StoreError;
use parley_core::message::{Conversation, ConversationId, UserId};
use parley_core::store::{ConversationStore, sort_conversations};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Everything stored for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub conversations: Vec<Conversation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_conversation: Option<ConversationId>,

    #[serde(default)]
    pub preferences: BTreeMap<String, String>,

    #[serde(default)]
    pub knowledge: String,
}

impl UserRecord {
    pub(crate) fn sorted_conversations(&self) -> Vec<Conversation> {
        let mut conversations = self.conversations.clone();
        sort_conversations(&mut conversations);
        conversations
    }

    pub(crate) fn upsert(&mut self, conversation: &Conversation) {
        match self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation.clone(),
            None => self.conversations.push(conversation.clone()),
        }
    }

    pub(crate) fn remove(&mut self, id: &ConversationId) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| &c.id != id);
        self.conversations.len() < before
    }
}

/// A store that keeps every user's record in a HashMap.
pub struct InMemoryStore {
    users: Arc<RwLock<HashMap<UserId, UserRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_conversations(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .get(user)
            .map(UserRecord::sorted_conversations)
            .unwrap_or_default())
    }

    async fn set_conversation(&self, user: &UserId, conversation: &Conversation) -> Result<(), StoreError> {
        self.users
            .write()
            .await
            .entry(user.clone())
            .or_default()
            .upsert(conversation);
        Ok(())
    }

    async fn delete_conversation(&self, user: &UserId, id: &ConversationId) -> Result<(), StoreError> {
        if let Some(record) = self.users.write().await.get_mut(user) {
            record.remove(id);
        }
        Ok(())
    }

    async fn get_current_conversation_id(&self, user: &UserId) -> Result<Option<ConversationId>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .get(user)
            .and_then(|r| r.current_conversation.clone()))
    }

    async fn set_current_conversation(&self, user: &UserId, id: &ConversationId) -> Result<(), StoreError> {
        self.users
            .write()
            .await
            .entry(user.clone())
            .or_default()
            .current_conversation = Some(id.clone());
        Ok(())
    }

    async fn get_preferences(&self, user: &UserId) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .get(user)
            .map(|r| r.preferences.clone())
            .unwrap_or_default())
    }

    async fn set_preference(&self, user: &UserId, key: &str, value: &str) -> Result<(), StoreError> {
        self.users
            .write()
            .await
            .entry(user.clone())
            .or_default()
            .preferences
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_preference(&self, user: &UserId, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .users
            .write()
            .await
            .get_mut(user)
            .is_some_and(|r| r.preferences.remove(key).is_some()))
    }

    async fn get_knowledge(&self, user: &UserId) -> Result<String, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .get(user)
            .map(|r| r.knowledge.clone())
            .unwrap_or_default())
    }

    async fn set_knowledge(&self, user: &UserId, knowledge: &str) -> Result<(), StoreError> {
        self.users
            .write()
            .await
            .entry(user.clone())
            .or_default()
            .knowledge = knowledge.to_string();
        Ok(())
    }
}
