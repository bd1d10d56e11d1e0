//! Conversation Store trait: per-user persistence.
//!
//! Everything the session core remembers about a user lives behind this
//! trait: the conversations, the current-conversation pointer, preferences
//! and the knowledge digest. Each setter replaces a whole entity
//! (last-writer-wins); partial updates from two writers are never merged.
//!
//! Implementations: in-memory (tests), JSON file, SQLite.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::{Conversation, ConversationId, UserId};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "memory", "file", "sqlite").
    fn name(&self) -> &str;

    /// Every conversation of a user, ordered by creation time then id.
    async fn get_conversations(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError>;

    /// Insert or replace a conversation by id.
    async fn set_conversation(&self, user: &UserId, conversation: &Conversation) -> Result<(), StoreError>;

    /// Delete a conversation. Deleting an unknown id is not an error.
    async fn delete_conversation(&self, user: &UserId, id: &ConversationId) -> Result<(), StoreError>;

    /// The raw current-conversation pointer, which may dangle.
    async fn get_current_conversation_id(&self, user: &UserId) -> Result<Option<ConversationId>, StoreError>;

    async fn set_current_conversation(&self, user: &UserId, id: &ConversationId) -> Result<(), StoreError>;

    async fn get_preferences(&self, user: &UserId) -> Result<BTreeMap<String, String>, StoreError>;

    async fn set_preference(&self, user: &UserId, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a preference; returns whether it existed.
    async fn delete_preference(&self, user: &UserId, key: &str) -> Result<bool, StoreError>;

    /// The knowledge digest, empty when none has been built yet.
    async fn get_knowledge(&self, user: &UserId) -> Result<String, StoreError>;

    async fn set_knowledge(&self, user: &UserId, knowledge: &str) -> Result<(), StoreError>;

    /// Fetch one conversation by id.
    async fn get_conversation(
        &self,
        user: &UserId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .get_conversations(user)
            .await?
            .into_iter()
            .find(|c| &c.id == id))
    }

    /// The conversation the pointer references; `None` if unset or dangling.
    async fn get_current_conversation(&self, user: &UserId) -> Result<Option<Conversation>, StoreError> {
        match self.get_current_conversation_id(user).await? {
            Some(id) => self.get_conversation(user, &id).await,
            None => Ok(None),
        }
    }

    async fn get_preference(&self, user: &UserId, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_preferences(user).await?.remove(key))
    }
}

/// Sort conversations into the stable enumeration order.
pub fn sort_conversations(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
