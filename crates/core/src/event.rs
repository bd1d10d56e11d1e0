//! Domain event system: decoupled observation of conversation lifecycle.
//!
//! Events are published when a conversation is created, switched, compressed,
//! merged or deleted, when the knowledge digest changes, and when a turn
//! fails. Front ends can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A new conversation was persisted for a user
    ConversationCreated {
        user: String,
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The current-conversation pointer moved
    ConversationSwitched {
        user: String,
        from: Option<String>,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// Overflow history was replaced by a summary
    ConversationCompressed {
        user: String,
        conversation_id: String,
        messages_before: usize,
        messages_after: usize,
        timestamp: DateTime<Utc>,
    },

    /// Two conversations were unified; `removed` no longer exists
    ConversationsMerged {
        user: String,
        survivor: String,
        removed: String,
        timestamp: DateTime<Utc>,
    },

    /// A conversation was deleted on request
    ConversationDeleted {
        user: String,
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The knowledge digest was rewritten
    KnowledgeUpdated {
        user: String,
        conversations: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn failed and nothing was persisted
    TurnFailed {
        user: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
