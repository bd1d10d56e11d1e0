//! Knowledge consolidation: compress, merge, then digest every conversation.
//!
//! All oracle work happens on an in-memory copy of the user's conversations.
//! The store is written only once every oracle call has succeeded, so a
//! failed consolidation leaves the user's state exactly as it was.

use chrono::Utc;
use dashmap::DashMap;
use parley_core::error::StoreError;
use parley_core::event::{DomainEvent, EventBus};
use parley_core::message::{Conversation, ConversationId, UserId, numbered_summaries};
use parley_core::oracle::Oracle;
use parley_core::store::{ConversationStore, sort_conversations};
use tracing::{debug, info};

use crate::compression::CompressionEngine;
use crate::merge::{MergeEngine, MergeRecord, final_survivor};

/// Knowledge consolidation with a per-user cadence.
///
/// One counter is kept per user seen by this process and is never evicted.
pub struct KnowledgeJob {
    compression: CompressionEngine,
    merge: MergeEngine,
    interval: u32,
    counters: DashMap<UserId, u32>,
}

impl KnowledgeJob {
    /// A job that runs on every `interval`-th knowledge-mode invocation.
    pub fn new(compression: CompressionEngine, merge: MergeEngine, interval: u32) -> Self {
        Self {
            compression,
            merge,
            interval: interval.max(1),
            counters: DashMap::new(),
        }
    }

    pub fn compression(&self) -> &CompressionEngine {
        &self.compression
    }

    pub fn merge(&self) -> &MergeEngine {
        &self.merge
    }

    /// Count one knowledge-mode invocation for `user`. Returns true (and
    /// restarts the count) when this invocation should consolidate.
    pub fn tick(&self, user: &UserId) -> bool {
        let mut count = self.counters.entry(user.clone()).or_insert(0);
        *count += 1;
        if *count >= self.interval {
            *count = 0;
            true
        } else {
            false
        }
    }

    /// Run the whole job for `user` and return the new digest.
    ///
    /// `in_flight` is a conversation the caller is holding mid-turn. When it
    /// is already stored, its held copy takes part in consolidation, and it
    /// is replaced with its consolidated version (or with the survivor it
    /// was merged into) when the job completes.
    pub async fn run(
        &self,
        user: &UserId,
        store: &dyn ConversationStore,
        oracle: &dyn Oracle,
        events: &EventBus,
        in_flight: Option<&mut Conversation>,
    ) -> parley_core::Result<String> {
        let mut before = store.get_conversations(user).await?;
        sort_conversations(&mut before);
        if before.is_empty() {
            debug!(user = %user, "No conversations to consolidate");
            return Ok(store.get_knowledge(user).await?);
        }

        if let Some(held) = in_flight.as_deref()
            && let Some(slot) = before.iter_mut().find(|c| c.id == held.id)
        {
            *slot = held.clone();
        }

        let mut working = before.clone();

        let mut compressed = Vec::new();
        for conversation in working.iter_mut() {
            let messages_before = conversation.len();
            if self.compression.compress(oracle, conversation).await? {
                compressed.push((conversation.id.clone(), messages_before, conversation.len()));
            }
        }

        let merges = self.merge.merge_similar(oracle, &mut working).await?;

        let knowledge = oracle
            .synthesize_knowledge(&numbered_summaries(&working))
            .await?;

        commit(store, user, &before, &working, &merges).await?;
        store.set_knowledge(user, &knowledge).await?;

        if let Some(held) = in_flight {
            let id = final_survivor(&held.id, &merges);
            if let Some(updated) = working.iter().find(|c| c.id == id) {
                *held = updated.clone();
            }
        }

        for (id, messages_before, messages_after) in compressed {
            events.publish(DomainEvent::ConversationCompressed {
                user: user.to_string(),
                conversation_id: id.to_string(),
                messages_before,
                messages_after,
                timestamp: Utc::now(),
            });
        }
        for record in &merges {
            events.publish(DomainEvent::ConversationsMerged {
                user: user.to_string(),
                survivor: record.survivor.to_string(),
                removed: record.removed.to_string(),
                timestamp: Utc::now(),
            });
        }
        events.publish(DomainEvent::KnowledgeUpdated {
            user: user.to_string(),
            conversations: working.len(),
            timestamp: Utc::now(),
        });

        info!(
            user = %user,
            conversations = working.len(),
            merged = merges.len(),
            "Knowledge consolidated"
        );
        Ok(knowledge)
    }
}

/// Write a consolidated working set back to the store.
///
/// Changed conversations are written first, then the pointer is moved off
/// any conversation about to be deleted, then merged-away conversations are
/// deleted. The pointer never references a deleted conversation.
pub(crate) async fn commit(
    store: &dyn ConversationStore,
    user: &UserId,
    before: &[Conversation],
    after: &[Conversation],
    merges: &[MergeRecord],
) -> Result<(), StoreError> {
    for conversation in after {
        if !before.contains(conversation) {
            store.set_conversation(user, conversation).await?;
        }
    }

    if merges.is_empty() {
        return Ok(());
    }

    if let Some(pointer) = store.get_current_conversation_id(user).await? {
        let target: ConversationId = final_survivor(&pointer, merges);
        if target != pointer {
            store.set_current_conversation(user, &target).await?;
        }
    }
    for record in merges {
        store.delete_conversation(user, &record.removed).await?;
    }
    Ok(())
}
