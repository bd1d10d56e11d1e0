//! Merge engine: unifies conversations about the same topic.
//!
//! Works on an in-memory set of conversations. Nothing here touches the
//! store; callers commit the resulting set and [`MergeRecord`]s afterwards.

use parley_core::error::OracleError;
use parley_core::message::{Conversation, ConversationId, numbered_summaries};
use parley_core::oracle::Oracle;
use tracing::{debug, info, warn};

/// One completed merge: `removed` was folded into `survivor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRecord {
    pub survivor: ConversationId,
    pub removed: ConversationId,
}

/// Follow a chain of merges to the conversation that now holds `id`.
pub fn final_survivor(id: &ConversationId, merges: &[MergeRecord]) -> ConversationId {
    merges.iter().fold(id.clone(), |current, record| {
        if record.removed == current {
            record.survivor.clone()
        } else {
            current
        }
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Merge conversation `j` into conversation `i`.
    ///
    /// Returns `None` and leaves the set unchanged when the pair is invalid
    /// (out of range or `i == j`) or the synthesized history is empty.
    pub async fn merge_pair(
        &self,
        oracle: &dyn Oracle,
        conversations: &mut Vec<Conversation>,
        i: usize,
        j: usize,
    ) -> Result<Option<MergeRecord>, OracleError> {
        if i == j || i >= conversations.len() || j >= conversations.len() {
            debug!(i, j, len = conversations.len(), "Ignoring invalid merge pair");
            return Ok(None);
        }

        let merged = oracle
            .merge_turns(&conversations[i].transcript(), &conversations[j].transcript())
            .await?;
        if merged.is_empty() {
            warn!(
                survivor = %conversations[i].id,
                other = %conversations[j].id,
                "Merge produced an empty history, keeping both conversations"
            );
            return Ok(None);
        }

        let mut survivor = conversations[i].clone();
        survivor.replace_messages(merged);
        survivor.summary = oracle.summarize(&survivor.transcript()).await?;

        let record = MergeRecord {
            survivor: survivor.id.clone(),
            removed: conversations[j].id.clone(),
        };
        conversations[i] = survivor;
        conversations.remove(j);

        info!(survivor = %record.survivor, removed = %record.removed, "Conversations merged");
        Ok(Some(record))
    }

    /// Repeatedly ask the oracle for a similar pair and merge it, until it
    /// finds none, a merge is refused, or `N - 1` merges have happened.
    pub async fn merge_similar(
        &self,
        oracle: &dyn Oracle,
        conversations: &mut Vec<Conversation>,
    ) -> Result<Vec<MergeRecord>, OracleError> {
        let mut records = Vec::new();
        let max_rounds = conversations.len().saturating_sub(1);

        for _ in 0..max_rounds {
            let pair = match oracle.find_similar_pair(&numbered_summaries(conversations)).await {
                Ok(pair) => pair,
                Err(OracleError::AmbiguousClassification(answer)) => {
                    debug!(answer = %answer, "Unclear similar-pair answer, stopping");
                    None
                }
                Err(e) => return Err(e),
            };
            let Some((i, j)) = pair else { break };

            match self.merge_pair(oracle, conversations, i, j).await? {
                Some(record) => records.push(record),
                None => break,
            }
        }

        Ok(records)
    }
}
