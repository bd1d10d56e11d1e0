//! Oracle trait: the language-model capability the session core consumes.
//!
//! Where a [`Provider`](crate::provider::Provider) only turns messages into a
//! reply, the Oracle answers the structured questions conversation routing,
//! compression and merging depend on. Every method may fail with
//! [`OracleError::Unavailable`] once its retries are exhausted; malformed
//! answers are mapped to the safest no-op value instead of an error.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::message::Message;

/// A lookup the oracle suggests running against an external source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceQuery {
    /// Source name or kind (e.g. "wikipedia", "compute")
    pub source: String,

    /// What to ask it
    pub query: String,
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Produce the assistant reply for a rendered conversation.
    async fn complete(&self, turns: &[Message]) -> Result<String, OracleError>;

    /// Is `new_text` an explicit or obvious request to leave the topic
    /// described by `prior_summary`? Unclear answers mean "no".
    async fn classify_topic_change(&self, prior_summary: &str, new_text: &str) -> Result<bool, OracleError>;

    /// Match `new_text` against a numbered list of summaries. Returns the
    /// index of the related conversation or `-1` for a new topic. The value
    /// is not range-checked here.
    async fn classify_conversation_match(
        &self,
        numbered_summaries: &str,
        new_text: &str,
    ) -> Result<i64, OracleError>;

    /// A detailed summary of arbitrary content.
    async fn summarize(&self, text: &str) -> Result<String, OracleError>;

    /// At most one pair of related conversations from a numbered list.
    async fn find_similar_pair(&self, numbered_summaries: &str) -> Result<Option<(usize, usize)>, OracleError>;

    /// Synthesize one message history covering both transcripts.
    async fn merge_turns(&self, transcript_a: &str, transcript_b: &str) -> Result<Vec<Message>, OracleError>;

    /// A multi-paragraph digest of key facts across every conversation.
    async fn synthesize_knowledge(&self, numbered_summaries: &str) -> Result<String, OracleError>;

    /// Candidate external lookups for a user message. Nothing to look up, or
    /// an unparseable answer, yields an empty list.
    async fn extract_source_queries(&self, text: &str) -> Result<Vec<SourceQuery>, OracleError>;

    /// Key/value facts the user asked to be remembered.
    async fn extract_preferences(&self, text: &str) -> Result<BTreeMap<String, String>, OracleError>;

    /// Reword a topic-change request so only its subject remains.
    async fn strip_topic_change(&self, text: &str) -> Result<String, OracleError> {
        Ok(text.to_string())
    }
}
