//! Compression engine: keeps a conversation's history bounded.
//!
//! Once a history grows past one and a half times `keep_last`, everything
//! but the last `keep_last` messages is folded into a single system message
//! carrying a summary of the full transcript. `keep_last` is at least
//! [`MIN_KEEP_LAST`] so a compressed history sits at or under the threshold.

use parley_core::error::OracleError;
use parley_core::message::{Conversation, Message};
use parley_core::oracle::Oracle;
use tracing::debug;

/// Prefix of the synthetic system message that replaces compressed history.
pub const COMPRESSED_HISTORY_PREFIX: &str =
    "There was a part of conversation that was too long to display. Here is a summary of it:\n";

/// Smallest usable `keep_last`. Below it the summary message alone pushes a
/// compressed history back over the threshold.
pub const MIN_KEEP_LAST: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct CompressionEngine {
    keep_last: usize,
}

impl CompressionEngine {
    pub fn new(keep_last: usize) -> Self {
        Self {
            keep_last: keep_last.max(MIN_KEEP_LAST),
        }
    }

    pub fn keep_last(&self) -> usize {
        self.keep_last
    }

    /// Whether `conversation` is over the compression threshold.
    pub fn needs_compression(&self, conversation: &Conversation) -> bool {
        conversation.len() as f64 > self.keep_last as f64 * 1.5
    }

    /// Compress `conversation` in place; returns whether anything changed.
    ///
    /// At or below the threshold the conversation is left untouched and no
    /// oracle call is made. On error the conversation is also untouched.
    pub async fn compress(
        &self,
        oracle: &dyn Oracle,
        conversation: &mut Conversation,
    ) -> Result<bool, OracleError> {
        if !self.needs_compression(conversation) {
            return Ok(false);
        }

        let digest = oracle.summarize(&conversation.transcript()).await?;

        let split = conversation.len() - self.keep_last;
        let mut messages = Vec::with_capacity(self.keep_last + 1);
        messages.push(Message::system(format!("{COMPRESSED_HISTORY_PREFIX}{digest}")));
        messages.extend_from_slice(&conversation.messages[split..]);

        let mut compressed = conversation.clone();
        compressed.replace_messages(messages);
        compressed.summary = oracle.summarize(&compressed.transcript()).await?;

        debug!(
            conversation_id = %conversation.id,
            before = conversation.len(),
            after = compressed.len(),
            "Conversation compressed"
        );
        *conversation = compressed;
        Ok(true)
    }
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::new(8)
    }
}
