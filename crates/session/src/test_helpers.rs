//! Shared test helpers for session tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parley_core::error::OracleError;
use parley_core::message::{Conversation, Message, Role, UserId};
use parley_core::mode::ModeKind;
use parley_core::oracle::{Oracle, SourceQuery};

/// An oracle whose answers are queued up front.
///
/// Queues that run dry fall back to harmless defaults: no topic change, no
/// similar pair, no source queries, no preferences. Methods named with
/// [`ScriptedOracle::failing`] always report `Unavailable`.
#[derive(Default)]
pub struct ScriptedOracle {
    topic_changes: Mutex<VecDeque<bool>>,
    matches: Mutex<VecDeque<i64>>,
    pairs: Mutex<VecDeque<Option<(usize, usize)>>>,
    merged: Mutex<VecDeque<Vec<Message>>>,
    source_queries: Mutex<VecDeque<Vec<SourceQuery>>>,
    preferences: Mutex<VecDeque<BTreeMap<String, String>>>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<&'static str>>,
    completion_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic_change(self, changed: bool) -> Self {
        self.topic_changes.lock().unwrap().push_back(changed);
        self
    }

    pub fn conversation_match(self, index: i64) -> Self {
        self.matches.lock().unwrap().push_back(index);
        self
    }

    pub fn similar_pair(self, pair: Option<(usize, usize)>) -> Self {
        self.pairs.lock().unwrap().push_back(pair);
        self
    }

    pub fn merged_turns(self, turns: Vec<Message>) -> Self {
        self.merged.lock().unwrap().push_back(turns);
        self
    }

    pub fn source_queries(self, queries: Vec<SourceQuery>) -> Self {
        self.source_queries.lock().unwrap().push_back(queries);
        self
    }

    pub fn preferences(self, prefs: BTreeMap<String, String>) -> Self {
        self.preferences.lock().unwrap().push_back(prefs);
        self
    }

    /// Make every call to `method` fail.
    pub fn failing(self, method: &'static str) -> Self {
        self.failing.lock().unwrap().insert(method);
        self
    }

    /// Hold each completion open for `delay`.
    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = Some(delay);
        self
    }

    /// How many times `method` was called.
    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| **m == method)
            .count()
    }

    /// The most completions that were ever running at once.
    pub fn max_concurrent_completions(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, method: &'static str) -> Result<(), OracleError> {
        self.calls.lock().unwrap().push(method);
        if self.failing.lock().unwrap().contains(method) {
            return Err(OracleError::Unavailable {
                attempts: 3,
                last_error: format!("{method} scripted to fail"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, turns: &[Message]) -> Result<String, OracleError> {
        self.record("complete")?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.completion_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let last_user = turns
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(format!("reply to: {last_user}"))
    }

    async fn classify_topic_change(&self, _prior_summary: &str, _new_text: &str) -> Result<bool, OracleError> {
        self.record("classify_topic_change")?;
        Ok(self.topic_changes.lock().unwrap().pop_front().unwrap_or(false))
    }

    async fn classify_conversation_match(
        &self,
        _numbered_summaries: &str,
        _new_text: &str,
    ) -> Result<i64, OracleError> {
        self.record("classify_conversation_match")?;
        self.matches
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| OracleError::AmbiguousClassification("no scripted match".into()))
    }

    async fn summarize(&self, text: &str) -> Result<String, OracleError> {
        self.record("summarize")?;
        let last_line = text.lines().last().unwrap_or_default();
        Ok(format!("summary of {} lines ending '{last_line}'", text.lines().count()))
    }

    async fn find_similar_pair(&self, _numbered_summaries: &str) -> Result<Option<(usize, usize)>, OracleError> {
        self.record("find_similar_pair")?;
        Ok(self.pairs.lock().unwrap().pop_front().flatten())
    }

    async fn merge_turns(&self, _transcript_a: &str, _transcript_b: &str) -> Result<Vec<Message>, OracleError> {
        self.record("merge_turns")?;
        Ok(self.merged.lock().unwrap().pop_front().unwrap_or_else(|| {
            vec![Message::user("merged question"), Message::assistant("merged answer")]
        }))
    }

    async fn synthesize_knowledge(&self, numbered_summaries: &str) -> Result<String, OracleError> {
        self.record("synthesize_knowledge")?;
        Ok(format!("digest of:\n{numbered_summaries}"))
    }

    async fn extract_source_queries(&self, _text: &str) -> Result<Vec<SourceQuery>, OracleError> {
        self.record("extract_source_queries")?;
        Ok(self.source_queries.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn extract_preferences(&self, _text: &str) -> Result<BTreeMap<String, String>, OracleError> {
        self.record("extract_preferences")?;
        Ok(self.preferences.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn strip_topic_change(&self, text: &str) -> Result<String, OracleError> {
        self.record("strip_topic_change")?;
        Ok(text.trim_start_matches("let's talk about ").to_string())
    }
}

/// A conversation with a fixed creation time (`minute` minutes past a base
/// instant), a summary, and `turns` user/assistant pairs.
pub fn seeded_conversation(user: &UserId, minute: u32, summary: &str, turns: usize) -> Conversation {
    let mut conversation = Conversation::new(user.clone(), "You are a helpful AI assistant.", ModeKind::defaults());
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap();
    conversation.created_at = created;
    for n in 0..turns {
        conversation.add_user(format!("{summary} question {n}"));
        conversation.add_assistant(format!("{summary} answer {n}"));
    }
    conversation.summary = summary.to_string();
    conversation.updated_at = created;
    conversation
}
