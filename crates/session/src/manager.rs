//! The conversation manager: routes each user message to a conversation and
//! runs the turn.
//!
//! Every public operation holds a per-user async lock for its whole
//! duration, so operations for one user are serialized while different
//! users proceed concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use dashmap::DashMap;
use parley_config::SessionConfig;
use parley_core::error::{ConversationError, Error, OracleError};
use parley_core::event::{DomainEvent, EventBus};
use parley_core::message::{Conversation, ConversationId, UserId, numbered_summaries};
use parley_core::mode::ModeKind;
use parley_core::oracle::Oracle;
use parley_core::source::SourceRegistry;
use parley_core::store::{ConversationStore, sort_conversations};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::compression::CompressionEngine;
use crate::knowledge::{KnowledgeJob, commit};
use crate::merge::MergeEngine;
use crate::modes::{ModeContext, run_pipeline};

/// Whether a message stayed in the active conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Continue,
    Rerouted,
}

/// The result of one handled message.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The assistant reply
    pub reply: String,
    pub routing: Routing,
    /// The conversation the turn was appended to
    pub conversation_id: ConversationId,
    /// Whether that conversation was created by this turn
    pub created: bool,
}

/// Routes each user's messages to one of their conversations.
///
/// Operations for the same user are serialized on a per-user lock. Lock
/// entries live as long as the manager; that suits one process serving a
/// bounded set of users.
pub struct ConversationManager {
    store: Arc<dyn ConversationStore>,
    oracle: Arc<dyn Oracle>,
    sources: Arc<SourceRegistry>,
    settings: SessionConfig,
    default_timezone: Tz,
    knowledge: KnowledgeJob,
    event_bus: Arc<EventBus>,
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl ConversationManager {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        oracle: Arc<dyn Oracle>,
        settings: SessionConfig,
    ) -> Self {
        let default_timezone = settings.default_timezone.parse::<Tz>().unwrap_or_else(|_| {
            warn!(timezone = %settings.default_timezone, "Unknown default timezone, using America/New_York");
            chrono_tz::America::New_York
        });
        let knowledge = KnowledgeJob::new(
            CompressionEngine::new(settings.keep_last),
            MergeEngine::new(),
            settings.knowledge_update_interval,
        );

        Self {
            store,
            oracle,
            sources: Arc::new(SourceRegistry::new()),
            settings,
            default_timezone,
            knowledge,
            event_bus: Arc::new(EventBus::default()),
            locks: DashMap::new(),
        }
    }

    /// Attach the external knowledge sources used by the datasource mode.
    pub fn with_sources(mut self, sources: Arc<SourceRegistry>) -> Self {
        self.sources = sources;
        self
    }

    /// Publish domain events on a shared bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    fn user_lock(&self, user: &UserId) -> Arc<Mutex<()>> {
        self.locks.entry(user.clone()).or_default().clone()
    }

    fn mode_context<'a>(&'a self, user: &'a UserId) -> ModeContext<'a> {
        ModeContext {
            user,
            store: self.store.as_ref(),
            oracle: self.oracle.as_ref(),
            sources: &self.sources,
            knowledge: &self.knowledge,
            events: &self.event_bus,
            default_timezone: self.default_timezone,
        }
    }

    fn new_conversation(&self, user: &UserId, system: Option<&str>, modes: Option<Vec<ModeKind>>) -> Conversation {
        Conversation::new(
            user.clone(),
            system.unwrap_or(&self.settings.default_system_prompt),
            modes.unwrap_or_else(|| self.settings.modes()),
        )
    }

    /// The user's conversations in enumeration order.
    async fn conversations(&self, user: &UserId) -> parley_core::Result<Vec<Conversation>> {
        let mut conversations = self.store.get_conversations(user).await?;
        sort_conversations(&mut conversations);
        Ok(conversations)
    }

    fn publish_switch(&self, user: &UserId, from: Option<&ConversationId>, to: &ConversationId) {
        self.event_bus.publish(DomainEvent::ConversationSwitched {
            user: user.to_string(),
            from: from.map(ToString::to_string),
            to: to.to_string(),
            timestamp: Utc::now(),
        });
    }

    // ── Conversations ───────────────────────────────────────────────────

    /// Create, persist and switch to a fresh conversation.
    pub async fn start_new_conversation(
        &self,
        user: &UserId,
        system: Option<&str>,
        modes: Option<Vec<ModeKind>>,
    ) -> parley_core::Result<Conversation> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        let previous = self.store.get_current_conversation_id(user).await?;
        let conversation = self.new_conversation(user, system, modes);
        self.store.set_conversation(user, &conversation).await?;
        self.store.set_current_conversation(user, &conversation.id).await?;

        info!(user = %user, conversation_id = %conversation.id, "Conversation started");
        self.event_bus.publish(DomainEvent::ConversationCreated {
            user: user.to_string(),
            conversation_id: conversation.id.to_string(),
            timestamp: Utc::now(),
        });
        self.publish_switch(user, previous.as_ref(), &conversation.id);
        Ok(conversation)
    }

    pub async fn get_conversations(&self, user: &UserId) -> parley_core::Result<Vec<Conversation>> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;
        self.conversations(user).await
    }

    /// One `"i. summary"` line per conversation, in enumeration order.
    pub async fn get_conversation_summary(&self, user: &UserId) -> parley_core::Result<String> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;
        Ok(numbered_summaries(&self.conversations(user).await?))
    }

    /// Point the user at conversation `index`. Out of range is a no-op and
    /// returns `None`.
    pub async fn switch_to_conversation(
        &self,
        user: &UserId,
        index: usize,
    ) -> parley_core::Result<Option<Conversation>> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        let conversations = self.conversations(user).await?;
        let Some(target) = conversations.into_iter().nth(index) else {
            debug!(user = %user, index, "Switch index out of range, ignoring");
            return Ok(None);
        };

        let previous = self.store.get_current_conversation_id(user).await?;
        if previous.as_ref() != Some(&target.id) {
            self.store.set_current_conversation(user, &target.id).await?;
            self.publish_switch(user, previous.as_ref(), &target.id);
        }
        Ok(Some(target))
    }

    /// Delete a conversation. If it was current, the pointer moves to the
    /// first remaining conversation.
    pub async fn delete_conversation(&self, user: &UserId, conversation: &Conversation) -> parley_core::Result<()> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        let pointer = self.store.get_current_conversation_id(user).await?;
        if pointer.as_ref() == Some(&conversation.id) {
            let remaining = self.conversations(user).await?;
            if let Some(next) = remaining.iter().find(|c| c.id != conversation.id) {
                self.store.set_current_conversation(user, &next.id).await?;
                self.publish_switch(user, pointer.as_ref(), &next.id);
            }
        }
        self.store.delete_conversation(user, &conversation.id).await?;

        info!(user = %user, conversation_id = %conversation.id, "Conversation deleted");
        self.event_bus.publish(DomainEvent::ConversationDeleted {
            user: user.to_string(),
            conversation_id: conversation.id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    // ── Turns ───────────────────────────────────────────────────────────

    /// Route `text` and run a full turn; returns only the reply.
    pub async fn update_current_conversation(&self, user: &UserId, text: &str) -> parley_core::Result<String> {
        Ok(self.handle_message(user, text).await?.reply)
    }

    /// Route `text` to a conversation and run a full turn.
    ///
    /// Nothing is persisted unless every oracle call of the turn succeeds.
    pub async fn handle_message(&self, user: &UserId, text: &str) -> parley_core::Result<TurnOutcome> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        match self.run_turn(user, text).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(user = %user, error = %e, "Turn failed, nothing persisted");
                self.event_bus.publish(DomainEvent::TurnFailed {
                    user: user.to_string(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    async fn run_turn(&self, user: &UserId, text: &str) -> parley_core::Result<TurnOutcome> {
        let conversations = self.conversations(user).await?;
        let pointer = self.store.get_current_conversation_id(user).await?;

        // Phase 1: resolve the active conversation
        let (mut active, mut created) = self.resolve_active(user, &conversations, pointer.as_ref());

        // Phase 2: topic-change decision
        let mut routing = Routing::Continue;
        if !created && self.topic_changed(&active, text).await? {
            match self.match_conversation(&conversations, text).await? {
                Some(None) => {
                    active = self.new_conversation(user, None, None);
                    created = true;
                    routing = Routing::Rerouted;
                }
                Some(Some(index)) if conversations[index].id != active.id => {
                    active = conversations[index].clone();
                    routing = Routing::Rerouted;
                }
                Some(Some(_)) | None => {}
            }
        }

        let mut text = text.to_string();
        if routing == Routing::Rerouted && self.settings.rephrase_on_reroute {
            text = self.oracle.strip_topic_change(&text).await?;
        }

        // Phase 3: run the turn on the in-memory conversation
        let text = run_pipeline(text, &mut active, &self.mode_context(user)).await?;
        active.add_user(text);
        let reply = self.oracle.complete(&active.render()).await?;
        active.add_assistant(reply.clone());
        active.summary = self.oracle.summarize(&active.transcript()).await?;

        // Commit
        self.store.set_conversation(user, &active).await?;
        let current = self.store.get_current_conversation_id(user).await?;
        if current.as_ref() != Some(&active.id) {
            self.store.set_current_conversation(user, &active.id).await?;
        }

        if created {
            info!(user = %user, conversation_id = %active.id, "Conversation created");
            self.event_bus.publish(DomainEvent::ConversationCreated {
                user: user.to_string(),
                conversation_id: active.id.to_string(),
                timestamp: Utc::now(),
            });
        }
        if current.as_ref() != Some(&active.id) {
            self.publish_switch(user, current.as_ref(), &active.id);
        }

        Ok(TurnOutcome {
            reply,
            routing,
            conversation_id: active.id,
            created,
        })
    }

    /// The conversation a message goes to before any topic-change check,
    /// and whether it had to be created.
    fn resolve_active(
        &self,
        user: &UserId,
        conversations: &[Conversation],
        pointer: Option<&ConversationId>,
    ) -> (Conversation, bool) {
        let Some(first) = conversations.first() else {
            debug!(user = %user, reason = %ConversationError::EmptyConversationSet, "Creating first conversation");
            return (self.new_conversation(user, None, None), true);
        };

        match pointer {
            Some(id) => match conversations.iter().find(|c| &c.id == id) {
                Some(current) => (current.clone(), false),
                None => {
                    let dangling = ConversationError::DanglingConversationPointer(id.to_string());
                    warn!(user = %user, error = %dangling, "Repairing pointer to first conversation");
                    (first.clone(), false)
                }
            },
            None => (first.clone(), false),
        }
    }

    async fn topic_changed(&self, active: &Conversation, text: &str) -> parley_core::Result<bool> {
        match self.oracle.classify_topic_change(&active.summary, text).await {
            Ok(changed) => Ok(changed),
            Err(OracleError::AmbiguousClassification(answer)) => {
                debug!(answer = %answer, "Unclear topic-change answer, staying");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `Some(None)` for a new conversation, `Some(Some(i))` for an existing
    /// one, `None` when the answer could not be used.
    async fn match_conversation(
        &self,
        conversations: &[Conversation],
        text: &str,
    ) -> parley_core::Result<Option<Option<usize>>> {
        let answer = match self
            .oracle
            .classify_conversation_match(&numbered_summaries(conversations), text)
            .await
        {
            Ok(answer) => answer,
            Err(OracleError::AmbiguousClassification(answer)) => {
                warn!(answer = %answer, "Ambiguous conversation match, staying");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match answer {
            -1 => Ok(Some(None)),
            index if index >= 0 && (index as usize) < conversations.len() => Ok(Some(Some(index as usize))),
            index => {
                warn!(index, len = conversations.len(), "Conversation match out of range, staying");
                Ok(None)
            }
        }
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// Compress every conversation over the threshold; returns how many were.
    pub async fn compress_conversations(&self, user: &UserId) -> parley_core::Result<usize> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        let before = self.conversations(user).await?;
        let mut working = before.clone();
        let mut compressed = Vec::new();
        for conversation in working.iter_mut() {
            let messages_before = conversation.len();
            if self.knowledge.compression().compress(self.oracle.as_ref(), conversation).await? {
                compressed.push((conversation.id.clone(), messages_before, conversation.len()));
            }
        }

        commit(self.store.as_ref(), user, &before, &working, &[]).await?;

        for (id, messages_before, messages_after) in &compressed {
            self.event_bus.publish(DomainEvent::ConversationCompressed {
                user: user.to_string(),
                conversation_id: id.to_string(),
                messages_before: *messages_before,
                messages_after: *messages_after,
                timestamp: Utc::now(),
            });
        }
        Ok(compressed.len())
    }

    /// Merge conversation `j` into conversation `i`. Returns whether a merge
    /// happened; `i == j` or an empty synthesized history merges nothing.
    pub async fn merge_conversations(&self, user: &UserId, i: usize, j: usize) -> parley_core::Result<bool> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        let before = self.conversations(user).await?;
        for index in [i, j] {
            if index >= before.len() {
                return Err(ConversationError::IndexOutOfRange { index, len: before.len() }.into());
            }
        }

        let mut working = before.clone();
        let record = self
            .knowledge
            .merge()
            .merge_pair(self.oracle.as_ref(), &mut working, i, j)
            .await?;
        let Some(record) = record else {
            return Ok(false);
        };

        commit(self.store.as_ref(), user, &before, &working, std::slice::from_ref(&record)).await?;
        self.event_bus.publish(DomainEvent::ConversationsMerged {
            user: user.to_string(),
            survivor: record.survivor.to_string(),
            removed: record.removed.to_string(),
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    /// Merge similar conversations until the oracle finds no more; returns
    /// the number of merges.
    pub async fn merge_similar(&self, user: &UserId) -> parley_core::Result<usize> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        let before = self.conversations(user).await?;
        let mut working = before.clone();
        let merges = self
            .knowledge
            .merge()
            .merge_similar(self.oracle.as_ref(), &mut working)
            .await?;

        commit(self.store.as_ref(), user, &before, &working, &merges).await?;
        for record in &merges {
            self.event_bus.publish(DomainEvent::ConversationsMerged {
                user: user.to_string(),
                survivor: record.survivor.to_string(),
                removed: record.removed.to_string(),
                timestamp: Utc::now(),
            });
        }
        Ok(merges.len())
    }

    /// Run the knowledge job now, regardless of cadence.
    pub async fn consolidate_knowledge(&self, user: &UserId) -> parley_core::Result<String> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;
        self.knowledge
            .run(user, self.store.as_ref(), self.oracle.as_ref(), &self.event_bus, None)
            .await
    }

    pub async fn get_knowledge(&self, user: &UserId) -> parley_core::Result<String> {
        Ok(self.store.get_knowledge(user).await?)
    }

    // ── Preferences ─────────────────────────────────────────────────────

    /// Store whatever facts the oracle finds in `text`; returns them.
    pub async fn remember(&self, user: &UserId, text: &str) -> parley_core::Result<BTreeMap<String, String>> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        let extracted = match self.oracle.extract_preferences(text).await {
            Ok(extracted) => extracted,
            Err(OracleError::AmbiguousClassification(answer)) => {
                debug!(answer = %answer, "No preferences recognised");
                BTreeMap::new()
            }
            Err(e) => return Err(Error::from(e)),
        };

        for (key, value) in &extracted {
            self.store.set_preference(user, key, value).await?;
        }
        info!(user = %user, count = extracted.len(), "Preferences remembered");
        Ok(extracted)
    }

    pub async fn set_preference(&self, user: &UserId, key: &str, value: &str) -> parley_core::Result<()> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;
        Ok(self.store.set_preference(user, key.trim(), value.trim()).await?)
    }

    /// Remove a preference; returns whether it existed.
    pub async fn forget(&self, user: &UserId, key: &str) -> parley_core::Result<bool> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;
        Ok(self.store.delete_preference(user, key.trim()).await?)
    }

    pub async fn get_preferences(&self, user: &UserId) -> parley_core::Result<BTreeMap<String, String>> {
        Ok(self.store.get_preferences(user).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedOracle, seeded_conversation};
    use parley_core::message::Role;
    use parley_store::InMemoryStore;
    use std::time::Duration;

    struct Harness {
        manager: ConversationManager,
        store: Arc<InMemoryStore>,
        oracle: Arc<ScriptedOracle>,
        user: UserId,
    }

    fn harness(oracle: ScriptedOracle) -> Harness {
        harness_with(oracle, SessionConfig::default())
    }

    fn harness_with(oracle: ScriptedOracle, settings: SessionConfig) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let oracle = Arc::new(oracle);
        let manager = ConversationManager::new(store.clone(), oracle.clone(), settings);
        Harness {
            manager,
            store,
            oracle,
            user: UserId::from("u1"),
        }
    }

    /// Store conversations with the given summaries and point at `current`.
    async fn seed(h: &Harness, summaries: &[&str], current: usize) -> Vec<Conversation> {
        let mut out = Vec::new();
        for (n, summary) in summaries.iter().enumerate() {
            let conv = seeded_conversation(&h.user, n as u32, summary, 1);
            h.store.set_conversation(&h.user, &conv).await.unwrap();
            out.push(conv);
        }
        h.store.set_current_conversation(&h.user, &out[current].id).await.unwrap();
        out
    }

    async fn stored(h: &Harness, id: &ConversationId) -> Conversation {
        h.store.get_conversation(&h.user, id).await.unwrap().unwrap()
    }

    async fn pointer(h: &Harness) -> Option<ConversationId> {
        h.store.get_current_conversation_id(&h.user).await.unwrap()
    }

    #[tokio::test]
    async fn first_message_creates_one_conversation() {
        let h = harness(ScriptedOracle::new());

        let outcome = h.manager.handle_message(&h.user, "hello").await.unwrap();

        assert_eq!(outcome.reply, "reply to: hello");
        assert!(outcome.created);
        assert_eq!(outcome.routing, Routing::Continue);

        let convs = h.store.get_conversations(&h.user).await.unwrap();
        assert_eq!(convs.len(), 1);
        let roles: Vec<Role> = convs[0].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(convs[0].messages[0].content, "hello");
        assert_eq!(pointer(&h).await, Some(convs[0].id.clone()));
        // No topic check on a brand new conversation
        assert_eq!(h.oracle.calls("classify_topic_change"), 0);
    }

    #[tokio::test]
    async fn topic_change_reroutes_to_existing_conversation() {
        let h = harness(ScriptedOracle::new().topic_change(true).conversation_match(1));
        let convs = seed(&h, &["cats", "dogs"], 0).await;

        let outcome = h.manager.handle_message(&h.user, "tell me about dogs").await.unwrap();

        assert_eq!(outcome.routing, Routing::Rerouted);
        assert_eq!(outcome.conversation_id, convs[1].id);
        assert_eq!(pointer(&h).await, Some(convs[1].id.clone()));

        let dogs = stored(&h, &convs[1].id).await;
        assert_eq!(dogs.messages[..2], convs[1].messages[..]);
        assert_eq!(dogs.messages[2].content, "tell me about dogs");
        assert_eq!(stored(&h, &convs[0].id).await, convs[0]);
    }

    #[tokio::test]
    async fn new_topic_creates_conversation_and_keeps_old_one() {
        let h = harness(ScriptedOracle::new().topic_change(true).conversation_match(-1));
        let convs = seed(&h, &["cats", "dogs"], 0).await;

        let outcome = h.manager.handle_message(&h.user, "let's talk about rust").await.unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.routing, Routing::Rerouted);
        assert_eq!(h.store.get_conversations(&h.user).await.unwrap().len(), 3);
        assert_eq!(pointer(&h).await, Some(outcome.conversation_id.clone()));
        assert_eq!(stored(&h, &convs[0].id).await, convs[0]);
        assert_eq!(stored(&h, &outcome.conversation_id).await.len(), 2);
    }

    #[tokio::test]
    async fn question_about_pets_moves_back_to_pet_care() {
        let h = harness(ScriptedOracle::new().topic_change(true).conversation_match(0));
        let convs = seed(&h, &["pet care", "python programming"], 1).await;

        h.manager
            .handle_message(&h.user, "what about my dog's diet?")
            .await
            .unwrap();

        assert_eq!(pointer(&h).await, Some(convs[0].id.clone()));
        assert_eq!(stored(&h, &convs[1].id).await, convs[1]);
        assert_eq!(stored(&h, &convs[0].id).await.len(), 4);
    }

    #[tokio::test]
    async fn matching_the_active_conversation_is_a_no_op() {
        let h = harness(ScriptedOracle::new().topic_change(true).conversation_match(0));
        let convs = seed(&h, &["cats", "dogs"], 0).await;

        let outcome = h.manager.handle_message(&h.user, "more cats").await.unwrap();

        assert_eq!(outcome.routing, Routing::Continue);
        let cats = stored(&h, &convs[0].id).await;
        let user_turns = cats.messages.iter().filter(|m| m.content == "more cats").count();
        assert_eq!(user_turns, 1);
    }

    #[tokio::test]
    async fn out_of_range_or_ambiguous_match_stays() {
        let h = harness(ScriptedOracle::new().topic_change(true).conversation_match(7).topic_change(true));
        let convs = seed(&h, &["cats", "dogs"], 0).await;

        let first = h.manager.handle_message(&h.user, "x").await.unwrap();
        // Second topic change has no scripted match, so the answer is ambiguous
        let second = h.manager.handle_message(&h.user, "y").await.unwrap();

        for outcome in [first, second] {
            assert_eq!(outcome.routing, Routing::Continue);
            assert_eq!(outcome.conversation_id, convs[0].id);
        }
        assert_eq!(h.store.get_conversations(&h.user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dangling_pointer_is_repaired() {
        let h = harness(ScriptedOracle::new());
        let convs = seed(&h, &["cats", "dogs"], 1).await;
        h.store
            .set_current_conversation(&h.user, &ConversationId::from("gone"))
            .await
            .unwrap();

        let outcome = h.manager.handle_message(&h.user, "hi").await.unwrap();

        assert_eq!(outcome.conversation_id, convs[0].id);
        assert_eq!(pointer(&h).await, Some(convs[0].id.clone()));
    }

    #[tokio::test]
    async fn failed_completion_persists_nothing() {
        let h = harness(ScriptedOracle::new().failing("complete"));
        let mut events = h.manager.event_bus().subscribe();

        let err = h.manager.handle_message(&h.user, "hello").await.unwrap_err();

        assert!(err.is_oracle_unavailable());
        assert!(h.store.get_conversations(&h.user).await.unwrap().is_empty());
        assert_eq!(pointer(&h).await, None);
        assert!(matches!(&*events.recv().await.unwrap(), DomainEvent::TurnFailed { .. }));
    }

    #[tokio::test]
    async fn failed_turn_after_reroute_keeps_pointer() {
        let h = harness(
            ScriptedOracle::new()
                .topic_change(true)
                .conversation_match(-1)
                .failing("summarize"),
        );
        let convs = seed(&h, &["cats", "dogs"], 0).await;

        assert!(h.manager.handle_message(&h.user, "rust?").await.is_err());

        assert_eq!(h.store.get_conversations(&h.user).await.unwrap(), convs);
        assert_eq!(pointer(&h).await, Some(convs[0].id.clone()));
    }

    #[tokio::test]
    async fn rephrase_on_reroute() {
        let settings = SessionConfig {
            rephrase_on_reroute: true,
            ..SessionConfig::default()
        };
        let h = harness_with(
            ScriptedOracle::new().topic_change(true).conversation_match(1),
            settings,
        );
        let convs = seed(&h, &["cats", "dogs"], 0).await;

        h.manager
            .handle_message(&h.user, "let's talk about dog food")
            .await
            .unwrap();

        let dogs = stored(&h, &convs[1].id).await;
        assert_eq!(dogs.messages[2].content, "dog food");
    }

    #[tokio::test]
    async fn summary_lists_conversations_in_order() {
        let h = harness(ScriptedOracle::new());
        seed(&h, &["cats", "dogs"], 0).await;

        let summary = h.manager.get_conversation_summary(&h.user).await.unwrap();

        assert_eq!(summary, "0. cats\n1. dogs");
    }

    #[tokio::test]
    async fn switching() {
        let h = harness(ScriptedOracle::new());
        let convs = seed(&h, &["cats", "dogs"], 0).await;

        let switched = h.manager.switch_to_conversation(&h.user, 1).await.unwrap();
        assert_eq!(switched.map(|c| c.id), Some(convs[1].id.clone()));
        assert_eq!(pointer(&h).await, Some(convs[1].id.clone()));

        assert!(h.manager.switch_to_conversation(&h.user, 5).await.unwrap().is_none());
        assert_eq!(pointer(&h).await, Some(convs[1].id.clone()));
    }

    #[tokio::test]
    async fn start_new_conversation_switches_to_it() {
        let h = harness(ScriptedOracle::new());
        seed(&h, &["cats"], 0).await;

        let conv = h
            .manager
            .start_new_conversation(&h.user, Some("You are a pirate."), Some(vec![]))
            .await
            .unwrap();

        assert_eq!(conv.system("system"), Some("You are a pirate."));
        assert!(conv.modes.is_empty());
        assert_eq!(pointer(&h).await, Some(conv.id.clone()));
        assert_eq!(h.store.get_conversations(&h.user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deleting_current_conversation_moves_pointer() {
        let h = harness(ScriptedOracle::new());
        let convs = seed(&h, &["cats", "dogs"], 0).await;

        h.manager.delete_conversation(&h.user, &convs[0]).await.unwrap();

        assert_eq!(pointer(&h).await, Some(convs[1].id.clone()));
        assert_eq!(h.store.get_conversations(&h.user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn explicit_merge_repoints_and_deletes() {
        let h = harness(ScriptedOracle::new());
        let convs = seed(&h, &["cats", "kittens", "python"], 1).await;

        assert!(h.manager.merge_conversations(&h.user, 0, 1).await.unwrap());

        let remaining = h.store.get_conversations(&h.user).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(pointer(&h).await, Some(convs[0].id.clone()));

        let err = h.manager.merge_conversations(&h.user, 0, 9).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Conversation(ConversationError::IndexOutOfRange { index: 9, len: 2 })
        ));
    }

    #[tokio::test]
    async fn merge_similar_never_leaves_pointer_dangling() {
        let h = harness(
            ScriptedOracle::new()
                .similar_pair(Some((0, 2)))
                .similar_pair(Some((0, 1))),
        );
        let convs = seed(&h, &["cats", "dogs", "kittens"], 2).await;

        let merged = h.manager.merge_similar(&h.user).await.unwrap();

        assert_eq!(merged, 2);
        let remaining = h.store.get_conversations(&h.user).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(pointer(&h).await, Some(convs[0].id.clone()));
        assert!(h.store.get_current_conversation(&h.user).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn compress_conversations_counts_changes() {
        let h = harness(ScriptedOracle::new());
        let long = seeded_conversation(&h.user, 0, "long", 10);
        let short = seeded_conversation(&h.user, 1, "short", 1);
        h.store.set_conversation(&h.user, &long).await.unwrap();
        h.store.set_conversation(&h.user, &short).await.unwrap();

        assert_eq!(h.manager.compress_conversations(&h.user).await.unwrap(), 1);
        assert_eq!(stored(&h, &long.id).await.len(), 9);
        assert_eq!(stored(&h, &short.id).await, short);
        assert_eq!(h.manager.compress_conversations(&h.user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn knowledge_consolidates_every_third_turn() {
        let h = harness(ScriptedOracle::new());

        for text in ["one", "two", "three"] {
            h.manager.handle_message(&h.user, text).await.unwrap();
        }

        assert_eq!(h.oracle.calls("synthesize_knowledge"), 1);
        let knowledge = h.manager.get_knowledge(&h.user).await.unwrap();
        assert!(knowledge.starts_with("digest of:\n0. "));

        let current = h.store.get_current_conversation(&h.user).await.unwrap().unwrap();
        assert!(current.system("knowledge").unwrap().ends_with(&knowledge));
        assert_eq!(current.len(), 6);
    }

    #[tokio::test]
    async fn consolidation_mid_turn_moves_the_turn_to_the_merge_survivor() {
        let settings = SessionConfig {
            knowledge_update_interval: 1,
            ..SessionConfig::default()
        };
        let h = harness_with(ScriptedOracle::new().similar_pair(Some((0, 1))), settings);
        let convs = seed(&h, &["cats", "kittens"], 1).await;

        let outcome = h.manager.handle_message(&h.user, "do kittens sleep a lot?").await.unwrap();

        assert_eq!(h.oracle.calls("merge_turns"), 1);
        assert_eq!(outcome.conversation_id, convs[0].id);
        assert_eq!(outcome.routing, Routing::Continue);

        let remaining = h.store.get_conversations(&h.user).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(pointer(&h).await, Some(convs[0].id.clone()));

        let survivor = stored(&h, &convs[0].id).await;
        let contents: Vec<&str> = survivor.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "merged question",
                "merged answer",
                "do kittens sleep a lot?",
                "reply to: do kittens sleep a lot?",
            ]
        );
        assert!(h.store.get_conversation(&h.user, &convs[1].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remember_and_forget() {
        let prefs = BTreeMap::from([("name".to_string(), "Ada".to_string())]);
        let h = harness(ScriptedOracle::new().preferences(prefs.clone()));

        assert_eq!(h.manager.remember(&h.user, "call me Ada").await.unwrap(), prefs);
        h.manager.set_preference(&h.user, "timezone", " Europe/Paris ").await.unwrap();

        let stored = h.manager.get_preferences(&h.user).await.unwrap();
        assert_eq!(stored.get("timezone").map(String::as_str), Some("Europe/Paris"));
        assert!(h.manager.forget(&h.user, "name").await.unwrap());
        assert!(!h.manager.forget(&h.user, "name").await.unwrap());
    }

    #[tokio::test]
    async fn same_user_turns_are_serialized() {
        let h = harness(ScriptedOracle::new().with_completion_delay(Duration::from_millis(20)));

        let (a, b) = tokio::join!(
            h.manager.handle_message(&h.user, "first"),
            h.manager.handle_message(&h.user, "second"),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(h.oracle.max_concurrent_completions(), 1);
        let convs = h.store.get_conversations(&h.user).await.unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].len(), 4);
    }

    #[tokio::test]
    async fn different_users_run_concurrently() {
        let h = harness(ScriptedOracle::new().with_completion_delay(Duration::from_millis(20)));
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));

        let (a, b) = tokio::join!(
            h.manager.handle_message(&alice, "hi"),
            h.manager.handle_message(&bob, "hi"),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(h.oracle.max_concurrent_completions(), 2);
    }
}
