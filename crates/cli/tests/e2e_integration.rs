//! End-to-end integration tests for Parley.
//!
//! These drive the full stack below the CLI: the session manager, the
//! LLM-backed oracle (over a scripted provider), real stores and sources.

use std::sync::{Arc, Mutex};

use chrono::TimeZone;
use parley_config::SessionConfig;
use parley_core::error::ProviderError;
use parley_core::message::{Conversation, Message, Role, UserId};
use parley_core::mode::ModeKind;
use parley_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use parley_core::source::SourceRegistry;
use parley_core::store::ConversationStore;
use parley_providers::LlmOracle;
use parley_session::{ConversationManager, Routing};
use parley_sources::CalculatorSource;
use parley_store::{FileStore, InMemoryStore};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A provider that replays scripted replies in order and records every
/// request it receives.
struct ScriptedProvider {
    replies: Mutex<Vec<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<&str>) -> Self {
        Self::with_results(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    fn with_results(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(ProviderError::Network("script exhausted".into()));
        }
        replies.remove(0).map(|content| ProviderResponse {
            message: Message::assistant(content),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "e2e-model".into(),
        })
    }
}

fn oracle(provider: &Arc<ScriptedProvider>) -> Arc<LlmOracle> {
    Arc::new(LlmOracle::new(provider.clone(), "e2e-model").with_max_attempts(3))
}

fn seeded(user: &UserId, minute: u32, summary: &str) -> Conversation {
    let mut conv = Conversation::new(user.clone(), "You are a helpful AI assistant.", ModeKind::defaults());
    conv.created_at = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap();
    conv.add_user(format!("Let's talk about {summary}"));
    conv.add_assistant(format!("Sure, {summary}."));
    conv.summary = summary.to_string();
    conv
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_first_message_starts_a_conversation() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "Hi! How can I help?",
        "The user greeted the assistant.",
    ]));
    let store = Arc::new(InMemoryStore::new());
    let manager = ConversationManager::new(store.clone(), oracle(&provider), SessionConfig::default());
    let user = UserId::from("alice");

    let outcome = manager.handle_message(&user, "hello").await.unwrap();

    assert_eq!(outcome.reply, "Hi! How can I help?");
    assert!(outcome.created);
    assert_eq!(provider.calls(), 2);

    // The completion request carries directives first, then the user turn
    let request = provider.request(0);
    assert_eq!(request.messages[0].content, "You are a helpful AI assistant.");
    assert!(request.messages[1].content.starts_with("The current date and time is now "));
    assert_eq!(request.messages.last().unwrap(), &Message::user("hello"));

    let current = store.get_current_conversation(&user).await.unwrap().unwrap();
    assert_eq!(current.summary, "The user greeted the assistant.");
    assert_eq!(current.len(), 2);
}

#[tokio::test]
async fn e2e_topic_change_switches_conversation() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "Yes, the user now asks about python.",
        "1",
        "Use a virtual environment.",
        "Python packaging discussion.",
    ]));
    let store = Arc::new(InMemoryStore::new());
    let user = UserId::from("alice");
    let pets = seeded(&user, 0, "pet care");
    let python = seeded(&user, 1, "python programming");
    store.set_conversation(&user, &pets).await.unwrap();
    store.set_conversation(&user, &python).await.unwrap();
    store.set_current_conversation(&user, &pets.id).await.unwrap();

    let manager = ConversationManager::new(store.clone(), oracle(&provider), SessionConfig::default());
    let outcome = manager
        .handle_message(&user, "Different question: how do I install packages in python?")
        .await
        .unwrap();

    assert_eq!(outcome.routing, Routing::Rerouted);
    assert_eq!(outcome.conversation_id, python.id);
    assert_eq!(store.get_current_conversation_id(&user).await.unwrap(), Some(python.id.clone()));
    assert_eq!(store.get_conversation(&user, &pets.id).await.unwrap().unwrap(), pets);
    // The numbered list the oracle matched against
    assert!(provider.request(1).messages[1].content.contains("0. pet care\n1. python programming"));

    let summary = manager.get_conversation_summary(&user).await.unwrap();
    assert_eq!(summary, "0. pet care\n1. Python packaging discussion.");
}

#[tokio::test]
async fn e2e_datasource_adds_calculator_context() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "```yaml\n- source: calculator\n  query: 12 * 12\n```",
        "12 times 12 is 144.",
        "It is 144.",
        "Arithmetic question answered.",
    ]));
    let mut registry = SourceRegistry::new();
    registry.register(Box::new(CalculatorSource));
    let registry = Arc::new(registry);
    let oracle = Arc::new(
        LlmOracle::new(provider.clone(), "e2e-model").with_source_catalog(registry.describe()),
    );

    let store = Arc::new(InMemoryStore::new());
    let manager = ConversationManager::new(store.clone(), oracle, SessionConfig::default())
        .with_sources(registry);
    let user = UserId::from("alice");

    let reply = manager.update_current_conversation(&user, "what is 12 * 12?").await.unwrap();
    assert_eq!(reply, "It is 144.");

    // The calculator result was summarized from the real source output
    assert!(provider.request(1).messages[1].content.contains("12 * 12 = 144"));

    let conv = store.get_current_conversation(&user).await.unwrap().unwrap();
    let roles: Vec<Role> = conv.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
    assert_eq!(
        conv.messages[0].content,
        "calculator says the following about 12 * 12:\n12 times 12 is 144."
    );
    assert_eq!(conv.messages[1].content, "what is 12 * 12?");
}

#[tokio::test]
async fn e2e_oracle_outage_persists_nothing() {
    let provider = Arc::new(ScriptedProvider::with_results(vec![]));
    let store = Arc::new(InMemoryStore::new());
    let manager = ConversationManager::new(store.clone(), oracle(&provider), SessionConfig::default());
    let user = UserId::from("alice");

    let err = manager.handle_message(&user, "hello").await.unwrap_err();

    assert!(err.is_oracle_unavailable());
    assert_eq!(provider.calls(), 3);
    assert!(store.get_conversations(&user).await.unwrap().is_empty());
    assert_eq!(store.get_current_conversation_id(&user).await.unwrap(), None);
}

#[tokio::test]
async fn e2e_remembered_preferences_reach_the_prompt() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "```yaml\nname: Ada\ncity: Paris\n```",
        "Nice to meet you, Ada.",
        "Introductions.",
    ]));
    let store = Arc::new(InMemoryStore::new());
    let manager = ConversationManager::new(store.clone(), oracle(&provider), SessionConfig::default());
    let user = UserId::from("alice");

    let remembered = manager.remember(&user, "Call me Ada, I live in Paris").await.unwrap();
    assert_eq!(remembered.get("name").map(String::as_str), Some("Ada"));

    manager.handle_message(&user, "hi").await.unwrap();

    let prompt = provider.request(1);
    let prefs = prompt
        .messages
        .iter()
        .find(|m| m.content.starts_with("Remember the following details in this conversation:"))
        .expect("preferences directive in prompt");
    assert!(prefs.content.contains("city: Paris\nname: Ada"));
}

#[tokio::test]
async fn e2e_file_store_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("conversations.json");
    let user = UserId::from("alice");

    {
        let provider = Arc::new(ScriptedProvider::new(vec!["Hello!", "Greeting."]));
        let store = Arc::new(FileStore::open(&path).unwrap());
        let manager = ConversationManager::new(store, oracle(&provider), SessionConfig::default());
        manager.handle_message(&user, "hi").await.unwrap();
        manager.set_preference(&user, "timezone", "Europe/Paris").await.unwrap();
    }

    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let store = Arc::new(FileStore::open(&path).unwrap());
    let manager = ConversationManager::new(store, oracle(&provider), SessionConfig::default());

    assert_eq!(manager.get_conversation_summary(&user).await.unwrap(), "0. Greeting.");
    assert_eq!(
        manager.get_preferences(&user).await.unwrap().get("timezone").map(String::as_str),
        Some("Europe/Paris")
    );
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn e2e_merge_similar_through_the_oracle() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "0 and 2",
        "user: tell me about cats and kittens\nassistant: Both purr.",
        "Cats and kittens.",
        "none",
    ]));
    let store = Arc::new(InMemoryStore::new());
    let user = UserId::from("alice");
    let cats = seeded(&user, 0, "cats");
    let rust = seeded(&user, 1, "rust");
    let kittens = seeded(&user, 2, "kittens");
    for conv in [&cats, &rust, &kittens] {
        store.set_conversation(&user, conv).await.unwrap();
    }
    store.set_current_conversation(&user, &kittens.id).await.unwrap();

    let manager = ConversationManager::new(store.clone(), oracle(&provider), SessionConfig::default());
    assert_eq!(manager.merge_similar(&user).await.unwrap(), 1);

    let remaining = store.get_conversations(&user).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].id, cats.id);
    assert_eq!(remaining[0].summary, "Cats and kittens.");
    assert_eq!(remaining[0].messages[1], Message::assistant("Both purr."));
    assert_eq!(store.get_current_conversation_id(&user).await.unwrap(), Some(cats.id.clone()));
}
