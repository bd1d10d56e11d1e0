//! Message and Conversation domain types.
//!
//! These are the core value objects that flow through the entire system:
//! a user sends text → the router picks a conversation → modes enrich it →
//! the oracle answers → the conversation is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConversationError;
use crate::mode::ModeKind;

/// Summary given to a conversation before its first turn.
pub const NEW_CONVERSATION_SUMMARY: &str = "The start of a brand new conversation";

/// Directive name under which the base system prompt is stored.
pub const BASE_DIRECTIVE: &str = "system";

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an end user, as assigned by the messaging front end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions and synthetic context
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parse a role label as written in transcripts ("User", " assistant ", ...).
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// A named system directive, rendered ahead of the message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemDirective {
    pub name: String,
    pub text: String,
}

/// One bounded dialogue thread belonging to a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID, stable across every mutation
    pub id: ConversationId,

    /// The user this conversation belongs to
    pub owner: UserId,

    /// Named system directives, kept in first-insertion order
    #[serde(default)]
    pub system_directives: Vec<SystemDirective>,

    /// Ordered message history
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Rolling natural-language digest of the conversation
    #[serde(default)]
    pub summary: String,

    /// Modes run on every incoming user turn, in order
    #[serde(default)]
    pub modes: Vec<ModeKind>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When this conversation was last mutated
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new conversation with a base system directive.
    pub fn new(owner: UserId, system: impl Into<String>, modes: Vec<ModeKind>) -> Self {
        let now = Utc::now();
        let mut conversation = Self {
            id: ConversationId::new(),
            owner,
            system_directives: Vec::new(),
            messages: Vec::new(),
            summary: NEW_CONVERSATION_SUMMARY.to_string(),
            modes,
            created_at: now,
            updated_at: now,
        };
        conversation.set_system(BASE_DIRECTIVE, system);
        conversation
    }

    /// Insert or overwrite a named directive. Overwriting keeps the slot the
    /// directive was first inserted into, so rendering order is stable.
    pub fn set_system(&mut self, name: &str, text: impl Into<String>) {
        let text = text.into();
        match self.system_directives.iter_mut().find(|d| d.name == name) {
            Some(directive) => directive.text = text,
            None => self.system_directives.push(SystemDirective {
                name: name.to_string(),
                text,
            }),
        }
        self.touch();
    }

    /// Remove a named directive if present.
    pub fn delete_system(&mut self, name: &str) -> bool {
        let before = self.system_directives.len();
        self.system_directives.retain(|d| d.name != name);
        let removed = self.system_directives.len() < before;
        if removed {
            self.touch();
        }
        removed
    }

    /// Look up a directive's text.
    pub fn system(&self, name: &str) -> Option<&str> {
        self.system_directives
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.text.as_str())
    }

    pub fn add_user(&mut self, text: impl Into<String>) {
        self.push(Message::user(text));
    }

    pub fn add_assistant(&mut self, text: impl Into<String>) {
        self.push(Message::assistant(text));
    }

    /// Append a synthetic system-role message to the history.
    pub fn add_system(&mut self, text: impl Into<String>) {
        self.push(Message::system(text));
    }

    /// Add a message to the history.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Remove and return the most recent message.
    pub fn delete_last_message(&mut self) -> Result<Message, ConversationError> {
        let message = self.messages.pop().ok_or(ConversationError::EmptyHistory)?;
        self.touch();
        Ok(message)
    }

    /// Replace the whole message history (compression and merge rewrites).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.touch();
    }

    /// The ordered turn sequence sent to the oracle: every directive first,
    /// then the message history.
    pub fn render(&self) -> Vec<Message> {
        self.system_directives
            .iter()
            .map(|d| Message::system(d.text.clone()))
            .chain(self.messages.iter().cloned())
            .collect()
    }

    /// The message history as `role: content` lines.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            out.push_str(message.role.as_str());
            out.push_str(": ");
            out.push_str(&message.content);
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Render summaries as the numbered list handed to the oracle.
pub fn numbered_summaries(conversations: &[Conversation]) -> String {
    conversations
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{i}. {}", c.summary))
        .collect::<Vec<_>>()
        .join("\n")
}
