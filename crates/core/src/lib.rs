//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley conversation
//! manager. This crate has **no framework dependencies**; it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`Provider`]: raw chat-completion backends
//! - [`Oracle`]: the structured language-model capability the session core consumes
//! - [`ConversationStore`]: per-user persistence
//! - [`Source`]: external knowledge lookups
//!
//! Implementations live in their respective crates, so the session core can be
//! driven entirely by in-memory fakes in tests.

pub mod error;
pub mod event;
pub mod message;
pub mod mode;
pub mod oracle;
pub mod provider;
pub mod source;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, Role, SystemDirective, UserId};
pub use mode::ModeKind;
pub use oracle::{Oracle, SourceQuery};
pub use provider::{Provider, ProviderRequest, ProviderResponse};
pub use source::{Source, SourceKind, SourceRegistry};
pub use store::{ConversationStore, sort_conversations};
