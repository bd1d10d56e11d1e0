//! Conversation store backends for Parley.
//!
//! All backends implement `parley_core::ConversationStore`.

pub mod file_backend;
pub mod in_memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
