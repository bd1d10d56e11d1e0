//! Error types for the Parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all Parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Oracle errors ---
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Knowledge source errors ---
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    // --- Conversation errors ---
    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of a raw completion backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of the language-model oracle.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    /// Every attempt failed; the turn that needed this call fails with it.
    #[error("Oracle unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    /// The oracle answered, but not in a shape we could interpret.
    #[error("Ambiguous classification: {0}")]
    AmbiguousClassification(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupted record for user {user}: {reason}")]
    Corrupted { user: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Source '{source_name}' failed: {reason}")]
    QueryFailed { source_name: String, reason: String },

    #[error("Source not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("Conversation history is empty")]
    EmptyHistory,

    /// The current-conversation pointer referenced a conversation that no
    /// longer exists. Recovered locally by the session router.
    #[error("Current conversation pointer {0} does not reference a live conversation")]
    DanglingConversationPointer(String),

    /// The user has no conversations. Recovered by creating one.
    #[error("User has no conversations")]
    EmptyConversationSet,

    #[error("Conversation index {index} out of range ({len} conversations)")]
    IndexOutOfRange { index: usize, len: usize },
}

impl Error {
    /// Whether this error came from the oracle giving up.
    pub fn is_oracle_unavailable(&self) -> bool {
        matches!(self, Error::Oracle(OracleError::Unavailable { .. }))
    }
}
