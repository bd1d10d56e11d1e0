//! Mode descriptors.
//!
//! A conversation stores *which* modes it runs as plain data; the session
//! crate maps each descriptor onto the step that implements it.

use serde::{Deserialize, Serialize};

/// A context-injection step run before a user turn is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModeKind {
    /// Current date and time in the user's timezone
    DateTime,
    /// The user's stored preferences
    Preferences,
    /// The cross-conversation knowledge digest (periodically rebuilt)
    Knowledge,
    /// Summaries pulled from external knowledge sources
    Datasource,
    /// A fixed directive pinned onto the conversation
    Directive { name: String, text: String },
}

impl ModeKind {
    /// The default mode set, in the order it must run.
    ///
    /// Time, preference and knowledge context is refreshed before any
    /// datasource augmentation.
    pub fn defaults() -> Vec<ModeKind> {
        vec![
            ModeKind::DateTime,
            ModeKind::Preferences,
            ModeKind::Knowledge,
            ModeKind::Datasource,
        ]
    }

    pub fn name(&self) -> &str {
        match self {
            ModeKind::DateTime => "datetime",
            ModeKind::Preferences => "preferences",
            ModeKind::Knowledge => "knowledge",
            ModeKind::Datasource => "datasource",
            ModeKind::Directive { name, .. } => name,
        }
    }

    /// Parse a mode name as written in configuration.
    pub fn from_name(name: &str) -> Option<ModeKind> {
        match name.trim().to_lowercase().as_str() {
            "datetime" | "date_time" => Some(ModeKind::DateTime),
            "preferences" => Some(ModeKind::Preferences),
            "knowledge" => Some(ModeKind::Knowledge),
            "datasource" => Some(ModeKind::Datasource),
            _ => None,
        }
    }
}
