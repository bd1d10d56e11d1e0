//! Mode pipeline: context-injection steps run on each incoming user turn.
//!
//! A conversation carries its modes as [`ModeKind`] descriptors; [`mode_for`]
//! maps each one onto the [`Mode`] that implements it. Modes run in order
//! and each sees the text the previous one returned.

mod datasource;
mod datetime;
mod knowledge;
mod preferences;

pub use datasource::DatasourceMode;
pub use datetime::DateTimeMode;
pub use knowledge::KnowledgeMode;
pub use preferences::PreferencesMode;

use async_trait::async_trait;
use chrono_tz::Tz;
use parley_core::event::EventBus;
use parley_core::message::{Conversation, UserId};
use parley_core::mode::ModeKind;
use parley_core::oracle::Oracle;
use parley_core::source::SourceRegistry;
use parley_core::store::ConversationStore;
use tracing::debug;

use crate::knowledge::KnowledgeJob;

/// Everything a mode may consult while it runs.
pub struct ModeContext<'a> {
    pub user: &'a UserId,
    pub store: &'a dyn ConversationStore,
    pub oracle: &'a dyn Oracle,
    pub sources: &'a SourceRegistry,
    pub knowledge: &'a KnowledgeJob,
    pub events: &'a EventBus,
    /// Timezone used when the user has no valid `timezone` preference
    pub default_timezone: Tz,
}

#[async_trait]
pub trait Mode: Send + Sync {
    fn name(&self) -> &str;

    /// Enrich `conversation` ahead of the user turn and return the text to
    /// append. Modes may set directives or append messages; only the
    /// knowledge mode may replace the conversation wholesale.
    async fn apply(
        &self,
        text: String,
        conversation: &mut Conversation,
        ctx: &ModeContext<'_>,
    ) -> parley_core::Result<String>;
}

/// Pins a fixed directive onto the conversation.
pub struct DirectiveMode {
    name: String,
    text: String,
}

impl DirectiveMode {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

#[async_trait]
impl Mode for DirectiveMode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        text: String,
        conversation: &mut Conversation,
        _ctx: &ModeContext<'_>,
    ) -> parley_core::Result<String> {
        conversation.set_system(&self.name, self.text.clone());
        Ok(text)
    }
}

pub fn mode_for(kind: &ModeKind) -> Box<dyn Mode> {
    match kind {
        ModeKind::DateTime => Box::new(DateTimeMode),
        ModeKind::Preferences => Box::new(PreferencesMode),
        ModeKind::Knowledge => Box::new(KnowledgeMode),
        ModeKind::Datasource => Box::new(DatasourceMode),
        ModeKind::Directive { name, text } => Box::new(DirectiveMode::new(name, text)),
    }
}

/// Run the conversation's own modes, left to right, over `text`.
pub async fn run_pipeline(
    text: String,
    conversation: &mut Conversation,
    ctx: &ModeContext<'_>,
) -> parley_core::Result<String> {
    let kinds = conversation.modes.clone();
    let mut text = text;
    for kind in &kinds {
        let mode = mode_for(kind);
        debug!(user = %ctx.user, mode = mode.name(), "Applying mode");
        text = mode.apply(text, conversation, ctx).await?;
    }
    Ok(text)
}
