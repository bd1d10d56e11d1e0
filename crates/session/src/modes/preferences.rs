use std::collections::BTreeMap;

use async_trait::async_trait;
use parley_core::message::Conversation;

use super::{Mode, ModeContext};

/// Keeps a "preferences" directive listing everything the user asked us to
/// remember.
pub struct PreferencesMode;

impl PreferencesMode {
    pub fn directive(preferences: &BTreeMap<String, String>) -> String {
        let mut out = String::from("Remember the following details in this conversation:\n");
        for (key, value) in preferences {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl Mode for PreferencesMode {
    fn name(&self) -> &str {
        "preferences"
    }

    async fn apply(
        &self,
        text: String,
        conversation: &mut Conversation,
        ctx: &ModeContext<'_>,
    ) -> parley_core::Result<String> {
        let preferences = ctx.store.get_preferences(ctx.user).await?;
        if preferences.is_empty() {
            conversation.delete_system(self.name());
        } else {
            conversation.set_system(self.name(), Self::directive(&preferences));
        }
        Ok(text)
    }
}
