use async_trait::async_trait;
use parley_core::message::Conversation;
use tracing::debug;

use super::{Mode, ModeContext};

/// Keeps a "knowledge" directive holding the user's digest, rebuilding the
/// digest on the knowledge job's cadence first.
pub struct KnowledgeMode;

impl KnowledgeMode {
    pub fn directive(knowledge: &str) -> String {
        format!("Remember the following details about the past in this conversation:\n{knowledge}")
    }
}

#[async_trait]
impl Mode for KnowledgeMode {
    fn name(&self) -> &str {
        "knowledge"
    }

    async fn apply(
        &self,
        text: String,
        conversation: &mut Conversation,
        ctx: &ModeContext<'_>,
    ) -> parley_core::Result<String> {
        if ctx.knowledge.tick(ctx.user) {
            debug!(user = %ctx.user, "Knowledge update due");
            ctx.knowledge
                .run(ctx.user, ctx.store, ctx.oracle, ctx.events, Some(&mut *conversation))
                .await?;
        }

        let knowledge = ctx.store.get_knowledge(ctx.user).await?;
        if !knowledge.trim().is_empty() {
            conversation.set_system(self.name(), Self::directive(&knowledge));
        }
        Ok(text)
    }
}
