use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use parley_core::message::Conversation;
use tracing::warn;

use super::{Mode, ModeContext};

/// Preference key naming the user's IANA timezone.
pub const TIMEZONE_PREFERENCE: &str = "timezone";

/// Keeps a "datetime" directive with the current local time.
pub struct DateTimeMode;

impl DateTimeMode {
    pub fn directive(now: chrono::DateTime<Tz>) -> String {
        format!(
            "The current date and time is now {}",
            now.format("%m/%d/%Y, %I:%M:%S %p")
        )
    }
}

#[async_trait]
impl Mode for DateTimeMode {
    fn name(&self) -> &str {
        "datetime"
    }

    async fn apply(
        &self,
        text: String,
        conversation: &mut Conversation,
        ctx: &ModeContext<'_>,
    ) -> parley_core::Result<String> {
        let tz = match ctx.store.get_preference(ctx.user, TIMEZONE_PREFERENCE).await? {
            Some(name) => name.trim().parse::<Tz>().unwrap_or_else(|_| {
                warn!(user = %ctx.user, timezone = %name, "Unknown timezone preference, using default");
                ctx.default_timezone
            }),
            None => ctx.default_timezone,
        };

        conversation.set_system(self.name(), Self::directive(Utc::now().with_timezone(&tz)));
        Ok(text)
    }
}
