use async_trait::async_trait;
use futures::future::join_all;
use parley_core::message::Conversation;
use tracing::{debug, warn};

use super::{Mode, ModeContext};

/// Looks up external sources the oracle thinks are relevant and appends a
/// summary of each answer as user-side context.
pub struct DatasourceMode;

impl DatasourceMode {
    pub fn context_message(source: &str, query: &str, summary: &str) -> String {
        format!("{source} says the following about {query}:\n{summary}")
    }
}

#[async_trait]
impl Mode for DatasourceMode {
    fn name(&self) -> &str {
        "datasource"
    }

    async fn apply(
        &self,
        text: String,
        conversation: &mut Conversation,
        ctx: &ModeContext<'_>,
    ) -> parley_core::Result<String> {
        if ctx.sources.is_empty() {
            return Ok(text);
        }

        let queries = ctx.oracle.extract_source_queries(&text).await?;
        if queries.is_empty() {
            return Ok(text);
        }

        let lookups = queries.iter().filter_map(|q| {
            let source = ctx.sources.resolve(&q.source).into_iter().next();
            if source.is_none() {
                warn!(user = %ctx.user, source = %q.source, "No source matches, skipping query");
            }
            source.map(|s| async move { (s.name().to_string(), q, s.query(&q.query).await) })
        });
        let answers = join_all(lookups).await;

        for (source, query, answer) in answers {
            let results = match answer {
                Ok(results) if !results.is_empty() => results,
                Ok(_) => continue,
                Err(e) => {
                    warn!(user = %ctx.user, source = %source, query = %query.query, error = %e, "Source lookup failed");
                    continue;
                }
            };

            let summary = ctx.oracle.summarize(&results.join("\n\n")).await?;
            debug!(user = %ctx.user, source = %source, "Source context added");
            conversation.add_user(Self::context_message(&source, &query.query, &summary));
        }

        Ok(text)
    }
}
