//! LLM-backed oracle: the structured questions the session core asks,
//! answered by any [`Provider`].
//!
//! Each question is one prompt plus a parser from [`crate::parse`]. The
//! provider call is retried up to `max_attempts` times without backoff;
//! when every attempt fails the call reports [`OracleError::Unavailable`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::error::{OracleError, ProviderError};
use parley_core::message::Message;
use parley_core::oracle::{Oracle, SourceQuery};
use parley_core::provider::{Provider, ProviderRequest};
use tracing::{debug, info, warn};

use crate::parse;

/// Inputs longer than this are cut before being embedded in a prompt.
const MAX_EMBEDDED_CHARS: usize = 6000;

pub struct LlmOracle {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_attempts: u32,
    source_catalog: String,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.5,
            max_tokens: None,
            max_attempts: 3,
            source_catalog: String::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Attempts per call; clamped to at least one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Describe the available external sources (one `- name: description`
    /// line each) so query extraction can name them.
    pub fn with_source_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.source_catalog = catalog.into();
        self
    }

    /// Send turns to the provider, retrying failed attempts.
    async fn ask(&self, turns: Vec<Message>) -> Result<String, OracleError> {
        let mut last_error = ProviderError::NotConfigured("no attempt made".into());

        for attempt in 1..=self.max_attempts {
            let request = ProviderRequest {
                model: self.model.clone(),
                messages: turns.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                stop: vec![],
            };

            match self.provider.complete(request).await {
                Ok(response) => {
                    debug!(provider = %self.provider.name(), attempt, "Oracle call succeeded");
                    return Ok(response.message.content);
                }
                Err(e) => {
                    warn!(
                        provider = %self.provider.name(),
                        attempt,
                        total = self.max_attempts,
                        error = %e,
                        "Oracle call failed"
                    );
                    let fatal = matches!(
                        e,
                        ProviderError::AuthenticationFailed(_) | ProviderError::NotConfigured(_)
                    );
                    last_error = e;
                    if fatal {
                        return Err(OracleError::Unavailable {
                            attempts: attempt,
                            last_error: last_error.to_string(),
                        });
                    }
                }
            }
        }

        Err(OracleError::Unavailable {
            attempts: self.max_attempts,
            last_error: last_error.to_string(),
        })
    }

    async fn ask_with(&self, instructions: &str, question: String) -> Result<String, OracleError> {
        self.ask(vec![Message::system(instructions), Message::user(question)])
            .await
    }
}

fn clip(text: &str) -> &str {
    match text.char_indices().nth(MAX_EMBEDDED_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn complete(&self, turns: &[Message]) -> Result<String, OracleError> {
        self.ask(turns.to_vec()).await
    }

    async fn classify_topic_change(&self, prior_summary: &str, new_text: &str) -> Result<bool, OracleError> {
        let answer = self
            .ask_with(
                "You decide whether a new message explicitly or obviously asks to move away \
                 from the topic described. Answer 'yes' or 'no' first, then one short reason.",
                format!(
                    "Topic so far: {}\n\nNew message: \"{}\"\n\nIs this a request to change topics?",
                    clip(prior_summary),
                    clip(new_text)
                ),
            )
            .await?;

        match parse::parse_yes_no(&answer) {
            Some(verdict) => Ok(verdict),
            None => {
                debug!(answer = %answer, "Unclear topic-change verdict, treating as no");
                Ok(false)
            }
        }
    }

    async fn classify_conversation_match(
        &self,
        numbered_summaries: &str,
        new_text: &str,
    ) -> Result<i64, OracleError> {
        let answer = self
            .ask_with(
                "You match a message to one of several numbered earlier conversations. \
                 Reply with only the number of the related conversation, or -1 if it \
                 starts a new conversation.",
                format!(
                    "Earlier conversations:\n{}\n\nMessage: \"{}\"",
                    clip(numbered_summaries),
                    clip(new_text)
                ),
            )
            .await?;

        parse::parse_conversation_index(&answer)
            .ok_or_else(|| OracleError::AmbiguousClassification(answer.trim().to_string()))
    }

    async fn summarize(&self, text: &str) -> Result<String, OracleError> {
        let answer = self
            .ask_with(
                "You write detailed summaries. Keep every important name, number and decision.",
                format!("Summarize this content:\n\n{}", clip(text)),
            )
            .await?;
        Ok(parse::unquote(&answer).to_string())
    }

    async fn find_similar_pair(&self, numbered_summaries: &str) -> Result<Option<(usize, usize)>, OracleError> {
        let answer = self
            .ask_with(
                "You find conversations that discuss the same or closely related topics. \
                 Reply with the numbers of the single most similar pair, like '2 and 4', \
                 or 'none' if no two are related.",
                format!("Conversations:\n{}", clip(numbered_summaries)),
            )
            .await?;
        Ok(parse::parse_pair(&answer))
    }

    async fn merge_turns(&self, transcript_a: &str, transcript_b: &str) -> Result<Vec<Message>, OracleError> {
        let answer = self
            .ask(vec![
                Message::system(
                    "You merge two conversations into one coherent conversation that keeps \
                     the facts of both. Write one turn per line as 'user: ...' or \
                     'assistant: ...'.",
                ),
                Message::user(format!("Conversation 1:\n\n{}", clip(transcript_a))),
                Message::user(format!("Conversation 2:\n\n{}", clip(transcript_b))),
            ])
            .await?;
        let turns = parse::parse_turns(&answer);
        info!(turns = turns.len(), "Merged conversation synthesized");
        Ok(turns)
    }

    async fn synthesize_knowledge(&self, numbered_summaries: &str) -> Result<String, OracleError> {
        let answer = self
            .ask_with(
                "You turn a list of conversation summaries into a knowledge base: one to \
                 three paragraphs holding the key facts from every conversation.",
                format!("Conversation summaries:\n{}", clip(numbered_summaries)),
            )
            .await?;
        Ok(answer.trim().to_string())
    }

    async fn extract_source_queries(&self, text: &str) -> Result<Vec<SourceQuery>, OracleError> {
        if self.source_catalog.is_empty() {
            return Ok(Vec::new());
        }
        let answer = self
            .ask_with(
                "You decide which reference sources could help answer a message. Reply \
                 with a fenced YAML list of items with 'source' and 'query' keys, or an \
                 empty list if nothing needs looking up.",
                format!(
                    "Available sources:\n{}\n\nMessage: \"{}\"",
                    self.source_catalog,
                    clip(text)
                ),
            )
            .await?;
        Ok(parse::parse_source_queries(&answer))
    }

    async fn extract_preferences(&self, text: &str) -> Result<BTreeMap<String, String>, OracleError> {
        let answer = self
            .ask_with(
                "You extract the facts and preferences a user wants remembered. Reply with \
                 a fenced YAML map of short keys to values.",
                format!("Message: \"{}\"", clip(text)),
            )
            .await?;
        Ok(parse::parse_preferences(&answer))
    }

    async fn strip_topic_change(&self, text: &str) -> Result<String, OracleError> {
        let answer = self
            .ask_with(
                "You reword a request so that any mention of changing topics is removed and \
                 only the subject remains. Reply with the reworded request only.",
                format!("Request: \"{}\"", clip(text)),
            )
            .await?;
        Ok(parse::parse_rephrased(&answer, text).to_string())
    }
}
