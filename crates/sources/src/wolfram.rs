//! Wolfram|Alpha source: the short-answers API.
//!
//! Needs an app id from the Wolfram|Alpha developer portal.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::error::SourceError;
use parley_core::source::{Source, SourceKind};

const SHORT_ANSWER_URL: &str = "https://api.wolframalpha.com/v1/result";

pub struct WolframSource {
    app_id: String,
    endpoint: String,
    client: reqwest::Client,
}

impl WolframSource {
    pub fn new(app_id: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            app_id: app_id.into(),
            endpoint: SHORT_ANSWER_URL.to_string(),
            client,
        }
    }

    fn failure(&self, reason: impl std::fmt::Display) -> SourceError {
        SourceError::QueryFailed {
            source_name: "wolfram".into(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Debug for WolframSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WolframSource")
            .field("app_id", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl Source for WolframSource {
    fn name(&self) -> &str {
        "wolfram"
    }

    fn description(&self) -> &str {
        "Computational knowledge: math, unit conversions, dates, statistics, science and geography facts."
    }

    fn kinds(&self) -> &[SourceKind] {
        &[SourceKind::Compute, SourceKind::Reference]
    }

    async fn query(&self, query: &str) -> Result<Vec<String>, SourceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SourceError::InvalidQuery("empty Wolfram|Alpha query".into()));
        }
        if self.app_id.is_empty() {
            return Err(SourceError::NotConfigured("wolfram app id".into()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("appid", self.app_id.as_str()), ("i", query)])
            .send()
            .await
            .map_err(|e| self.failure(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.failure(e))?;
        interpret(status, body, query)
    }
}

/// Map a short-answers response onto a result. 501 means the input was
/// understood but has no short answer.
fn interpret(status: u16, body: String, query: &str) -> Result<Vec<String>, SourceError> {
    match status {
        200 if !body.trim().is_empty() => Ok(vec![body.trim().to_string()]),
        200 | 501 => Err(SourceError::NotFound(format!("no short answer for '{query}'"))),
        401 | 403 => Err(SourceError::NotConfigured("invalid Wolfram|Alpha app id".into())),
        _ => Err(SourceError::QueryFailed {
            source_name: "wolfram".into(),
            reason: format!("status {status}: {}", body.trim()),
        }),
    }
}
