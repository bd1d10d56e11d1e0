//! Wikipedia source: MediaWiki opensearch plus the REST page summary.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::error::SourceError;
use parley_core::source::{Source, SourceKind};
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://en.wikipedia.org";

/// Pages summarized per query.
const MAX_PAGES: usize = 2;

pub struct WikipediaSource {
    base_url: String,
    client: reqwest::Client,
}

impl WikipediaSource {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    /// Point at another MediaWiki host (e.g. another language edition).
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn failure(&self, reason: impl std::fmt::Display) -> SourceError {
        SourceError::QueryFailed {
            source_name: self.name().to_string(),
            reason: reason.to_string(),
        }
    }

    async fn search_titles(&self, query: &str) -> Result<Vec<String>, SourceError> {
        let url = format!("{}/w/api.php", self.base_url);
        let limit = MAX_PAGES.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("action", "opensearch"),
                ("search", query),
                ("limit", limit.as_str()),
                ("namespace", "0"),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| self.failure(e))?;

        if !response.status().is_success() {
            return Err(self.failure(format!("search returned {}", response.status())));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| self.failure(e))?;
        Ok(parse_opensearch(&body))
    }

    async fn page_summary(&self, title: &str) -> Result<Option<String>, SourceError> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| self.failure(e))?;
        url.path_segments_mut()
            .map_err(|_| self.failure("base url cannot carry a path"))?
            .pop_if_empty()
            .extend(["api", "rest_v1", "page", "summary", title.replace(' ', "_").as_str()]);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.failure(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.failure(format!("summary returned {}", response.status())));
        }

        let summary: PageSummary = response.json().await.map_err(|e| self.failure(e))?;
        Ok(summary.render())
    }
}

#[async_trait]
impl Source for WikipediaSource {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn description(&self) -> &str {
        "Encyclopedia articles about people, places, history, science and other well-known topics."
    }

    fn kinds(&self) -> &[SourceKind] {
        &[SourceKind::Reference, SourceKind::Search]
    }

    async fn query(&self, query: &str) -> Result<Vec<String>, SourceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SourceError::InvalidQuery("empty Wikipedia query".into()));
        }

        let titles = self.search_titles(query).await?;
        debug!(query, pages = titles.len(), "Wikipedia search");

        let mut results = Vec::new();
        for title in titles {
            if let Some(summary) = self.page_summary(&title).await? {
                results.push(summary);
            }
        }

        if results.is_empty() {
            return Err(SourceError::NotFound(format!("no Wikipedia article for '{query}'")));
        }
        Ok(results)
    }
}

/// Titles from an opensearch response: `[query, [titles], [descriptions], [urls]]`.
fn parse_opensearch(body: &serde_json::Value) -> Vec<String> {
    body.get(1)
        .and_then(|titles| titles.as_array())
        .map(|titles| {
            titles
                .iter()
                .filter_map(|t| t.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct PageSummary {
    title: String,
    #[serde(default)]
    extract: String,
    #[serde(default, rename = "type")]
    kind: String,
}

impl PageSummary {
    /// Disambiguation pages and empty extracts carry nothing to summarize.
    fn render(self) -> Option<String> {
        if self.kind == "disambiguation" || self.extract.trim().is_empty() {
            return None;
        }
        Some(format!("{}: {}", self.title, self.extract.trim()))
    }
}
