//! Source trait: external knowledge the assistant can consult.
//!
//! Sources are what let the datasource mode ground a reply in something
//! other than the model's own weights: an encyclopedia, a computation
//! engine, a local calculator.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// What a source is good for. Oracle suggestions may name a kind instead of
/// a specific source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Encyclopedic reference lookups
    Reference,
    /// Math and computation
    Compute,
    /// General search
    Search,
}

impl SourceKind {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "reference" | "encyclopedia" => Some(SourceKind::Reference),
            "compute" | "math" | "computation" => Some(SourceKind::Compute),
            "search" | "web" => Some(SourceKind::Search),
            _ => None,
        }
    }
}

/// The core Source trait.
#[async_trait]
pub trait Source: Send + Sync {
    /// The unique name of this source (e.g., "wikipedia").
    fn name(&self) -> &str;

    /// A description of what this source knows (shown to the oracle).
    fn description(&self) -> &str;

    /// The kinds of question this source answers.
    fn kinds(&self) -> &[SourceKind];

    /// Run a query; each returned string is one independent result.
    async fn query(&self, query: &str) -> std::result::Result<Vec<String>, SourceError>;
}

/// A registry of available sources.
pub struct SourceRegistry {
    sources: HashMap<String, Box<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// Register a source. Replaces any existing source with the same name.
    pub fn register(&mut self, source: Box<dyn Source>) {
        let name = source.name().to_lowercase();
        self.sources.insert(name, source);
    }

    /// Get a source by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&dyn Source> {
        self.sources.get(&name.trim().to_lowercase()).map(|s| s.as_ref())
    }

    /// Resolve an oracle suggestion: an exact name wins, otherwise every
    /// source of the named kind.
    pub fn resolve(&self, name_or_kind: &str) -> Vec<&dyn Source> {
        if let Some(source) = self.get(name_or_kind) {
            return vec![source];
        }
        let Some(kind) = SourceKind::parse(name_or_kind) else {
            return vec![];
        };
        let mut matches: Vec<&dyn Source> = self
            .sources
            .values()
            .filter(|s| s.kinds().contains(&kind))
            .map(|s| s.as_ref())
            .collect();
        matches.sort_by(|a, b| a.name().cmp(b.name()));
        matches
    }

    /// List all registered source names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.values().map(|s| s.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// One line per source, for the oracle's query-extraction prompt.
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = self
            .sources
            .values()
            .map(|s| format!("- {}: {}", s.name(), s.description()))
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
