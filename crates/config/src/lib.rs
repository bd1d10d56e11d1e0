//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use parley_core::ModeKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Where conversations, preferences and knowledge are persisted
    #[serde(default)]
    pub store: StoreConfig,

    /// Conversation management behaviour
    #[serde(default)]
    pub session: SessionConfig,

    /// External knowledge sources
    #[serde(default)]
    pub sources: SourcesConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_tokens() -> u32 {
    1024
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("store", &self.store)
            .field("session", &self.session)
            .field("sources", &self.sources)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "file", "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Backend location; defaults to a file under the config directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The resolved storage path for file-backed backends.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None if self.backend == "file" => AppConfig::config_dir().join("conversations.json"),
            None => AppConfig::config_dir().join("parley.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base system prompt for every new conversation
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,

    /// Modes attached to new conversations, by name, in run order
    #[serde(default = "default_modes")]
    pub default_modes: Vec<String>,

    /// IANA timezone used when a user has no `timezone` preference
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Messages kept verbatim when compressing
    #[serde(default = "default_keep_last")]
    pub keep_last: usize,

    /// Knowledge-mode invocations between consolidations
    #[serde(default = "default_knowledge_update_interval")]
    pub knowledge_update_interval: u32,

    /// Attempts per oracle call before it counts as unavailable
    #[serde(default = "default_oracle_attempts")]
    pub oracle_attempts: u32,

    /// Reword the user's message after a topic switch so only its subject remains
    #[serde(default)]
    pub rephrase_on_reroute: bool,
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant.".into()
}
fn default_modes() -> Vec<String> {
    ModeKind::defaults()
        .iter()
        .map(|m| m.name().to_string())
        .collect()
}
fn default_timezone() -> String {
    "America/New_York".into()
}
fn default_keep_last() -> usize {
    8
}
fn default_knowledge_update_interval() -> u32 {
    3
}
fn default_oracle_attempts() -> u32 {
    3
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: default_system_prompt(),
            default_modes: default_modes(),
            default_timezone: default_timezone(),
            keep_last: default_keep_last(),
            knowledge_update_interval: default_knowledge_update_interval(),
            oracle_attempts: default_oracle_attempts(),
            rephrase_on_reroute: false,
        }
    }
}

impl SessionConfig {
    /// The configured default modes as descriptors. Unknown names are
    /// rejected by validation, so they are skipped here.
    pub fn modes(&self) -> Vec<ModeKind> {
        self.default_modes
            .iter()
            .filter_map(|name| ModeKind::from_name(name))
            .collect()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_true")]
    pub wikipedia: bool,

    #[serde(default = "default_true")]
    pub calculator: bool,

    /// Wolfram|Alpha is only registered when an app id is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wolfram_app_id: Option<String>,

    /// Per-request timeout for source lookups
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_source_timeout() -> u64 {
    15
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            wikipedia: true,
            calculator: true,
            wolfram_app_id: None,
            timeout_secs: default_source_timeout(),
        }
    }
}

impl std::fmt::Debug for SourcesConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcesConfig")
            .field("wikipedia", &self.wikipedia)
            .field("calculator", &self.calculator)
            .field("wolfram_app_id", &redact(&self.wolfram_app_id))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `PARLEY_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("PARLEY_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("PARLEY_PROVIDER") {
            self.default_provider = provider;
        }

        if let Ok(model) = std::env::var("PARLEY_MODEL") {
            self.default_model = model;
        }

        if self.sources.wolfram_app_id.is_none() {
            self.sources.wolfram_app_id = std::env::var("WOLFRAM_APP_ID").ok();
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !matches!(self.store.backend.as_str(), "file" | "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown store backend '{}' (expected file, sqlite or memory)",
                self.store.backend
            )));
        }

        if self.session.keep_last < 2 {
            return Err(ConfigError::ValidationError("session.keep_last must be at least 2".into()));
        }

        if self.session.knowledge_update_interval == 0 {
            return Err(ConfigError::ValidationError(
                "session.knowledge_update_interval must be > 0".into(),
            ));
        }

        if self.session.oracle_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "session.oracle_attempts must be > 0".into(),
            ));
        }

        if let Some(unknown) = self
            .session
            .default_modes
            .iter()
            .find(|name| ModeKind::from_name(name).is_none())
        {
            return Err(ConfigError::ValidationError(format!("unknown mode '{unknown}'")));
        }

        if self.session.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "unknown timezone '{}'",
                self.session.default_timezone
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            store: StoreConfig::default(),
            session: SessionConfig::default(),
            sources: SourcesConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
