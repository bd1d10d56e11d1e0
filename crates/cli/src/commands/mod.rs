pub mod chat;
pub mod conversations;
pub mod maintenance;
pub mod onboard;
pub mod prefs;

use std::sync::Arc;

use parley_config::AppConfig;
use parley_core::store::ConversationStore;
use parley_session::ConversationManager;
use parley_store::{FileStore, InMemoryStore, SqliteStore};

/// Load configuration and wire the store, sources, oracle and manager.
pub async fn manager() -> Result<(AppConfig, ConversationManager), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let store = open_store(&config).await?;
    let sources = Arc::new(parley_sources::default_registry(&config.sources));
    let router = parley_providers::build_from_config(&config);
    let oracle = parley_providers::build_oracle(&config, &router, sources.describe())
        .ok_or("No default provider configured")?;

    let manager = ConversationManager::new(store, Arc::new(oracle), config.session.clone())
        .with_sources(sources);
    Ok((config, manager))
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn ConversationStore>, Box<dyn std::error::Error>> {
    let store: Arc<dyn ConversationStore> = match config.store.backend.as_str() {
        "memory" => Arc::new(InMemoryStore::new()),
        "file" => Arc::new(FileStore::open(config.store.resolved_path())?),
        _ => Arc::new(SqliteStore::open(&config.store.resolved_path()).await?),
    };
    tracing::debug!(backend = store.name(), "Store opened");
    Ok(store)
}

/// Commands that talk to the model need a key; explain how to set one.
pub fn require_api_key(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.has_api_key() || config.providers.values().any(|p| p.api_key.is_some()) {
        return Ok(());
    }

    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    OPENROUTER_API_KEY=sk-or-v1-...   (recommended)");
    eprintln!("    OPENAI_API_KEY=sk-...             (for OpenAI direct)");
    eprintln!("    PARLEY_API_KEY=sk-...             (generic)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}
