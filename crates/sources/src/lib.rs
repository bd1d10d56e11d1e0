//! External knowledge sources for Parley.
//!
//! Every source implements `parley_core::Source`. [`default_registry`]
//! registers the built-ins enabled in configuration.

pub mod calculator;
pub mod wikipedia;
pub mod wolfram;

pub use calculator::CalculatorSource;
pub use wikipedia::WikipediaSource;
pub use wolfram::WolframSource;

use std::time::Duration;

use parley_config::SourcesConfig;
use parley_core::source::SourceRegistry;

/// Create a registry with every built-in source the configuration enables.
/// Wolfram|Alpha is only registered when an app id is configured.
pub fn default_registry(config: &SourcesConfig) -> SourceRegistry {
    let timeout = Duration::from_secs(config.timeout_secs);
    let mut registry = SourceRegistry::new();
    if config.calculator {
        registry.register(Box::new(CalculatorSource));
    }
    if config.wikipedia {
        registry.register(Box::new(WikipediaSource::new(timeout)));
    }
    if let Some(app_id) = config.wolfram_app_id.as_deref().filter(|id| !id.is_empty()) {
        registry.register(Box::new(WolframSource::new(app_id, timeout)));
    }
    registry
}
