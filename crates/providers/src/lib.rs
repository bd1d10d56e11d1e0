//! LLM providers and the oracle adapter for Parley.
//!
//! Providers implement `parley_core::Provider`; [`LlmOracle`] turns any
//! provider into the `parley_core::Oracle` the session core consumes.

pub mod openai_compat;
pub mod oracle;
pub mod parse;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use oracle::LlmOracle;
pub use router::{ProviderRouter, build_from_config, build_oracle};
