//! # Parley Session
//!
//! The stateful heart of Parley: deciding which conversation an incoming
//! message belongs to, enriching it through the mode pipeline, keeping
//! histories bounded, and periodically folding every conversation into a
//! knowledge digest.
//!
//! ## Components
//!
//! - [`modes`]: context-injection steps run before each user turn
//! - [`CompressionEngine`]: replaces history overflow with a summary
//! - [`MergeEngine`]: unifies near-duplicate conversations
//! - [`KnowledgeJob`]: compression + merging + digest, on a per-user cadence
//! - [`ConversationManager`]: the per-user router the front end talks to

pub mod compression;
pub mod knowledge;
pub mod manager;
pub mod merge;
pub mod modes;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use compression::CompressionEngine;
pub use knowledge::KnowledgeJob;
pub use manager::{ConversationManager, Routing, TurnOutcome};
pub use merge::{MergeEngine, MergeRecord};
pub use modes::{Mode, ModeContext, mode_for, run_pipeline};
