//! # Cookbook Plugins
//!
//! Built-in plugins for the Cookbook prompt executor.
//!
//! - `GuidePlugin`: prepends the user's saved guide to recipe prompts
//! - `UsageTrackingPlugin`: records recipe usage in the store

pub mod guide;
pub mod usage;

// Re-exports
pub use guide::GuidePlugin;
pub use usage::UsageTrackingPlugin;
