//! # Cookbook Core
//!
//! Core abstractions and execution engine for running prompt recipes against
//! a local model runtime.
//!
//! This crate provides the runtime traits, the availability monitor, template
//! interpolation, session lifecycle management, the resilience functions
//! (categorize, retry, timeout) and the [`PromptExecutor`] that composes them,
//! plus the layer and plugin extension points.

pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod layer;
pub mod monitor;
pub mod plugin;
pub mod resilience;
pub mod runtime;
pub mod scripted;
pub mod session;
pub mod store;
pub mod template;
pub mod types;

// Re-exports
pub use config::EngineConfig;
pub use error::{AppError, ErrorCategory, ErrorCode, ErrorKind, Severity};
pub use executor::{PromptExecutor, PromptExecutorBuilder, RecipeStream};
pub use history::ExecutionHistory;
pub use layer::{Layer, LayeredRuntime};
pub use monitor::{AvailabilityMonitor, MonitorConfig};
pub use plugin::{Plugin, PluginEngine, PluginPhase};
pub use resilience::{categorize, with_retry, with_timeout, RetryPolicy};
pub use runtime::{ModelRuntime, ModelSession, TextStream};
pub use session::{SessionGuard, SessionManager};
pub use store::{MemoryRecipeStore, RecipeStore};
pub use types::*;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, AppError>;
