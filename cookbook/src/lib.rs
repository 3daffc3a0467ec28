//! # Cookbook
//!
//! Run prompt recipes against a local model runtime.
//!
//! A recipe is a named prompt template. Cookbook interpolates the user's
//! input into it, checks that the runtime's model is ready, opens a session,
//! and runs the prompt under a timeout and retry policy. Every execution is
//! recorded in an in-process history.
//!
//! ## Features
//!
//! - **Composable layers**: Stack logging, retry and timeout around any runtime
//! - **Plugin system**: Resolve guides, rewrite prompts, observe executions
//! - **Session safety**: Every session is destroyed exactly once, even on timeout
//! - **Streaming**: Chunked responses with a summary recorded at the end
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! cookbook = { version = "0.1", features = ["runtime", "layers"] }
//! ```
//!
//! ```ignore
//! use cookbook::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = cookbook::runtime::ollama("llama3.2")?;
//!
//! let executor = PromptExecutor::builder(runtime)
//!     .layer(LoggingLayer::new())
//!     .finish();
//!
//! let recipe = Recipe::new("Summarize", "Summarize this in one line: {user_input}");
//! let result = executor
//!     .execute_recipe(&recipe, "Rust is a systems language...", &ExecutionOptions::new())
//!     .await?;
//! println!("{}", result.response.unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: `runtime`, `layers` and `plugins`
//! - `runtime`: OpenAI-compatible local server runtime
//! - `layers`: Built-in layers (logging, retry, timeout)
//! - `plugins`: Built-in plugins (guide resolution, usage tracking)
//! - `full`: All features enabled

// Re-export core types and traits
pub use cookbook_core::*;

// Re-export runtimes under `runtime` module
#[cfg(feature = "cookbook-runtime")]
pub mod runtime {
    //! Model runtime implementations.
    pub use cookbook_core::runtime::*;
    pub use cookbook_runtime::*;
}

// Re-export layers under `layers` module
#[cfg(feature = "cookbook-layer")]
pub mod layers {
    //! Built-in runtime layers.
    pub use cookbook_layer::*;
}

// Re-export plugins under `plugins` module
#[cfg(feature = "cookbook-plugin")]
pub mod plugins {
    //! Built-in executor plugins.
    pub use cookbook_plugin::*;
}

/// Prelude module for convenient imports
pub mod prelude {
    //! Prelude module containing the most commonly used types and traits.
    //!
    //! ```
    //! use cookbook::prelude::*;
    //! ```

    pub use crate::{
        AppError, AvailabilityState, EngineConfig, ErrorCode, ExecutionOptions, ExecutionResult,
        Layer, MemoryRecipeStore, ModelRuntime, Plugin, PluginPhase, PromptExecutor, Recipe,
        RecipeStore, RecipeStream, Result, RetryPolicy, SanitizationPolicy, SessionConfig,
    };

    #[cfg(feature = "cookbook-runtime")]
    pub use cookbook_runtime::{OpenAiCompatBuilder, OpenAiCompatRuntime};

    #[cfg(feature = "cookbook-layer")]
    pub use crate::layers::*;

    #[cfg(feature = "cookbook-plugin")]
    pub use crate::plugins::*;
}
