//! Execution orchestration.
//!
//! The executor sits between the caller and the session manager. For every
//! call it:
//! - validates the recipe and input, and confirms the model is available
//! - builds the final prompt (guide, interpolation, plugin transforms)
//! - runs the prompt under timeout and retry
//! - records the outcome in the execution history

pub mod prompt;
pub mod stream;

pub use prompt::{PromptExecutor, PromptExecutorBuilder};
pub use stream::RecipeStream;
