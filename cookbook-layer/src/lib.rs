//! # Cookbook Layers
//!
//! Built-in layers for Cookbook model runtimes.
//!
//! Currently implemented layers:
//! - `LoggingLayer`: Logs runtime and session operations with timing information
//! - `RetryLayer`: Retries availability queries and session creation with exponential backoff
//! - `TimeoutLayer`: Bounds session creation and prompt calls with a deadline
//!
//! ## Usage
//!
//! ```ignore
//! use cookbook_core::PromptExecutor;
//! use cookbook_layer::{LoggingLayer, RetryLayer, TimeoutLayer};
//!
//! let executor = PromptExecutor::builder(runtime)
//!     .layer(TimeoutLayer::new(Duration::from_secs(10)))
//!     .layer(RetryLayer::new().with_max_retries(3))
//!     .layer(LoggingLayer::new())
//!     .finish();
//! ```

pub mod logging;
pub mod retry;
pub mod timeout;

// Re-exports
pub use logging::LoggingLayer;
pub use retry::RetryLayer;
pub use timeout::TimeoutLayer;
