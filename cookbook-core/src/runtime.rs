//! Host model runtime traits.
//!
//! The engine consumes a model runtime, it does not implement one. A runtime
//! reports its readiness and hands out short-lived sessions bound to a
//! [`SessionConfig`]. Each session is owned by exactly one execution and must
//! be destroyed exactly once; [`SessionGuard`](crate::session::SessionGuard)
//! enforces that.

use crate::error::AppError;
use crate::types::*;
use async_trait::async_trait;
use futures::Stream;
use std::fmt::Debug;
use std::sync::Arc;

/// Stream type alias for text chunks
pub type TextStream = dyn Stream<Item = Result<String, AppError>> + Send + Unpin;

/// Core runtime trait.
#[async_trait]
pub trait ModelRuntime: Send + Sync + Debug + 'static {
    /// Get runtime information
    fn info(&self) -> Arc<RuntimeInfo>;

    /// Query the current readiness state
    async fn availability(&self) -> Result<AvailabilityState, AppError>;

    /// Report generation limits, if the runtime exposes them
    async fn capabilities(&self) -> Result<Option<Capabilities>, AppError> {
        Ok(None)
    }

    /// Create a session bound to `config`.
    ///
    /// For a `Downloadable` model this is where the download starts.
    async fn create_session(&self, config: SessionConfig)
        -> Result<Box<dyn ModelSession>, AppError>;
}

/// An ephemeral handle to the runtime.
#[async_trait]
pub trait ModelSession: Send + Sync + Debug {
    /// Single-shot prompt
    async fn prompt(&self, text: &str) -> Result<String, AppError>;

    /// Streaming prompt; the returned stream is finite and not restartable
    async fn prompt_streaming(&self, text: &str) -> Result<Box<TextStream>, AppError>;

    /// Release the session. Not idempotent: call exactly once.
    fn destroy(&self);
}

#[async_trait]
impl<R: ModelRuntime + ?Sized> ModelRuntime for Arc<R> {
    fn info(&self) -> Arc<RuntimeInfo> {
        (**self).info()
    }

    async fn availability(&self) -> Result<AvailabilityState, AppError> {
        (**self).availability().await
    }

    async fn capabilities(&self) -> Result<Option<Capabilities>, AppError> {
        (**self).capabilities().await
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn ModelSession>, AppError> {
        (**self).create_session(config).await
    }
}

/// Helper function to collect a text stream into a single string
pub async fn collect_text_stream(mut stream: Box<TextStream>) -> Result<String, AppError> {
    use futures::StreamExt;

    let mut content = String::new();
    while let Some(chunk) = stream.next().await {
        content.push_str(&chunk?);
    }
    Ok(content)
}
