//! Logging layer for runtime operations.

use cookbook_core::error::AppError;
use cookbook_core::layer::{Layer, LayeredRuntime};
use cookbook_core::runtime::{ModelRuntime, ModelSession, TextStream};
use cookbook_core::types::*;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

/// Logging layer that logs runtime and session operations.
///
/// Prompt text is never logged, only its length.
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    prefix: String,
}

impl LoggingLayer {
    /// Create a new logging layer
    pub fn new() -> Self {
        Self {
            prefix: "[Cookbook]".to_string(),
        }
    }

    /// Create a logging layer with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ModelRuntime> Layer<R> for LoggingLayer {
    type LayeredRuntime = LoggingRuntime<R>;

    fn layer(&self, inner: R) -> Self::LayeredRuntime {
        LoggingRuntime {
            inner,
            prefix: Arc::from(self.prefix.as_str()),
        }
    }
}

/// Runtime wrapped with logging
#[derive(Debug)]
pub struct LoggingRuntime<R> {
    inner: R,
    prefix: Arc<str>,
}

#[async_trait]
impl<R: ModelRuntime> LayeredRuntime for LoggingRuntime<R> {
    type Inner = R;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_availability(&self) -> Result<AvailabilityState, AppError> {
        let start = std::time::Instant::now();
        let result = self.inner.availability().await;
        let elapsed = start.elapsed();

        match &result {
            Ok(state) => {
                tracing::debug!("{} availability: {}, elapsed={:?}", self.prefix, state, elapsed)
            }
            Err(e) => {
                tracing::error!("{} availability error: {}, elapsed={:?}", self.prefix, e, elapsed)
            }
        }

        result
    }

    async fn layered_create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn ModelSession>, AppError> {
        tracing::debug!(
            "{} create_session: temperature={}, top_k={}",
            self.prefix,
            config.temperature,
            config.top_k
        );

        let start = std::time::Instant::now();
        let result = self.inner.create_session(config).await;
        let elapsed = start.elapsed();

        match result {
            Ok(session) => {
                tracing::debug!("{} create_session success, elapsed={:?}", self.prefix, elapsed);
                Ok(Box::new(LoggingSession {
                    inner: session,
                    prefix: self.prefix.clone(),
                }))
            }
            Err(e) => {
                tracing::error!(
                    "{} create_session error: {} ({}), elapsed={:?}",
                    self.prefix,
                    e,
                    e.code,
                    elapsed
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<R: ModelRuntime> ModelRuntime for LoggingRuntime<R> {
    fn info(&self) -> Arc<RuntimeInfo> {
        LayeredRuntime::layered_info(self)
    }

    async fn availability(&self) -> Result<AvailabilityState, AppError> {
        LayeredRuntime::layered_availability(self).await
    }

    async fn capabilities(&self) -> Result<Option<Capabilities>, AppError> {
        LayeredRuntime::layered_capabilities(self).await
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn ModelSession>, AppError> {
        LayeredRuntime::layered_create_session(self, config).await
    }
}

/// Session wrapped with logging
#[derive(Debug)]
struct LoggingSession {
    inner: Box<dyn ModelSession>,
    prefix: Arc<str>,
}

#[async_trait]
impl ModelSession for LoggingSession {
    async fn prompt(&self, text: &str) -> Result<String, AppError> {
        tracing::debug!("{} prompt request: chars={}", self.prefix, text.chars().count());

        let start = std::time::Instant::now();
        let result = self.inner.prompt(text).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(response) => tracing::debug!(
                "{} prompt success: chars={}, elapsed={:?}",
                self.prefix,
                response.chars().count(),
                elapsed
            ),
            Err(e) => tracing::error!("{} prompt error: {}, elapsed={:?}", self.prefix, e, elapsed),
        }

        result
    }

    async fn prompt_streaming(&self, text: &str) -> Result<Box<TextStream>, AppError> {
        tracing::debug!(
            "{} prompt_streaming request: chars={}",
            self.prefix,
            text.chars().count()
        );

        let start = std::time::Instant::now();
        let mut chunks = match self.inner.prompt_streaming(text).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::error!(
                    "{} prompt_streaming error: {}, elapsed={:?}",
                    self.prefix,
                    e,
                    start.elapsed()
                );
                return Err(e);
            }
        };

        let prefix = self.prefix.clone();
        let stream = async_stream::stream! {
            let mut count = 0usize;
            while let Some(chunk) = chunks.next().await {
                match &chunk {
                    Ok(_) => count += 1,
                    Err(e) => tracing::error!(
                        "{} stream error after {} chunks: {}, elapsed={:?}",
                        prefix,
                        count,
                        e,
                        start.elapsed()
                    ),
                }
                yield chunk;
            }
            tracing::debug!(
                "{} stream finished: chunks={}, elapsed={:?}",
                prefix,
                count,
                start.elapsed()
            );
        };

        Ok(Box::new(Box::pin(stream)) as Box<TextStream>)
    }

    fn destroy(&self) {
        tracing::debug!("{} destroy session", self.prefix);
        self.inner.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookbook_core::runtime::collect_text_stream;
    use cookbook_core::scripted::ScriptedRuntime;

    #[tokio::test]
    async fn test_logging_is_transparent() {
        let scripted = Arc::new(ScriptedRuntime::new().with_chunk_size(4));
        let runtime = LoggingLayer::with_prefix("[test]").layer(scripted.clone());

        assert_eq!(runtime.info().id, "scripted");
        assert_eq!(runtime.availability().await.unwrap(), AvailabilityState::Available);

        let session = runtime.create_session(SessionConfig::default()).await.unwrap();
        assert_eq!(session.prompt("hi").await.unwrap(), "Echo: hi");
        let streamed = collect_text_stream(session.prompt_streaming("hi").await.unwrap())
            .await
            .unwrap();
        assert_eq!(streamed, "Echo: hi");
        session.destroy();

        assert_eq!(scripted.sessions_destroyed(), 1);
    }

    #[tokio::test]
    async fn test_logging_passes_errors_through() {
        let scripted = Arc::new(ScriptedRuntime::new().fail_next_create("quota exceeded"));
        let runtime = LoggingLayer::new().layer(scripted);

        let err = runtime
            .create_session(SessionConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, cookbook_core::ErrorCode::QuotaExceeded);
    }
}
