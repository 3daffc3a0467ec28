//! Timeout layer.

use cookbook_core::error::AppError;
use cookbook_core::layer::{Layer, LayeredRuntime};
use cookbook_core::resilience::with_timeout;
use cookbook_core::runtime::{ModelRuntime, ModelSession, TextStream};
use cookbook_core::types::*;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Bounds session creation and prompt calls with a deadline.
///
/// For streaming prompts only the wait for the stream is bounded, not the
/// time between chunks. A timed-out runtime call is abandoned, not cancelled.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    create_timeout: Duration,
    prompt_timeout: Duration,
}

impl TimeoutLayer {
    /// Use `timeout` for both session creation and prompts
    pub fn new(timeout: Duration) -> Self {
        Self {
            create_timeout: timeout,
            prompt_timeout: timeout,
        }
    }

    /// Set the session creation deadline
    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    /// Set the prompt deadline
    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }
}

impl Default for TimeoutLayer {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl<R: ModelRuntime> Layer<R> for TimeoutLayer {
    type LayeredRuntime = TimeoutRuntime<R>;

    fn layer(&self, inner: R) -> Self::LayeredRuntime {
        TimeoutRuntime {
            inner,
            config: self.clone(),
        }
    }
}

/// Runtime wrapped with deadlines
#[derive(Debug)]
pub struct TimeoutRuntime<R> {
    inner: R,
    config: TimeoutLayer,
}

#[async_trait]
impl<R: ModelRuntime> LayeredRuntime for TimeoutRuntime<R> {
    type Inner = R;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn ModelSession>, AppError> {
        let session = with_timeout(
            self.inner.create_session(config),
            self.config.create_timeout,
        )
        .await?;

        Ok(Box::new(TimeoutSession {
            inner: session,
            timeout: self.config.prompt_timeout,
        }))
    }
}

#[async_trait]
impl<R: ModelRuntime> ModelRuntime for TimeoutRuntime<R> {
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

#[derive(Debug)]
struct TimeoutSession {
    inner: Box<dyn ModelSession>,
    timeout: Duration,
}

#[async_trait]
impl ModelSession for TimeoutSession {
    async fn prompt(&self, text: &str) -> Result<String, AppError> {
        with_timeout(self.inner.prompt(text), self.timeout).await
    }

    async fn prompt_streaming(&self, text: &str) -> Result<Box<TextStream>, AppError> {
        with_timeout(self.inner.prompt_streaming(text), self.timeout).await
    }

    fn destroy(&self) {
        self.inner.destroy();
    }
}
