//! Retry layer with exponential backoff.

use cookbook_core::error::AppError;
use cookbook_core::layer::{Layer, LayeredRuntime};
use cookbook_core::resilience::{with_retry, RetryPolicy};
use cookbook_core::runtime::{ModelRuntime, ModelSession};
use cookbook_core::types::*;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Retries runtime queries and session creation on retryable errors.
///
/// Prompt calls are not retried here: a prompt may already have produced
/// output, so whole executions are retried by the executor instead.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    /// Create a new retry layer with default settings
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
        }
    }

    /// Create a retry layer from an existing policy
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.policy = self.policy.with_max_retries(max_retries);
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.policy = self.policy.with_base_delay(initial_delay);
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.policy = self.policy.with_max_delay(max_delay);
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy = self.policy.with_backoff_multiplier(multiplier);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Default for RetryLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ModelRuntime> Layer<R> for RetryLayer {
    type LayeredRuntime = RetryRuntime<R>;

    fn layer(&self, inner: R) -> Self::LayeredRuntime {
        RetryRuntime {
            inner,
            policy: self.policy.clone(),
        }
    }
}

/// Runtime wrapped with retry logic
#[derive(Debug)]
pub struct RetryRuntime<R> {
    inner: R,
    policy: RetryPolicy,
}

#[async_trait]
impl<R: ModelRuntime> LayeredRuntime for RetryRuntime<R> {
    type Inner = R;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_availability(&self) -> Result<AvailabilityState, AppError> {
        with_retry(&self.policy, || self.inner.availability()).await
    }

    async fn layered_create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn ModelSession>, AppError> {
        with_retry(&self.policy, || self.inner.create_session(config)).await
    }
}

#[async_trait]
impl<R: ModelRuntime> ModelRuntime for RetryRuntime<R> {
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
