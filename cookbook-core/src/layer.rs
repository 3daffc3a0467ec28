//! Layer trait and abstractions.
//!
//! Layers wrap a [`ModelRuntime`] with cross-cutting concerns such as logging,
//! retry and timeouts. Each layer takes the inner runtime and returns a new
//! runtime, so layers compose in the order they are applied.

use crate::error::AppError;
use crate::runtime::{ModelRuntime, ModelSession};
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;

/// Layer trait for wrapping runtimes.
pub trait Layer<R: ModelRuntime> {
    /// The type of the layered runtime
    type LayeredRuntime: ModelRuntime;

    /// Wrap the inner runtime with this layer
    fn layer(&self, inner: R) -> Self::LayeredRuntime;
}

/// Helper trait for layered runtimes.
///
/// Provides forwarding implementations for every runtime method. Implementers
/// override only the methods they intercept and use
/// [`impl_layered_runtime!`](crate::impl_layered_runtime) for the rest.
#[async_trait]
pub trait LayeredRuntime: Sized + Send + Sync + 'static {
    /// The inner runtime type
    type Inner: ModelRuntime;

    /// Get a reference to the inner runtime
    fn inner(&self) -> &Self::Inner;

    fn layered_info(&self) -> Arc<RuntimeInfo> {
        self.inner().info()
    }

    async fn layered_availability(&self) -> Result<AvailabilityState, AppError> {
        self.inner().availability().await
    }

    async fn layered_capabilities(&self) -> Result<Option<Capabilities>, AppError> {
        self.inner().capabilities().await
    }

    async fn layered_create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn ModelSession>, AppError> {
        self.inner().create_session(config).await
    }
}

/// Implement [`ModelRuntime`] by forwarding to [`LayeredRuntime`] methods.
#[macro_export]
macro_rules! impl_layered_runtime {
    ($type:ty) => {
        #[async_trait::async_trait]
        impl $crate::runtime::ModelRuntime for $type {
            fn info(&self) -> std::sync::Arc<$crate::types::RuntimeInfo> {
                $crate::layer::LayeredRuntime::layered_info(self)
            }

            async fn availability(
                &self,
            ) -> Result<$crate::types::AvailabilityState, $crate::error::AppError> {
                $crate::layer::LayeredRuntime::layered_availability(self).await
            }

            async fn capabilities(
                &self,
            ) -> Result<Option<$crate::types::Capabilities>, $crate::error::AppError> {
                $crate::layer::LayeredRuntime::layered_capabilities(self).await
            }

            async fn create_session(
                &self,
                config: $crate::types::SessionConfig,
            ) -> Result<Box<dyn $crate::runtime::ModelSession>, $crate::error::AppError> {
                $crate::layer::LayeredRuntime::layered_create_session(self, config).await
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedRuntime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingRuntime<R> {
        inner: R,
        sessions: AtomicUsize,
    }

    #[async_trait]
    impl<R: ModelRuntime> LayeredRuntime for CountingRuntime<R> {
        type Inner = R;

        fn inner(&self) -> &R {
            &self.inner
        }

        async fn layered_create_session(
            &self,
            config: SessionConfig,
        ) -> Result<Box<dyn ModelSession>, AppError> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            self.inner.create_session(config).await
        }
    }

    impl_layered_runtime!(CountingRuntime<ScriptedRuntime>);

    struct CountingLayer;

    impl Layer<ScriptedRuntime> for CountingLayer {
        type LayeredRuntime = CountingRuntime<ScriptedRuntime>;

        fn layer(&self, inner: ScriptedRuntime) -> Self::LayeredRuntime {
            CountingRuntime {
                inner,
                sessions: AtomicUsize::new(0),
            }
        }
    }

    #[tokio::test]
    async fn test_layer_forwards_and_intercepts() {
        let runtime = CountingLayer.layer(ScriptedRuntime::new());

        assert_eq!(runtime.info().id, "scripted");
        assert_eq!(runtime.availability().await.unwrap(), AvailabilityState::Available);

        let session = runtime.create_session(SessionConfig::default()).await.unwrap();
        assert_eq!(session.prompt("hi").await.unwrap(), "Echo: hi");
        session.destroy();

        assert_eq!(runtime.sessions.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.inner.sessions_destroyed(), 1);
    }
}
