//! Model availability tracking.

use crate::error::{AppError, ErrorCategory, ErrorCode, ErrorKind, Severity};
use crate::runtime::ModelRuntime;
use crate::types::{AvailabilityState, Capabilities};
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Polling configuration for [`AvailabilityMonitor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between state queries while the model downloads
    #[serde(with = "crate::resilience::duration_ms")]
    pub poll_interval: Duration,
    /// Give up waiting for a download after this long
    #[serde(with = "crate::resilience::duration_ms")]
    pub max_download_wait: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_download_wait: Duration::from_secs(300),
        }
    }
}

/// Queries and interprets the runtime's readiness.
///
/// The state itself is never cached; only the capabilities found by the last
/// successful [`initialize`](Self::initialize) are kept.
#[derive(Debug)]
pub struct AvailabilityMonitor {
    runtime: Arc<dyn ModelRuntime>,
    config: MonitorConfig,
    capabilities: ArcSwapOption<Capabilities>,
}

impl AvailabilityMonitor {
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self::with_config(runtime, MonitorConfig::default())
    }

    pub fn with_config(runtime: Arc<dyn ModelRuntime>, config: MonitorConfig) -> Self {
        Self {
            runtime,
            config,
            capabilities: ArcSwapOption::empty(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Current raw state
    pub async fn state(&self) -> Result<AvailabilityState, AppError> {
        self.runtime.availability().await
    }

    /// Fast path: true when execution may proceed right now.
    pub async fn check_available(&self) -> bool {
        match self.runtime.availability().await {
            Ok(state) => state.can_execute(),
            Err(e) => {
                tracing::debug!("availability query failed: {}", e);
                false
            }
        }
    }

    /// Confirm execution may proceed, initializing on first use.
    ///
    /// A model that went back to downloading after initialization is waited
    /// out under the same `max_download_wait` bound.
    pub async fn ensure_ready(&self) -> Result<(), AppError> {
        if !self.is_initialized() {
            self.initialize().await?;
            return Ok(());
        }

        match self.runtime.availability().await {
            Ok(state) if state.can_execute() => Ok(()),
            Ok(AvailabilityState::Downloading) => {
                tracing::debug!("model downloading again, waiting");
                self.initialize().await.map(|_| ())
            }
            Ok(_) => Err(AppError::api_not_available("AI model not available")),
            Err(e) => {
                tracing::debug!("availability query failed: {}", e);
                Err(AppError::api_not_available("AI model not available"))
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.capabilities.load().is_some()
    }

    /// Capabilities from the last successful initialization
    pub fn capabilities(&self) -> Option<Arc<Capabilities>> {
        self.capabilities.load_full()
    }

    /// Full path: wait out a download, then introspect capabilities.
    pub async fn initialize(&self) -> Result<Arc<Capabilities>, AppError> {
        let started = tokio::time::Instant::now();
        let mut polls = 1u32;
        let mut state = self.runtime.availability().await?;

        while state == AvailabilityState::Downloading {
            if started.elapsed() >= self.config.max_download_wait {
                return Err(AppError::new(
                    ErrorKind::Ai,
                    ErrorCode::ModelDownloadTimeout,
                    format!(
                        "Model still downloading after {:?} ({} polls)",
                        self.config.max_download_wait, polls
                    ),
                ));
            }
            tracing::debug!("model downloading, polling again in {:?}", self.config.poll_interval);
            tokio::time::sleep(self.config.poll_interval).await;
            state = self.runtime.availability().await?;
            polls += 1;
        }

        if state == AvailabilityState::Unavailable {
            return Err(AppError::api_not_available("AI model not available on this device")
                .with_category(ErrorCategory::AiApi)
                .with_severity(Severity::Critical)
                .with_retryable(false));
        }

        let capabilities = match self.runtime.capabilities().await {
            Ok(Some(caps)) => caps,
            Ok(None) => Capabilities::default(),
            Err(e) => {
                tracing::debug!("capability query failed, using defaults: {}", e);
                Capabilities::default()
            }
        };

        tracing::debug!(state = %state, polls, "model runtime initialized");
        let capabilities = Arc::new(capabilities);
        self.capabilities.store(Some(capabilities.clone()));
        Ok(capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedRuntime;

    #[tokio::test(start_paused = true)]
    async fn test_initialize_waits_for_download() {
        let runtime = Arc::new(ScriptedRuntime::new().with_availability_sequence(vec![
            AvailabilityState::Downloading,
            AvailabilityState::Downloading,
            AvailabilityState::Available,
        ]));
        let monitor = AvailabilityMonitor::new(runtime.clone());

        let start = tokio::time::Instant::now();
        let caps = monitor.initialize().await.unwrap();

        assert_eq!(runtime.availability_queries(), 3);
        assert!(start.elapsed() >= Duration::from_millis(2000));
        assert!(!caps.reported);
        assert!(monitor.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_gives_up_on_endless_download() {
        let runtime = Arc::new(
            ScriptedRuntime::new().with_availability(AvailabilityState::Downloading),
        );
        let config = MonitorConfig {
            poll_interval: Duration::from_millis(1000),
            max_download_wait: Duration::from_secs(10),
        };
        let monitor = AvailabilityMonitor::with_config(runtime, config);

        let err = monitor.initialize().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelDownloadTimeout);
        assert!(err.retryable);
        assert!(!monitor.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_unavailable_is_critical() {
        let runtime = Arc::new(
            ScriptedRuntime::new().with_availability(AvailabilityState::Unavailable),
        );
        let monitor = AvailabilityMonitor::new(runtime);

        let err = monitor.initialize().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ApiNotAvailable);
        assert_eq!(err.category, ErrorCategory::AiApi);
        assert_eq!(err.severity, Severity::Critical);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_downloadable_does_not_block() {
        let runtime = Arc::new(
            ScriptedRuntime::new().with_availability(AvailabilityState::Downloadable),
        );
        let monitor = AvailabilityMonitor::new(runtime.clone());

        assert!(monitor.check_available().await);
        monitor.initialize().await.unwrap();
        assert_eq!(runtime.availability_queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_ready_waits_for_renewed_download() {
        let runtime = Arc::new(ScriptedRuntime::new().with_availability_sequence(vec![
            AvailabilityState::Available,
            AvailabilityState::Downloading,
            AvailabilityState::Downloading,
            AvailabilityState::Available,
        ]));
        let monitor = AvailabilityMonitor::new(runtime.clone());
        monitor.ensure_ready().await.unwrap();

        let start = tokio::time::Instant::now();
        monitor.ensure_ready().await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert_eq!(runtime.availability_queries(), 4);
    }

    #[tokio::test]
    async fn test_ensure_ready_rejects_unavailable_after_init() {
        let runtime = Arc::new(ScriptedRuntime::new().with_availability_sequence(vec![
            AvailabilityState::Available,
            AvailabilityState::Unavailable,
        ]));
        let monitor = AvailabilityMonitor::new(runtime);
        monitor.ensure_ready().await.unwrap();

        let err = monitor.ensure_ready().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ApiNotAvailable);
        assert!(err.requires_recovery());
    }

    #[tokio::test]
    async fn test_reported_capabilities_are_used() {
        let caps = Capabilities {
            default_temperature: 1.0,
            max_temperature: 2.0,
            default_top_k: 3,
            max_top_k: 8,
            reported: true,
        };
        let runtime = Arc::new(ScriptedRuntime::new().with_capabilities(caps.clone()));
        let monitor = AvailabilityMonitor::new(runtime);

        assert_eq!(*monitor.initialize().await.unwrap(), caps);
        assert_eq!(monitor.capabilities().as_deref(), Some(&caps));
    }
}
