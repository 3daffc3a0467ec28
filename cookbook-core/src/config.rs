//! Engine configuration.

use crate::error::AppError;
use crate::monitor::MonitorConfig;
use crate::resilience::RetryPolicy;
use crate::types::{SanitizationPolicy, SessionConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Defaults applied by a [`PromptExecutor`](crate::executor::PromptExecutor)
/// when a call leaves an option unset.
///
/// ```json
/// {
///   "monitor": { "poll_interval": 500, "max_download_wait": 60000 },
///   "session": { "temperature": 0.2, "top_k": 20 },
///   "timeout": 15000,
///   "retry": { "max_retries": 2 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub monitor: MonitorConfig,
    pub session: SessionConfig,
    /// Per-attempt timeout
    #[serde(with = "crate::resilience::duration_ms")]
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub sanitization: SanitizationPolicy,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            session: SessionConfig::default(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            sanitization: SanitizationPolicy::default(),
        }
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, AppError> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            AppError::validation(format!("Invalid engine config: {}", e)).with_cause(e)
        })?;
        config.session.validate()?;
        Ok(config)
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sanitization(mut self, sanitization: SanitizationPolicy) -> Self {
        self.sanitization = sanitization;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"session": {"temperature": 0.2}, "timeout": 1500, "retry": {"max_retries": 1}}"#,
        )
        .unwrap();

        assert_eq!(config.session.temperature, 0.2);
        assert_eq!(config.session.top_k, SessionConfig::DEFAULT_TOP_K);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.base_delay, Duration::from_millis(1000));
        assert_eq!(config.monitor, MonitorConfig::default());
        assert_eq!(config.sanitization, SanitizationPolicy::default());
    }

    #[test]
    fn test_invalid_session_rejected() {
        let err = EngineConfig::from_json_str(r#"{"session": {"top_k": 0}}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_malformed_json() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }
}
