//! Error categorization, retry with exponential backoff, and timeouts.
//!
//! These are decorators over arbitrary async operations. The runtime layers in
//! `cookbook-layer` and the [`PromptExecutor`](crate::PromptExecutor) both
//! build on them.

use crate::error::{AppError, BoxError, ErrorCategory, ErrorCode, Severity};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Derive an error code from free-form message text.
pub fn code_from_message(message: &str) -> ErrorCode {
    let msg = message.to_lowercase();
    if msg.contains("not available") {
        ErrorCode::ApiNotAvailable
    } else if msg.contains("quota") {
        ErrorCode::QuotaExceeded
    } else if msg.contains("rate limit") {
        ErrorCode::RateLimited
    } else if msg.contains("timeout") || msg.contains("timed out") {
        ErrorCode::TimeoutError
    } else if msg.contains("network") {
        ErrorCode::NetworkError
    } else if msg.contains("permission") {
        ErrorCode::PermissionDenied
    } else if msg.contains("validation") {
        ErrorCode::ValidationError
    } else {
        ErrorCode::UnknownError
    }
}

/// Infer a category from keywords in the message, checked in a fixed order.
///
/// "ai" must be a whole word; longer keywords also match as a word prefix
/// ("timeouts", "networking").
pub fn category_from_message(message: &str) -> ErrorCategory {
    let msg = message.to_lowercase();
    let words: Vec<&str> = msg
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has = |keywords: &[&str]| {
        words.iter().any(|w| {
            keywords
                .iter()
                .any(|k| *w == *k || (k.len() > 2 && w.starts_with(k)))
        })
    };

    if has(&["ai", "model"]) {
        ErrorCategory::AiApi
    } else if has(&["storage"]) {
        ErrorCategory::Storage
    } else if has(&["validation"]) {
        ErrorCategory::Validation
    } else if has(&["network"]) {
        ErrorCategory::Network
    } else if has(&["permission"]) {
        ErrorCategory::Permission
    } else if has(&["quota"]) {
        ErrorCategory::Quota
    } else if has(&["timeout"]) {
        ErrorCategory::Timeout
    } else {
        ErrorCategory::Unknown
    }
}

/// Fixed severity table.
pub fn severity_for(category: ErrorCategory, message: &str) -> Severity {
    let msg = message.to_lowercase();
    match category {
        ErrorCategory::AiApi if msg.contains("not available") => Severity::Critical,
        ErrorCategory::Storage if msg.contains("corrupted") => Severity::Critical,
        ErrorCategory::Quota | ErrorCategory::Permission => Severity::High,
        ErrorCategory::Network | ErrorCategory::Timeout => Severity::Medium,
        ErrorCategory::Validation => Severity::Low,
        _ => Severity::Medium,
    }
}

/// Turn any error into an [`AppError`].
///
/// An `AppError` is returned unchanged so its code survives; anything else is
/// classified from its message.
pub fn categorize(error: impl Into<BoxError>) -> AppError {
    let error: BoxError = error.into();
    match error.downcast::<AppError>() {
        Ok(app) => *app,
        Err(other) => AppError::classify(other.to_string()).with_cause(other),
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a retry policy with default settings
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new().with_max_retries(0)
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before the retry following 0-based attempt `attempt`:
    /// `min(base * multiplier^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let cap = self.max_delay.as_millis() as f64;
        Duration::from_millis(delay_ms.min(cap) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent. At most `max_retries + 1` attempts are made.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let err = categorize(e);
                if !err.is_retryable() || attempt >= policy.max_retries {
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    code = %err.code,
                    "Retry attempt {}/{}, waiting {:?}",
                    attempt + 1,
                    policy.max_retries,
                    delay
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Race `future` against a timer.
///
/// If the timer fires first the future is dropped and a retryable
/// `TIMEOUT_ERROR` is returned. Dropping the future releases whatever it owns
/// locally; work already handed to the model runtime is not cancelled.
pub async fn with_timeout<T, F>(future: F, timeout: Duration) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(format!(
            "Operation timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

pub(crate) mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
