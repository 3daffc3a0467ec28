//! Error taxonomy for the recipe engine.
//!
//! Every failure the engine surfaces is an [`AppError`]: a single struct that
//! carries a stable [`ErrorCode`], an [`ErrorCategory`], a [`Severity`], a
//! retryability flag and a message suitable for end users. The layer that
//! produced the error is recorded as an [`ErrorKind`] instead of a separate
//! error type per layer.

use crate::resilience;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Boxed error used as the cause of an [`AppError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which layer of the engine produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Model runtime and session failures
    Ai,
    /// Orchestrator failures
    PromptExecutor,
    /// Template interpolation failures
    Interpolation,
    /// Recipe store failures
    Storage,
    /// Anything categorized from an untyped error
    App,
}

/// Broad classification used for cross-cutting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    AiApi,
    Storage,
    Validation,
    Network,
    Permission,
    Quota,
    Timeout,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::AiApi => "AI_API",
            ErrorCategory::Storage => "STORAGE",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Permission => "PERMISSION",
            ErrorCategory::Quota => "QUOTA",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ApiNotAvailable,
    QuotaExceeded,
    TimeoutError,
    NetworkError,
    PermissionDenied,
    ValidationError,
    RateLimited,
    TemporaryFailure,
    SessionCreationFailed,
    PromptExecutionFailed,
    StreamingFailed,
    ExecutionFailed,
    InvalidTemplate,
    InvalidInput,
    ModelDownloadTimeout,
    RecipeNotFound,
    StorageError,
    UnknownError,
}

/// Codes that [`resilience::with_retry`] treats as transient.
pub const RETRYABLE_CODES: &[ErrorCode] = &[
    ErrorCode::NetworkError,
    ErrorCode::TimeoutError,
    ErrorCode::QuotaExceeded,
    ErrorCode::RateLimited,
    ErrorCode::TemporaryFailure,
];

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ApiNotAvailable => "API_NOT_AVAILABLE",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::TemporaryFailure => "TEMPORARY_FAILURE",
            ErrorCode::SessionCreationFailed => "SESSION_CREATION_FAILED",
            ErrorCode::PromptExecutionFailed => "PROMPT_EXECUTION_FAILED",
            ErrorCode::StreamingFailed => "STREAMING_FAILED",
            ErrorCode::ExecutionFailed => "EXECUTION_FAILED",
            ErrorCode::InvalidTemplate => "INVALID_TEMPLATE",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::ModelDownloadTimeout => "MODEL_DOWNLOAD_TIMEOUT",
            ErrorCode::RecipeNotFound => "RECIPE_NOT_FOUND",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Fixed membership test against [`RETRYABLE_CODES`].
    pub fn is_retryable(&self) -> bool {
        RETRYABLE_CODES.contains(self)
    }

    /// Category implied by the code alone, if any.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ErrorCode::ApiNotAvailable
            | ErrorCode::SessionCreationFailed
            | ErrorCode::PromptExecutionFailed
            | ErrorCode::StreamingFailed => Some(ErrorCategory::AiApi),
            ErrorCode::QuotaExceeded | ErrorCode::RateLimited => Some(ErrorCategory::Quota),
            ErrorCode::TimeoutError | ErrorCode::ModelDownloadTimeout => {
                Some(ErrorCategory::Timeout)
            }
            ErrorCode::NetworkError => Some(ErrorCategory::Network),
            ErrorCode::PermissionDenied => Some(ErrorCategory::Permission),
            ErrorCode::ValidationError | ErrorCode::InvalidTemplate | ErrorCode::InvalidInput => {
                Some(ErrorCategory::Validation)
            }
            ErrorCode::RecipeNotFound | ErrorCode::StorageError => Some(ErrorCategory::Storage),
            ErrorCode::TemporaryFailure | ErrorCode::ExecutionFailed | ErrorCode::UnknownError => {
                None
            }
        }
    }

    /// Message shown to end users for this code.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::ApiNotAvailable => {
                "The on-device AI model is not available. Check that it is installed and enabled."
            }
            ErrorCode::QuotaExceeded => "The AI model is out of capacity. Please wait and try again.",
            ErrorCode::RateLimited => "Too many requests. Please wait a moment and try again.",
            ErrorCode::TimeoutError => "The AI model took too long to respond. Please try again.",
            ErrorCode::ModelDownloadTimeout => {
                "The AI model is still downloading. Please try again once it has finished."
            }
            ErrorCode::NetworkError => "A connection problem occurred. Please try again.",
            ErrorCode::PermissionDenied => "Permission was denied for this operation.",
            ErrorCode::ValidationError | ErrorCode::InvalidInput => {
                "Please check your input and try again."
            }
            ErrorCode::InvalidTemplate => "This recipe's prompt is empty or invalid.",
            ErrorCode::SessionCreationFailed => "Could not start the AI model. Please try again.",
            ErrorCode::PromptExecutionFailed | ErrorCode::StreamingFailed => {
                "The AI model failed to answer. Please try again."
            }
            ErrorCode::RecipeNotFound => "That recipe no longer exists.",
            ErrorCode::StorageError => "Your recipes could not be read or saved.",
            ErrorCode::TemporaryFailure => "A temporary problem occurred. Please try again.",
            ErrorCode::ExecutionFailed | ErrorCode::UnknownError => {
                "Something went wrong. Please try again."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine's error type.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub message: String,
    pub user_message: String,
    #[source]
    pub cause: Option<BoxError>,
}

impl AppError {
    /// Create an error with category, severity and retryability derived from
    /// the code and message.
    pub fn new(kind: ErrorKind, code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let category = code
            .category()
            .unwrap_or_else(|| resilience::category_from_message(&message));
        let severity = resilience::severity_for(category, &message);
        Self {
            kind,
            code,
            category,
            severity,
            retryable: code.is_retryable(),
            user_message: code.user_message().to_string(),
            message,
            cause: None,
        }
    }

    /// Classify an untyped failure from its message text.
    ///
    /// Code and category are read from the message independently, so
    /// "AI model timeout" is a `TIMEOUT_ERROR` in the `AI_API` category.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let code = resilience::code_from_message(&message);
        let category = resilience::category_from_message(&message);
        let mut err = Self::new(ErrorKind::App, code, message);
        err.category = category;
        err.severity = resilience::severity_for(category, &err.message);
        err
    }

    /// Wrap a typed cause under a new code.
    ///
    /// Category, severity, retryability and user message are inherited from
    /// the cause so cross-cutting policy still sees the original failure.
    pub fn wrap(kind: ErrorKind, code: ErrorCode, message: impl Into<String>, cause: AppError) -> Self {
        Self {
            kind,
            code,
            category: cause.category,
            severity: cause.severity,
            retryable: cause.retryable,
            message: message.into(),
            user_message: cause.user_message.clone(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Create an `API_NOT_AVAILABLE` error (critical, not retryable)
    pub fn api_not_available(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Ai, ErrorCode::ApiNotAvailable, msg)
            .with_category(ErrorCategory::AiApi)
            .with_severity(Severity::Critical)
    }

    /// Create a `TIMEOUT_ERROR` error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::App, ErrorCode::TimeoutError, msg)
    }

    /// Create a `NETWORK_ERROR` error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::App, ErrorCode::NetworkError, msg)
    }

    /// Create a `VALIDATION_ERROR` error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::App, ErrorCode::ValidationError, msg)
    }

    /// Create an `INVALID_TEMPLATE` error
    pub fn invalid_template(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interpolation, ErrorCode::InvalidTemplate, msg)
    }

    /// Create an `INVALID_INPUT` error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interpolation, ErrorCode::InvalidInput, msg)
    }

    /// Create a `RECIPE_NOT_FOUND` error
    pub fn recipe_not_found(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::Storage,
            ErrorCode::RecipeNotFound,
            format!("Recipe {} not found", id),
        )
    }

    /// Create a `STORAGE_ERROR` error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, ErrorCode::StorageError, msg)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_user_message(mut self, msg: impl Into<String>) -> Self {
        self.user_message = msg.into();
        self
    }

    /// Attach an arbitrary underlying cause
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Critical errors are expected to send the UI to its recovery path.
    pub fn requires_recovery(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Whether this error still carries an untyped classification.
    pub fn is_untyped(&self) -> bool {
        self.code == ErrorCode::UnknownError
    }

    /// The innermost typed `AppError` code in the cause chain.
    ///
    /// `UNKNOWN_ERROR` links are skipped, so an untyped failure wrapped as
    /// `STREAMING_FAILED` reports `STREAMING_FAILED`.
    pub fn root_code(&self) -> ErrorCode {
        let mut code = self.code;
        let mut current = self;
        while let Some(next) = current
            .cause
            .as_deref()
            .and_then(|c| c.downcast_ref::<AppError>())
        {
            if !next.is_untyped() {
                code = next.code;
            }
            current = next;
        }
        code
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        Self::classify(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        Self::classify(s)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::storage(format!("Serialization error: {}", e)).with_cause(e)
    }
}
