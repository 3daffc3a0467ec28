//! Core types for recipe execution.

use crate::error::AppError;
use crate::resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Readiness of the host model runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityState {
    Unavailable,
    Downloadable,
    Downloading,
    Available,
}

impl AvailabilityState {
    /// Execution may proceed when the model is available, or downloadable
    /// (the download starts with the first session).
    pub fn can_execute(&self) -> bool {
        matches!(
            self,
            AvailabilityState::Available | AvailabilityState::Downloadable
        )
    }
}

impl fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AvailabilityState::Unavailable => "unavailable",
            AvailabilityState::Downloadable => "downloadable",
            AvailabilityState::Downloading => "downloading",
            AvailabilityState::Available => "available",
        };
        f.write_str(s)
    }
}

/// Generation limits reported by the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub default_temperature: f32,
    pub max_temperature: f32,
    pub default_top_k: u32,
    pub max_top_k: u32,
    /// False when the runtime exposed no capability query and these are
    /// synthetic defaults.
    pub reported: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            default_temperature: SessionConfig::DEFAULT_TEMPERATURE,
            max_temperature: 2.0,
            default_top_k: SessionConfig::DEFAULT_TOP_K,
            max_top_k: 128,
            reported: false,
        }
    }
}

/// Generation parameters bound to a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub temperature: f32,
    pub top_k: u32,
}

impl SessionConfig {
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;
    pub const DEFAULT_TOP_K: u32 = 40;

    pub fn new(temperature: f32, top_k: u32) -> Self {
        Self { temperature, top_k }
    }

    /// Reject values no runtime accepts
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(AppError::validation(format!(
                "Invalid temperature {}: must be a finite, non-negative number",
                self.temperature
            )));
        }
        if self.top_k == 0 {
            return Err(AppError::validation("Invalid topK 0: must be at least 1"));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TEMPERATURE, Self::DEFAULT_TOP_K)
    }
}

/// How untrusted user input is cleaned before it enters a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizationPolicy {
    /// Input longer than this many characters is truncated
    pub max_length: usize,
    /// When false, tag-like substrings are stripped
    pub allow_html: bool,
    /// When true, quotes, backslashes and control whitespace are escaped
    pub escape_special_chars: bool,
}

impl SanitizationPolicy {
    pub fn new() -> Self {
        Self {
            max_length: 10_000,
            allow_html: false,
            escape_special_chars: true,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_allow_html(mut self, allow_html: bool) -> Self {
        self.allow_html = allow_html;
        self
    }

    pub fn with_escape_special_chars(mut self, escape: bool) -> Self {
        self.escape_special_chars = escape;
        self
    }
}

impl Default for SanitizationPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// A named prompt template plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at_ms: Option<u64>,
    #[serde(default)]
    pub use_count: u64,
}

impl Recipe {
    /// Create a new recipe with a generated id
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: generate_id("recipe"),
            name: name.into(),
            prompt: prompt.into(),
            tags: Vec::new(),
            pinned: false,
            created_at_ms: now_ms(),
            last_used_at_ms: None,
            use_count: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }
}

/// Per-call execution options. Unset fields fall back to the executor's
/// [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitization: Option<SanitizationPolicy>,
    /// Guide text prepended to the prompt; overrides guide plugins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guide: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "crate::resilience::opt_duration_ms"
    )]
    pub timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set top-k
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Set sanitization policy
    pub fn with_sanitization(mut self, policy: SanitizationPolicy) -> Self {
        self.sanitization = Some(policy);
        self
    }

    /// Set guide text
    pub fn with_guide(mut self, guide: impl Into<String>) -> Self {
        self.guide = Some(guide.into());
        self
    }

    /// Set per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Outcome of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<crate::error::ErrorCode>,
    pub execution_time_ms: u64,
    /// Rough estimate, `ceil(chars / 4)`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

impl ExecutionResult {
    pub fn succeeded(response: String, execution_time_ms: u64, tokens_used: u32) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
            error_code: None,
            execution_time_ms,
            tokens_used: Some(tokens_used),
        }
    }

    pub fn failed(error: &AppError, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.message.clone()),
            error_code: Some(error.root_code()),
            execution_time_ms,
            tokens_used: None,
        }
    }
}

/// Which executor entry point produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Recipe,
    Streaming,
    Custom,
}

/// A finished execution kept in the in-process history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_name: Option<String>,
    pub mode: ExecutionMode,
    pub result: ExecutionResult,
    pub completed_at_ms: u64,
}

/// Aggregate statistics over the execution history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub average_execution_time_ms: f64,
    pub total_tokens_used: u64,
}

/// Runtime information
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    pub id: String,
    pub name: String,
}

/// Context handed to plugins for one execution
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub runtime_id: String,
    pub mode: ExecutionMode,
    pub recipe_id: Option<String>,
    pub recipe_name: Option<String>,
    pub metadata: Arc<HashMap<String, String>>,
}

impl ExecutionContext {
    /// Create a new execution context with a fresh id
    pub fn new(runtime_id: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            execution_id: generate_id("exec"),
            runtime_id: runtime_id.into(),
            mode,
            recipe_id: None,
            recipe_name: None,
            metadata: Arc::new(HashMap::new()),
        }
    }

    /// Attach the recipe being executed
    pub fn with_recipe(mut self, recipe: &Recipe) -> Self {
        self.recipe_id = Some(recipe.id.clone());
        self.recipe_name = Some(recipe.name.clone());
        self
    }

    /// Create context with metadata
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Arc::new(metadata);
        self
    }
}

/// Generate a globally unique id: `<prefix>_<unix millis>_<random suffix>`
pub fn generate_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, now_ms(), &suffix[..8])
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Approximate token count: `ceil(chars / 4)`
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    chars.div_ceil(4) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_execute() {
        assert!(AvailabilityState::Available.can_execute());
        assert!(AvailabilityState::Downloadable.can_execute());
        assert!(!AvailabilityState::Downloading.can_execute());
        assert!(!AvailabilityState::Unavailable.can_execute());
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_id("exec");
        let b = generate_id("exec");
        assert!(a.starts_with("exec_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(SessionConfig::new(-0.1, 40).validate().is_err());
        assert!(SessionConfig::new(f32::NAN, 40).validate().is_err());
        assert!(SessionConfig::new(0.7, 0).validate().is_err());
    }

    #[test]
    fn test_execution_options_deserialize() {
        let opts: ExecutionOptions =
            serde_json::from_str(r#"{"temperature": 0.2, "timeout": 5000}"#).unwrap();
        assert_eq!(opts.temperature, Some(0.2));
        assert_eq!(opts.top_k, None);
        assert_eq!(opts.timeout, Some(Duration::from_millis(5000)));
    }
}
