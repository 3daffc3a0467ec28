//! Model runtime backed by a local OpenAI-compatible server.
//!
//! Works with llama.cpp, Ollama, vLLM, LM Studio and similar servers. The
//! availability probe lists the server's models with a short timeout; prompts
//! go through async-openai chat completions.

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use cookbook_core::error::{AppError, ErrorCode, ErrorKind};
use cookbook_core::runtime::{ModelRuntime, ModelSession, TextStream};
use cookbook_core::types::*;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

/// Default endpoint of a local Ollama server
pub const DEFAULT_API_BASE: &str = "http://localhost:11434/v1";

/// Runtime for a local OpenAI-compatible server
#[derive(Clone)]
pub struct OpenAiCompatRuntime {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: Arc<str>,
    allow_download: bool,
    info: Arc<RuntimeInfo>,
}

impl std::fmt::Debug for OpenAiCompatRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatRuntime")
            .field("info", &self.info)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiCompatRuntime {
    /// Create a builder for more configuration options
    pub fn builder() -> OpenAiCompatBuilder {
        OpenAiCompatBuilder::default()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Interpret a model listing. A missing model is `Downloadable` when the
/// server pulls models on first use.
fn state_for_models(models: &ModelList, model: &str, allow_download: bool) -> AvailabilityState {
    if models.data.iter().any(|m| m.id == model) {
        AvailabilityState::Available
    } else if allow_download {
        AvailabilityState::Downloadable
    } else {
        AvailabilityState::Unavailable
    }
}

#[async_trait]
impl ModelRuntime for OpenAiCompatRuntime {
    fn info(&self) -> Arc<RuntimeInfo> {
        self.info.clone()
    }

    async fn availability(&self) -> Result<AvailabilityState, AppError> {
        let mut request = self.http.get(format!("{}/models", self.api_base));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            // Nothing listening: the runtime is not there.
            Err(e) if e.is_connect() => {
                tracing::debug!("model server unreachable at {}: {}", self.api_base, e);
                return Ok(AvailabilityState::Unavailable);
            }
            Err(e) if e.is_timeout() => {
                return Err(AppError::timeout(format!(
                    "Availability probe timed out: {}",
                    self.api_base
                ))
                .with_cause(e))
            }
            Err(e) => {
                return Err(AppError::network(format!("Availability probe failed: network error: {}", e))
                    .with_cause(e))
            }
        };

        if !response.status().is_success() {
            return Err(AppError::classify(format!(
                "Availability probe returned {}",
                response.status()
            )));
        }

        let models: ModelList = response.json().await.map_err(|e| {
            AppError::new(
                ErrorKind::Ai,
                ErrorCode::UnknownError,
                format!("Unreadable model list from {}: {}", self.api_base, e),
            )
            .with_cause(e)
        })?;

        Ok(state_for_models(&models, &self.model, self.allow_download))
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn ModelSession>, AppError> {
        tracing::debug!(
            model = %self.model,
            top_k = config.top_k,
            "top_k is not part of the chat completions protocol and is not sent"
        );

        Ok(Box::new(OpenAiCompatSession {
            client: self.client.clone(),
            model: self.model.clone(),
            config,
            destroyed: AtomicBool::new(false),
        }))
    }
}

/// One logical session. The protocol is stateless, so destroying only
/// invalidates the handle.
struct OpenAiCompatSession {
    client: Client<OpenAIConfig>,
    model: Arc<str>,
    config: SessionConfig,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for OpenAiCompatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatSession")
            .field("model", &self.model)
            .field("config", &self.config)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl OpenAiCompatSession {
    fn build_request(&self, text: &str, stream: bool) -> Result<CreateChatCompletionRequest, AppError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(AppError::new(
                ErrorKind::Ai,
                ErrorCode::PromptExecutionFailed,
                "Session already destroyed",
            ));
        }

        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(text)
            .build()
            .map_err(|e| AppError::invalid_input(format!("Failed to build user message: {}", e)))?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(self.model.as_ref())
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .temperature(self.config.temperature);
        if stream {
            builder.stream(true);
        }

        builder
            .build()
            .map_err(|e| AppError::invalid_input(format!("Failed to build request: {}", e)))
    }
}

#[async_trait]
impl ModelSession for OpenAiCompatSession {
    async fn prompt(&self, text: &str) -> Result<String, AppError> {
        let request = self.build_request(text, false)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| map_openai_error("Chat completion failed", e))?;

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            AppError::new(
                ErrorKind::Ai,
                ErrorCode::PromptExecutionFailed,
                "No choices in response",
            )
        })?;

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn prompt_streaming(&self, text: &str) -> Result<Box<TextStream>, AppError> {
        let request = self.build_request(text, true)?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| map_openai_error("Chat completion stream failed", e))?;

        // Role-only and empty deltas carry no text.
        let chunks = stream.filter_map(|result| match result {
            Ok(response) => response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|content| !content.is_empty())
                .map(Ok),
            Err(e) => Some(Err(map_openai_error("Stream error", e))),
        });

        Ok(Box::new(chunks) as Box<TextStream>)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            tracing::warn!(model = %self.model, "session destroyed twice");
        }
    }
}

fn map_openai_error(context: &str, e: OpenAIError) -> AppError {
    let err = match &e {
        OpenAIError::Reqwest(inner) if inner.is_timeout() => {
            AppError::timeout(format!("{}: request timed out", context))
        }
        OpenAIError::Reqwest(inner) => {
            AppError::network(format!("{}: network error: {}", context, inner))
        }
        other => AppError::classify(format!("{}: {}", context, other)),
    };
    err.with_cause(e)
}

/// Builder for [`OpenAiCompatRuntime`]
#[derive(Debug)]
pub struct OpenAiCompatBuilder {
    api_base: String,
    api_key: Option<String>,
    model: Option<String>,
    allow_download: bool,
    probe_timeout: Duration,
    id: String,
    name: String,
}

impl Default for OpenAiCompatBuilder {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: None,
            allow_download: false,
            probe_timeout: Duration::from_secs(2),
            id: "openai_compat".to_string(),
            name: "OpenAI-compatible".to_string(),
        }
    }
}

impl OpenAiCompatBuilder {
    /// Set API base URL, e.g. `http://localhost:8080/v1`
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set API key; most local servers need none
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the model to run
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Report a missing model as downloadable instead of unavailable
    pub fn allow_download(mut self, allow: bool) -> Self {
        self.allow_download = allow;
        self
    }

    /// Set the availability probe timeout
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the runtime id and display name
    pub fn runtime_id(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.id = id.into();
        self.name = name.into();
        self
    }

    /// Build the runtime
    pub fn build(self) -> Result<OpenAiCompatRuntime, AppError> {
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| AppError::validation("Model name is required"))?;
        let api_base = self.api_base.trim_end_matches('/').to_string();
        if api_base.is_empty() {
            return Err(AppError::validation("API base URL is required"));
        }

        // async-openai always sends a bearer token; local servers ignore it.
        let config = OpenAIConfig::new()
            .with_api_base(api_base.clone())
            .with_api_key(self.api_key.clone().unwrap_or_else(|| "local".to_string()));

        let http = reqwest::Client::builder()
            .timeout(self.probe_timeout)
            .build()
            .map_err(|e| {
                AppError::validation(format!("Failed to build HTTP client: {}", e)).with_cause(e)
            })?;

        Ok(OpenAiCompatRuntime {
            client: Client::with_config(config),
            http,
            api_base,
            api_key: self.api_key,
            model: Arc::from(model),
            allow_download: self.allow_download,
            info: Arc::new(RuntimeInfo {
                id: self.id,
                name: self.name,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(ids: &[&str]) -> ModelList {
        ModelList {
            data: ids
                .iter()
                .map(|id| ModelEntry { id: id.to_string() })
                .collect(),
        }
    }

    #[test]
    fn test_builder_requires_model() {
        let err = OpenAiCompatRuntime::builder().build().unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_builder_normalizes_base() {
        let runtime = OpenAiCompatRuntime::builder()
            .api_base("http://127.0.0.1:8080/v1/")
            .model("llama3.2")
            .runtime_id("llama_cpp", "llama.cpp")
            .build()
            .unwrap();

        assert_eq!(runtime.api_base(), "http://127.0.0.1:8080/v1");
        assert_eq!(runtime.model(), "llama3.2");
        assert_eq!(runtime.info().id, "llama_cpp");
    }

    #[test]
    fn test_model_listing() {
        let listed = models(&["llama3.2", "qwen2.5"]);
        assert_eq!(
            state_for_models(&listed, "qwen2.5", false),
            AvailabilityState::Available
        );
        assert_eq!(
            state_for_models(&listed, "mistral", false),
            AvailabilityState::Unavailable
        );
        assert_eq!(
            state_for_models(&listed, "mistral", true),
            AvailabilityState::Downloadable
        );

        let parsed: ModelList =
            serde_json::from_str(r#"{"object":"list","data":[{"id":"phi3","object":"model"}]}"#)
                .unwrap();
        assert_eq!(
            state_for_models(&parsed, "phi3", false),
            AvailabilityState::Available
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Port 9 (discard) is closed on test machines.
        let runtime = OpenAiCompatRuntime::builder()
            .api_base("http://127.0.0.1:9/v1")
            .model("llama3.2")
            .probe_timeout(Duration::from_millis(500))
            .build()
            .unwrap();

        let state = runtime.availability().await;
        assert!(matches!(
            state,
            Ok(AvailabilityState::Unavailable) | Err(_)
        ));
    }

    #[tokio::test]
    async fn test_destroyed_session_rejects_prompts() {
        let runtime = OpenAiCompatRuntime::builder()
            .model("llama3.2")
            .build()
            .unwrap();
        let session = runtime
            .create_session(SessionConfig::default())
            .await
            .unwrap();
        session.destroy();

        let err = session.prompt("hello").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PromptExecutionFailed);
    }
}
