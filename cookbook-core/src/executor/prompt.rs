//! PromptExecutor implementation.

use super::stream::{execution_failed, RecipeStream, StreamRecorder};
use crate::config::EngineConfig;
use crate::error::AppError;
use crate::history::ExecutionHistory;
use crate::layer::Layer;
use crate::monitor::AvailabilityMonitor;
use crate::plugin::{Plugin, PluginEngine};
use crate::resilience::{with_retry, with_timeout};
use crate::runtime::ModelRuntime;
use crate::session::SessionManager;
use crate::template;
use crate::types::*;
use std::sync::Arc;
use tokio::time::Instant;

/// Builder for composing a model runtime with layers, plugins and config.
///
/// # Example
///
/// ```ignore
/// let executor = PromptExecutor::builder(runtime)
///     .layer(LoggingLayer::new())
///     .layer(TimeoutLayer::new(Duration::from_secs(10)))
///     .plugin(Arc::new(GuidePlugin::new(store.clone())))
///     .config(EngineConfig::default())
///     .finish();
/// ```
pub struct PromptExecutorBuilder<R> {
    runtime: R,
    plugins: Vec<Arc<dyn Plugin>>,
    config: EngineConfig,
    history: Option<Arc<ExecutionHistory>>,
}

impl<R: ModelRuntime> PromptExecutorBuilder<R> {
    /// Create a new builder with a runtime
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            plugins: Vec::new(),
            config: EngineConfig::default(),
            history: None,
        }
    }

    /// Add a layer to wrap the runtime
    ///
    /// Each call wraps the previous runtime in a new concrete type.
    pub fn layer<L>(self, layer: L) -> PromptExecutorBuilder<L::LayeredRuntime>
    where
        L: Layer<R>,
    {
        PromptExecutorBuilder {
            runtime: layer.layer(self.runtime),
            plugins: self.plugins,
            config: self.config,
            history: self.history,
        }
    }

    /// Add a plugin to the executor
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Replace the engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Record into a shared history instead of a private one
    pub fn history(mut self, history: Arc<ExecutionHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Finish building and create a PromptExecutor
    pub fn finish(self) -> PromptExecutor {
        let runtime: Arc<dyn ModelRuntime> = Arc::new(self.runtime);
        let monitor = Arc::new(AvailabilityMonitor::with_config(
            runtime.clone(),
            self.config.monitor.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(runtime.clone(), monitor.clone()));

        PromptExecutor {
            runtime,
            monitor,
            sessions,
            plugin_engine: PluginEngine::new(self.plugins),
            history: self.history.unwrap_or_default(),
            config: self.config,
        }
    }
}

/// Runs recipes and custom prompts against a model runtime.
///
/// This is the main entry point of the engine. Every call gets its own
/// execution id and its own session; calls may run concurrently.
#[derive(Debug)]
pub struct PromptExecutor {
    runtime: Arc<dyn ModelRuntime>,
    monitor: Arc<AvailabilityMonitor>,
    sessions: Arc<SessionManager>,
    plugin_engine: PluginEngine,
    history: Arc<ExecutionHistory>,
    config: EngineConfig,
}

impl PromptExecutor {
    /// Create a new builder
    pub fn builder<R: ModelRuntime>(runtime: R) -> PromptExecutorBuilder<R> {
        PromptExecutorBuilder::new(runtime)
    }

    /// Get runtime information
    pub fn info(&self) -> Arc<RuntimeInfo> {
        self.runtime.info()
    }

    pub fn monitor(&self) -> &Arc<AvailabilityMonitor> {
        &self.monitor
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Get reference to the plugin engine
    pub fn plugin_engine(&self) -> &PluginEngine {
        &self.plugin_engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a recipe once and wait for the full response.
    ///
    /// Failures are recorded, then returned as `EXECUTION_FAILED` wrapping
    /// the cause.
    pub async fn execute_recipe(
        &self,
        recipe: &Recipe,
        user_input: &str,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult, AppError> {
        let ctx = self.context(ExecutionMode::Recipe).with_recipe(recipe);
        let started = Instant::now();
        tracing::debug!(
            execution_id = %ctx.execution_id,
            recipe_id = %recipe.id,
            input_len = user_input.len(),
            "executing recipe"
        );

        let outcome = async {
            self.plugin_engine.on_execution_start(&ctx).await?;
            validate(recipe, user_input)?;
            self.ensure_available().await?;
            let prompt = self.build_prompt(recipe, user_input, options, &ctx).await?;
            let response = self.run_prompt(&prompt, options).await?;
            Ok::<_, AppError>((prompt, response))
        }
        .await;

        self.complete(&ctx, started, outcome).await
    }

    /// Run a recipe and stream the response.
    ///
    /// Setup failures (validation, availability, session creation) are
    /// recorded and returned here. Session setup runs under the timeout and
    /// retry policy; once the first chunk may have been produced, nothing is
    /// retried.
    pub async fn execute_recipe_streaming(
        &self,
        recipe: &Recipe,
        user_input: &str,
        options: &ExecutionOptions,
    ) -> Result<RecipeStream, AppError> {
        let ctx = self.context(ExecutionMode::Streaming).with_recipe(recipe);
        let started = Instant::now();
        tracing::debug!(
            execution_id = %ctx.execution_id,
            recipe_id = %recipe.id,
            input_len = user_input.len(),
            "executing recipe (streaming)"
        );

        let setup = async {
            self.plugin_engine.on_execution_start(&ctx).await?;
            validate(recipe, user_input)?;
            self.ensure_available().await?;
            let prompt = self.build_prompt(recipe, user_input, options, &ctx).await?;

            let config = self.session_config(options);
            let timeout = options.timeout.unwrap_or(self.config.timeout);
            let retry = options.retry.as_ref().unwrap_or(&self.config.retry);
            let sessions = &self.sessions;
            let prompt = prompt.as_str();
            with_retry(retry, move || {
                with_timeout(sessions.execute_prompt_streaming(prompt, config), timeout)
            })
            .await
        }
        .await;

        match setup {
            Ok(chunks) => {
                let recorder = StreamRecorder::new(ctx, self.history.clone(), started);
                Ok(RecipeStream::new(chunks, recorder, self.plugin_engine.clone()))
            }
            Err(cause) => Err(self.fail(&ctx, started, cause).await),
        }
    }

    /// Run free-form prompt text.
    ///
    /// No placeholder or guide handling; the text is sanitized only when
    /// `options.sanitization` is set.
    pub async fn execute_custom_prompt(
        &self,
        prompt_text: &str,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult, AppError> {
        let ctx = self.context(ExecutionMode::Custom);
        let started = Instant::now();
        tracing::debug!(
            execution_id = %ctx.execution_id,
            prompt_len = prompt_text.len(),
            "executing custom prompt"
        );

        let outcome = async {
            self.plugin_engine.on_execution_start(&ctx).await?;
            if prompt_text.trim().is_empty() {
                return Err(AppError::invalid_input("Prompt text must not be empty"));
            }
            self.ensure_available().await?;
            let prompt = match &options.sanitization {
                Some(policy) => template::sanitize(prompt_text, policy),
                None => prompt_text.to_string(),
            };
            let response = self.run_prompt(&prompt, options).await?;
            Ok::<_, AppError>((prompt, response))
        }
        .await;

        self.complete(&ctx, started, outcome).await
    }

    /// Build the prompt `execute_recipe` would send, without executing it.
    pub async fn preview_prompt(
        &self,
        recipe: &Recipe,
        user_input: &str,
        options: &ExecutionOptions,
    ) -> Result<String, AppError> {
        let ctx = self.context(ExecutionMode::Recipe).with_recipe(recipe);
        validate(recipe, user_input)?;
        self.build_prompt(recipe, user_input, options, &ctx).await
    }

    /// Aggregate statistics over the history
    pub fn execution_stats(&self) -> ExecutionStats {
        self.history.stats()
    }

    /// All recorded executions in completion order
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.history.records()
    }

    pub fn execution(&self, id: &str) -> Option<ExecutionRecord> {
        self.history.get(id)
    }

    pub fn clear_history(&self) {
        self.history.clear();
    }

    fn context(&self, mode: ExecutionMode) -> ExecutionContext {
        ExecutionContext::new(self.runtime.info().id.clone(), mode)
    }

    fn session_config(&self, options: &ExecutionOptions) -> SessionConfig {
        SessionConfig {
            temperature: options.temperature.unwrap_or(self.config.session.temperature),
            top_k: options.top_k.unwrap_or(self.config.session.top_k),
        }
    }

    async fn ensure_available(&self) -> Result<(), AppError> {
        self.monitor.ensure_ready().await
    }

    async fn build_prompt(
        &self,
        recipe: &Recipe,
        user_input: &str,
        options: &ExecutionOptions,
        ctx: &ExecutionContext,
    ) -> Result<String, AppError> {
        // An explicit guide, even a blank one, overrides guide plugins.
        let guide = match &options.guide {
            Some(guide) => Some(guide.clone()),
            None => self.plugin_engine.resolve_guide(ctx).await?,
        };
        let policy = options
            .sanitization
            .as_ref()
            .unwrap_or(&self.config.sanitization);

        let interpolation =
            template::interpolate(&recipe.prompt, user_input, Some(policy), guide.as_deref())?;
        self.plugin_engine
            .transform_prompt(interpolation.prompt, ctx)
            .await
    }

    async fn run_prompt(&self, prompt: &str, options: &ExecutionOptions) -> Result<String, AppError> {
        let config = self.session_config(options);
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let retry = options.retry.as_ref().unwrap_or(&self.config.retry);
        let sessions = &self.sessions;

        with_retry(retry, move || {
            with_timeout(sessions.execute_prompt(prompt, config), timeout)
        })
        .await
    }

    async fn complete(
        &self,
        ctx: &ExecutionContext,
        started: Instant,
        outcome: Result<(String, String), AppError>,
    ) -> Result<ExecutionResult, AppError> {
        let (prompt, response) = match outcome {
            Ok(pair) => pair,
            Err(cause) => return Err(self.fail(ctx, started, cause).await),
        };

        let elapsed = started.elapsed().as_millis() as u64;
        let chars = prompt.chars().count() + response.chars().count();
        let result = ExecutionResult::succeeded(response, elapsed, chars.div_ceil(4) as u32);
        self.record(ctx, result.clone());
        tracing::debug!(
            execution_id = %ctx.execution_id,
            execution_time_ms = elapsed,
            "execution succeeded"
        );
        if let Err(e) = self.plugin_engine.on_execution_end(ctx, &result).await {
            tracing::warn!("on_execution_end hook failed: {}", e);
        }
        Ok(result)
    }

    async fn fail(&self, ctx: &ExecutionContext, started: Instant, cause: AppError) -> AppError {
        let elapsed = started.elapsed().as_millis() as u64;
        let err = execution_failed(cause);
        self.record(ctx, ExecutionResult::failed(&err, elapsed));
        tracing::error!(
            execution_id = %ctx.execution_id,
            code = %err.root_code(),
            execution_time_ms = elapsed,
            "execution failed: {}",
            err
        );
        if let Err(e) = self.plugin_engine.on_error(&err, ctx).await {
            tracing::warn!("on_error hook failed: {}", e);
        }
        err
    }

    fn record(&self, ctx: &ExecutionContext, result: ExecutionResult) {
        self.history.record(ExecutionRecord {
            id: ctx.execution_id.clone(),
            recipe_id: ctx.recipe_id.clone(),
            recipe_name: ctx.recipe_name.clone(),
            mode: ctx.mode,
            result,
            completed_at_ms: now_ms(),
        });
    }
}

fn validate(recipe: &Recipe, user_input: &str) -> Result<(), AppError> {
    if recipe.prompt.trim().is_empty() {
        return Err(AppError::invalid_template(format!(
            "Recipe {} has an empty prompt",
            recipe.id
        )));
    }
    if user_input.trim().is_empty() {
        return Err(AppError::invalid_input("User input must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, ErrorCode};
    use crate::resilience::RetryPolicy;
    use crate::scripted::ScriptedRuntime;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::time::Duration;

    fn executor(runtime: Arc<ScriptedRuntime>) -> PromptExecutor {
        PromptExecutor::builder(runtime).finish()
    }

    fn summarize() -> Recipe {
        Recipe::new("Summarize", "Summarize: {input}").with_id("summarize")
    }

    #[tokio::test]
    async fn test_execute_recipe_records_success() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let executor = executor(runtime.clone());

        let result = executor
            .execute_recipe(&summarize(), "hello", &ExecutionOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.response.as_deref(), Some("Echo: Summarize: hello"));
        // "Summarize: hello" + "Echo: Summarize: hello" = 38 chars
        assert_eq!(result.tokens_used, Some(10));
        assert_eq!(runtime.last_prompt().as_deref(), Some("Summarize: hello"));
        assert_eq!(runtime.last_config(), Some(SessionConfig::default()));
        assert_eq!(runtime.sessions_created(), 1);
        assert_eq!(runtime.sessions_destroyed(), 1);
        assert_eq!(executor.sessions().active_sessions(), 0);

        let history = executor.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].recipe_id.as_deref(), Some("summarize"));
        assert_eq!(history[0].mode, ExecutionMode::Recipe);
        assert_eq!(executor.execution(&history[0].id).unwrap().result, result);
    }

    #[tokio::test]
    async fn test_options_override_session_config() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let executor = executor(runtime.clone());
        let options = ExecutionOptions::new().with_temperature(0.1).with_top_k(5);

        executor
            .execute_recipe(&summarize(), "hello", &options)
            .await
            .unwrap();

        assert_eq!(runtime.last_config(), Some(SessionConfig::new(0.1, 5)));
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_wrapped_and_recorded() {
        let runtime = Arc::new(ScriptedRuntime::new().fail_next_prompt("permission denied"));
        let executor = executor(runtime.clone());

        let err = executor
            .execute_recipe(&summarize(), "hello", &ExecutionOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::ExecutionFailed);
        assert_eq!(err.root_code(), ErrorCode::PermissionDenied);
        assert_eq!(err.category, ErrorCategory::Permission);
        assert!(!err.is_retryable());
        assert_eq!(runtime.sessions_created(), 1);
        assert_eq!(runtime.sessions_destroyed(), 1);

        let stats = executor.execution_stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.failed_executions, 1);
        let record = &executor.history()[0];
        assert_eq!(record.result.error_code, Some(ErrorCode::PermissionDenied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let runtime = Arc::new(
            ScriptedRuntime::new()
                .fail_next_prompt("network error")
                .fail_next_prompt("rate limit reached"),
        );
        let executor = executor(runtime.clone());

        let result = executor
            .execute_recipe(&summarize(), "hello", &ExecutionOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(runtime.sessions_created(), 3);
        assert_eq!(runtime.sessions_destroyed(), 3);
        assert_eq!(runtime.double_destroys(), 0);
        assert_eq!(executor.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_destroys_orphaned_session() {
        let runtime = Arc::new(ScriptedRuntime::new().with_prompt_delay(Duration::from_secs(5)));
        let executor = executor(runtime.clone());
        let options = ExecutionOptions::new()
            .with_timeout(Duration::from_secs(1))
            .with_retry(RetryPolicy::none());

        let err = executor
            .execute_recipe(&summarize(), "hello", &options)
            .await
            .unwrap_err();

        assert_eq!(err.root_code(), ErrorCode::TimeoutError);
        assert_eq!(err.category, ErrorCategory::Timeout);
        assert!(err.is_retryable());
        assert_eq!(runtime.sessions_created(), 1);
        assert_eq!(runtime.sessions_destroyed(), 1);
        assert_eq!(executor.sessions().active_sessions(), 0);
        let elapsed = executor.history()[0].result.execution_time_ms;
        assert!((1000..5000).contains(&elapsed));
    }

    #[tokio::test]
    async fn test_unavailable_model_requires_recovery() {
        let runtime =
            Arc::new(ScriptedRuntime::new().with_availability(AvailabilityState::Unavailable));
        let executor = executor(runtime.clone());

        let err = executor
            .execute_recipe(&summarize(), "hello", &ExecutionOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.root_code(), ErrorCode::ApiNotAvailable);
        assert!(err.requires_recovery());
        assert_eq!(runtime.sessions_created(), 0);
        assert_eq!(executor.execution_stats().failed_executions, 1);
    }

    #[tokio::test]
    async fn test_invalid_recipe_and_input() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let executor = executor(runtime.clone());

        let empty = Recipe::new("Empty", "  ");
        let err = executor
            .execute_recipe(&empty, "hello", &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.root_code(), ErrorCode::InvalidTemplate);

        let err = executor
            .execute_recipe(&summarize(), " \n", &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.root_code(), ErrorCode::InvalidInput);

        assert_eq!(runtime.availability_queries(), 0);
        assert_eq!(executor.execution_stats().failed_executions, 2);
    }

    #[derive(Debug)]
    struct StaticGuide;

    #[async_trait]
    impl Plugin for StaticGuide {
        fn name(&self) -> &str {
            "static_guide"
        }

        async fn resolve_guide(&self, _ctx: &ExecutionContext) -> Result<Option<String>, AppError> {
            Ok(Some("  Be brief.  ".to_string()))
        }
    }

    #[tokio::test]
    async fn test_guide_resolution() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let executor = PromptExecutor::builder(runtime.clone())
            .plugin(Arc::new(StaticGuide))
            .finish();

        executor
            .execute_recipe(&summarize(), "hello", &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(
            runtime.last_prompt().as_deref(),
            Some("Be brief.\n\nSummarize: hello")
        );

        let preview = executor
            .preview_prompt(
                &summarize(),
                "hello",
                &ExecutionOptions::new().with_guide("Use French."),
            )
            .await
            .unwrap();
        assert_eq!(preview, "Use French.\n\nSummarize: hello");

        let preview = executor
            .preview_prompt(&summarize(), "hello", &ExecutionOptions::new().with_guide(""))
            .await
            .unwrap();
        assert_eq!(preview, "Summarize: hello");
    }

    #[tokio::test]
    async fn test_streaming_matches_single_shot() {
        let runtime = Arc::new(ScriptedRuntime::new().with_chunk_size(3));
        let executor = executor(runtime.clone());
        let recipe = Recipe::new("Translate", "Translate to French");

        let single = executor
            .execute_recipe(&recipe, "good morning", &ExecutionOptions::default())
            .await
            .unwrap();

        let mut stream = executor
            .execute_recipe_streaming(&recipe, "good morning", &ExecutionOptions::default())
            .await
            .unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap());
        }

        assert_eq!(Some(text.as_str()), single.response.as_deref());
        assert_eq!(
            runtime.last_prompt().as_deref(),
            Some("Translate to French good morning")
        );
        let summary = stream.finalize().unwrap();
        assert!(summary.success);
        assert_eq!(summary.response, single.response);

        let record = executor.execution(stream.execution_id()).unwrap();
        assert_eq!(record.mode, ExecutionMode::Streaming);
        assert_eq!(runtime.sessions_destroyed(), 2);
        assert_eq!(executor.execution_stats().successful_executions, 2);
    }

    #[tokio::test]
    async fn test_streaming_mid_failure() {
        let runtime = Arc::new(ScriptedRuntime::new().fail_stream_after(1, "connection reset"));
        let executor = executor(runtime.clone());

        let stream = executor
            .execute_recipe_streaming(&summarize(), "hello", &ExecutionOptions::default())
            .await
            .unwrap();
        let err = stream.into_result().await.unwrap_err();

        assert_eq!(err.code, ErrorCode::ExecutionFailed);
        assert_eq!(err.root_code(), ErrorCode::StreamingFailed);
        assert_eq!(runtime.sessions_destroyed(), 1);
        assert_eq!(executor.execution_stats().failed_executions, 1);
    }

    #[tokio::test]
    async fn test_dropped_stream_releases_session() {
        let runtime = Arc::new(ScriptedRuntime::new().with_chunk_size(2));
        let executor = executor(runtime.clone());

        let mut stream = executor
            .execute_recipe_streaming(&summarize(), "hello", &ExecutionOptions::default())
            .await
            .unwrap();
        stream.next().await.unwrap().unwrap();
        drop(stream);

        assert_eq!(runtime.sessions_destroyed(), 1);
        assert_eq!(executor.sessions().active_sessions(), 0);
        let record = &executor.history()[0];
        assert!(!record.result.success);
    }

    #[tokio::test]
    async fn test_custom_prompt_sanitization() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let executor = executor(runtime.clone());

        executor
            .execute_custom_prompt("Say \"hi\" <b>now</b>", &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(
            runtime.last_prompt().as_deref(),
            Some("Say \"hi\" <b>now</b>")
        );

        let options = ExecutionOptions::new().with_sanitization(SanitizationPolicy::default());
        let result = executor
            .execute_custom_prompt("Say \"hi\" <b>now</b>", &options)
            .await
            .unwrap();
        assert_eq!(runtime.last_prompt().as_deref(), Some("Say \\\"hi\\\" now"));
        assert_eq!(executor.history()[1].mode, ExecutionMode::Custom);
        assert!(result.success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_executions() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let executor = Arc::new(executor(runtime.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let executor = executor.clone();
                tokio::spawn(async move {
                    executor
                        .execute_recipe(&summarize(), &format!("input {}", i), &ExecutionOptions::default())
                        .await
                })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            assert!(task.unwrap().unwrap().success);
        }

        assert_eq!(executor.history().len(), 16);
        assert_eq!(runtime.sessions_created(), 16);
        assert_eq!(runtime.sessions_destroyed(), 16);

        executor.clear_history();
        assert_eq!(executor.execution_stats(), ExecutionStats::default());
    }
}
