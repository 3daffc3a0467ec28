//! Plugin system for executor-level extensibility.

use crate::error::AppError;
use crate::types::*;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Plugin execution phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginPhase {
    /// Execute before normal plugins
    Pre,
    /// Execute in normal order
    Normal,
    /// Execute after normal plugins
    Post,
}

/// Plugin trait for executor-level hooks.
///
/// Layers wrap the model runtime; plugins hook into the execution flow of
/// the [`PromptExecutor`](crate::PromptExecutor) and see recipes, prompts and
/// results.
#[async_trait]
pub trait Plugin: Send + Sync + Debug + 'static {
    /// Plugin name
    fn name(&self) -> &str;

    /// Plugin execution phase
    fn enforce(&self) -> PluginPhase {
        PluginPhase::Normal
    }

    // ==================== First Hooks ====================
    // These hooks execute until the first plugin returns Some.

    /// Supply guide text when the call did not pass one
    async fn resolve_guide(&self, _ctx: &ExecutionContext) -> Result<Option<String>, AppError> {
        Ok(None)
    }

    // ==================== Sequential Hooks ====================
    // Each plugin transforms the result of the previous one.

    /// Transform the interpolated prompt before it reaches a session
    async fn transform_prompt(
        &self,
        prompt: String,
        _ctx: &ExecutionContext,
    ) -> Result<String, AppError> {
        Ok(prompt)
    }

    // ==================== Parallel Hooks ====================
    // These hooks execute concurrently and are used for side effects.

    /// Hook called when an execution starts
    async fn on_execution_start(&self, _ctx: &ExecutionContext) -> Result<(), AppError> {
        Ok(())
    }

    /// Hook called when an execution succeeds
    async fn on_execution_end(
        &self,
        _ctx: &ExecutionContext,
        _result: &ExecutionResult,
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Hook called when an execution fails
    async fn on_error(&self, _error: &AppError, _ctx: &ExecutionContext) -> Result<(), AppError> {
        Ok(())
    }
}

/// Plugin execution engine.
///
/// Holds plugins sorted by phase; registration order is kept within a phase.
#[derive(Debug, Clone)]
pub struct PluginEngine {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginEngine {
    /// Create a new plugin engine
    pub fn new(mut plugins: Vec<Arc<dyn Plugin>>) -> Self {
        plugins.sort_by_key(|p| match p.enforce() {
            PluginPhase::Pre => 0,
            PluginPhase::Normal => 1,
            PluginPhase::Post => 2,
        });

        Self { plugins }
    }

    /// Get all plugins
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// First plugin that supplies a guide wins
    pub async fn resolve_guide(&self, ctx: &ExecutionContext) -> Result<Option<String>, AppError> {
        for plugin in &self.plugins {
            if let Some(guide) = plugin.resolve_guide(ctx).await? {
                return Ok(Some(guide));
            }
        }
        Ok(None)
    }

    /// Run sequential transform_prompt hooks
    pub async fn transform_prompt(
        &self,
        mut prompt: String,
        ctx: &ExecutionContext,
    ) -> Result<String, AppError> {
        for plugin in &self.plugins {
            prompt = plugin.transform_prompt(prompt, ctx).await?;
        }
        Ok(prompt)
    }

    /// Run parallel on_execution_start hooks
    pub async fn on_execution_start(&self, ctx: &ExecutionContext) -> Result<(), AppError> {
        use futures::future::try_join_all;

        let futures = self
            .plugins
            .iter()
            .map(|p| p.on_execution_start(ctx))
            .collect::<Vec<_>>();

        try_join_all(futures).await?;
        Ok(())
    }

    /// Run parallel on_execution_end hooks
    pub async fn on_execution_end(
        &self,
        ctx: &ExecutionContext,
        result: &ExecutionResult,
    ) -> Result<(), AppError> {
        use futures::future::try_join_all;

        let futures = self
            .plugins
            .iter()
            .map(|p| p.on_execution_end(ctx, result))
            .collect::<Vec<_>>();

        try_join_all(futures).await?;
        Ok(())
    }

    /// Run parallel on_error hooks
    pub async fn on_error(&self, error: &AppError, ctx: &ExecutionContext) -> Result<(), AppError> {
        use futures::future::try_join_all;

        let futures = self
            .plugins
            .iter()
            .map(|p| p.on_error(error, ctx))
            .collect::<Vec<_>>();

        try_join_all(futures).await?;
        Ok(())
    }
}

impl Default for PluginEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
