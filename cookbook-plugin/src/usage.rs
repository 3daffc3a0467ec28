//! Usage tracking plugin.

use async_trait::async_trait;
use cookbook_core::error::AppError;
use cookbook_core::plugin::{Plugin, PluginPhase};
use cookbook_core::store::RecipeStore;
use cookbook_core::types::*;
use std::sync::Arc;

/// Marks a recipe as used in the store after each successful execution.
#[derive(Debug, Clone)]
pub struct UsageTrackingPlugin {
    store: Arc<dyn RecipeStore>,
}

impl UsageTrackingPlugin {
    pub fn new(store: Arc<dyn RecipeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Plugin for UsageTrackingPlugin {
    fn name(&self) -> &str {
        "usage_tracking"
    }

    fn enforce(&self) -> PluginPhase {
        PluginPhase::Post
    }

    async fn on_execution_end(
        &self,
        ctx: &ExecutionContext,
        result: &ExecutionResult,
    ) -> Result<(), AppError> {
        let Some(recipe_id) = ctx.recipe_id.as_deref() else {
            return Ok(());
        };
        if !result.success {
            return Ok(());
        }

        tracing::debug!(recipe_id, "marking recipe used");
        self.store.mark_used(recipe_id).await
    }
}
