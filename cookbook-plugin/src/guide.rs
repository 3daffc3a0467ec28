//! Guide plugin.
//!
//! Supplies the user's saved guide text to every recipe execution that does
//! not pass a guide explicitly.

use async_trait::async_trait;
use cookbook_core::error::AppError;
use cookbook_core::plugin::{Plugin, PluginPhase};
use cookbook_core::store::RecipeStore;
use cookbook_core::types::*;
use std::sync::Arc;

/// Loads guide text from a [`RecipeStore`]
#[derive(Debug, Clone)]
pub struct GuidePlugin {
    store: Arc<dyn RecipeStore>,
}

impl GuidePlugin {
    pub fn new(store: Arc<dyn RecipeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Plugin for GuidePlugin {
    fn name(&self) -> &str {
        "guide"
    }

    fn enforce(&self) -> PluginPhase {
        PluginPhase::Pre
    }

    async fn resolve_guide(&self, ctx: &ExecutionContext) -> Result<Option<String>, AppError> {
        // Custom prompts carry no recipe and take no guide.
        if ctx.mode == ExecutionMode::Custom {
            return Ok(None);
        }

        match self.store.get_guide().await {
            Ok(guide) => Ok(guide.filter(|g| !g.trim().is_empty())),
            Err(e) => {
                tracing::warn!(execution_id = %ctx.execution_id, "failed to load guide: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookbook_core::store::MemoryRecipeStore;

    #[tokio::test]
    async fn test_resolves_saved_guide() {
        let store = Arc::new(MemoryRecipeStore::new());
        let plugin = GuidePlugin::new(store.clone());
        let ctx = ExecutionContext::new("scripted", ExecutionMode::Recipe);

        assert_eq!(plugin.resolve_guide(&ctx).await.unwrap(), None);

        store.save_guide("   ".into()).await.unwrap();
        assert_eq!(plugin.resolve_guide(&ctx).await.unwrap(), None);

        store.save_guide("Reply in English.".into()).await.unwrap();
        assert_eq!(
            plugin.resolve_guide(&ctx).await.unwrap().as_deref(),
            Some("Reply in English.")
        );

        let custom = ExecutionContext::new("scripted", ExecutionMode::Custom);
        assert_eq!(plugin.resolve_guide(&custom).await.unwrap(), None);
    }
}
