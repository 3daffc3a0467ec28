//! Recipe store interface and an in-memory implementation.
//!
//! Persistence belongs to the host application. The engine only reads recipes
//! and the guide, and reports back when a recipe was used.

use crate::error::AppError;
use crate::types::{now_ms, Recipe};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::RwLock;

/// Versioned key-value store for recipes and guide text
#[async_trait]
pub trait RecipeStore: Send + Sync + Debug + 'static {
    async fn get_recipe(&self, id: &str) -> Result<Option<Recipe>, AppError>;

    async fn get_recipes(&self) -> Result<Vec<Recipe>, AppError>;

    async fn add_recipe(&self, recipe: Recipe) -> Result<Recipe, AppError>;

    async fn update_recipe(&self, recipe: Recipe) -> Result<Recipe, AppError>;

    async fn delete_recipe(&self, id: &str) -> Result<bool, AppError>;

    async fn get_guide(&self) -> Result<Option<String>, AppError>;

    async fn save_guide(&self, guide: String) -> Result<(), AppError>;

    async fn clear_guide(&self) -> Result<(), AppError>;

    /// Record that a recipe was just executed
    async fn mark_used(&self, id: &str) -> Result<(), AppError>;
}

/// Serialized form of a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u64,
    #[serde(default)]
    pub recipes: Vec<Recipe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide: Option<String>,
}

/// In-memory [`RecipeStore`]. Every write bumps the version.
#[derive(Debug, Default)]
pub struct MemoryRecipeStore {
    state: RwLock<StoreSnapshot>,
}

impl MemoryRecipeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with recipes
    pub fn with_recipes(recipes: Vec<Recipe>) -> Self {
        Self {
            state: RwLock::new(StoreSnapshot {
                version: 1,
                recipes,
                guide: None,
            }),
        }
    }

    /// Load a store from its JSON snapshot
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let snapshot: StoreSnapshot = serde_json::from_str(json)?;
        Ok(Self {
            state: RwLock::new(snapshot),
        })
    }

    /// Export the store as a JSON snapshot
    pub fn to_json(&self) -> Result<String, AppError> {
        let state = self.read()?;
        Ok(serde_json::to_string_pretty(&*state)?)
    }

    pub fn version(&self) -> u64 {
        self.read().map(|s| s.version).unwrap_or_default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreSnapshot>, AppError> {
        self.state
            .read()
            .map_err(|_| AppError::storage("Recipe store corrupted: lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreSnapshot>, AppError> {
        self.state
            .write()
            .map_err(|_| AppError::storage("Recipe store corrupted: lock poisoned"))
    }
}

#[async_trait]
impl RecipeStore for MemoryRecipeStore {
    async fn get_recipe(&self, id: &str) -> Result<Option<Recipe>, AppError> {
        Ok(self.read()?.recipes.iter().find(|r| r.id == id).cloned())
    }

    async fn get_recipes(&self) -> Result<Vec<Recipe>, AppError> {
        Ok(self.read()?.recipes.clone())
    }

    async fn add_recipe(&self, recipe: Recipe) -> Result<Recipe, AppError> {
        let mut state = self.write()?;
        if state.recipes.iter().any(|r| r.id == recipe.id) {
            return Err(AppError::validation(format!(
                "Recipe {} already exists",
                recipe.id
            )));
        }
        state.recipes.push(recipe.clone());
        state.version += 1;
        Ok(recipe)
    }

    async fn update_recipe(&self, recipe: Recipe) -> Result<Recipe, AppError> {
        let mut state = self.write()?;
        let slot = state
            .recipes
            .iter_mut()
            .find(|r| r.id == recipe.id)
            .ok_or_else(|| AppError::recipe_not_found(&recipe.id))?;
        *slot = recipe.clone();
        state.version += 1;
        Ok(recipe)
    }

    async fn delete_recipe(&self, id: &str) -> Result<bool, AppError> {
        let mut state = self.write()?;
        let before = state.recipes.len();
        state.recipes.retain(|r| r.id != id);
        let removed = state.recipes.len() != before;
        if removed {
            state.version += 1;
        }
        Ok(removed)
    }

    async fn get_guide(&self) -> Result<Option<String>, AppError> {
        Ok(self.read()?.guide.clone())
    }

    async fn save_guide(&self, guide: String) -> Result<(), AppError> {
        let mut state = self.write()?;
        state.guide = Some(guide);
        state.version += 1;
        Ok(())
    }

    async fn clear_guide(&self) -> Result<(), AppError> {
        let mut state = self.write()?;
        state.guide = None;
        state.version += 1;
        Ok(())
    }

    async fn mark_used(&self, id: &str) -> Result<(), AppError> {
        let mut state = self.write()?;
        let recipe = state
            .recipes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::recipe_not_found(id))?;
        recipe.last_used_at_ms = Some(now_ms());
        recipe.use_count += 1;
        state.version += 1;
        Ok(())
    }
}
