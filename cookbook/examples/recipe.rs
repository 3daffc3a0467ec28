//! Recipe execution against a scripted runtime.
//!
//! This demonstrates:
//! 1. Building an executor with layers and plugins
//! 2. Running a recipe with a stored guide
//! 3. Streaming a response chunk by chunk
//! 4. Custom prompts with sanitization
//! 5. Execution statistics and usage tracking
//!
//! No model server is needed: the scripted runtime echoes prompts back.

use cookbook::prelude::*;
use cookbook::scripted::ScriptedRuntime;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(MemoryRecipeStore::new());
    let summarize = store
        .add_recipe(
            Recipe::new("Summarize", "Summarize in one sentence: {user_input}")
                .with_tags(vec!["writing".to_string()]),
        )
        .await?;
    let translate = store
        .add_recipe(Recipe::new("Translate", "Translate to French: {text}"))
        .await?;
    store
        .save_guide("Answer briefly and in plain language.".to_string())
        .await?;

    let runtime = ScriptedRuntime::new()
        .with_chunk_size(12)
        .with_prompt_delay(Duration::from_millis(20));

    let executor = PromptExecutor::builder(runtime)
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .layer(RetryLayer::new().with_max_retries(2))
        .layer(LoggingLayer::new())
        .plugin(Arc::new(GuidePlugin::new(store.clone())))
        .plugin(Arc::new(UsageTrackingPlugin::new(store.clone())))
        .finish();

    println!("Runtime: {}", executor.info().name);

    // Example 1: Single-shot recipe with the stored guide
    println!("\n=== Example 1: Recipe ===\n");
    let options = ExecutionOptions::new().with_temperature(0.3);
    let preview = executor
        .preview_prompt(&summarize, "Rust guarantees memory safety without a GC.", &options)
        .await?;
    println!("Prompt preview:\n{}\n", preview);

    let result = executor
        .execute_recipe(&summarize, "Rust guarantees memory safety without a GC.", &options)
        .await?;
    println!("Response: {}", result.response.as_deref().unwrap_or_default());
    println!(
        "Took {}ms, ~{} tokens",
        result.execution_time_ms,
        result.tokens_used.unwrap_or_default()
    );

    // Example 2: Streaming
    println!("\n=== Example 2: Streaming ===\n");
    let mut stream = executor
        .execute_recipe_streaming(&translate, "Good morning, kitchen!", &ExecutionOptions::new())
        .await?;
    while let Some(chunk) = stream.next().await {
        print!("[{}]", chunk?);
    }
    println!();
    if let Some(summary) = stream.finalize() {
        println!("Streamed in {}ms", summary.execution_time_ms);
    }

    // Example 3: Custom prompt, markup stripped from input
    println!("\n=== Example 3: Custom prompt ===\n");
    let result = executor
        .execute_custom_prompt(
            "List three <b>spices</b> for curry",
            &ExecutionOptions::new().with_sanitization(SanitizationPolicy::new()),
        )
        .await?;
    println!("Response: {}", result.response.as_deref().unwrap_or_default());

    // Example 4: A failing execution is recorded too
    println!("\n=== Example 4: Validation failure ===\n");
    match executor
        .execute_recipe(&summarize, "   ", &ExecutionOptions::new())
        .await
    {
        Ok(_) => println!("Unexpected success"),
        Err(e) => println!("Error: {} (root: {})", e, e.root_code()),
    }

    // Example 5: Statistics and usage
    println!("\n=== Example 5: Statistics ===\n");
    let stats = executor.execution_stats();
    println!(
        "{} executions, {} succeeded, {} failed, avg {:.1}ms, {} tokens",
        stats.total_executions,
        stats.successful_executions,
        stats.failed_executions,
        stats.average_execution_time_ms,
        stats.total_tokens_used
    );
    for recipe in store.get_recipes().await? {
        println!("{}: used {} times", recipe.name, recipe.use_count);
    }

    println!("\nStore snapshot:\n{}", store.to_json()?);

    Ok(())
}
