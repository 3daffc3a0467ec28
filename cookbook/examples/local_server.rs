//! Recipes against a local OpenAI-compatible server.
//!
//! Start a server first, for example `ollama serve` or
//! `llama-server -m model.gguf --port 8080`, then run:
//!
//! ```text
//! COOKBOOK_API_BASE=http://localhost:8080/v1 COOKBOOK_MODEL=qwen2.5 \
//!     cargo run --example local_server
//! ```

use cookbook::prelude::*;
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let api_base = std::env::var("COOKBOOK_API_BASE")
        .unwrap_or_else(|_| cookbook::runtime::DEFAULT_API_BASE.to_string());
    let model = std::env::var("COOKBOOK_MODEL").unwrap_or_else(|_| "llama3.2".to_string());

    let runtime = OpenAiCompatRuntime::builder()
        .api_base(api_base)
        .model(model)
        .allow_download(true)
        .probe_timeout(Duration::from_secs(3))
        .build()?;

    let store = Arc::new(MemoryRecipeStore::new());
    let recipe = store
        .add_recipe(Recipe::new(
            "Explain",
            "Explain the following to a curious ten-year-old: {user_input}",
        ))
        .await?;

    let config = EngineConfig::new()
        .with_timeout(Duration::from_secs(120))
        .with_retry(RetryPolicy::default().with_max_retries(2));

    let executor = PromptExecutor::builder(runtime)
        .layer(TimeoutLayer::new(Duration::from_secs(120)))
        .layer(LoggingLayer::new())
        .plugin(Arc::new(GuidePlugin::new(store.clone())))
        .plugin(Arc::new(UsageTrackingPlugin::new(store.clone())))
        .config(config)
        .finish();

    match executor.monitor().state().await? {
        state if state.can_execute() => println!("Model is {}", state),
        state => {
            println!("Model is {}; start the server or pull the model first", state);
            return Ok(());
        }
    }

    let mut stream = executor
        .execute_recipe_streaming(&recipe, "why the sky is blue", &ExecutionOptions::new())
        .await?;
    while let Some(chunk) = stream.next().await {
        print!("{}", chunk?);
        std::io::stdout().flush()?;
    }
    println!();

    if let Some(summary) = stream.finalize() {
        println!(
            "\n{}ms, ~{} tokens",
            summary.execution_time_ms,
            summary.tokens_used.unwrap_or_default()
        );
    }

    Ok(())
}
