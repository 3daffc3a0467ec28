//! # Cookbook Runtimes
//!
//! Model runtime implementations for the recipe engine.

pub mod openai;

// Re-exports
pub use openai::{OpenAiCompatBuilder, OpenAiCompatRuntime, DEFAULT_API_BASE};

use cookbook_core::error::AppError;

/// Create a runtime for a local llama.cpp server
///
/// llama.cpp serves the OpenAI protocol on port 8080 and lists the single
/// model it was started with.
///
/// # Example
///
/// ```ignore
/// use cookbook_runtime::llama_cpp;
///
/// let runtime = llama_cpp("qwen2.5-1.5b-instruct")?;
/// ```
pub fn llama_cpp(model: impl Into<String>) -> Result<OpenAiCompatRuntime, AppError> {
    OpenAiCompatRuntime::builder()
        .api_base("http://localhost:8080/v1")
        .model(model)
        .runtime_id("llama_cpp", "llama.cpp")
        .build()
}

/// Create a runtime for a local Ollama server
///
/// Ollama pulls a missing model on first use, so it is reported as
/// downloadable.
pub fn ollama(model: impl Into<String>) -> Result<OpenAiCompatRuntime, AppError> {
    OpenAiCompatRuntime::builder()
        .api_base(DEFAULT_API_BASE)
        .model(model)
        .allow_download(true)
        .runtime_id("ollama", "Ollama")
        .build()
}
