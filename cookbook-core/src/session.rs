//! Session lifecycle management.
//!
//! Every session is wrapped in a [`SessionGuard`] as soon as the runtime hands
//! it out. The guard destroys the session exactly once: explicitly through
//! [`SessionGuard::destroy`], or on drop when an execution returns early, fails,
//! or is cancelled by a timeout.

use crate::error::{AppError, ErrorCode, ErrorKind};
use crate::monitor::AvailabilityMonitor;
use crate::runtime::{ModelRuntime, ModelSession, TextStream};
use crate::types::{generate_id, now_ms, SessionConfig};
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;

/// Registry entry for a live session
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub id: String,
    pub config: SessionConfig,
    pub created_at_ms: u64,
}

type Registry = Arc<DashMap<String, ActiveSession>>;

/// Owns one runtime session and destroys it exactly once.
#[derive(Debug)]
pub struct SessionGuard {
    id: String,
    session: Option<Box<dyn ModelSession>>,
    registry: Registry,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Single-shot prompt on the guarded session
    pub async fn prompt(&self, text: &str) -> Result<String, AppError> {
        self.session()?.prompt(text).await
    }

    /// Streaming prompt on the guarded session
    pub async fn prompt_streaming(&self, text: &str) -> Result<Box<TextStream>, AppError> {
        self.session()?.prompt_streaming(text).await
    }

    /// Destroy the session now
    pub fn destroy(mut self) {
        self.release();
    }

    fn session(&self) -> Result<&dyn ModelSession, AppError> {
        self.session.as_deref().ok_or_else(|| {
            AppError::new(
                ErrorKind::Ai,
                ErrorCode::PromptExecutionFailed,
                "Session already destroyed",
            )
        })
    }

    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            session.destroy();
            self.registry.remove(&self.id);
            tracing::debug!(session_id = %self.id, "session destroyed");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Creates short-lived sessions and runs prompts on them.
#[derive(Debug)]
pub struct SessionManager {
    runtime: Arc<dyn ModelRuntime>,
    monitor: Arc<AvailabilityMonitor>,
    active: Registry,
}

impl SessionManager {
    pub fn new(runtime: Arc<dyn ModelRuntime>, monitor: Arc<AvailabilityMonitor>) -> Self {
        Self {
            runtime,
            monitor,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn monitor(&self) -> &Arc<AvailabilityMonitor> {
        &self.monitor
    }

    /// Number of sessions currently alive
    pub fn active_sessions(&self) -> usize {
        self.active.len()
    }

    /// Snapshot of the live sessions
    pub fn active_session_list(&self) -> Vec<ActiveSession> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Acquire a session bound to `config`.
    pub async fn create_session(&self, config: SessionConfig) -> Result<SessionGuard, AppError> {
        config.validate()?;

        self.monitor.ensure_ready().await?;

        // Retryability and the root code come from the cause.
        let session = self.runtime.create_session(config).await.map_err(|e| {
            AppError::wrap(
                ErrorKind::Ai,
                ErrorCode::SessionCreationFailed,
                format!("Failed to create session: {}", e),
                e,
            )
            .with_category(crate::error::ErrorCategory::AiApi)
        })?;

        let id = generate_id("session");
        self.active.insert(
            id.clone(),
            ActiveSession {
                id: id.clone(),
                config,
                created_at_ms: now_ms(),
            },
        );
        tracing::debug!(
            session_id = %id,
            temperature = config.temperature,
            top_k = config.top_k,
            "session created"
        );

        Ok(SessionGuard {
            id,
            session: Some(session),
            registry: self.active.clone(),
        })
    }

    /// Acquire, prompt once, destroy.
    pub async fn execute_prompt(&self, text: &str, config: SessionConfig) -> Result<String, AppError> {
        let guard = self.create_session(config).await?;
        let result = guard.prompt(text).await;
        guard.destroy();

        result.map_err(|e| {
            if e.is_untyped() {
                AppError::wrap(
                    ErrorKind::Ai,
                    ErrorCode::PromptExecutionFailed,
                    format!("Prompt execution failed: {}", e),
                    e,
                )
            } else {
                e
            }
        })
    }

    /// Acquire, stream chunks, destroy when the stream ends, fails, or is dropped.
    pub async fn execute_prompt_streaming(
        &self,
        text: &str,
        config: SessionConfig,
    ) -> Result<Box<TextStream>, AppError> {
        let guard = self.create_session(config).await?;
        let mut chunks = match guard.prompt_streaming(text).await {
            Ok(chunks) => chunks,
            Err(e) => {
                guard.destroy();
                return Err(streaming_error(e));
            }
        };

        let stream = async_stream::stream! {
            let guard = guard;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(chunk) => yield Ok(chunk),
                    Err(e) => {
                        guard.destroy();
                        yield Err(streaming_error(e));
                        return;
                    }
                }
            }
            guard.destroy();
        };

        Ok(Box::new(Box::pin(stream)) as Box<TextStream>)
    }
}

fn streaming_error(e: AppError) -> AppError {
    if e.is_untyped() {
        AppError::wrap(
            ErrorKind::Ai,
            ErrorCode::StreamingFailed,
            format!("Streaming failed: {}", e),
            e,
        )
    } else {
        e
    }
}
