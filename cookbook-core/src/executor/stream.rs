//! Streaming execution handle.

use crate::error::{AppError, ErrorCode, ErrorKind};
use crate::history::ExecutionHistory;
use crate::plugin::PluginEngine;
use crate::runtime::TextStream;
use crate::types::*;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use tokio::time::Instant;

/// Chunks of a streaming recipe execution.
///
/// Yields each chunk as the model produces it. A mid-stream failure is
/// yielded once as an `EXECUTION_FAILED` error, after which the stream ends.
/// The execution is recorded when the stream ends, fails, or is dropped
/// early; [`finalize`](Self::finalize) returns the recorded summary.
pub struct RecipeStream {
    execution_id: String,
    inner: Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>,
    summary: Arc<OnceLock<ExecutionResult>>,
}

impl RecipeStream {
    pub(crate) fn new(
        chunks: Box<TextStream>,
        recorder: StreamRecorder,
        plugins: PluginEngine,
    ) -> Self {
        let execution_id = recorder.ctx.execution_id.clone();
        let summary = recorder.summary.clone();

        let inner = async_stream::stream! {
            let mut recorder = recorder;
            let mut chunks = chunks;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(chunk) => {
                        recorder.push(&chunk);
                        yield Ok(chunk);
                    }
                    Err(cause) => {
                        let err = execution_failed(cause);
                        recorder.fail(&err);
                        if let Err(e) = plugins.on_error(&err, &recorder.ctx).await {
                            tracing::warn!("on_error hook failed: {}", e);
                        }
                        yield Err(err);
                        return;
                    }
                }
            }

            let result = recorder.succeed();
            if let Err(e) = plugins.on_execution_end(&recorder.ctx, &result).await {
                tracing::warn!("on_execution_end hook failed: {}", e);
            }
        };

        Self {
            execution_id,
            inner: Box::pin(inner),
            summary,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Summary of the execution, once the stream has ended or failed.
    pub fn finalize(&self) -> Option<ExecutionResult> {
        self.summary.get().cloned()
    }

    /// Drain the stream and return the summary
    pub async fn into_result(mut self) -> Result<ExecutionResult, AppError> {
        while let Some(chunk) = self.next().await {
            chunk?;
        }
        self.finalize().ok_or_else(|| {
            AppError::new(
                ErrorKind::PromptExecutor,
                ErrorCode::ExecutionFailed,
                "Stream ended without a summary",
            )
        })
    }
}

impl Stream for RecipeStream {
    type Item = Result<String, AppError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RecipeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeStream")
            .field("execution_id", &self.execution_id)
            .field("finished", &self.summary.get().is_some())
            .finish()
    }
}

/// Accumulates a streaming execution and records it exactly once.
pub(crate) struct StreamRecorder {
    ctx: ExecutionContext,
    history: Arc<ExecutionHistory>,
    summary: Arc<OnceLock<ExecutionResult>>,
    started: Instant,
    response: String,
    tokens: u32,
    done: bool,
}

impl StreamRecorder {
    pub(crate) fn new(ctx: ExecutionContext, history: Arc<ExecutionHistory>, started: Instant) -> Self {
        Self {
            ctx,
            history,
            summary: Arc::new(OnceLock::new()),
            started,
            response: String::new(),
            tokens: 0,
            done: false,
        }
    }

    fn push(&mut self, chunk: &str) {
        self.response.push_str(chunk);
        self.tokens += estimate_tokens(chunk);
    }

    fn succeed(&mut self) -> ExecutionResult {
        let result = ExecutionResult::succeeded(
            std::mem::take(&mut self.response),
            self.elapsed_ms(),
            self.tokens,
        );
        self.finish(result.clone());
        result
    }

    fn fail(&mut self, err: &AppError) {
        let result = ExecutionResult::failed(err, self.elapsed_ms());
        self.finish(result);
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn finish(&mut self, result: ExecutionResult) {
        if self.done {
            return;
        }
        self.done = true;
        tracing::debug!(
            execution_id = %self.ctx.execution_id,
            success = result.success,
            execution_time_ms = result.execution_time_ms,
            "streaming execution finished"
        );
        self.history.record(ExecutionRecord {
            id: self.ctx.execution_id.clone(),
            recipe_id: self.ctx.recipe_id.clone(),
            recipe_name: self.ctx.recipe_name.clone(),
            mode: self.ctx.mode,
            result: result.clone(),
            completed_at_ms: now_ms(),
        });
        let _ = self.summary.set(result);
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        if !self.done {
            let err = AppError::new(
                ErrorKind::PromptExecutor,
                ErrorCode::ExecutionFailed,
                "Streaming execution cancelled before completion",
            );
            self.fail(&err);
        }
    }
}

/// Wrap a failure as `EXECUTION_FAILED`, keeping the cause.
pub(crate) fn execution_failed(cause: AppError) -> AppError {
    AppError::wrap(
        ErrorKind::PromptExecutor,
        ErrorCode::ExecutionFailed,
        format!("Execution failed: {}", cause),
        cause,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(history: &Arc<ExecutionHistory>) -> StreamRecorder {
        let ctx = ExecutionContext::new("scripted", ExecutionMode::Streaming);
        StreamRecorder::new(ctx, history.clone(), Instant::now())
    }

    #[tokio::test]
    async fn test_stream_records_summary() {
        let history = Arc::new(ExecutionHistory::new());
        let chunks: Vec<Result<String, AppError>> =
            vec![Ok("Hello, ".into()), Ok("world".into())];
        let mut stream = RecipeStream::new(
            Box::new(futures::stream::iter(chunks)),
            recorder(&history),
            PluginEngine::default(),
        );

        assert!(stream.finalize().is_none());
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap());
        }

        let summary = stream.finalize().unwrap();
        assert_eq!(text, "Hello, world");
        assert!(summary.success);
        assert_eq!(summary.response.as_deref(), Some("Hello, world"));
        assert_eq!(summary.tokens_used, Some(2 + 2));
        assert_eq!(history.get(stream.execution_id()).unwrap().result, summary);
    }

    #[tokio::test]
    async fn test_stream_failure_is_yielded_once() {
        let history = Arc::new(ExecutionHistory::new());
        let chunks: Vec<Result<String, AppError>> = vec![
            Ok("partial".into()),
            Err(AppError::network("network error")),
            Ok("never".into()),
        ];
        let stream = RecipeStream::new(
            Box::new(futures::stream::iter(chunks)),
            recorder(&history),
            PluginEngine::default(),
        );

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecutionFailed);
        assert_eq!(err.root_code(), ErrorCode::NetworkError);
        assert!(err.is_retryable());

        let record = &history.records()[0];
        assert!(!record.result.success);
        assert_eq!(record.result.error_code, Some(ErrorCode::NetworkError));
    }

    #[tokio::test]
    async fn test_dropped_stream_records_cancellation() {
        let history = Arc::new(ExecutionHistory::new());
        let chunks: Vec<Result<String, AppError>> = vec![Ok("a".into()), Ok("b".into())];
        let mut stream = RecipeStream::new(
            Box::new(futures::stream::iter(chunks)),
            recorder(&history),
            PluginEngine::default(),
        );

        stream.next().await.unwrap().unwrap();
        drop(stream);

        assert_eq!(history.len(), 1);
        let record = &history.records()[0];
        assert!(!record.result.success);
        assert_eq!(record.result.error_code, Some(ErrorCode::ExecutionFailed));
    }
}
