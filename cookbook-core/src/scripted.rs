//! A deterministic, in-process model runtime.
//!
//! `ScriptedRuntime` replays a scripted availability sequence, answers prompts
//! with a pure function of the prompt text, and can inject failures. It counts
//! every session it creates and destroys, which makes session hygiene
//! observable in tests and demos.

use crate::error::AppError;
use crate::runtime::{ModelRuntime, ModelSession, TextStream};
use crate::types::*;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Default)]
struct Shared {
    availability_queries: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_destroyed: AtomicUsize,
    double_destroys: AtomicUsize,
    prompts: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
    last_config: Mutex<Option<SessionConfig>>,
}

/// Scripted runtime for tests and demos
pub struct ScriptedRuntime {
    info: Arc<RuntimeInfo>,
    availability: Mutex<VecDeque<AvailabilityState>>,
    capabilities: Option<Capabilities>,
    responder: Responder,
    chunk_size: usize,
    prompt_delay: Duration,
    create_failures: Mutex<VecDeque<String>>,
    prompt_failures: Arc<Mutex<VecDeque<String>>>,
    stream_failure: Option<(usize, String)>,
    shared: Arc<Shared>,
}

impl fmt::Debug for ScriptedRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedRuntime")
            .field("info", &self.info)
            .field("chunk_size", &self.chunk_size)
            .field("prompt_delay", &self.prompt_delay)
            .finish()
    }
}

impl ScriptedRuntime {
    /// An always-available runtime that answers `Echo: <prompt>`
    pub fn new() -> Self {
        Self {
            info: Arc::new(RuntimeInfo {
                id: "scripted".to_string(),
                name: "Scripted".to_string(),
            }),
            availability: Mutex::new(VecDeque::from([AvailabilityState::Available])),
            capabilities: None,
            responder: Arc::new(|prompt: &str| format!("Echo: {}", prompt)),
            chunk_size: 8,
            prompt_delay: Duration::ZERO,
            create_failures: Mutex::new(VecDeque::new()),
            prompt_failures: Arc::new(Mutex::new(VecDeque::new())),
            stream_failure: None,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Always report `state`
    pub fn with_availability(self, state: AvailabilityState) -> Self {
        self.with_availability_sequence(vec![state])
    }

    /// Report each state in turn; the last one repeats forever
    pub fn with_availability_sequence(self, states: Vec<AvailabilityState>) -> Self {
        *lock(&self.availability) = states.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Answer every prompt with `response`
    pub fn with_response(self, response: impl Into<String>) -> Self {
        let response = response.into();
        self.with_responder(move |_| response.clone())
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    /// Characters per streamed chunk
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Delay before every prompt answers
    pub fn with_prompt_delay(mut self, delay: Duration) -> Self {
        self.prompt_delay = delay;
        self
    }

    /// Fail the next session creation with `message`
    pub fn fail_next_create(self, message: impl Into<String>) -> Self {
        lock(&self.create_failures).push_back(message.into());
        self
    }

    /// Fail the next prompt call with `message`
    pub fn fail_next_prompt(self, message: impl Into<String>) -> Self {
        lock(&self.prompt_failures).push_back(message.into());
        self
    }

    /// Fail every stream after `chunks` chunks with `message`
    pub fn fail_stream_after(mut self, chunks: usize, message: impl Into<String>) -> Self {
        self.stream_failure = Some((chunks, message.into()));
        self
    }

    pub fn availability_queries(&self) -> usize {
        self.shared.availability_queries.load(Ordering::SeqCst)
    }

    pub fn sessions_created(&self) -> usize {
        self.shared.sessions_created.load(Ordering::SeqCst)
    }

    pub fn sessions_destroyed(&self) -> usize {
        self.shared.sessions_destroyed.load(Ordering::SeqCst)
    }

    /// Destroy calls on a session that was already destroyed
    pub fn double_destroys(&self) -> usize {
        self.shared.double_destroys.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> usize {
        self.shared.prompts.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        lock(&self.shared.last_prompt).clone()
    }

    pub fn last_config(&self) -> Option<SessionConfig> {
        *lock(&self.shared.last_config)
    }
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelRuntime for ScriptedRuntime {
    fn info(&self) -> Arc<RuntimeInfo> {
        self.info.clone()
    }

    async fn availability(&self) -> Result<AvailabilityState, AppError> {
        self.shared.availability_queries.fetch_add(1, Ordering::SeqCst);
        let mut states = lock(&self.availability);
        let state = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().copied()
        };
        Ok(state.unwrap_or(AvailabilityState::Unavailable))
    }

    async fn capabilities(&self) -> Result<Option<Capabilities>, AppError> {
        Ok(self.capabilities.clone())
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn ModelSession>, AppError> {
        if let Some(message) = lock(&self.create_failures).pop_front() {
            return Err(AppError::classify(message));
        }
        self.shared.sessions_created.fetch_add(1, Ordering::SeqCst);
        *lock(&self.shared.last_config) = Some(config);

        Ok(Box::new(ScriptedSession {
            responder: self.responder.clone(),
            chunk_size: self.chunk_size,
            prompt_delay: self.prompt_delay,
            prompt_failures: self.prompt_failures.clone(),
            stream_failure: self.stream_failure.clone(),
            shared: self.shared.clone(),
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct ScriptedSession {
    responder: Responder,
    chunk_size: usize,
    prompt_delay: Duration,
    prompt_failures: Arc<Mutex<VecDeque<String>>>,
    stream_failure: Option<(usize, String)>,
    shared: Arc<Shared>,
    destroyed: AtomicBool,
}

impl fmt::Debug for ScriptedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedSession")
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl ScriptedSession {
    async fn answer(&self, text: &str) -> Result<String, AppError> {
        self.shared.prompts.fetch_add(1, Ordering::SeqCst);
        *lock(&self.shared.last_prompt) = Some(text.to_string());
        if !self.prompt_delay.is_zero() {
            tokio::time::sleep(self.prompt_delay).await;
        }
        if let Some(message) = lock(&self.prompt_failures).pop_front() {
            return Err(AppError::classify(message));
        }
        Ok((self.responder)(text))
    }
}

#[async_trait]
impl ModelSession for ScriptedSession {
    async fn prompt(&self, text: &str) -> Result<String, AppError> {
        self.answer(text).await
    }

    async fn prompt_streaming(&self, text: &str) -> Result<Box<TextStream>, AppError> {
        let response = self.answer(text).await?;
        let chars: Vec<char> = response.chars().collect();
        let mut items: Vec<Result<String, AppError>> = chars
            .chunks(self.chunk_size)
            .map(|c| Ok(c.iter().collect()))
            .collect();

        if let Some((after, message)) = &self.stream_failure {
            items.truncate(*after);
            items.push(Err(AppError::classify(message.clone())));
        }

        Ok(Box::new(futures::stream::iter(items)) as Box<TextStream>)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            self.shared.double_destroys.fetch_add(1, Ordering::SeqCst);
        }
        self.shared.sessions_destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
