//! Name-consistency and translation-context pipeline.
//! The language model is an injected port; everything else here is the
//! detection / dictionary / context logic that wraps it.

pub mod apply;
pub mod context;
pub mod detect;
pub mod glossary;
pub mod llm;
pub mod names;
pub mod normalize;
pub mod orchestrator;
pub mod prompts;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Which capability a completion request exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    ExtractNames,
    Translate,
    Summarize,
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Task::ExtractNames => "extract_names",
            Task::Translate => "translate",
            Task::Summarize => "summarize",
        }
    }
}

/// Plain text in, plain text out.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub task: Task,
    pub prompt: String,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(task: Task, prompt: String) -> Self {
        let max_tokens = match task {
            Task::ExtractNames => 1000,
            Task::Translate => 4000,
            Task::Summarize => 300,
        };
        Self {
            task,
            prompt,
            max_tokens,
        }
    }
}

/// Language-model port (adapter for different backends).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    ApiError(String),
    RateLimited { retry_after_ms: u64 },
    Timeout,
    Cancelled,
    InvalidInput(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::ApiError(msg) => write!(f, "API error: {msg}"),
            LlmError::RateLimited { retry_after_ms } => {
                write!(f, "rate limited, retry after {retry_after_ms}ms")
            }
            LlmError::Timeout => write!(f, "model call timed out"),
            LlmError::Cancelled => write!(f, "model call cancelled"),
            LlmError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for LlmError {}

/// Run one completion under a hard deadline. The outcome is always a typed
/// success or failure; an elapsed deadline becomes `LlmError::Timeout`.
pub async fn complete_within(
    model: &dyn LanguageModel,
    request: &CompletionRequest,
    timeout: Duration,
) -> Result<String, LlmError> {
    match tokio::time::timeout(timeout, model.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout),
    }
}

/// A model that is not configured. Every call fails, so detection falls back
/// to heuristics and translation reports a failure.
pub struct UnavailableModel {
    reason: String,
}

impl UnavailableModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for UnavailableModel {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        Err(LlmError::InvalidInput(self.reason.clone()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{CompletionRequest, LanguageModel, LlmError, Task};

    /// Scripted model double: one canned result per task, every request
    /// recorded for later inspection.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<HashMap<Task, Result<String, LlmError>>>,
        delay: Option<Duration>,
        pub calls: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedModel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, task: Task, text: &str) -> Self {
            self.replies.lock().insert(task, Ok(text.to_string()));
            self
        }

        pub fn fail(self, task: Task, err: LlmError) -> Self {
            self.replies.lock().insert(task, Err(err));
            self
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn prompts_for(&self, task: Task) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .filter(|c| c.task == task)
                .map(|c| c.prompt.clone())
                .collect()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            self.calls.lock().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .get(&request.task)
                .cloned()
                .unwrap_or_else(|| Err(LlmError::ApiError(format!("no reply scripted for {}", request.task.as_str()))))
        }
    }
}
