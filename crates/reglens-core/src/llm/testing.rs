//! Scriptable provider for exercising the gateway and agents in tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{LlmError, LlmProvider};

/// Provider that replays a fixed script of responses, recording every
/// prompt and token budget it receives.
pub(crate) struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    budgets: Mutex<Vec<u32>>,
}

impl ScriptedProvider {
    /// Replays `script` in order; further calls fail as unavailable.
    pub(crate) fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
            budgets: Mutex::new(Vec::new()),
        }
    }

    /// Replays `script` in order, then answers every further call with
    /// `fallback`.
    pub(crate) fn with_fallback(
        script: Vec<Result<String, LlmError>>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Some(fallback.into()),
            prompts: Mutex::new(Vec::new()),
            budgets: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with the same text.
    pub(crate) fn always(text: impl Into<String>) -> Self {
        Self::with_fallback(Vec::new(), text)
    }

    /// Prompts observed so far.
    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Token budgets observed so far.
    pub(crate) fn budgets(&self) -> Vec<u32> {
        self.budgets.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.budgets.lock().unwrap().push(max_tokens);
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &self.fallback {
            Some(text) => Ok(text.clone()),
            None => Err(LlmError::Unavailable("script exhausted".to_string())),
        }
    }
}
