//! The six pipeline agents.
//!
//! Each agent is a pure function of the shared state: it reads only fields
//! produced by earlier stages, writes exactly the fields in its output
//! contract, and either completes (possibly with fallback values, so that
//! downstream stages always observe a well-formed state) or fails fatally,
//! in which case the executor halts the run.
//!
//! Execution order is fixed: Sentinel, Translator, CodeReader, Impact,
//! SpecGenerator, PromptBuilder.

use thiserror::Error;

use crate::llm::LlmError;
use crate::state::SharedState;

mod code_reader;
mod impact;
mod prompt_builder;
mod sentinel;
mod spec_generator;
mod translator;

pub use code_reader::{CodeReaderAgent, CodeReaderConfig};
pub use impact::ImpactAgent;
pub use prompt_builder::PromptBuilderAgent;
pub use sentinel::SentinelAgent;
pub use spec_generator::SpecGeneratorAgent;
pub use translator::TranslatorAgent;

/// Fatal agent failure. Handled failures never surface here; agents fall
/// back to sentinel values instead and let the pipeline continue.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentError {
    /// The language model failed in a way the agent cannot absorb
    /// (authentication, rate limiting, or a transient failure with no
    /// local fallback).
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The agent's preconditions or processing failed.
    #[error("{0}")]
    Failed(String),
}

/// A single pipeline stage.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    /// Stage name as it appears in logs and error messages.
    fn name(&self) -> &'static str;

    /// Consumes the state and returns the updated state.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] only for fatal conditions; the executor then
    /// halts the run and preserves the partial state.
    async fn run(&self, state: SharedState) -> Result<SharedState, AgentError>;
}

/// Returns the first `max_chars` characters of `text`, respecting UTF-8
/// boundaries.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_respects_multibyte_boundaries() {
        assert_eq!(excerpt("validação", 7), "validaç");
        assert_eq!(excerpt("abc", 10), "abc");
        assert_eq!(excerpt("", 5), "");
    }
}
