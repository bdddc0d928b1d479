//! Language-model gateway.
//!
//! A uniform `generate(prompt, max_tokens) -> text` contract over three
//! interchangeable backends (local Ollama, OpenAI, Gemini), selected by
//! configuration. The [`LlmGateway`] wrapper enforces the contract every
//! agent relies on:
//!
//! - `max_tokens` is clamped up to a configured floor, so models that burn
//!   tokens on internal reasoning still produce visible text;
//! - transient failures are retried exactly once with a short backoff;
//! - an empty completion is an error, never an empty string.
//!
//! The gateway is stateless between calls and holds no cross-request
//! cache.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

mod gemini;
mod ollama;
mod openai;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::config::LlmBackendConfig;

/// Backoff before the single retry of a transient failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Connect timeout for provider HTTP clients.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Overall request timeout for provider HTTP clients.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors emitted by providers and the gateway.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LlmError {
    /// Network failure, timeout, or 5xx from the provider. The gateway
    /// retries this once.
    #[error("llm unavailable: {0}")]
    Unavailable(String),

    /// The provider rate-limited the request (HTTP 429). Surfaced, not
    /// retried.
    #[error("llm rate limited: {0}")]
    RateLimited(String),

    /// Authentication or authorization failure. Fatal for the run.
    #[error("llm auth error: {0}")]
    Auth(String),

    /// The provider returned an empty completion.
    #[error("llm returned empty response from {provider}")]
    EmptyResponse {
        /// Backend that produced the empty completion.
        provider: &'static str,
    },

    /// Structured output could not be parsed. Raised by parsing helpers
    /// only, never by `generate` itself.
    #[error("llm output invalid: {0}")]
    InvalidOutput(String),
}

/// A single language-model backend.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable backend name for logging.
    fn name(&self) -> &'static str;

    /// Generates a completion for `prompt`, producing at most
    /// `max_tokens` tokens.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on transport, rate-limit, or auth failure.
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError>;
}

/// Uniform front over a provider, enforcing the gateway contract.
#[derive(Clone)]
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    min_tokens: u32,
}

impl LlmGateway {
    /// Wraps a provider with the given `max_tokens` floor.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, min_tokens: u32) -> Self {
        Self {
            provider,
            min_tokens,
        }
    }

    /// Builds the configured provider and wraps it.
    ///
    /// `api_key_override`, when present, replaces the configured key for
    /// the cloud backends; the local backend ignores it.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Unavailable`] when the HTTP client cannot be
    /// constructed.
    pub fn from_config(
        config: &LlmBackendConfig,
        min_tokens: u32,
        api_key_override: Option<&str>,
    ) -> Result<Self, LlmError> {
        Ok(Self::new(
            provider_from_config(config, api_key_override)?,
            min_tokens,
        ))
    }

    /// Name of the wrapped backend.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Generates a completion, applying the token floor, the single
    /// transient retry, and the empty-response guard.
    ///
    /// # Errors
    ///
    /// Returns the provider error after retry exhaustion, or
    /// [`LlmError::EmptyResponse`] when the completion is blank.
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        let budget = max_tokens.max(self.min_tokens);
        let mut retried = false;
        loop {
            match self.provider.generate(prompt, budget).await {
                Ok(text) if text.trim().is_empty() => {
                    return Err(LlmError::EmptyResponse {
                        provider: self.provider.name(),
                    });
                }
                Ok(text) => return Ok(text),
                Err(LlmError::Unavailable(reason)) if !retried => {
                    tracing::warn!(
                        provider = self.provider.name(),
                        reason = %reason,
                        "llm transient failure, retrying once"
                    );
                    retried = true;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Builds the configured provider. `api_key_override`, when present,
/// replaces the configured key for the cloud backends.
///
/// # Errors
///
/// Returns [`LlmError::Unavailable`] when the HTTP client cannot be
/// constructed.
pub fn provider_from_config(
    config: &LlmBackendConfig,
    api_key_override: Option<&str>,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    Ok(match config {
        LlmBackendConfig::Ollama { base_url, model } => {
            Arc::new(OllamaProvider::new(base_url.clone(), model.clone())?)
        }
        LlmBackendConfig::OpenAi { api_key, model } => Arc::new(OpenAiProvider::new(
            api_key_override.unwrap_or(api_key).to_string(),
            model.clone(),
        )?),
        LlmBackendConfig::Gemini { api_key, model } => Arc::new(GeminiProvider::new(
            api_key_override.unwrap_or(api_key).to_string(),
            model.clone(),
        )?),
    })
}

/// Locates the first balanced `{...}` or `[...]` in `text` and parses it.
///
/// Returns `None` when no balanced candidate exists or the candidate is not
/// valid JSON. Never panics. Models routinely wrap JSON in prose, so the
/// scanner is string-literal and escape aware.
#[must_use]
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{' || b == b'[')?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let candidate = &text[start..=start + offset];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Maps an HTTP status from a provider to the gateway error taxonomy.
pub(crate) fn error_for_status(provider: &'static str, status: u16, body: String) -> LlmError {
    match status {
        401 | 403 => LlmError::Auth(format!("{provider} rejected credentials ({status}): {body}")),
        429 => LlmError::RateLimited(format!("{provider} throttled the request: {body}")),
        _ => LlmError::Unavailable(format!("{provider} returned HTTP {status}: {body}")),
    }
}

/// Maps a transport error to the gateway error taxonomy.
pub(crate) fn error_for_transport(provider: &'static str, err: &reqwest::Error) -> LlmError {
    LlmError::Unavailable(format!("{provider} request failed: {err}"))
}

/// Builds the shared HTTP client used by every backend.
pub(crate) fn http_client(provider: &'static str) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|err| LlmError::Unavailable(format!("{provider} client build failed: {err}")))
}
