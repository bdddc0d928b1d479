//! Runtime configuration.
//!
//! All settings come from the environment (see the repository README for the
//! full key list). The daemon and CLI load one [`RuntimeConfig`] at startup
//! and hand it to the orchestrator; nothing reads the environment after
//! that.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default floor applied to `max_tokens` on every model call. Models that
/// spend tokens on internal reasoning need headroom before any visible text
/// appears.
pub const DEFAULT_LLM_MIN_TOKENS: u32 = 100;

/// Default soft end-to-end run budget.
pub const DEFAULT_RUN_BUDGET: Duration = Duration::from_secs(120);

/// Configuration errors raised at startup.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// `LLM_TYPE` named an unknown backend.
    #[error("unknown LLM_TYPE {value:?}; expected ollama, openai, or gemini")]
    UnknownLlmType {
        /// The rejected value.
        value: String,
    },

    /// A cloud backend was selected without its API key.
    #[error("{backend} backend requires {key} to be set")]
    MissingApiKey {
        /// Backend name.
        backend: &'static str,
        /// Missing environment key.
        key: &'static str,
    },
}

/// Which language-model backend serves `generate` calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackendConfig {
    /// Local Ollama server.
    Ollama {
        /// Base URL of the Ollama API.
        base_url: String,
        /// Model name to run.
        model: String,
    },
    /// OpenAI chat completions API.
    OpenAi {
        /// API key.
        api_key: String,
        /// Model name.
        model: String,
    },
    /// Google Gemini generateContent API.
    Gemini {
        /// API key.
        api_key: String,
        /// Model name.
        model: String,
    },
}

/// Process-wide runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Selected language-model backend.
    pub llm: LlmBackendConfig,
    /// SQLite database location backing the vector index and audit store.
    /// Accepts a plain path, a `sqlite://` URL, or `:memory:`.
    pub database_path: String,
    /// Default repository to index and analyze.
    pub repo_path: PathBuf,
    /// Embedding model identity; fixes the output dimension.
    pub embedding_model: String,
    /// Floor for `max_tokens` on every model call.
    pub llm_min_tokens: u32,
    /// Soft end-to-end budget for one run.
    pub run_budget: Duration,
}

impl RuntimeConfig {
    /// Loads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `LLM_TYPE` is unrecognized or a cloud
    /// backend is selected without its API key.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm_type = env_string("LLM_TYPE", "ollama").to_lowercase();
        let llm = match llm_type.as_str() {
            "ollama" => LlmBackendConfig::Ollama {
                base_url: env_string("OLLAMA_BASE_URL", "http://localhost:11434"),
                model: env_string("OLLAMA_MODEL", "llama2"),
            },
            "openai" => LlmBackendConfig::OpenAi {
                api_key: env::var("OPENAI_API_KEY").map_err(|_| ConfigError::MissingApiKey {
                    backend: "openai",
                    key: "OPENAI_API_KEY",
                })?,
                model: env_string("OPENAI_MODEL", "gpt-4o-mini"),
            },
            "gemini" => LlmBackendConfig::Gemini {
                api_key: env::var("GEMINI_API_KEY").map_err(|_| ConfigError::MissingApiKey {
                    backend: "gemini",
                    key: "GEMINI_API_KEY",
                })?,
                model: env_string("GEMINI_MODEL", "gemini-1.5-flash"),
            },
            _ => return Err(ConfigError::UnknownLlmType { value: llm_type }),
        };

        Ok(Self {
            llm,
            database_path: normalize_database_url(&env_string("DATABASE_URL", "reglens.db")),
            repo_path: PathBuf::from(env_string("REPO_PATH", "fake_pix_repo")),
            embedding_model: env_string(
                "EMBEDDING_MODEL",
                crate::embedding::DEFAULT_EMBEDDING_MODEL,
            ),
            llm_min_tokens: env_u32("LLM_MIN_TOKENS", DEFAULT_LLM_MIN_TOKENS),
            run_budget: Duration::from_secs(env_u64(
                "RUN_BUDGET_SECS",
                DEFAULT_RUN_BUDGET.as_secs(),
            )),
        })
    }
}

/// Strips an optional `sqlite://` scheme so operators can paste either a
/// URL or a filesystem path.
#[must_use]
pub fn normalize_database_url(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("sqlite://")
        .unwrap_or(trimmed)
        .to_string()
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_scheme_is_stripped() {
        assert_eq!(normalize_database_url("sqlite:///tmp/x.db"), "/tmp/x.db");
        assert_eq!(normalize_database_url("reglens.db"), "reglens.db");
        assert_eq!(normalize_database_url(":memory:"), ":memory:");
    }
}
