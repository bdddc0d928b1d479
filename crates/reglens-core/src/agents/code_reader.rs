//! CodeReader: semantic retrieval of relevant source files.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{excerpt, Agent, AgentError};
use crate::embedding::HashingEncoder;
use crate::state::{ImpactedFile, SharedState, MAX_IMPACTED_FILES, MAX_SNIPPET_CHARS};
use crate::vector_index::SqliteVectorIndex;

/// Retrieval tuning.
#[derive(Debug, Clone)]
pub struct CodeReaderConfig {
    /// Maximum number of files surfaced.
    pub top_k: usize,
    /// Minimum similarity score; `0.0` means the top-k is always returned
    /// when the index has entries.
    pub threshold: f32,
    /// Extra terms appended to the query. Empty disables the keyword
    /// augmentation. Whether low-quality hits should instead be suppressed
    /// is an open tuning question, so both knobs stay configurable.
    pub query_keywords: Vec<String>,
}

impl Default for CodeReaderConfig {
    fn default() -> Self {
        Self {
            top_k: MAX_IMPACTED_FILES,
            threshold: 0.0,
            query_keywords: Vec::new(),
        }
    }
}

/// Third pipeline stage: queries the vector index with an embedding of the
/// structured regulation and surfaces the most relevant files.
pub struct CodeReaderAgent {
    encoder: Arc<HashingEncoder>,
    index: SqliteVectorIndex,
    config: CodeReaderConfig,
}

impl CodeReaderAgent {
    /// Creates the agent over the given encoder and index.
    #[must_use]
    pub fn new(
        encoder: Arc<HashingEncoder>,
        index: SqliteVectorIndex,
        config: CodeReaderConfig,
    ) -> Self {
        Self {
            encoder,
            index,
            config,
        }
    }

    fn build_query(&self, state: &SharedState) -> Option<String> {
        let model = state.regulatory_model.as_ref()?;
        let mut parts: Vec<&str> = Vec::new();
        if !model.title.is_empty() {
            parts.push(&model.title);
        }
        if !model.description.is_empty() {
            parts.push(&model.description);
        }
        parts.extend(model.requirements.iter().take(5).map(String::as_str));
        parts.extend(model.affected_systems.iter().map(String::as_str));
        parts.extend(self.config.query_keywords.iter().map(String::as_str));

        let query = parts.join(" ");
        if query.trim().is_empty() {
            None
        } else {
            Some(query)
        }
    }
}

#[async_trait::async_trait]
impl Agent for CodeReaderAgent {
    fn name(&self) -> &'static str {
        "CodeReader"
    }

    async fn run(&self, mut state: SharedState) -> Result<SharedState, AgentError> {
        let Some(query) = self.build_query(&state) else {
            warn!("no regulatory model to search with, returning no files");
            state.impacted_files = Vec::new();
            return Ok(state);
        };
        debug!(query_chars = query.len(), "built retrieval query");

        let embedding = match self.encoder.encode(&query) {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(error = %err, "query could not be embedded, returning no files");
                state.impacted_files = Vec::new();
                return Ok(state);
            }
        };

        let hits = match self
            .index
            .search(embedding, self.config.top_k, self.config.threshold)
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                // Retrieval degradation is not fatal: downstream stages
                // handle an empty file list.
                warn!(error = %err, "vector index unavailable, returning no files");
                state.impacted_files = Vec::new();
                return Ok(state);
            }
        };

        state.impacted_files = hits
            .into_iter()
            .map(|hit| ImpactedFile {
                file_path: hit.file_path,
                relevance_score: hit.score.clamp(0.0, 1.0),
                snippet: excerpt(&hit.content, MAX_SNIPPET_CHARS).to_string(),
            })
            .collect();

        info!(files = state.impacted_files.len(), "retrieval complete");
        Ok(state)
    }
}
