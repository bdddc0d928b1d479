//! Run orchestration.
//!
//! The [`Orchestrator`] owns the process-wide services (embedding encoder,
//! vector index, audit store, language-model provider), constructed once at
//! application start, and drives the per-run lifecycle: validate input,
//! mint an execution id, execute the agent pipeline, render the
//! visualization, and persist the audit record. It is the boundary the
//! HTTP and CLI surfaces call into.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{
    Agent, CodeReaderAgent, CodeReaderConfig, ImpactAgent, PromptBuilderAgent, SentinelAgent,
    SpecGeneratorAgent, TranslatorAgent,
};
use crate::audit::{AuditError, SqliteAuditStore};
use crate::config::RuntimeConfig;
use crate::embedding::{EmbeddingError, HashingEncoder};
use crate::executor::PipelineExecutor;
use crate::indexer::{IndexReport, IndexerError, RepositoryIndexer};
use crate::llm::{provider_from_config, LlmError, LlmGateway, LlmProvider};
use crate::state::SharedState;
use crate::vector_index::{SqliteVectorIndex, VectorIndexError};
use crate::visualizer::render_mermaid;

/// Errors raised while constructing the orchestrator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// The embedding model could not be loaded.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// The vector index could not be opened.
    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),

    /// The audit store could not be opened.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// The language-model provider could not be constructed.
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Errors raised for one analysis request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnalyzeError {
    /// The input text was empty. No run is started and nothing is audited.
    #[error("regulatory text cannot be empty")]
    EmptyInput,

    /// A per-request gateway could not be constructed.
    #[error(transparent)]
    Gateway(#[from] LlmError),
}

/// One analysis request.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    /// Raw regulatory text to analyze.
    pub regulatory_text: String,
    /// Target repository; defaults to the configured one.
    pub repo_path: Option<String>,
    /// Per-request API key override for the cloud model backends.
    pub api_key_override: Option<String>,
}

/// Result of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// Final (or partial, when `error` is set) run state.
    pub state: SharedState,
    /// Mermaid diagram of the run.
    pub graph_visualization: String,
}

/// Component health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status: `healthy` or `degraded`.
    pub status: String,
    /// Audit database status: `connected` or `disconnected`.
    pub database: String,
    /// Vector store status: `ready` or `unavailable`.
    pub vector_store: String,
    /// Report timestamp, RFC 3339.
    pub timestamp: String,
}

/// Process-wide service owner and run driver.
pub struct Orchestrator {
    config: RuntimeConfig,
    provider: Arc<dyn LlmProvider>,
    encoder: Arc<HashingEncoder>,
    index: SqliteVectorIndex,
    audit: SqliteAuditStore,
    reader_config: CodeReaderConfig,
}

impl Orchestrator {
    /// Constructs every service from configuration. Called once at
    /// application start.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the embedding model, the
    /// database, or the model provider cannot be initialized.
    pub fn new(config: RuntimeConfig) -> Result<Self, OrchestratorError> {
        let encoder = Arc::new(HashingEncoder::from_identity(&config.embedding_model)?);
        let index = SqliteVectorIndex::open(&config.database_path, encoder.dimension())?;
        let audit = SqliteAuditStore::open(&config.database_path)?;
        let provider = provider_from_config(&config.llm, None)?;
        Ok(Self {
            config,
            provider,
            encoder,
            index,
            audit,
            reader_config: CodeReaderConfig::default(),
        })
    }

    /// Assembles an orchestrator from pre-built services. Used by tests
    /// and by embedders that manage storage themselves.
    #[must_use]
    pub fn from_parts(
        config: RuntimeConfig,
        provider: Arc<dyn LlmProvider>,
        encoder: Arc<HashingEncoder>,
        index: SqliteVectorIndex,
        audit: SqliteAuditStore,
    ) -> Self {
        Self {
            config,
            provider,
            encoder,
            index,
            audit,
            reader_config: CodeReaderConfig::default(),
        }
    }

    /// Replaces the retrieval tuning.
    #[must_use]
    pub fn with_reader_config(mut self, reader_config: CodeReaderConfig) -> Self {
        self.reader_config = reader_config;
        self
    }

    /// The audit store, for read-side surfaces.
    #[must_use]
    pub fn audit_store(&self) -> &SqliteAuditStore {
        &self.audit
    }

    /// Runs one analysis end to end and persists the audit record.
    ///
    /// The run itself never fails this function: pipeline failures come
    /// back as an outcome whose state carries `error`, so callers can map
    /// them to their own error surface while still returning the
    /// execution id.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzeError::EmptyInput`] for blank text (no audit
    /// record is written) and [`AnalyzeError::Gateway`] when a
    /// per-request gateway cannot be built.
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, AnalyzeError> {
        if request.regulatory_text.trim().is_empty() {
            return Err(AnalyzeError::EmptyInput);
        }

        let execution_id = Uuid::new_v4().to_string();
        let repo_path = request
            .repo_path
            .clone()
            .unwrap_or_else(|| self.config.repo_path.to_string_lossy().into_owned());
        info!(execution_id = %execution_id, repo = %repo_path, "run accepted");

        let gateway = match request.api_key_override.as_deref() {
            // A per-request key builds a fresh provider for this run only.
            Some(key) => LlmGateway::from_config(
                &self.config.llm,
                self.config.llm_min_tokens,
                Some(key),
            )?,
            None => LlmGateway::new(Arc::clone(&self.provider), self.config.llm_min_tokens),
        };

        let executor = self.build_pipeline(gateway, PathBuf::from(&repo_path));
        let state = SharedState::new(execution_id, request.regulatory_text, repo_path);

        let started = Instant::now();
        let final_state = executor.execute(state).await;
        let elapsed = started.elapsed();
        if elapsed > self.config.run_budget {
            // The budget is soft: the completed run is still returned and
            // audited.
            warn!(
                execution_id = %final_state.execution_id,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.config.run_budget.as_millis() as u64,
                "run exceeded soft budget"
            );
        }

        let graph_visualization = render_mermaid(&final_state);

        // Audit is best effort: an unavailable store degrades health but
        // does not withhold the result from the caller.
        if let Err(err) = self.audit.save(&final_state).await {
            warn!(
                execution_id = %final_state.execution_id,
                error = %err,
                "audit save failed"
            );
        }

        info!(
            execution_id = %final_state.execution_id,
            duration_ms = elapsed.as_millis() as u64,
            failed = final_state.error.is_some(),
            "run finished"
        );
        Ok(AnalysisOutcome {
            state: final_state,
            graph_visualization,
        })
    }

    /// Fetches the audit record for one execution id.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the store cannot answer.
    pub async fn audit_record(
        &self,
        execution_id: String,
    ) -> Result<Option<SharedState>, AuditError> {
        self.audit.get(execution_id).await
    }

    /// Indexes a source tree into the vector index.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] when the cycle aborts.
    pub async fn index_repository(
        &self,
        repo_path: &std::path::Path,
        extensions: Vec<String>,
    ) -> Result<IndexReport, IndexerError> {
        let indexer =
            RepositoryIndexer::new(Arc::clone(&self.encoder), self.index.clone(), extensions);
        indexer.index(repo_path).await
    }

    /// Reports component health.
    pub async fn health(&self) -> HealthReport {
        let database = match self.audit.ping().await {
            Ok(()) => "connected",
            Err(err) => {
                warn!(error = %err, "audit store health probe failed");
                "disconnected"
            }
        };
        let vector_store = match self.index.count().await {
            Ok(_) => "ready",
            Err(err) => {
                warn!(error = %err, "vector index health probe failed");
                "unavailable"
            }
        };
        let status = if database == "connected" && vector_store == "ready" {
            "healthy"
        } else {
            "degraded"
        };
        HealthReport {
            status: status.to_string(),
            database: database.to_string(),
            vector_store: vector_store.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn build_pipeline(&self, gateway: LlmGateway, repo_root: PathBuf) -> PipelineExecutor {
        let agents: Vec<Box<dyn Agent>> = vec![
            Box::new(SentinelAgent::new(gateway.clone())),
            Box::new(TranslatorAgent::new(gateway.clone())),
            Box::new(CodeReaderAgent::new(
                Arc::clone(&self.encoder),
                self.index.clone(),
                self.reader_config.clone(),
            )),
            Box::new(ImpactAgent::new(gateway.clone(), repo_root)),
            Box::new(SpecGeneratorAgent::new(gateway.clone())),
            Box::new(PromptBuilderAgent::new(gateway)),
        ];
        PipelineExecutor::new(agents)
    }
}

#[cfg(test)]
mod tests;
