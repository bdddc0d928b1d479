//! # reglens-core
//!
//! Core library for reglens, a multi-agent pipeline that analyzes free-form
//! regulatory text against a source-code repository and produces a structured
//! regulation model, a ranked list of impacted files, per-file impact
//! analyses, a Markdown technical specification, and an executable developer
//! prompt. Every run is persisted as an audit record.
//!
//! ## Architecture
//!
//! - **Shared state**: one typed, serializable [`state::SharedState`] per
//!   run, threaded through the pipeline and mutated by exactly one agent at
//!   a time.
//! - **Agents**: six specialized stages (Sentinel, Translator, CodeReader,
//!   Impact, SpecGenerator, PromptBuilder) behind the [`agents::Agent`]
//!   trait.
//! - **Executor**: [`executor::PipelineExecutor`] runs the agents in a fixed
//!   sequence with a schema gate after each stage and halt-on-fatal
//!   semantics.
//! - **Retrieval**: [`embedding::HashingEncoder`] plus
//!   [`vector_index::SqliteVectorIndex`] provide deterministic semantic
//!   search over indexed source files; [`indexer::RepositoryIndexer`] keeps
//!   the index consistent with a source tree.
//! - **LLM gateway**: [`llm::LlmGateway`] presents a uniform
//!   `generate(prompt, max_tokens)` contract over the Ollama, OpenAI, and
//!   Gemini backends.
//! - **Persistence**: [`audit::SqliteAuditStore`] records every run,
//!   including partial state on failure, keyed by execution id.
//! - **Orchestration**: [`orchestrator::Orchestrator`] owns the run
//!   lifecycle and is the boundary the HTTP and CLI surfaces call into.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agents;
pub mod audit;
pub mod config;
pub mod embedding;
pub mod executor;
pub mod indexer;
pub mod llm;
pub mod orchestrator;
pub mod state;
pub mod vector_index;
pub mod visualizer;

pub use config::RuntimeConfig;
pub use orchestrator::{AnalysisOutcome, AnalysisRequest, Orchestrator};
pub use state::SharedState;
