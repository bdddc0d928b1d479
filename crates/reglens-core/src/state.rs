//! Shared run state for the analysis pipeline.
//!
//! One [`SharedState`] exists per run. It is created by the orchestrator,
//! handed to the executor, mutated by exactly one agent at a time, and
//! serialized on termination (success or failure), after which it is
//! read-only. Every field is JSON-serializable and the whole state
//! round-trips through serde without loss.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cap on the number of files the retrieval stage may surface.
pub const MAX_IMPACTED_FILES: usize = 10;

/// Maximum snippet length carried per impacted file, in characters.
pub const MAX_SNIPPET_CHARS: usize = 200;

/// Required Markdown section headings of a technical specification, in
/// the order they must appear.
pub const SPEC_SECTION_HEADINGS: [&str; 5] = [
    "## Overview",
    "## Affected Components",
    "## Required Changes",
    "## Acceptance Criteria",
    "## Estimated Effort",
];

/// Required section labels of a developer prompt, in order.
pub const PROMPT_SECTION_LABELS: [&str; 6] = [
    "CONTEXT:",
    "OBJECTIVE:",
    "SPECIFIC INSTRUCTIONS:",
    "FILE MODIFICATIONS:",
    "VALIDATION STEPS:",
    "CONSTRAINTS:",
];

/// Risk classification assigned by the Sentinel stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Informational text or distant deadlines.
    Low,
    /// Recommended changes or moderate deadlines.
    Medium,
    /// Mandatory changes with near deadlines or penalties.
    High,
}

impl RiskLevel {
    /// Parses a risk label, accepting Portuguese and English spellings.
    /// Unknown labels are rejected so callers can apply their default.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" | "baixo" | "baixa" => Some(Self::Low),
            "medium" | "medio" | "médio" | "media" | "média" => Some(Self::Medium),
            "high" | "alto" | "alta" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Category of technical impact on a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactType {
    /// Database models and persisted schema.
    SchemaChange,
    /// Services and domain logic.
    BusinessLogic,
    /// Business-rule validators.
    Validation,
    /// Endpoints and request/response schemas.
    ApiContract,
}

impl ImpactType {
    /// Parses an impact-type label as emitted by the language model.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "schema_change" => Some(Self::SchemaChange),
            "business_logic" => Some(Self::BusinessLogic),
            "validation" => Some(Self::Validation),
            "api_contract" => Some(Self::ApiContract),
            _ => None,
        }
    }

    /// Human-facing display name used in generated documents.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::SchemaChange => "Database Schema Changes",
            Self::BusinessLogic => "Business Logic",
            Self::Validation => "Validation Rules",
            Self::ApiContract => "API Contracts",
        }
    }
}

impl std::fmt::Display for ImpactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SchemaChange => write!(f, "schema_change"),
            Self::BusinessLogic => write!(f, "business_logic"),
            Self::Validation => write!(f, "validation"),
            Self::ApiContract => write!(f, "api_contract"),
        }
    }
}

/// Severity of a single impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Simple or minimal changes.
    Low,
    /// Moderate changes.
    Medium,
    /// Complex mandatory changes.
    High,
}

impl Severity {
    /// Effort weight used for estimation: low 1, medium 2, high 3.
    #[must_use]
    pub const fn effort_weight(self) -> u32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    /// Parses a severity label, accepting Portuguese and English spellings.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" | "baixo" | "baixa" => Some(Self::Low),
            "medium" | "medio" | "médio" | "media" | "média" => Some(Self::Medium),
            "high" | "alto" | "alta" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A deadline extracted from regulatory text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Deadline {
    /// Date in `YYYY-MM-DD` form when the model could normalize it.
    pub date: String,
    /// What the deadline applies to.
    pub description: String,
}

impl Deadline {
    /// Returns the calendar date when `date` is a well-formed `YYYY-MM-DD`.
    #[must_use]
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").ok()
    }
}

/// Structured projection of the input regulatory text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegulatoryModel {
    /// Short title of the regulatory change.
    pub title: String,
    /// Purpose and scope of the regulation.
    pub description: String,
    /// Specific actionable requirements.
    pub requirements: Vec<String>,
    /// Deadlines mentioned in the text.
    pub deadlines: Vec<Deadline>,
    /// Systems or components named by the regulation.
    pub affected_systems: Vec<String>,
}

/// A source file surfaced by semantic retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImpactedFile {
    /// Repository-relative path.
    pub file_path: String,
    /// Cosine similarity score in `[0, 1]`.
    pub relevance_score: f32,
    /// First characters of the file content, for preview.
    pub snippet: String,
}

/// Technical consequence of the regulatory change for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Impact {
    /// Path of the impacted file.
    pub file_path: String,
    /// Impact category.
    pub impact_type: ImpactType,
    /// Severity of the required change.
    pub severity: Severity,
    /// Why this file needs modification.
    pub description: String,
    /// Recommended code modifications.
    pub suggested_changes: Vec<String>,
}

/// The single mutable record threaded through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedState {
    /// Unique run identifier (36-character UUID).
    pub execution_id: String,
    /// Original regulatory text input.
    pub regulatory_text: String,
    /// Logical identifier of the target source tree.
    pub repo_path: String,
    /// Wall-clock start of the run, UTC.
    pub execution_timestamp: DateTime<Utc>,
    /// Set by Sentinel: whether the text describes a mandatory change.
    pub change_detected: Option<bool>,
    /// Set by Sentinel.
    pub risk_level: Option<RiskLevel>,
    /// Set by Translator.
    pub regulatory_model: Option<RegulatoryModel>,
    /// Set by CodeReader; ordered by descending relevance.
    pub impacted_files: Vec<ImpactedFile>,
    /// Set by Impact; one entry per analyzed file, in input order.
    pub impact_analysis: Vec<Impact>,
    /// Set by SpecGenerator: Markdown specification.
    pub technical_spec: Option<String>,
    /// Set by PromptBuilder: executable developer prompt.
    pub kiro_prompt: Option<String>,
    /// Populated iff the run halted abnormally, as `"<Agent>: <message>"`.
    pub error: Option<String>,
}

/// A state invariant violated by an agent update.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateViolation {
    /// More impacted files than the configured cap.
    #[error("impacted_files exceeds the cap: {count}")]
    TooManyImpactedFiles {
        /// Observed count.
        count: usize,
    },

    /// A relevance score outside `[0, 1]`.
    #[error("relevance score out of range for {file_path}: {score}")]
    ScoreOutOfRange {
        /// File carrying the bad score.
        file_path: String,
        /// The offending value.
        score: f32,
    },

    /// Relevance scores are not monotonically non-increasing.
    #[error("impacted_files not ordered by descending score at index {index}")]
    ScoresNotOrdered {
        /// First index that breaks the ordering.
        index: usize,
    },

    /// An empty file path in retrieval or impact output.
    #[error("empty file_path in {context}")]
    EmptyFilePath {
        /// Which collection held the entry.
        context: &'static str,
    },

    /// A snippet longer than the allowed preview length.
    #[error("snippet for {file_path} exceeds the preview limit")]
    SnippetTooLong {
        /// File carrying the oversized snippet.
        file_path: String,
    },

    /// An impact references a file missing from the retrieval output.
    #[error("impact references {file_path} which is not in impacted_files")]
    ImpactPathUnknown {
        /// The unmatched path.
        file_path: String,
    },

    /// The technical specification omits an analyzed file.
    #[error("technical_spec does not mention {file_path}")]
    SpecMissingFile {
        /// The unmentioned path.
        file_path: String,
    },

    /// The technical specification is missing a required heading, or the
    /// headings are out of order.
    #[error("technical_spec missing or misordered heading: {heading}")]
    SpecMissingHeading {
        /// The absent heading.
        heading: &'static str,
    },

    /// The developer prompt is missing a required section label.
    #[error("kiro_prompt missing section label: {label}")]
    PromptMissingLabel {
        /// The absent label.
        label: &'static str,
    },

    /// The state no longer serializes to JSON.
    #[error("state is not JSON-serializable: {0}")]
    NotSerializable(String),
}

impl SharedState {
    /// Creates a fresh state for a new run.
    #[must_use]
    pub fn new(
        execution_id: impl Into<String>,
        regulatory_text: impl Into<String>,
        repo_path: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            regulatory_text: regulatory_text.into(),
            repo_path: repo_path.into(),
            execution_timestamp: Utc::now(),
            change_detected: None,
            risk_level: None,
            regulatory_model: None,
            impacted_files: Vec::new(),
            impact_analysis: Vec::new(),
            technical_spec: None,
            kiro_prompt: None,
            error: None,
        }
    }

    /// Records a halt reason as `"<Agent>: <message>"`. A previously set
    /// error is never overwritten.
    pub fn record_error(&mut self, agent: &str, message: impl std::fmt::Display) {
        if self.error.is_none() {
            self.error = Some(format!("{agent}: {message}"));
        }
    }

    /// Checks the state invariants that every agent update must preserve.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant. The executor treats any
    /// violation as fatal.
    pub fn validate(&self) -> Result<(), StateViolation> {
        if self.impacted_files.len() > MAX_IMPACTED_FILES {
            return Err(StateViolation::TooManyImpactedFiles {
                count: self.impacted_files.len(),
            });
        }

        let mut prev_score: Option<f32> = None;
        for (index, file) in self.impacted_files.iter().enumerate() {
            if file.file_path.trim().is_empty() {
                return Err(StateViolation::EmptyFilePath {
                    context: "impacted_files",
                });
            }
            if !file.relevance_score.is_finite()
                || !(0.0..=1.0).contains(&file.relevance_score)
            {
                return Err(StateViolation::ScoreOutOfRange {
                    file_path: file.file_path.clone(),
                    score: file.relevance_score,
                });
            }
            if let Some(prev) = prev_score {
                if file.relevance_score > prev {
                    return Err(StateViolation::ScoresNotOrdered { index });
                }
            }
            prev_score = Some(file.relevance_score);
            if file.snippet.chars().count() > MAX_SNIPPET_CHARS {
                return Err(StateViolation::SnippetTooLong {
                    file_path: file.file_path.clone(),
                });
            }
        }

        for impact in &self.impact_analysis {
            if impact.file_path.trim().is_empty() {
                return Err(StateViolation::EmptyFilePath {
                    context: "impact_analysis",
                });
            }
            if !self
                .impacted_files
                .iter()
                .any(|f| f.file_path == impact.file_path)
            {
                return Err(StateViolation::ImpactPathUnknown {
                    file_path: impact.file_path.clone(),
                });
            }
        }

        if let Some(spec) = &self.technical_spec {
            let mut cursor = 0;
            for heading in SPEC_SECTION_HEADINGS {
                match spec[cursor..].find(heading) {
                    Some(offset) => cursor += offset + heading.len(),
                    None => return Err(StateViolation::SpecMissingHeading { heading }),
                }
            }
            for impact in &self.impact_analysis {
                if !spec.contains(&impact.file_path) {
                    return Err(StateViolation::SpecMissingFile {
                        file_path: impact.file_path.clone(),
                    });
                }
            }
        }

        if let Some(prompt) = &self.kiro_prompt {
            for label in PROMPT_SECTION_LABELS {
                if !prompt.contains(label) {
                    return Err(StateViolation::PromptMissingLabel { label });
                }
            }
        }

        serde_json::to_string(self)
            .map(|_| ())
            .map_err(|err| StateViolation::NotSerializable(err.to_string()))
    }
}
