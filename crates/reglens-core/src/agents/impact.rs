//! Impact: per-file technical impact analysis.

use std::path::PathBuf;

use tracing::{info, warn};

use super::{excerpt, Agent, AgentError};
use crate::llm::{extract_json, LlmError, LlmGateway};
use crate::state::{Impact, ImpactType, RegulatoryModel, Severity, SharedState};

/// Portion of each file's content handed to the model.
const CONTENT_EXCERPT_CHARS: usize = 1500;

/// Fourth pipeline stage: analyzes each retrieved file against the
/// regulation. One file failing never aborts the sequence; that file gets
/// a low-severity fallback impact instead.
pub struct ImpactAgent {
    gateway: LlmGateway,
    repo_root: PathBuf,
}

impl ImpactAgent {
    /// Creates the agent reading file contents under `repo_root`.
    #[must_use]
    pub fn new(gateway: LlmGateway, repo_root: PathBuf) -> Self {
        Self { gateway, repo_root }
    }

    /// Path-based impact classification, used both as the prompt hint and
    /// as the clamp target when the model emits an unknown category.
    fn classify_path(file_path: &str) -> ImpactType {
        let lower = file_path.to_lowercase();
        if lower.contains("database") && lower.contains("model") {
            return ImpactType::SchemaChange;
        }
        if lower.contains("validator") {
            return ImpactType::Validation;
        }
        if lower.contains("api") && (lower.contains("endpoint") || lower.contains("schema")) {
            return ImpactType::ApiContract;
        }
        ImpactType::BusinessLogic
    }

    fn prompt(
        model: &RegulatoryModel,
        file_path: &str,
        content: &str,
        hint: ImpactType,
    ) -> String {
        let requirements = model
            .requirements
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Analise o impacto de uma mudança regulatória em um arquivo de código.\n\
             \n\
             MUDANÇA REGULATÓRIA:\n\
             Título: {title}\n\
             Descrição: {description}\n\
             \n\
             Requisitos:\n{requirements}\n\
             \n\
             Sistemas Afetados: {systems}\n\
             \n\
             ARQUIVO A ANALISAR:\n\
             Caminho: {file_path}\n\
             Categoria provável: {hint}\n\
             \n\
             Conteúdo (início):\n{content}\n\
             \n\
             Responda APENAS com um objeto JSON válido no formato:\n\
             {{\"impact_type\": \"schema_change|business_logic|validation|api_contract\", \
             \"severity\": \"low|medium|high\", \
             \"description\": \"por que este arquivo precisa mudar\", \
             \"suggested_changes\": [\"mudança 1\", \"mudança 2\"]}}\n\
             \n\
             JSON:",
            title = model.title,
            description = model.description,
            systems = model.affected_systems.join(", "),
            content = excerpt(content, CONTENT_EXCERPT_CHARS),
        )
    }

    fn impact_from_json(
        value: &serde_json::Value,
        file_path: &str,
        hint: ImpactType,
    ) -> Impact {
        // Enum fields are clamped to their allowed sets.
        let impact_type = value
            .get("impact_type")
            .and_then(serde_json::Value::as_str)
            .and_then(ImpactType::parse)
            .unwrap_or(hint);
        let severity = value
            .get("severity")
            .and_then(serde_json::Value::as_str)
            .and_then(Severity::parse)
            .unwrap_or(Severity::Medium);
        let description = value
            .get("description")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map_or_else(
                || "This file requires modifications to comply with the regulatory change.".to_string(),
                ToString::to_string,
            );
        let suggested_changes = value
            .get("suggested_changes")
            .and_then(serde_json::Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Impact {
            file_path: file_path.to_string(),
            impact_type,
            severity,
            description,
            suggested_changes,
        }
    }

    fn fallback_impact(file_path: &str, reason: &str) -> Impact {
        Impact {
            file_path: file_path.to_string(),
            impact_type: ImpactType::BusinessLogic,
            severity: Severity::Low,
            description: format!(
                "Impact analysis failed for this file ({reason}); manual review required."
            ),
            suggested_changes: vec![
                "Review this file manually against the regulatory requirements".to_string(),
            ],
        }
    }

    async fn analyze_file(
        &self,
        model: &RegulatoryModel,
        file_path: &str,
    ) -> Result<Impact, AgentError> {
        let hint = Self::classify_path(file_path);

        let content = match tokio::fs::read_to_string(self.repo_root.join(file_path)).await {
            Ok(content) => content,
            Err(err) => {
                warn!(file = file_path, error = %err, "file unreadable, using fallback impact");
                return Ok(Self::fallback_impact(file_path, "file could not be read"));
            }
        };

        let prompt = Self::prompt(model, file_path, &content, hint);
        match self.gateway.generate(&prompt, 1500).await {
            Ok(response) => match extract_json(&response) {
                Some(value) => Ok(Self::impact_from_json(&value, file_path, hint)),
                None => {
                    warn!(file = file_path, "unparseable analysis, using fallback impact");
                    Ok(Self::fallback_impact(
                        file_path,
                        "model output was not parseable",
                    ))
                }
            },
            Err(err @ (LlmError::Unavailable(_) | LlmError::EmptyResponse { .. })) => {
                warn!(file = file_path, error = %err, "model unavailable, using fallback impact");
                Ok(Self::fallback_impact(file_path, "model unavailable"))
            }
            // Auth and rate-limit failures will not improve on the next
            // file; halt the run.
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait::async_trait]
impl Agent for ImpactAgent {
    fn name(&self) -> &'static str {
        "Impact"
    }

    async fn run(&self, mut state: SharedState) -> Result<SharedState, AgentError> {
        let Some(model) = state.regulatory_model.clone() else {
            return Err(AgentError::Failed(
                "regulatory_model is required but not set".to_string(),
            ));
        };

        if state.impacted_files.is_empty() {
            info!("no impacted files to analyze");
            state.impact_analysis = Vec::new();
            return Ok(state);
        }

        let mut analysis = Vec::with_capacity(state.impacted_files.len());
        for file in &state.impacted_files {
            let impact = self.analyze_file(&model, &file.file_path).await?;
            analysis.push(impact);
        }

        info!(impacts = analysis.len(), "impact analysis complete");
        state.impact_analysis = analysis;
        Ok(state)
    }
}
