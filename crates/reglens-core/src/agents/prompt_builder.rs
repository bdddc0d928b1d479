//! PromptBuilder: executable developer prompt.

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::{Agent, AgentError};
use crate::llm::{LlmError, LlmGateway};
use crate::state::{Impact, RegulatoryModel, SharedState};

/// Standard constraints appended to every generated prompt.
const CONSTRAINTS: [&str; 7] = [
    "Maintain backward compatibility where possible",
    "Follow existing code patterns and conventions",
    "Update documentation for all changes",
    "Ensure all changes are properly tested",
    "Keep changes minimal and focused on the requirements",
    "Ensure error handling is robust",
    "Follow security best practices",
];

/// Sixth and final pipeline stage: turns the specification and impact list
/// into a labeled, executable instruction prompt for a developer (or a
/// coding agent).
pub struct PromptBuilderAgent {
    gateway: LlmGateway,
}

impl PromptBuilderAgent {
    /// Creates the agent over the given gateway.
    #[must_use]
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    fn context(model: &RegulatoryModel) -> String {
        let mut parts = vec![
            format!("Regulatory Change: {}", model.title),
            String::new(),
            format!("Description: {}", model.description),
        ];
        if !model.requirements.is_empty() {
            parts.push(String::new());
            parts.push("Key Requirements:".to_string());
            for (i, requirement) in model.requirements.iter().enumerate() {
                parts.push(format!("{}. {requirement}", i + 1));
            }
        }
        if !model.deadlines.is_empty() {
            parts.push(String::new());
            parts.push("Deadlines:".to_string());
            for deadline in &model.deadlines {
                parts.push(format!("- {}: {}", deadline.date, deadline.description));
            }
        }
        if !model.affected_systems.is_empty() {
            parts.push(String::new());
            parts.push(format!(
                "Affected Systems: {}",
                model.affected_systems.join(", ")
            ));
        }
        parts.join("\n")
    }

    /// Refines the objective with one model call; transient failures fall
    /// back to a deterministic statement.
    async fn objective(&self, model: &RegulatoryModel) -> Result<String, AgentError> {
        let prompt = format!(
            "Escreva uma única frase em inglês, direta e imperativa, descrevendo o \
             objetivo de implementação para a seguinte mudança regulatória:\n\
             \n\
             {title}: {description}\n\
             \n\
             Frase:",
            title = model.title,
            description = model.description,
        );
        match self.gateway.generate(&prompt, 120).await {
            Ok(text) => {
                let line = text.lines().map(str::trim).find(|l| !l.is_empty());
                Ok(line.map_or_else(
                    || format!("Implement changes to comply with {}", model.title),
                    ToString::to_string,
                ))
            }
            Err(err @ (LlmError::Unavailable(_) | LlmError::EmptyResponse { .. })) => {
                warn!(error = %err, "objective refinement failed, using deterministic objective");
                Ok(format!("Implement changes to comply with {}", model.title))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn specific_instructions(impacts: &[Impact]) -> String {
        if impacts.is_empty() {
            return "1. Review regulatory requirements manually\n\
                    2. Identify affected code components\n\
                    3. Implement necessary changes"
                .to_string();
        }

        // High severity work first, grouped by impact category.
        let mut ordered: Vec<&Impact> = impacts.iter().collect();
        ordered.sort_by(|a, b| b.severity.cmp(&a.severity));
        let mut grouped: BTreeMap<&'static str, Vec<&Impact>> = BTreeMap::new();
        for impact in ordered {
            grouped
                .entry(impact.impact_type.display_name())
                .or_default()
                .push(impact);
        }

        let mut lines = Vec::new();
        let mut step = 1;
        for (group, entries) in grouped {
            lines.push(format!("{step}. {group}:"));
            step += 1;
            for impact in entries {
                lines.push(format!(
                    "   - [{}] {}",
                    impact.severity.to_string().to_uppercase(),
                    impact.file_path
                ));
                if !impact.description.is_empty() {
                    lines.push(format!("     {}", impact.description));
                }
            }
            lines.push(String::new());
        }
        lines.push(format!(
            "{step}. Run all existing tests to ensure no regressions"
        ));
        lines.push(format!(
            "{}. Add new tests covering the regulatory scenarios",
            step + 1
        ));
        lines.join("\n")
    }

    fn file_modifications(impacts: &[Impact]) -> String {
        if impacts.is_empty() {
            return "No specific file modifications identified; manual analysis required."
                .to_string();
        }
        let mut lines = Vec::new();
        for impact in impacts {
            lines.push(format!(
                "- {} ({}, {} severity):",
                impact.file_path, impact.impact_type, impact.severity
            ));
            if impact.suggested_changes.is_empty() {
                lines.push("  * Review and update as needed".to_string());
            } else {
                for change in &impact.suggested_changes {
                    lines.push(format!("  * {change}"));
                }
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    fn validation_steps(technical_spec: Option<&str>, model: &RegulatoryModel) -> String {
        let mut steps: Vec<String> = Vec::new();

        if let Some(spec) = technical_spec {
            steps.extend(extract_acceptance_criteria(spec));
        }
        if steps.is_empty() {
            steps.extend(
                model
                    .requirements
                    .iter()
                    .map(|r| format!("Verify implementation of: {r}")),
            );
        }
        steps.push("Run the existing test suite and ensure all tests pass".to_string());
        steps.push("Perform manual testing of the affected functionality".to_string());
        steps.push("Review the changes with the compliance team".to_string());

        steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn constraints() -> String {
        CONSTRAINTS
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pulls the bullet list out of the specification's Acceptance Criteria
/// section.
fn extract_acceptance_criteria(technical_spec: &str) -> Vec<String> {
    let mut criteria = Vec::new();
    let mut in_section = false;
    for line in technical_spec.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("## ") {
            in_section = trimmed == "## Acceptance Criteria";
            continue;
        }
        if in_section {
            if let Some(item) = trimmed.strip_prefix("- ") {
                if !item.is_empty() {
                    criteria.push(item.to_string());
                }
            }
        }
    }
    criteria
}

#[async_trait::async_trait]
impl Agent for PromptBuilderAgent {
    fn name(&self) -> &'static str {
        "PromptBuilder"
    }

    async fn run(&self, mut state: SharedState) -> Result<SharedState, AgentError> {
        let Some(model) = state.regulatory_model.clone() else {
            return Err(AgentError::Failed(
                "regulatory_model is required but not set".to_string(),
            ));
        };

        let objective = self.objective(&model).await?;
        let prompt = format!(
            "CONTEXT:\n{context}\n\
             \n\
             OBJECTIVE:\n{objective}\n\
             \n\
             SPECIFIC INSTRUCTIONS:\n{instructions}\n\
             \n\
             FILE MODIFICATIONS:\n{modifications}\n\
             \n\
             VALIDATION STEPS:\n{validation}\n\
             \n\
             CONSTRAINTS:\n{constraints}\n",
            context = Self::context(&model),
            instructions = Self::specific_instructions(&state.impact_analysis),
            modifications = Self::file_modifications(&state.impact_analysis),
            validation = Self::validation_steps(state.technical_spec.as_deref(), &model),
            constraints = Self::constraints(),
        );

        info!(prompt_chars = prompt.len(), "developer prompt generated");
        state.kiro_prompt = Some(prompt);
        Ok(state)
    }
}
