//! Translator: structures the regulatory text into a formal model.

use tracing::{debug, warn};

use super::{excerpt, Agent, AgentError};
use crate::llm::{extract_json, LlmError, LlmGateway};
use crate::state::{Deadline, RegulatoryModel, SharedState};

/// Maximum title length carried into the model.
const TITLE_MAX_CHARS: usize = 100;

/// Second pipeline stage: one model call yielding the structured
/// [`RegulatoryModel`], with a minimal deterministic fallback when the
/// model output cannot be used.
pub struct TranslatorAgent {
    gateway: LlmGateway,
}

impl TranslatorAgent {
    /// Creates the agent over the given gateway.
    #[must_use]
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    fn prompt(text: &str) -> String {
        format!(
            "Analise o seguinte texto regulatório e extraia informações estruturadas.\n\
             \n\
             Texto Regulatório:\n{text}\n\
             \n\
             Extraia as seguintes informações e retorne APENAS um objeto JSON válido \
             (sem texto adicional):\n\
             \n\
             {{\n\
             \x20\x20\"title\": \"Título breve da mudança regulatória\",\n\
             \x20\x20\"description\": \"Descrição detalhada do que a regulação estabelece\",\n\
             \x20\x20\"requirements\": [\"Requisito 1\", \"Requisito 2\"],\n\
             \x20\x20\"deadlines\": [{{\"date\": \"YYYY-MM-DD\", \"description\": \"Descrição do prazo\"}}],\n\
             \x20\x20\"affected_systems\": [\"Sistema 1\", \"Sistema 2\"]\n\
             }}\n\
             \n\
             Instruções:\n\
             - title: crie um título conciso (máximo 100 caracteres)\n\
             - description: resuma o propósito e escopo da regulação\n\
             - requirements: liste itens acionáveis específicos\n\
             - deadlines: extraia todas as datas mencionadas no formato YYYY-MM-DD\n\
             - affected_systems: identifique sistemas mencionados (ex: \"Pix\", \"pagamentos\")\n\
             \n\
             JSON:"
        )
    }

    /// Builds a model from parsed output, falling back per-field to the
    /// minimal model's values.
    fn model_from_json(value: &serde_json::Value, text: &str) -> RegulatoryModel {
        let fallback = Self::minimal_model(text);

        let title = value
            .get("title")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map_or(fallback.title, |t| excerpt(t, TITLE_MAX_CHARS).to_string());
        let description = value
            .get("description")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map_or(fallback.description, ToString::to_string);

        let requirements = string_list(value.get("requirements"));
        let affected_systems = string_list(value.get("affected_systems"));
        let deadlines = value
            .get("deadlines")
            .and_then(serde_json::Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let date = entry.get("date")?.as_str()?.trim().to_string();
                        let description = entry
                            .get("description")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or_default()
                            .trim()
                            .to_string();
                        if date.is_empty() {
                            None
                        } else {
                            Some(Deadline { date, description })
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        RegulatoryModel {
            title,
            description,
            requirements,
            deadlines,
            affected_systems,
        }
    }

    /// Minimal valid model: first non-empty line as title, full text as
    /// description, empty lists.
    fn minimal_model(text: &str) -> RegulatoryModel {
        let title = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map_or_else(
                || "Regulatory Change".to_string(),
                |line| excerpt(line, TITLE_MAX_CHARS).to_string(),
            );
        RegulatoryModel {
            title,
            description: text.to_string(),
            requirements: Vec::new(),
            deadlines: Vec::new(),
            affected_systems: Vec::new(),
        }
    }

    fn check_round_trip(model: &RegulatoryModel) -> Result<(), AgentError> {
        let json = serde_json::to_string(model)
            .map_err(|err| AgentError::Failed(format!("model failed to serialize: {err}")))?;
        let restored: RegulatoryModel = serde_json::from_str(&json)
            .map_err(|err| AgentError::Failed(format!("model failed to deserialize: {err}")))?;
        if &restored != model {
            return Err(AgentError::Failed(
                "model did not survive serialization round trip".to_string(),
            ));
        }
        Ok(())
    }
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
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
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Agent for TranslatorAgent {
    fn name(&self) -> &'static str {
        "Translator"
    }

    async fn run(&self, mut state: SharedState) -> Result<SharedState, AgentError> {
        let prompt = Self::prompt(&state.regulatory_text);

        let model = match self.gateway.generate(&prompt, 2000).await {
            Ok(response) => match extract_json(&response) {
                Some(value) => Self::model_from_json(&value, &state.regulatory_text),
                None => {
                    debug!("model output had no parseable JSON, building minimal model");
                    Self::minimal_model(&state.regulatory_text)
                }
            },
            Err(err @ (LlmError::Unavailable(_) | LlmError::EmptyResponse { .. })) => {
                warn!(error = %err, "model unavailable, building minimal model");
                Self::minimal_model(&state.regulatory_text)
            }
            Err(err) => return Err(err.into()),
        };

        Self::check_round_trip(&model)?;
        state.regulatory_model = Some(model);
        Ok(state)
    }
}
