//! Sentinel: change detection and risk assessment.

use std::time::Instant;

use tracing::{debug, warn};

use super::{excerpt, Agent, AgentError};
use crate::llm::{extract_json, LlmError, LlmGateway};
use crate::state::{RiskLevel, SharedState};

/// Keywords indicating a mandatory regulatory change (Portuguese).
const CHANGE_KEYWORDS: [&str; 11] = [
    "alteração",
    "nova regra",
    "obrigatório",
    "mudança",
    "modificação",
    "atualização",
    "revisão",
    "novo requisito",
    "deve",
    "deverá",
    "é necessário",
];

/// Keywords indicating high implementation urgency.
const HIGH_URGENCY_KEYWORDS: [&str; 8] = [
    "imediato",
    "urgente",
    "prazo curto",
    "obrigatório",
    "compliance",
    "penalidade",
    "multa",
    "sanção",
];

/// Keywords indicating moderate urgency.
const MEDIUM_URGENCY_KEYWORDS: [&str; 5] = [
    "recomendado",
    "sugerido",
    "prazo moderado",
    "gradual",
    "transição",
];

/// Portion of the input handed to the model.
const TEXT_EXCERPT_CHARS: usize = 10_000;

/// Soft completion budget for this stage.
const SOFT_BUDGET_SECS: u64 = 10;

/// First pipeline stage: decides whether the text describes a mandatory
/// change and how risky it is.
pub struct SentinelAgent {
    gateway: LlmGateway,
}

impl SentinelAgent {
    /// Creates the agent over the given gateway.
    #[must_use]
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    fn prompt(text: &str) -> String {
        format!(
            "Analise o seguinte texto regulatório e determine se ele descreve uma mudança \
             obrigatória de regras e qual o nível de risco para implementação.\n\
             \n\
             Palavras indicativas de mudança obrigatória: \"alteração\", \"nova regra\", \
             \"obrigatório\".\n\
             \n\
             Critérios de risco:\n\
             - high: mudanças obrigatórias com prazos próximos ou penalidades\n\
             - medium: mudanças recomendadas ou prazos moderados\n\
             - low: texto informativo ou prazos distantes\n\
             \n\
             Texto:\n{}\n\
             \n\
             Responda APENAS com um objeto JSON válido no formato:\n\
             {{\"change_detected\": true, \"risk_level\": \"low|medium|high\", \
             \"reasoning\": \"...\"}}\n\
             \n\
             JSON:",
            excerpt(text, TEXT_EXCERPT_CHARS)
        )
    }

    fn keyword_assessment(text: &str) -> (bool, RiskLevel) {
        let lower = text.to_lowercase();
        let change_hits = CHANGE_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        if change_hits == 0 {
            return (false, RiskLevel::Low);
        }

        let high_hits = HIGH_URGENCY_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        let medium_hits = MEDIUM_URGENCY_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        let risk = if high_hits >= 2 {
            RiskLevel::High
        } else if high_hits >= 1 || medium_hits >= 1 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        (true, risk)
    }

    fn apply_model_output(state: &mut SharedState, value: &serde_json::Value) {
        let change_detected = value
            .get("change_detected")
            .and_then(json_bool)
            .unwrap_or_else(|| Self::keyword_assessment(&state.regulatory_text).0);

        // Unknown risk labels are rejected and default to medium.
        let risk_level = value
            .get("risk_level")
            .and_then(serde_json::Value::as_str)
            .and_then(RiskLevel::parse)
            .unwrap_or(RiskLevel::Medium);

        state.change_detected = Some(change_detected);
        state.risk_level = Some(if change_detected {
            risk_level
        } else {
            RiskLevel::Low
        });
    }

    fn apply_keyword_fallback(state: &mut SharedState) {
        let (change, risk) = Self::keyword_assessment(&state.regulatory_text);
        state.change_detected = Some(change);
        state.risk_level = Some(risk);
    }
}

fn json_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "sim" | "yes" => Some(true),
            "false" | "não" | "nao" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[async_trait::async_trait]
impl Agent for SentinelAgent {
    fn name(&self) -> &'static str {
        "Sentinel"
    }

    async fn run(&self, mut state: SharedState) -> Result<SharedState, AgentError> {
        let started = Instant::now();
        let prompt = Self::prompt(&state.regulatory_text);

        match self.gateway.generate(&prompt, 300).await {
            Ok(response) => match extract_json(&response) {
                Some(value) => Self::apply_model_output(&mut state, &value),
                None => {
                    debug!("model output had no parseable JSON, using keyword assessment");
                    Self::apply_keyword_fallback(&mut state);
                }
            },
            Err(err @ (LlmError::Unavailable(_) | LlmError::EmptyResponse { .. })) => {
                let lower = state.regulatory_text.to_lowercase();
                let has_signal = CHANGE_KEYWORDS.iter().any(|k| lower.contains(*k));
                if !has_signal {
                    // Nothing to fall back on: no keyword signal and no model.
                    return Err(err.into());
                }
                warn!(error = %err, "model unavailable, using keyword assessment");
                Self::apply_keyword_fallback(&mut state);
            }
            Err(err) => return Err(err.into()),
        }

        let elapsed = started.elapsed();
        if elapsed.as_secs() >= SOFT_BUDGET_SECS {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "sentinel exceeded soft budget");
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::llm::testing::ScriptedProvider;

    const MANDATORY_TEXT: &str =
        "RESOLUÇÃO BCB Nº 789/2024 estabelece alteração obrigatória nas regras de \
         validação de chaves Pix, com penalidade e multa em caso de descumprimento.";

    fn state_with(text: &str) -> SharedState {
        SharedState::new("11111111-1111-4111-8111-111111111111", text, "repo")
    }

    fn gateway(provider: ScriptedProvider) -> LlmGateway {
        LlmGateway::new(Arc::new(provider), 100)
    }

    #[tokio::test]
    async fn parses_model_json() {
        let agent = SentinelAgent::new(gateway(ScriptedProvider::always(
            "{\"change_detected\": true, \"risk_level\": \"high\", \"reasoning\": \"prazos\"}",
        )));
        let state = agent.run(state_with(MANDATORY_TEXT)).await.expect("run");
        assert_eq!(state.change_detected, Some(true));
        assert_eq!(state.risk_level, Some(RiskLevel::High));
    }

    #[tokio::test]
    async fn unknown_risk_defaults_to_medium() {
        let agent = SentinelAgent::new(gateway(ScriptedProvider::always(
            "{\"change_detected\": true, \"risk_level\": \"critical\"}",
        )));
        let state = agent.run(state_with(MANDATORY_TEXT)).await.expect("run");
        assert_eq!(state.risk_level, Some(RiskLevel::Medium));
    }

    #[tokio::test]
    async fn no_change_forces_low_risk() {
        let agent = SentinelAgent::new(gateway(ScriptedProvider::always(
            "{\"change_detected\": false, \"risk_level\": \"high\"}",
        )));
        let state = agent
            .run(state_with("Comunicado meramente informativo."))
            .await
            .expect("run");
        assert_eq!(state.change_detected, Some(false));
        assert_eq!(state.risk_level, Some(RiskLevel::Low));
    }

    #[tokio::test]
    async fn unparseable_output_falls_back_to_keywords() {
        let agent = SentinelAgent::new(gateway(ScriptedProvider::always(
            "Não sei responder em JSON.",
        )));
        let state = agent.run(state_with(MANDATORY_TEXT)).await.expect("run");
        assert_eq!(state.change_detected, Some(true));
        assert_eq!(state.risk_level, Some(RiskLevel::High));
    }

    #[tokio::test]
    async fn transient_failure_with_keywords_falls_back() {
        let agent = SentinelAgent::new(gateway(ScriptedProvider::new(vec![
            Err(LlmError::Unavailable("down".to_string())),
            Err(LlmError::Unavailable("still down".to_string())),
        ])));
        let state = agent.run(state_with(MANDATORY_TEXT)).await.expect("run");
        assert_eq!(state.change_detected, Some(true));
    }

    #[tokio::test]
    async fn transient_failure_without_signal_is_fatal() {
        let agent = SentinelAgent::new(gateway(ScriptedProvider::new(vec![
            Err(LlmError::Unavailable("down".to_string())),
            Err(LlmError::Unavailable("still down".to_string())),
        ])));
        let result = agent
            .run(state_with("Texto sem qualquer palavra indicativa."))
            .await;
        assert!(matches!(result, Err(AgentError::Llm(_))));
    }

    #[tokio::test]
    async fn auth_failure_is_fatal() {
        let agent = SentinelAgent::new(gateway(ScriptedProvider::new(vec![Err(
            LlmError::Auth("bad key".to_string()),
        )])));
        let result = agent.run(state_with(MANDATORY_TEXT)).await;
        assert!(matches!(result, Err(AgentError::Llm(LlmError::Auth(_)))));
    }
}
