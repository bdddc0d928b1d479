//! HTTP surface over the orchestrator.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reglens_core::orchestrator::{AnalysisOutcome, AnalyzeError};
use reglens_core::state::{Impact, ImpactedFile, RegulatoryModel, RiskLevel, SharedState};
use reglens_core::{AnalysisRequest, Orchestrator};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Header carrying a per-request model API key override.
const API_KEY_HEADER: &str = "x-llm-api-key";

/// Builds the application router.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/health", get(health))
        .route("/audit/{execution_id}", get(audit))
        .with_state(orchestrator)
}

#[derive(Debug, Deserialize)]
struct AnalyzeBody {
    regulatory_text: String,
    #[serde(default)]
    repo_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    execution_id: String,
    change_detected: Option<bool>,
    risk_level: Option<RiskLevel>,
    regulatory_model: Option<RegulatoryModel>,
    impacted_files: Vec<ImpactedFile>,
    impact_analysis: Vec<Impact>,
    technical_spec: Option<String>,
    kiro_prompt: Option<String>,
    graph_visualization: String,
    timestamp: String,
    error: Option<String>,
}

impl AnalyzeResponse {
    fn from_outcome(outcome: AnalysisOutcome) -> Self {
        let state = outcome.state;
        Self {
            execution_id: state.execution_id,
            change_detected: state.change_detected,
            risk_level: state.risk_level,
            regulatory_model: state.regulatory_model,
            impacted_files: state.impacted_files,
            impact_analysis: state.impact_analysis,
            technical_spec: state.technical_spec,
            kiro_prompt: state.kiro_prompt,
            graph_visualization: outcome.graph_visualization,
            timestamp: state.execution_timestamp.to_rfc3339(),
            error: state.error,
        }
    }
}

#[derive(Debug, Serialize)]
struct AuditResponse {
    execution_id: String,
    raw_text: String,
    change_detected: Option<bool>,
    risk_level: Option<RiskLevel>,
    structured_model: Option<RegulatoryModel>,
    impacted_files: Vec<ImpactedFile>,
    impact_analysis: Vec<Impact>,
    technical_spec: Option<String>,
    kiro_prompt: Option<String>,
    error: Option<String>,
    timestamp: String,
}

impl AuditResponse {
    fn from_state(state: SharedState) -> Self {
        Self {
            execution_id: state.execution_id,
            raw_text: state.regulatory_text,
            change_detected: state.change_detected,
            risk_level: state.risk_level,
            structured_model: state.regulatory_model,
            impacted_files: state.impacted_files,
            impact_analysis: state.impact_analysis,
            technical_spec: state.technical_spec,
            kiro_prompt: state.kiro_prompt,
            error: state.error,
            timestamp: state.execution_timestamp.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_id: Option<String>,
    error: String,
}

fn error_response(status: StatusCode, execution_id: Option<String>, error: String) -> Response {
    (status, Json(ErrorBody {
        execution_id,
        error,
    }))
        .into_response()
}

async fn analyze(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Json(body): Json<AnalyzeBody>,
) -> Response {
    let api_key_override = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let request = AnalysisRequest {
        regulatory_text: body.regulatory_text,
        repo_path: body.repo_path,
        api_key_override,
    };

    // The run is detached from the connection: a client disconnect drops
    // this handler future, but the spawned run still completes and is
    // audited.
    let run = tokio::spawn(async move { orchestrator.analyze(request).await });
    let result = match run.await {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "analysis task failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                None,
                "analysis task failed".to_string(),
            );
        }
    };

    match result {
        Ok(outcome) => {
            if let Some(error) = outcome.state.error.clone() {
                // The partial state is audited; the client gets the id so
                // the record can be retrieved.
                error!(execution_id = %outcome.state.execution_id, error = %error, "run failed");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some(outcome.state.execution_id),
                    error,
                );
            }
            info!(execution_id = %outcome.state.execution_id, "run succeeded");
            (StatusCode::OK, Json(AnalyzeResponse::from_outcome(outcome))).into_response()
        }
        Err(AnalyzeError::EmptyInput) => error_response(
            StatusCode::BAD_REQUEST,
            None,
            "regulatory text cannot be empty".to_string(),
        ),
        Err(AnalyzeError::Gateway(err)) => {
            error!(error = %err, "gateway construction failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, None, err.to_string())
        }
        Err(err) => {
            error!(error = %err, "analysis request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, None, err.to_string())
        }
    }
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    (StatusCode::OK, Json(orchestrator.health().await)).into_response()
}

async fn audit(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(execution_id): Path<String>,
) -> Response {
    match orchestrator.audit_record(execution_id.clone()).await {
        Ok(Some(state)) => {
            (StatusCode::OK, Json(AuditResponse::from_state(state))).into_response()
        }
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            None,
            format!("execution not found: {execution_id}"),
        ),
        Err(err) => {
            error!(error = %err, "audit lookup failed");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                None,
                "audit store unavailable".to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use reglens_core::config::LlmBackendConfig;
    use reglens_core::RuntimeConfig;
    use tower::util::ServiceExt;

    use super::*;

    /// Configuration whose model backend points at a closed port, so every
    /// gateway call fails fast and the keyword fallbacks drive the run.
    fn offline_config() -> RuntimeConfig {
        RuntimeConfig {
            llm: LlmBackendConfig::Ollama {
                base_url: "http://127.0.0.1:1".to_string(),
                model: "llama2".to_string(),
            },
            database_path: ":memory:".to_string(),
            repo_path: PathBuf::from("unused"),
            embedding_model: "feature-hash-v1/64".to_string(),
            llm_min_tokens: 100,
            run_budget: Duration::from_secs(120),
        }
    }

    fn app() -> Router {
        let orchestrator =
            Arc::new(Orchestrator::new(offline_config()).expect("orchestrator builds"));
        build_router(orchestrator)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn post_analyze(text: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/analyze")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "regulatory_text": text }).to_string(),
            ))
            .expect("request")
    }

    #[tokio::test]
    async fn empty_text_is_bad_request() {
        let response = app().oneshot(post_analyze("   ")).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().expect("error").contains("empty"));
    }

    #[tokio::test]
    async fn analyze_returns_full_state_payload() {
        let response = app()
            .oneshot(post_analyze(
                "Nova regra obrigatória: alteração nas regras de validação de chaves Pix.",
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["execution_id"].as_str().expect("id").len(), 36);
        assert_eq!(body["change_detected"], serde_json::json!(true));
        assert!(body["graph_visualization"]
            .as_str()
            .expect("diagram")
            .starts_with("graph LR"));
        assert!(body["technical_spec"].is_string());
        assert!(body["kiro_prompt"].is_string());
        assert!(body["error"].is_null());
    }

    #[tokio::test]
    async fn health_reports_component_status() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "connected");
        assert_eq!(body["vector_store"], "ready");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn unknown_audit_record_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/audit/00000000-0000-4000-8000-000000000000")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn analyzed_run_is_retrievable_from_audit() {
        let app = app();
        let response = app
            .clone()
            .oneshot(post_analyze(
                "Nova regra obrigatória: alteração nas regras de validação.",
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let execution_id = body["execution_id"].as_str().expect("id").to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/audit/{execution_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let audit = body_json(response).await;
        assert_eq!(audit["execution_id"], serde_json::json!(execution_id));
        assert!(audit["raw_text"]
            .as_str()
            .expect("raw text")
            .contains("Nova regra"));
    }
}
