//! End-to-end pipeline tests over scripted model output.

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::config::LlmBackendConfig;
use crate::llm::testing::ScriptedProvider;
use crate::state::RiskLevel;

const DIMENSION: usize = 64;

const SENTINEL_CHANGE: &str =
    r#"{"change_detected": true, "risk_level": "high", "reasoning": "prazos e multas"}"#;
const SENTINEL_NO_CHANGE: &str =
    r#"{"change_detected": false, "risk_level": "low", "reasoning": "informativo"}"#;
const TRANSLATOR_MODEL: &str = r#"{
    "title": "Validação de chaves Pix",
    "description": "Estabelece regras para validação de chaves Pix.",
    "requirements": ["Validar o formato da chave pix antes do registro"],
    "deadlines": [{"date": "2024-12-31", "description": "Prazo de adequação"}],
    "affected_systems": ["Pix"]
}"#;
const IMPACT_ANALYSIS: &str = r#"{
    "impact_type": "validation",
    "severity": "high",
    "description": "O validador de chaves precisa aplicar o novo formato.",
    "suggested_changes": ["Adicionar verificação de formato", "Cobrir com testes"]
}"#;

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        llm: LlmBackendConfig::Ollama {
            base_url: "http://localhost:11434".to_string(),
            model: "llama2".to_string(),
        },
        database_path: ":memory:".to_string(),
        repo_path: PathBuf::from("unused"),
        embedding_model: format!("feature-hash-v1/{DIMENSION}"),
        llm_min_tokens: 100,
        run_budget: Duration::from_secs(120),
    }
}

fn encoder() -> Arc<HashingEncoder> {
    Arc::new(HashingEncoder::from_identity(&format!("feature-hash-v1/{DIMENSION}")).expect("model"))
}

fn orchestrator_with(
    provider: ScriptedProvider,
    index: SqliteVectorIndex,
    audit: SqliteAuditStore,
) -> Orchestrator {
    Orchestrator::from_parts(test_config(), Arc::new(provider), encoder(), index, audit)
}

async fn seeded_repo_and_index(encoder: &HashingEncoder) -> (TempDir, SqliteVectorIndex) {
    let repo = TempDir::new().expect("temp dir");
    let files = [
        (
            "domain/validators.py",
            "def validate_pix_key(key):\n    \"\"\"Valida o formato da chave pix.\"\"\"\n    return True\n",
        ),
        (
            "api/endpoints.py",
            "def create_pix_key(request):\n    return register_key(request)\n",
        ),
    ];
    let index = SqliteVectorIndex::in_memory(encoder.dimension()).expect("open");
    for (path, content) in files {
        let full = repo.path().join(path);
        std::fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
        std::fs::write(&full, content).expect("write");
        let vector = encoder.encode(content).expect("encode");
        index
            .upsert(path.to_string(), content.to_string(), vector)
            .await
            .expect("upsert");
    }
    (repo, index)
}

fn request(text: &str, repo_path: Option<String>) -> AnalysisRequest {
    AnalysisRequest {
        regulatory_text: text.to_string(),
        repo_path,
        api_key_override: None,
    }
}

#[test]
fn pipeline_order_is_fixed() {
    let orchestrator = orchestrator_with(
        ScriptedProvider::always("unused"),
        SqliteVectorIndex::in_memory(DIMENSION).expect("open"),
        SqliteAuditStore::in_memory().expect("open"),
    );
    let gateway = LlmGateway::new(Arc::new(ScriptedProvider::always("x")), 100);
    let executor = orchestrator.build_pipeline(gateway, PathBuf::from("repo"));
    assert_eq!(
        executor.agent_names(),
        vec![
            "Sentinel",
            "Translator",
            "CodeReader",
            "Impact",
            "SpecGenerator",
            "PromptBuilder"
        ]
    );
}

#[tokio::test]
async fn empty_input_is_rejected_before_any_run() {
    let orchestrator = orchestrator_with(
        ScriptedProvider::always("unused"),
        SqliteVectorIndex::in_memory(DIMENSION).expect("open"),
        SqliteAuditStore::in_memory().expect("open"),
    );
    assert!(matches!(
        orchestrator.analyze(request("   \n", None)).await,
        Err(AnalyzeError::EmptyInput)
    ));
}

/// Informational text: the pipeline still runs to completion, produces a
/// minimal specification, and writes one audit row.
#[tokio::test]
async fn informational_text_completes_without_impacts() {
    let provider = ScriptedProvider::with_fallback(
        vec![Ok(SENTINEL_NO_CHANGE.to_string())],
        "Sem alterações aplicáveis.",
    );
    let orchestrator = orchestrator_with(
        provider,
        SqliteVectorIndex::in_memory(DIMENSION).expect("open"),
        SqliteAuditStore::in_memory().expect("open"),
    );

    let outcome = orchestrator
        .analyze(request(
            "Este é um comunicado informativo sem alteração de regras.",
            None,
        ))
        .await
        .expect("analyze");
    let state = &outcome.state;

    assert_eq!(state.change_detected, Some(false));
    assert_eq!(state.risk_level, Some(RiskLevel::Low));
    assert!(state.impacted_files.is_empty());
    assert!(state.error.is_none());
    assert!(state
        .technical_spec
        .as_deref()
        .expect("spec present")
        .contains("No impacted components identified."));
    assert!(state.kiro_prompt.is_some());
    assert!(outcome.graph_visualization.contains("0 Files Found"));
    state.validate().expect("final state valid");

    let audited = orchestrator
        .audit_record(state.execution_id.clone())
        .await
        .expect("audit readable")
        .expect("one audit row");
    assert_eq!(audited.execution_id, state.execution_id);
}

/// Pix key validation resolution: change detected, the validator file is
/// retrieved, analyzed, and cited everywhere downstream.
#[tokio::test]
async fn pix_resolution_flows_through_all_stages() {
    let encoder = encoder();
    let (repo, index) = seeded_repo_and_index(&encoder).await;
    let provider = ScriptedProvider::with_fallback(
        vec![
            Ok(SENTINEL_CHANGE.to_string()),
            Ok(TRANSLATOR_MODEL.to_string()),
        ],
        IMPACT_ANALYSIS,
    );
    let orchestrator = orchestrator_with(
        provider,
        index,
        SqliteAuditStore::in_memory().expect("open"),
    );

    let outcome = orchestrator
        .analyze(request(
            "RESOLUÇÃO BCB Nº 789/2024 - Estabelece regras para validação de chaves Pix.",
            Some(repo.path().to_string_lossy().into_owned()),
        ))
        .await
        .expect("analyze");
    let state = &outcome.state;

    assert_eq!(state.change_detected, Some(true));
    assert!(matches!(
        state.risk_level,
        Some(RiskLevel::Medium | RiskLevel::High)
    ));
    assert!(state
        .impacted_files
        .iter()
        .any(|f| f.file_path == "domain/validators.py"));
    assert_eq!(state.impact_analysis.len(), state.impacted_files.len());

    let spec = state.technical_spec.as_deref().expect("spec present");
    for impact in &state.impact_analysis {
        assert!(spec.contains(&impact.file_path));
    }
    let prompt = state.kiro_prompt.as_deref().expect("prompt present");
    assert!(prompt.contains(&state.impact_analysis[0].file_path));

    assert!(state.error.is_none());
    state.validate().expect("final state valid");

    assert!(orchestrator
        .audit_record(state.execution_id.clone())
        .await
        .expect("audit readable")
        .is_some());
}

/// Deadline extraction: the structured model carries a parseable date.
#[tokio::test]
async fn deadline_is_extracted_and_parseable() {
    let provider = ScriptedProvider::with_fallback(
        vec![
            Ok(SENTINEL_CHANGE.to_string()),
            Ok(TRANSLATOR_MODEL.to_string()),
        ],
        "texto de apoio",
    );
    let orchestrator = orchestrator_with(
        provider,
        SqliteVectorIndex::in_memory(DIMENSION).expect("open"),
        SqliteAuditStore::in_memory().expect("open"),
    );

    let outcome = orchestrator
        .analyze(request(
            "Nova regra obrigatória com prazo até 31/12/2024.",
            None,
        ))
        .await
        .expect("analyze");

    let model = outcome.state.regulatory_model.expect("model present");
    assert!(!model.deadlines.is_empty());
    assert_eq!(
        model.deadlines[0].parsed_date(),
        chrono::NaiveDate::from_ymd_opt(2024, 12, 31)
    );
}

/// One transient gateway failure during Translator: the retry absorbs it,
/// the run completes cleanly, and exactly one audit row is written.
#[tokio::test]
async fn transient_translator_failure_is_retried() {
    let provider = ScriptedProvider::with_fallback(
        vec![
            Ok(SENTINEL_CHANGE.to_string()),
            Err(LlmError::Unavailable("connection reset".to_string())),
            Ok(TRANSLATOR_MODEL.to_string()),
        ],
        "texto de apoio",
    );
    let orchestrator = orchestrator_with(
        provider,
        SqliteVectorIndex::in_memory(DIMENSION).expect("open"),
        SqliteAuditStore::in_memory().expect("open"),
    );

    let outcome = orchestrator
        .analyze(request("Nova regra obrigatória para chaves Pix.", None))
        .await
        .expect("analyze");

    assert!(outcome.state.error.is_none());
    assert_eq!(
        outcome
            .state
            .regulatory_model
            .expect("model present")
            .title,
        "Validação de chaves Pix"
    );
    assert!(orchestrator
        .audit_record(outcome.state.execution_id.clone())
        .await
        .expect("audit readable")
        .is_some());
}

/// Vector index offline: retrieval degrades to an empty list, the run
/// still completes and is audited, and health reports the outage.
#[tokio::test]
async fn vector_index_outage_degrades_gracefully() {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("reglens.db");
    let index = SqliteVectorIndex::open(&db_path, DIMENSION).expect("open index");
    let audit = SqliteAuditStore::open(&db_path).expect("open audit");

    // Take the embeddings table out from under the index.
    rusqlite::Connection::open(&db_path)
        .expect("raw connection")
        .execute("DROP TABLE embeddings", [])
        .expect("drop table");

    let provider = ScriptedProvider::with_fallback(
        vec![
            Ok(SENTINEL_CHANGE.to_string()),
            Ok(TRANSLATOR_MODEL.to_string()),
        ],
        "texto de apoio",
    );
    let orchestrator = orchestrator_with(provider, index, audit);

    let outcome = orchestrator
        .analyze(request("Nova regra obrigatória para chaves Pix.", None))
        .await
        .expect("analyze");

    assert!(outcome.state.error.is_none());
    assert!(outcome.state.impacted_files.is_empty());
    assert!(outcome.state.technical_spec.is_some());
    assert!(orchestrator
        .audit_record(outcome.state.execution_id.clone())
        .await
        .expect("audit readable")
        .is_some());

    let health = orchestrator.health().await;
    assert_eq!(health.vector_store, "unavailable");
    assert_eq!(health.database, "connected");
    assert_eq!(health.status, "degraded");
}

/// Fatal model failure: the run halts, the partial state carries the
/// failing agent's name, and the partial state is still audited.
#[tokio::test]
async fn fatal_failure_audits_partial_state() {
    let provider = ScriptedProvider::new(vec![Err(LlmError::Auth("invalid key".to_string()))]);
    let orchestrator = orchestrator_with(
        provider,
        SqliteVectorIndex::in_memory(DIMENSION).expect("open"),
        SqliteAuditStore::in_memory().expect("open"),
    );

    let outcome = orchestrator
        .analyze(request("Nova regra obrigatória.", None))
        .await
        .expect("analyze returns partial outcome");

    let error = outcome.state.error.as_deref().expect("error recorded");
    assert!(error.starts_with("Sentinel:"), "got: {error}");
    assert!(outcome.state.regulatory_model.is_none());

    let audited = orchestrator
        .audit_record(outcome.state.execution_id.clone())
        .await
        .expect("audit readable")
        .expect("partial state audited");
    assert_eq!(audited.error.as_deref(), Some(error));
}

#[tokio::test]
async fn health_is_green_on_working_stores() {
    let orchestrator = orchestrator_with(
        ScriptedProvider::always("unused"),
        SqliteVectorIndex::in_memory(DIMENSION).expect("open"),
        SqliteAuditStore::in_memory().expect("open"),
    );
    let health = orchestrator.health().await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.database, "connected");
    assert_eq!(health.vector_store, "ready");
}

#[tokio::test]
async fn execution_ids_are_unique_uuids() {
    let orchestrator = orchestrator_with(
        ScriptedProvider::with_fallback(vec![], "texto"),
        SqliteVectorIndex::in_memory(DIMENSION).expect("open"),
        SqliteAuditStore::in_memory().expect("open"),
    );

    let a = orchestrator
        .analyze(request("Nova regra obrigatória: alteração de limites.", None))
        .await
        .expect("analyze");
    let b = orchestrator
        .analyze(request("Nova regra obrigatória: alteração de limites.", None))
        .await
        .expect("analyze");

    assert_eq!(a.state.execution_id.len(), 36);
    assert_ne!(a.state.execution_id, b.state.execution_id);
}
