//! Tests for the gateway contract and JSON extraction.

use std::sync::Arc;

use super::testing::ScriptedProvider;
use super::*;

#[test]
fn extract_json_finds_object_wrapped_in_prose() {
    let text = "Claro! Aqui está o resultado:\n{\"title\": \"Pix\", \"n\": 2}\nEspero que ajude.";
    let value = extract_json(text).expect("object present");
    assert_eq!(value["title"], "Pix");
    assert_eq!(value["n"], 2);
}

#[test]
fn extract_json_handles_nested_structures_and_strings() {
    let text = r#"prefix {"a": {"b": ["}", "{"], "c": "escaped \" brace }"}} suffix"#;
    let value = extract_json(text).expect("nested object parses");
    assert_eq!(value["a"]["b"][0], "}");
}

#[test]
fn extract_json_finds_arrays() {
    let value = extract_json("the list: [1, 2, 3]").expect("array present");
    assert_eq!(value, serde_json::json!([1, 2, 3]));
}

#[test]
fn extract_json_returns_none_on_unbalanced_or_garbage() {
    assert!(extract_json("no json here").is_none());
    assert!(extract_json("{\"never\": \"closed\"").is_none());
    assert!(extract_json("{not valid json}").is_none());
}

#[tokio::test]
async fn gateway_clamps_max_tokens_to_floor() {
    let provider = Arc::new(ScriptedProvider::always("ok"));
    let gateway = LlmGateway::new(provider.clone(), 100);

    gateway.generate("p", 10).await.expect("generate");
    gateway.generate("p", 500).await.expect("generate");

    assert_eq!(provider.budgets(), vec![100, 500]);
}

#[tokio::test]
async fn gateway_retries_transient_failure_once() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(LlmError::Unavailable("connection reset".to_string())),
        Ok("recovered".to_string()),
    ]));
    let gateway = LlmGateway::new(provider.clone(), 100);

    let text = gateway.generate("p", 100).await.expect("second attempt");
    assert_eq!(text, "recovered");
    assert_eq!(provider.prompts().len(), 2);
}

#[tokio::test]
async fn gateway_gives_up_after_second_transient_failure() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(LlmError::Unavailable("down".to_string())),
        Err(LlmError::Unavailable("still down".to_string())),
    ]));
    let gateway = LlmGateway::new(provider, 100);

    assert!(matches!(
        gateway.generate("p", 100).await,
        Err(LlmError::Unavailable(_))
    ));
}

#[tokio::test]
async fn gateway_does_not_retry_rate_limits() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(LlmError::RateLimited(
        "429".to_string(),
    ))]));
    let gateway = LlmGateway::new(provider.clone(), 100);

    assert!(matches!(
        gateway.generate("p", 100).await,
        Err(LlmError::RateLimited(_))
    ));
    assert_eq!(provider.prompts().len(), 1);
}

#[tokio::test]
async fn empty_completion_is_an_error() {
    let provider = Arc::new(ScriptedProvider::always("   \n"));
    let gateway = LlmGateway::new(provider, 100);

    assert!(matches!(
        gateway.generate("p", 100).await,
        Err(LlmError::EmptyResponse { .. })
    ));
}

#[test]
fn status_mapping_matches_taxonomy() {
    assert!(matches!(
        error_for_status("openai", 401, String::new()),
        LlmError::Auth(_)
    ));
    assert!(matches!(
        error_for_status("openai", 429, String::new()),
        LlmError::RateLimited(_)
    ));
    assert!(matches!(
        error_for_status("openai", 503, String::new()),
        LlmError::Unavailable(_)
    ));
}
