//! OpenAI-compatible provider against a mock HTTP server
//!
//! Verifies status mapping (success, 429, 402, quota bodies, 5xx, malformed
//! answers), timeout enforcement, and that the engine moves past a failing
//! remote provider.

use careroute::config::Config;
use careroute::engine::RoutingEngine;
use careroute::error::ProviderError;
use careroute::providers::{OpenAiCompatibleProvider, Provider};
use careroute::router::Query;
use std::str::FromStr;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(remote_url: &str) -> Config {
    Config::from_str(&format!(
        r#"
[server]
host = "127.0.0.1"
port = 3000

[[providers]]
name = "local"
kind = "local_template"
tier = "local"
templates = [{{ patterns = ["hello"], answer = "Hi!" }}]

[[providers]]
name = "remote-free"
kind = "openai_compatible"
tier = "free"
base_url = "{remote_url}"
model = "small-model"
max_tokens = 256
priority = 1

[[providers]]
name = "backup-free"
kind = "static"
tier = "free"
cost_per_unit = 0.001
priority = 2
response = "backup answer"

[[providers]]
name = "premium"
kind = "static"
tier = "premium"
cost_per_unit = 0.02
response = "premium answer"
safety = true
"#
    ))
    .expect("test config should be valid")
}

fn provider(server: &MockServer) -> OpenAiCompatibleProvider {
    let config = config(&format!("{}/v1", server.uri()));
    OpenAiCompatibleProvider::from_config(
        config.provider("remote-free").unwrap(),
        reqwest::Client::new(),
    )
    .unwrap()
}

async fn ask(server: &MockServer) -> Result<String, ProviderError> {
    provider(server)
        .attempt(
            &Query::new("u", "Tell me something interesting"),
            Duration::from_secs(2),
        )
        .await
        .map(|r| r.text)
}

async fn respond_with(template: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(template)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_successful_completion_returns_answer_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "model": "small-model",
            "max_tokens": 256,
            "stream": false,
            "messages": [{"role": "user", "content": "Tell me something interesting"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  Octopuses have three hearts.  "}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(ask(&server).await.unwrap(), "Octopuses have three hearts.");
}

#[tokio::test]
async fn test_429_maps_to_rate_limited() {
    let server = respond_with(ResponseTemplate::new(429)).await;
    assert!(matches!(
        ask(&server).await,
        Err(ProviderError::RateLimited { .. })
    ));
}

#[tokio::test]
async fn test_402_maps_to_quota_exceeded() {
    let server = respond_with(ResponseTemplate::new(402)).await;
    assert!(matches!(
        ask(&server).await,
        Err(ProviderError::QuotaExceeded { .. })
    ));
}

#[tokio::test]
async fn test_insufficient_quota_body_maps_to_quota_exceeded() {
    let server = respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
        "error": {"type": "insufficient_quota", "message": "You exceeded your current quota"}
    })))
    .await;
    assert!(matches!(
        ask(&server).await,
        Err(ProviderError::QuotaExceeded { .. })
    ));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = respond_with(ResponseTemplate::new(500)).await;
    let err = ask(&server).await.unwrap_err();
    assert!(matches!(err, ProviderError::Transport { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_client_error_is_invalid_response() {
    let server = respond_with(ResponseTemplate::new(400)).await;
    let err = ask(&server).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidResponse { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_empty_choices_is_invalid_response() {
    let server = respond_with(
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
    )
    .await;
    assert!(matches!(
        ask(&server).await,
        Err(ProviderError::InvalidResponse { .. })
    ));
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = respond_with(ResponseTemplate::new(200).set_body_string("not json")).await;
    assert!(matches!(
        ask(&server).await,
        Err(ProviderError::InvalidResponse { .. })
    ));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = respond_with(
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "late"}}]
            }))
            .set_delay(Duration::from_secs(5)),
    )
    .await;

    let started = Instant::now();
    let result = provider(&server)
        .attempt(&Query::new("u", "hi there"), Duration::from_millis(300))
        .await;

    assert!(matches!(result, Err(ProviderError::Timeout { .. })));
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "timeout should fire near 300ms, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_engine_retries_transient_failure_once_then_advances() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let engine = RoutingEngine::from_config(config(&format!("{}/v1", server.uri()))).unwrap();
    let response = engine
        .submit_query(
            "u",
            "I have been feeling a bit stressed at work lately and would like a few ideas",
        )
        .await
        .unwrap();

    assert_eq!(response.provider_used.as_deref(), Some("backup-free"));
    assert_eq!(response.answer_text, "backup answer");
    assert_eq!(engine.quota().units_used("remote-free"), 0, "failed attempts are refunded");
}

#[tokio::test]
async fn test_engine_does_not_retry_rate_limited_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let engine = RoutingEngine::from_config(config(&format!("{}/v1", server.uri()))).unwrap();
    let response = engine
        .submit_query(
            "u",
            "I have been feeling a bit stressed at work lately and would like a few ideas",
        )
        .await
        .unwrap();

    assert_eq!(response.provider_used.as_deref(), Some("backup-free"));
}
