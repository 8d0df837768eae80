//! HTTP surface integration tests
//!
//! Drives the full router (middleware included) with `oneshot` requests.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use careroute::config::Config;
use careroute::engine::RoutingEngine;
use careroute::handlers::{self, AppState};
use careroute::metrics::Metrics;
use careroute::middleware::REQUEST_ID_HEADER;
use serde_json::Value;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

const CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[[providers]]
name = "local"
kind = "local_template"
tier = "local"

[[providers.templates]]
patterns = ["capital of france"]
answer = "The capital of France is Paris."

[[providers]]
name = "free-1"
kind = "static"
tier = "free"
cost_per_unit = 0.001
quota_limit = 5
response = "free answer"

[[providers]]
name = "premium-1"
kind = "static"
tier = "premium"
cost_per_unit = 0.02
response = "Please reach out to a crisis line."
safety = true
"#;

fn state() -> AppState {
    let metrics = Metrics::new().unwrap();
    let engine = RoutingEngine::builder(Config::from_str(CONFIG).unwrap())
        .with_metrics(metrics.clone())
        .build()
        .unwrap();
    AppState::new(Arc::new(engine), metrics)
}

fn app() -> Router {
    handlers::app(state())
}

fn post_query(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/query")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_query_returns_answer_object() {
    let response = app()
        .oneshot(post_query(
            r#"{"user_id": "u-1", "text": "What's the capital of France?"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let json = json_body(response).await;
    assert_eq!(json["answer_text"], "The capital of France is Paris.");
    assert_eq!(json["provider_used"], "local");
    assert_eq!(json["tier"], "local");
    assert_eq!(json["cached"], false);
    assert_eq!(json["degraded"], false);
    assert_eq!(json["crisis"], false);
    assert!(json["query_id"].is_string());
}

#[tokio::test]
async fn test_crisis_query_over_http() {
    let response = app()
        .oneshot(post_query(r#"{"user_id": "u-1", "text": "I want to die"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["crisis"], true);
    assert_eq!(json["provider_used"], "premium-1");
    assert_eq!(json["answer_text"], "Please reach out to a crisis line.");
}

#[tokio::test]
async fn test_blank_text_is_bad_request() {
    let response = app()
        .oneshot(post_query(r#"{"user_id": "u-1", "text": "   "}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert!(
        json["error"].as_str().unwrap().contains("text cannot be empty"),
        "got {json}"
    );
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let response = app().oneshot(post_query("{not json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_fields_are_bad_request() {
    let response = app()
        .oneshot(post_query(r#"{"text": "hello"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_content_type_is_unsupported_media_type() {
    let request = Request::builder()
        .method("POST")
        .uri("/query")
        .body(Body::from(r#"{"user_id": "u", "text": "hello"}"#))
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_get_on_query_is_method_not_allowed() {
    let response = app().oneshot(get("/query")).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_health_reports_providers() {
    let response = app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "OK");
    assert_eq!(json["providers"], 3);
    assert_eq!(json["background_tasks"], "operational");
}

#[tokio::test]
async fn test_costs_and_quota_reflect_answered_queries() {
    let app = app();
    let response = app
        .clone()
        .oneshot(post_query(
            r#"{"user_id": "u", "text": "I have been feeling a bit stressed at work lately and would like a few ideas"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["provider_used"], "free-1");

    let costs = json_body(app.clone().oneshot(get("/costs")).await.unwrap()).await;
    let records = costs["report"]["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["provider_name"], "free-1");
    assert_eq!(records[0]["requests"], 1);

    let quota = json_body(app.oneshot(get("/quota")).await.unwrap()).await;
    let free = quota["providers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["provider"] == "free-1")
        .unwrap()
        .clone();
    assert_eq!(free["units_used"], 1);
    assert_eq!(free["remaining"], 4);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_query_counters() {
    let app = app();
    app.clone()
        .oneshot(post_query(
            r#"{"user_id": "u", "text": "What's the capital of France?"}"#,
        ))
        .await
        .unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("careroute_queries_total"));
}

#[tokio::test]
async fn test_cache_admin_endpoints() {
    let app = app();
    let body = r#"{"user_id": "u", "text": "I have been feeling a bit stressed at work lately and would like a few ideas"}"#;
    app.clone().oneshot(post_query(body)).await.unwrap();

    let stats = json_body(app.clone().oneshot(get("/admin/cache")).await.unwrap()).await;
    assert_eq!(stats["entries"], 1);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/admin/cache")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let stats = json_body(app.oneshot(get("/admin/cache")).await.unwrap()).await;
    assert_eq!(stats["entries"], 0);
}

#[tokio::test]
async fn test_admin_reload_applies_new_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        CONFIG
            .replace("response = \"free answer\"", "response = \"updated answer\"")
            .as_bytes(),
    )
    .unwrap();

    let app = handlers::app(state().with_config_path(file.path()));
    let reload = Request::builder()
        .method("POST")
        .uri("/admin/reload")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(reload).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "reloaded");

    let response = app
        .oneshot(post_query(
            r#"{"user_id": "u", "text": "I have been feeling a bit stressed at work lately and would like a few ideas"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["answer_text"], "updated answer");
}

#[tokio::test]
async fn test_admin_reload_with_invalid_file_keeps_serving() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.replace("safety = true", "").as_bytes())
        .unwrap();

    let app = handlers::app(state().with_config_path(file.path()));
    let reload = Request::builder()
        .method("POST")
        .uri("/admin/reload")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(reload).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json_body(response).await["error"].is_string());

    let response = app
        .oneshot(post_query(r#"{"user_id": "u", "text": "I want to die"}"#))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["provider_used"], "premium-1");
}
