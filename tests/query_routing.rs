//! End-to-end routing through the engine
//!
//! Covers the cheapest-first chain, cache reuse, deterministic fallback
//! order, degraded answers and the last-unit race on a shared quota.

use careroute::config::Config;
use careroute::engine::RoutingEngine;
use careroute::metrics::Metrics;
use std::str::FromStr;
use std::sync::Arc;

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
name = "free-b"
kind = "static"
tier = "free"
priority = 2
cost_per_unit = 0.001
quota_limit = 1
response = "answer from free-b"

[[providers]]
name = "free-a"
kind = "static"
tier = "free"
priority = 1
cost_per_unit = 0.001
quota_limit = 1
response = "answer from free-a"

[[providers]]
name = "premium"
kind = "static"
tier = "premium"
cost_per_unit = 0.05
quota_limit = 1
response = "answer from premium"
safety = true

[routing]
degraded_response = "Please try again later."
"#;

/// Free tier, no template match
const GENERAL: &str =
    "I have been feeling a bit stressed at work lately and would like a few ideas";

fn engine(config: &str) -> RoutingEngine {
    RoutingEngine::builder(Config::from_str(config).expect("test config should be valid"))
        .with_metrics(Metrics::new().unwrap())
        .build()
        .expect("engine should build")
}

#[tokio::test]
async fn test_capital_of_france_is_answered_locally_at_no_cost() {
    let engine = engine(CONFIG);

    let response = engine
        .submit_query("user-1", "What's the capital of France?")
        .await
        .unwrap();

    assert_eq!(response.answer_text, "The capital of France is Paris.");
    assert_eq!(response.provider_used.as_deref(), Some("local"));
    assert!(!response.crisis);
    assert!(!response.degraded);

    let totals = engine.ledger().totals_by_provider();
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].provider_name, "local");
    assert_eq!(totals[0].total_cost, 0.0);
    assert_eq!(engine.quota().units_used("free-a"), 0);
}

#[tokio::test]
async fn test_identical_query_is_served_from_cache_without_new_spend() {
    let engine = engine(CONFIG);

    let first = engine.submit_query("user-1", GENERAL).await.unwrap();
    assert_eq!(first.provider_used.as_deref(), Some("free-a"));
    let spent = engine.ledger().report(&engine.ledger().current_period()).total_cost;

    let second = engine.submit_query("user-2", GENERAL).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.answer_text, first.answer_text);
    assert_eq!(second.provider_used, first.provider_used);

    let after = engine.ledger().report(&engine.ledger().current_period()).total_cost;
    assert_eq!(after, spent, "cache hits must not be charged");
    assert_eq!(engine.quota().units_used("free-a"), 1);
}

#[tokio::test]
async fn test_fallback_order_is_deterministic_within_a_tier() {
    let engine = engine(CONFIG);

    let first = engine.submit_query("u", GENERAL).await.unwrap();
    assert_eq!(first.provider_used.as_deref(), Some("free-a"));

    engine.cache().clear();
    let second = engine.submit_query("u", GENERAL).await.unwrap();
    assert_eq!(second.provider_used.as_deref(), Some("free-b"));

    engine.cache().clear();
    let third = engine.submit_query("u", GENERAL).await.unwrap();
    assert!(third.degraded, "free ceiling never escalates to premium");
    assert_eq!(third.answer_text, "Please try again later.");
    assert_eq!(engine.quota().units_used("premium"), 0);
}

#[tokio::test]
async fn test_degraded_answer_carries_no_provider_and_no_cost() {
    let config = CONFIG
        .replace(
            "quota_limit = 1\nresponse = \"answer from free-b\"",
            "quota_limit = 0\nresponse = \"answer from free-b\"",
        )
        .replace(
            "quota_limit = 1\nresponse = \"answer from free-a\"",
            "quota_limit = 0\nresponse = \"answer from free-a\"",
        );
    let engine = engine(&config);

    let response = engine.submit_query("u", GENERAL).await.unwrap();
    assert!(response.degraded);
    assert_eq!(response.provider_used, None);
    assert!(!response.cached);
    assert!(engine.ledger().totals_by_provider().is_empty());
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_last_unit_goes_to_exactly_one_concurrent_query() {
    let config = CONFIG.replace(
        "quota_limit = 1\nresponse = \"answer from free-b\"",
        "quota_limit = 0\nresponse = \"answer from free-b\"",
    );
    let config = format!("{config}\n[cache]\nenabled = false\n");
    let engine = Arc::new(engine(&config));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .submit_query(&format!("user-{i}"), GENERAL)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let responses: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let winners = responses
        .iter()
        .filter(|r| r.provider_used.as_deref() == Some("free-a"))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(responses.iter().filter(|r| r.degraded).count(), 7);
    assert_eq!(engine.quota().units_used("free-a"), 1);
}

#[tokio::test]
async fn test_research_query_reaches_premium_when_free_is_exhausted() {
    let engine = engine(CONFIG);
    let research = "Please analyze and compare the pros and cons of these two approaches in depth";

    assert!(engine.quota().try_consume("free-a", "someone", 1));
    assert!(engine.quota().try_consume("free-b", "someone", 1));

    let response = engine.submit_query("u", research).await.unwrap();
    assert_eq!(response.provider_used.as_deref(), Some("premium"));
    assert!(!response.degraded);

    let report = engine.ledger().report(&engine.ledger().current_period());
    let premium = report
        .records
        .iter()
        .find(|r| r.provider_name == "premium")
        .unwrap();
    assert_eq!(premium.requests, 1);
    assert!((premium.total_cost - 0.05).abs() < 1e-9);
}

#[tokio::test]
async fn test_short_unmatched_query_is_answered_by_free_provider() {
    let engine = engine(CONFIG);

    let response = engine
        .submit_query("u", "How can I sleep better?")
        .await
        .unwrap();

    assert!(!response.degraded, "a free provider with quota must be used");
    assert_eq!(response.provider_used.as_deref(), Some("free-a"));
    assert_eq!(response.tier, careroute::router::Tier::Free);
    assert_eq!(engine.quota().units_used("free-a"), 1);
}

#[tokio::test]
async fn test_short_factual_question_without_template_stays_local() {
    let engine = engine(CONFIG);

    let response = engine.submit_query("u", "Who is Ada?").await.unwrap();

    assert_eq!(response.tier, careroute::router::Tier::Local);
    assert!(response.degraded);
    assert_eq!(engine.quota().units_used("free-a"), 0);
}

#[tokio::test]
async fn test_greeting_template_does_not_answer_research_query() {
    let config = CONFIG.replace(
        "[[providers.templates]]\npatterns = [\"capital of france\"]",
        "[[providers.templates]]\npatterns = [\"hello\", \"hi\", \"hey\"]\nanswer = \"Hi! How can I help you today?\"\n\n[[providers.templates]]\npatterns = [\"capital of france\"]",
    );
    let engine = engine(&config);
    let research = "Hi, can you analyze and compare the evidence for CBT versus DBT in depth for my situation?";

    let first = engine.submit_query("user-1", research).await.unwrap();
    assert_eq!(first.tier, careroute::router::Tier::Premium);
    assert_ne!(first.provider_used.as_deref(), Some("local"));
    assert_ne!(first.answer_text, "Hi! How can I help you today?");

    let second = engine.submit_query("user-2", research).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.answer_text, first.answer_text);

    let greeting = engine.submit_query("user-3", "hi").await.unwrap();
    assert_eq!(greeting.provider_used.as_deref(), Some("local"));
    assert_eq!(greeting.answer_text, "Hi! How can I help you today?");
}
