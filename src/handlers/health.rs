//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// "operational", or "degraded" once a background task has failed
    pub background_tasks: &'static str,
    pub providers: usize,
    pub exhausted_providers: Vec<String>,
    pub cache_entries: usize,
}

/// Health check handler
///
/// Always returns 200 OK: exhausted providers do not make the service
/// unhealthy because every query still receives an answer.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let background_tasks = if state.metrics().background_task_failures_count() > 0 {
        "degraded"
    } else {
        "operational"
    };

    let engine = state.engine();
    let exhausted_providers = engine
        .quota()
        .statuses()
        .into_iter()
        .filter(|s| s.exhausted)
        .map(|s| s.provider)
        .collect();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            background_tasks,
            providers: engine.registry().len(),
            exhausted_providers,
            cache_entries: engine.cache().len(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    #[tokio::test]
    async fn test_health_handler_returns_ok() {
        let state = test_support::state();
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(body.background_tasks, "operational");
        assert_eq!(body.providers, 3);
        assert!(body.exhausted_providers.is_empty());
    }

    #[tokio::test]
    async fn test_health_handler_shows_degraded_when_background_task_fails() {
        let state = test_support::state();
        state.metrics().background_task_failure("state_flush");

        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.background_tasks, "degraded");
    }

    #[tokio::test]
    async fn test_health_handler_lists_exhausted_providers() {
        let state = test_support::state();
        assert!(state.engine().quota().try_consume("free-1", "u", 100));

        let (_, Json(body)) = handler(State(state)).await;
        assert_eq!(body.exhausted_providers, vec!["free-1".to_string()]);
    }
}
