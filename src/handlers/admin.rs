//! Administrative endpoints: configuration reload and cache management

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::cache::CacheStats;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::handlers::AppState;

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub status: &'static str,
    pub providers: usize,
    pub crisis_patterns: usize,
}

/// POST /admin/reload
///
/// Re-reads the config file the server was started with. Providers, crisis
/// patterns and quota limits are swapped together; on any error the running
/// configuration stays in place.
pub async fn reload_handler(State(state): State<AppState>) -> AppResult<Json<ReloadResponse>> {
    let path = state.config_path().ok_or_else(|| {
        AppError::Config("server was not started from a config file".to_string())
    })?;

    let config = Config::from_file(path).inspect_err(|e| {
        tracing::error!(error = %e, path = %path.display(), "Configuration reload failed");
    })?;

    let engine = state.engine();
    engine.reload(config).inspect_err(|e| {
        tracing::error!(error = %e, path = %path.display(), "Configuration reload failed");
    })?;

    Ok(Json(ReloadResponse {
        status: "reloaded",
        providers: engine.registry().len(),
        crisis_patterns: engine.crisis_pattern_count(),
    }))
}

/// GET /admin/cache
pub async fn cache_stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.engine().cache().stats())
}

/// DELETE /admin/cache
pub async fn cache_clear_handler(State(state): State<AppState>) -> StatusCode {
    let cache = state.engine().cache();
    let dropped = cache.len();
    cache.clear();
    tracing::info!(dropped_entries = dropped, "Response cache cleared");
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;
    use axum::response::IntoResponse;
    use std::io::Write;

    #[tokio::test]
    async fn test_reload_without_config_path_fails() {
        let state = test_support::state();
        let err = reload_handler(State(state)).await.unwrap_err();
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_reload_swaps_providers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let reloaded = test_support::TEST_CONFIG.replace(
            "response = \"free answer\"",
            "response = \"reloaded answer\"",
        );
        file.write_all(reloaded.as_bytes()).unwrap();

        let state = test_support::state().with_config_path(file.path());
        let Json(body) = reload_handler(State(state.clone())).await.unwrap();
        assert_eq!(body.status, "reloaded");
        assert_eq!(body.providers, 3);

        let response = state
            .engine()
            .submit_query("u", "Explain how photosynthesis converts light into chemical energy in plants")
            .await
            .unwrap();
        assert_eq!(response.answer_text, "reloaded answer");
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_running_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[server]\nport = \"not a number\"\n").unwrap();

        let state = test_support::state().with_config_path(file.path());
        let err = reload_handler(State(state.clone())).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigParseFailed { .. }));

        let response = state
            .engine()
            .submit_query("u", "Explain how photosynthesis converts light into chemical energy in plants")
            .await
            .unwrap();
        assert_eq!(response.answer_text, "free answer");
    }

    #[tokio::test]
    async fn test_cache_stats_and_clear() {
        let state = test_support::state();
        let text = "Explain how photosynthesis converts light into chemical energy in plants";
        state.engine().submit_query("u", text).await.unwrap();
        let second = state.engine().submit_query("u", text).await.unwrap();
        assert!(second.cached);

        let Json(stats) = cache_stats_handler(State(state.clone())).await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);

        let status = cache_clear_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.engine().cache().is_empty());
    }
}
