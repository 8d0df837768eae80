//! HTTP request handlers for the careroute API

use crate::engine::RoutingEngine;
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use axum::{
    Router,
    routing::{get, post},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod extractor;
pub mod health;
pub mod metrics;
pub mod query;
pub mod usage;

/// Application state shared across all handlers
///
/// All fields are Arc'd (or Arc-backed) for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<RoutingEngine>,
    metrics: Metrics,
    config_path: Option<Arc<PathBuf>>,
}

impl AppState {
    pub fn new(engine: Arc<RoutingEngine>, metrics: Metrics) -> Self {
        Self {
            engine,
            metrics,
            config_path: None,
        }
    }

    /// Config file re-read by `POST /admin/reload`
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(Arc::new(path.into()));
        self
    }

    pub fn engine(&self) -> &RoutingEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref().map(PathBuf::as_path)
    }
}

/// Build the application router with all routes and middleware
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/query", post(query::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .route("/costs", get(usage::costs_handler))
        .route("/quota", get(usage::quota_handler))
        .route("/admin/reload", post(admin::reload_handler))
        .route(
            "/admin/cache",
            get(admin::cache_stats_handler).delete(admin::cache_clear_handler),
        )
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::Config;
    use std::str::FromStr;

    pub const TEST_CONFIG: &str = r#"
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
quota_limit = 100
response = "free answer"

[[providers]]
name = "premium-1"
kind = "static"
tier = "premium"
cost_per_unit = 0.02
response = "Please contact a crisis line."
safety = true
"#;

    pub fn state() -> AppState {
        let metrics = Metrics::new().expect("should create metrics");
        let engine = RoutingEngine::builder(Config::from_str(TEST_CONFIG).expect("valid config"))
            .with_metrics(metrics.clone())
            .build()
            .expect("should build engine");
        AppState::new(Arc::new(engine), metrics)
    }
}
