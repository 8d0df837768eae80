//! Crisis override
//!
//! Queries flagged as crisis skip the cache, quota and fallback chain
//! entirely. The designated safety provider is asked directly; if it cannot
//! answer, a fixed safe response is returned instead. Every invocation emits
//! exactly one safety event before any provider is contacted, so the event is
//! recorded even if the request is later abandoned.

use crate::error::{AppError, AppResult, ProviderError};
use crate::providers::RegisteredProvider;
use crate::router::{Query, query_hash};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Record of one crisis override invocation
///
/// Carries a hash of the normalized query text, never the text itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyEvent {
    pub event_id: Uuid,
    pub query_id: Uuid,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub query_hash: String,
}

impl SafetyEvent {
    pub fn for_query(query: &Query) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            query_id: query.id(),
            user_id: query.user_id().to_string(),
            timestamp: Utc::now(),
            query_hash: query_hash(query.text()),
        }
    }
}

/// Destination for safety events in addition to the `careroute::safety` log target
#[async_trait]
pub trait SafetyEventSink: Send + Sync {
    async fn record(&self, event: &SafetyEvent) -> AppResult<()>;
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemorySafetyLog {
    events: Mutex<Vec<SafetyEvent>>,
}

impl MemorySafetyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SafetyEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SafetyEventSink for MemorySafetyLog {
    async fn record(&self, event: &SafetyEvent) -> AppResult<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Sink appending one JSON object per line to a file
#[derive(Debug)]
pub struct JsonlSafetyLog {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlSafetyLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn persistence_error(&self, reason: impl std::fmt::Display) -> AppError {
        AppError::Persistence {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl SafetyEventSink for JsonlSafetyLog {
    async fn record(&self, event: &SafetyEvent) -> AppResult<()> {
        let mut line = serde_json::to_string(event).map_err(|e| self.persistence_error(e))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.persistence_error(e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.persistence_error(e))?;
        file.flush().await.map_err(|e| self.persistence_error(e))?;
        Ok(())
    }
}

/// Sink that only relies on the structured log line
#[derive(Debug, Default)]
pub struct LogOnlySafetyLog;

#[async_trait]
impl SafetyEventSink for LogOnlySafetyLog {
    async fn record(&self, _event: &SafetyEvent) -> AppResult<()> {
        Ok(())
    }
}

/// Answer produced by the crisis override
#[derive(Debug, Clone, PartialEq)]
pub struct CrisisResponse {
    pub answer_text: String,
    /// Safety provider name, or `None` when the static response was used
    pub provider_used: Option<String>,
    pub event: SafetyEvent,
}

impl CrisisResponse {
    pub fn used_static_response(&self) -> bool {
        self.provider_used.is_none()
    }
}

/// Crisis override path
pub struct CrisisOverride {
    sink: Arc<dyn SafetyEventSink>,
    static_response: String,
    timeout: Duration,
}

impl std::fmt::Debug for CrisisOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrisisOverride")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CrisisOverride {
    pub fn new(sink: Arc<dyn SafetyEventSink>, static_response: String, timeout: Duration) -> Self {
        let static_response = if static_response.trim().is_empty() {
            crate::config::default_safety_response()
        } else {
            static_response
        };
        Self {
            sink,
            static_response,
            timeout,
        }
    }

    pub fn static_response(&self) -> &str {
        &self.static_response
    }

    /// Emit the safety event for `query`
    ///
    /// The structured log line is always written; a failing sink is logged
    /// at error level and never prevents the override from answering.
    pub async fn emit(&self, query: &Query) -> SafetyEvent {
        let event = SafetyEvent::for_query(query);

        tracing::warn!(
            target: "careroute::safety",
            event_id = %event.event_id,
            query_id = %event.query_id,
            user_id = %event.user_id,
            timestamp = %event.timestamp,
            query_hash = %event.query_hash,
            "Crisis override invoked"
        );

        if let Err(e) = self.sink.record(&event).await {
            tracing::error!(
                target: "careroute::safety",
                event_id = %event.event_id,
                error = %e,
                "Failed to write safety event to sink; event retained in log output only"
            );
        }

        event
    }

    /// Answer a crisis query
    ///
    /// Never fails: an absent, failing or timed out safety provider yields
    /// the static safe response. Quota is not consulted.
    pub async fn handle(&self, query: &Query, safety: Option<&RegisteredProvider>) -> CrisisResponse {
        let event = self.emit(query).await;

        let Some(safety) = safety else {
            tracing::error!(
                target: "careroute::safety",
                event_id = %event.event_id,
                "No safety provider available, returning static safe response"
            );
            return self.static_answer(event);
        };

        match self.ask(query, safety).await {
            Ok(text) => CrisisResponse {
                answer_text: text,
                provider_used: Some(safety.name().to_string()),
                event,
            },
            Err(e) => {
                tracing::error!(
                    target: "careroute::safety",
                    event_id = %event.event_id,
                    provider = %safety.name(),
                    error = %e,
                    "Safety provider failed, returning static safe response"
                );
                self.static_answer(event)
            }
        }
    }

    async fn ask(&self, query: &Query, safety: &RegisteredProvider) -> Result<String, ProviderError> {
        let provider = safety.provider();
        let first = provider.attempt(query, self.timeout).await;
        let result = match first {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    provider = %safety.name(),
                    error = %e,
                    "Transient safety provider failure, retrying once"
                );
                provider.attempt(query, self.timeout).await
            }
            other => other,
        };
        result.map(|r| r.text)
    }

    fn static_answer(&self, event: SafetyEvent) -> CrisisResponse {
        CrisisResponse {
            answer_text: self.static_response.clone(),
            provider_used: None,
            event,
        }
    }
}
