//! Durable ledger and quota state
//!
//! The cost ledger and quota windows are written to a single JSON file so a
//! restart neither forgets spend nor hands out a fresh quota. Writes go to a
//! sibling temporary file that is renamed over the target, so a crash mid
//! write leaves the previous snapshot intact.

use crate::error::{AppError, AppResult};
use crate::ledger::{CostLedger, LedgerRecord};
use crate::metrics::Metrics;
use crate::quota::{QuotaSnapshot, QuotaTracker};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Everything persisted across restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ledger: Vec<LedgerRecord>,
    #[serde(default)]
    pub quota: QuotaSnapshot,
}

/// JSON file holding a [`StateSnapshot`]
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, reason: impl std::fmt::Display) -> AppError {
        AppError::Persistence {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Read the snapshot; a missing or empty file yields the empty state
    pub async fn load(&self) -> AppResult<StateSnapshot> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No persisted state found, starting fresh");
                return Ok(StateSnapshot::default());
            }
            Err(e) => return Err(self.error(e)),
        };

        if content.trim().is_empty() {
            return Ok(StateSnapshot::default());
        }

        serde_json::from_str(&content).map_err(|e| self.error(format!("invalid state file: {}", e)))
    }

    /// Atomically replace the state file with `snapshot`
    pub async fn save(&self, snapshot: &StateSnapshot) -> AppResult<()> {
        let json = serde_json::to_vec_pretty(snapshot).map_err(|e| self.error(e))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.error(e))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &json)
            .await
            .map_err(|e| self.error(e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.error(e))?;

        tracing::debug!(
            path = %self.path.display(),
            ledger_records = snapshot.ledger.len(),
            provider_windows = snapshot.quota.providers.len(),
            user_windows = snapshot.quota.users.len(),
            "State persisted"
        );
        Ok(())
    }
}

/// Capture the current ledger and quota state
pub fn capture(ledger: &CostLedger, quota: &QuotaTracker) -> StateSnapshot {
    StateSnapshot {
        saved_at: Some(Utc::now()),
        ledger: ledger.records(),
        quota: quota.snapshot(),
    }
}

/// Load persisted state into a fresh ledger and tracker
pub async fn restore(store: &StateStore, ledger: &CostLedger, quota: &QuotaTracker) -> AppResult<()> {
    let snapshot = store.load().await?;
    ledger.restore(&snapshot.ledger);
    quota.restore(&snapshot.quota);
    tracing::info!(
        path = %store.path().display(),
        saved_at = ?snapshot.saved_at,
        "Persisted state restored"
    );
    Ok(())
}

/// Write the current state once
pub async fn flush(store: &StateStore, ledger: &CostLedger, quota: &QuotaTracker) -> AppResult<()> {
    store.save(&capture(ledger, quota)).await
}

/// Delay before the next flush: the interval plus up to 10% jitter
fn next_delay(interval: Duration) -> Duration {
    let jitter_ms = (interval.as_millis() as u64 / 10).max(1);
    interval + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
}

/// Spawn the periodic flush task
///
/// Failures are logged and counted but never stop the loop; a monitoring task
/// reports if the flush task itself ends. Abort the returned handle to stop
/// flushing before the final shutdown flush.
pub fn start_background_flush(
    store: StateStore,
    ledger: Arc<CostLedger>,
    quota: Arc<QuotaTracker>,
    interval: Duration,
    metrics: Option<Metrics>,
) -> tokio::task::AbortHandle {
    let handle = tokio::spawn(async move {
        tracing::info!(
            path = %store.path().display(),
            interval_seconds = interval.as_secs(),
            "Starting background state flush"
        );

        loop {
            tokio::time::sleep(next_delay(interval)).await;

            quota.prune_idle();
            if let Err(e) = flush(&store, &ledger, &quota).await {
                tracing::error!(
                    error = %e,
                    "Background state flush failed; will retry on the next interval"
                );
                if let Some(metrics) = &metrics {
                    metrics.background_task_failure("state_flush");
                }
            }
        }
    });

    let abort = handle.abort_handle();
    tokio::spawn(async move {
        match handle.await {
            Ok(_) => {
                tracing::error!(
                    "Background state flush task terminated unexpectedly. \
                    State will only be saved on shutdown."
                );
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Background state flush task stopped");
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Background state flush task panicked. State will only be saved on shutdown."
                );
            }
        }
    });

    abort
}
