//! Cost-ordered fallback orchestration
//!
//! Walks the eligible providers for a tier ceiling from cheapest to most
//! expensive. Each candidate must first win a quota reservation; a candidate
//! without quota is skipped without being called. A timeout or transport
//! failure gets exactly one immediate retry on the same provider before the
//! chain advances. Reserved units are handed back whenever a candidate
//! produces no answer.
//!
//! When every candidate is exhausted the caller still gets an answer: the
//! configured degraded response, flagged as degraded. Routing never surfaces
//! a provider error.

use super::{Query, Tier};
use crate::config::{Config, QuotaUnit};
use crate::error::ProviderError;
use crate::ledger::CostLedger;
use crate::metrics::Metrics;
use crate::providers::{ProviderRegistry, ProviderResponse, RegisteredProvider};
use crate::quota::{QuotaTracker, Reservation};
use std::sync::Arc;
use std::time::Duration;

/// Maximum attempts on a single provider (first try plus one retry)
const MAX_ATTEMPTS_PER_PROVIDER: usize = 2;

/// Result of routing one query through the fallback chain
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub answer: String,
    /// Provider that answered; `None` for the degraded response
    pub provider_used: Option<String>,
    pub units_consumed: u64,
    pub cost: f64,
    pub degraded: bool,
    /// Providers tried before the answer, in order
    pub attempted: Vec<String>,
}

/// Fallback chain executor
///
/// Holds the shared quota tracker and cost ledger; the provider registry and
/// configuration are passed per call so a reload takes effect on the next
/// query without rebuilding the orchestrator.
#[derive(Clone)]
pub struct FallbackOrchestrator {
    quota: Arc<QuotaTracker>,
    ledger: Arc<CostLedger>,
    metrics: Option<Metrics>,
}

impl std::fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackOrchestrator")
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl FallbackOrchestrator {
    pub fn new(quota: Arc<QuotaTracker>, ledger: Arc<CostLedger>) -> Self {
        Self {
            quota,
            ledger,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Units a query consumes from `provider`
    fn units_for(query: &Query, provider: &RegisteredProvider) -> u64 {
        match provider.config().quota_unit() {
            QuotaUnit::Requests => 1,
            QuotaUnit::Tokens => query.estimate_tokens(),
        }
    }

    /// Route `query` through every provider admitted by `ceiling`
    ///
    /// The candidate order depends only on configuration; runtime quota state
    /// decides which candidates are skipped, never their order.
    pub async fn route(
        &self,
        query: &Query,
        ceiling: Tier,
        registry: &ProviderRegistry,
        config: &Config,
    ) -> RouteOutcome {
        let candidates = registry.candidates(ceiling);
        let mut attempted = Vec::new();

        tracing::debug!(
            query_id = %query.id(),
            ceiling = %ceiling,
            candidates = candidates.len(),
            "Starting fallback chain"
        );

        for candidate in candidates {
            let units = Self::units_for(query, candidate);
            let Some(reservation) = self.quota.reserve(candidate.name(), query.user_id(), units)
            else {
                tracing::debug!(
                    query_id = %query.id(),
                    provider = %candidate.name(),
                    units = units,
                    "Provider quota unavailable, skipping"
                );
                self.record_attempt(candidate.name(), "quota_unavailable");
                continue;
            };

            attempted.push(candidate.name().to_string());
            let timeout = Duration::from_secs(config.timeout_for_tier(candidate.tier()));

            match self.attempt_with_retry(query, candidate, timeout).await {
                Ok(response) => {
                    return self.settle(query, candidate, &reservation, response, attempted);
                }
                Err(e) => {
                    self.quota.release(&reservation);
                    tracing::warn!(
                        query_id = %query.id(),
                        provider = %candidate.name(),
                        error = %e,
                        error_type = e.error_type(),
                        "Provider produced no answer, advancing fallback chain"
                    );
                }
            }
        }

        tracing::warn!(
            query_id = %query.id(),
            ceiling = %ceiling,
            attempted = ?attempted,
            "All eligible providers exhausted, returning degraded response"
        );

        RouteOutcome {
            answer: config.routing.degraded_response.clone(),
            provider_used: None,
            units_consumed: 0,
            cost: 0.0,
            degraded: true,
            attempted,
        }
    }

    async fn attempt_with_retry(
        &self,
        query: &Query,
        candidate: &RegisteredProvider,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS_PER_PROVIDER {
            tracing::debug!(
                query_id = %query.id(),
                provider = %candidate.name(),
                attempt = attempt,
                timeout_seconds = timeout.as_secs(),
                "Attempting provider"
            );

            match candidate.provider().attempt(query, timeout).await {
                Ok(response) => {
                    self.record_attempt(candidate.name(), "success");
                    return Ok(response);
                }
                Err(e) => {
                    self.record_attempt(candidate.name(), e.error_type());
                    let retry = e.is_transient() && attempt < MAX_ATTEMPTS_PER_PROVIDER;
                    if retry {
                        tracing::info!(
                            query_id = %query.id(),
                            provider = %candidate.name(),
                            error = %e,
                            "Transient provider failure, retrying once"
                        );
                    }
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::InvalidResponse {
            provider: candidate.name().to_string(),
            reason: "no attempt was made".to_string(),
        }))
    }

    fn settle(
        &self,
        query: &Query,
        candidate: &RegisteredProvider,
        reservation: &Reservation,
        response: ProviderResponse,
        attempted: Vec<String>,
    ) -> RouteOutcome {
        let units = reservation.units();
        let cost_per_unit = candidate.config().cost_per_unit();
        let cost = units as f64 * cost_per_unit;

        self.ledger.record(candidate.name(), units, cost_per_unit);
        if let Some(metrics) = &self.metrics {
            metrics.observe("record_usage", metrics.record_usage(candidate.name(), units, cost));
        }

        tracing::info!(
            query_id = %query.id(),
            provider = %candidate.name(),
            tier = %candidate.tier(),
            units = units,
            cost = cost,
            "Query answered"
        );

        RouteOutcome {
            answer: response.text,
            provider_used: Some(candidate.name().to_string()),
            units_consumed: units,
            cost,
            degraded: false,
            attempted,
        }
    }

    fn record_attempt(&self, provider: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.observe(
                "record_provider_attempt",
                metrics.record_provider_attempt(provider, outcome),
            );
        }
    }
}
