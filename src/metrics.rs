//! Prometheus metrics collection for careroute
//!
//! This module provides metrics instrumentation for tracking:
//! - Queries by tier and outcome
//! - Cache lookups by result
//! - Provider attempts, units and cost by provider
//! - Crisis overrides and degraded responses
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use crate::router::Tier;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// How a query was ultimately answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Served from the response cache
    Cached,
    /// Answered by a provider in the fallback chain
    Answered,
    /// Every candidate was exhausted; the degraded response was returned
    Degraded,
    /// Routed through the crisis override
    Crisis,
}

impl QueryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Answered => "answered",
            Self::Degraded => "degraded",
            Self::Crisis => "crisis",
        }
    }
}

/// Cache lookup result label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    ExactHit,
    SemanticHit,
    Miss,
}

impl CacheResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactHit => "exact_hit",
            Self::SemanticHit => "semantic_hit",
            Self::Miss => "miss",
        }
    }
}

/// Which path answered a crisis query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrisisOutcome {
    SafetyProvider,
    StaticResponse,
}

impl CrisisOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SafetyProvider => "safety_provider",
            Self::StaticResponse => "static_response",
        }
    }
}

/// Metrics collector for careroute
///
/// Provider labels are bounded by the configured provider set; every other
/// label comes from a closed enum.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    queries_total: IntCounterVec,
    cache_lookups: IntCounterVec,
    provider_attempts: IntCounterVec,
    units_consumed: IntCounterVec,
    cost_total: CounterVec,
    crisis_overrides: IntCounterVec,
    degraded_responses: IntCounter,
    routing_duration: HistogramVec,
    metrics_recording_failures: IntCounterVec,
    background_task_failures: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 3 tiers × 4 outcomes = 12 time series
        let queries_total = IntCounterVec::new(
            Opts::new(
                "careroute_queries_total",
                "Total number of queries by classified tier and outcome",
            ),
            &["tier", "outcome"],
        )?;

        let cache_lookups = IntCounterVec::new(
            Opts::new(
                "careroute_cache_lookups_total",
                "Total number of response cache lookups by result",
            ),
            &["result"],
        )?;

        // Cardinality: N providers × 7 outcomes (success + 6 error types)
        let provider_attempts = IntCounterVec::new(
            Opts::new(
                "careroute_provider_attempts_total",
                "Total provider attempts by provider and outcome",
            ),
            &["provider", "outcome"],
        )?;

        let units_consumed = IntCounterVec::new(
            Opts::new(
                "careroute_units_consumed_total",
                "Total quota units consumed by answered requests, by provider",
            ),
            &["provider"],
        )?;

        let cost_total = CounterVec::new(
            Opts::new(
                "careroute_cost_total",
                "Total accounted cost of answered requests, by provider",
            ),
            &["provider"],
        )?;

        let crisis_overrides = IntCounterVec::new(
            Opts::new(
                "careroute_crisis_overrides_total",
                "Total crisis overrides by answering path. \
                static_response increments mean the safety provider was unreachable.",
            ),
            &["outcome"],
        )?;

        let degraded_responses = IntCounter::with_opts(Opts::new(
            "careroute_degraded_responses_total",
            "Total responses served after every eligible provider was exhausted",
        ))?;

        let routing_duration = HistogramVec::new(
            HistogramOpts::new(
                "careroute_routing_duration_ms",
                "End-to-end query handling latency in milliseconds",
            )
            .buckets(vec![
                0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0,
            ]),
            &["outcome"],
        )?;

        let metrics_recording_failures = IntCounterVec::new(
            Opts::new(
                "careroute_metrics_recording_failures_total",
                "Total number of metrics recording operation failures by operation. \
                Indicates Prometheus internal errors - frequent failures require investigation.",
            ),
            &["operation"],
        )?;

        let background_task_failures = IntCounterVec::new(
            Opts::new(
                "careroute_background_task_failures_total",
                "Background maintenance task failures (state flush, cache purge) by task",
            ),
            &["task"],
        )?;

        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(provider_attempts.clone()))?;
        registry.register(Box::new(units_consumed.clone()))?;
        registry.register(Box::new(cost_total.clone()))?;
        registry.register(Box::new(crisis_overrides.clone()))?;
        registry.register(Box::new(degraded_responses.clone()))?;
        registry.register(Box::new(routing_duration.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;
        registry.register(Box::new(background_task_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            queries_total,
            cache_lookups,
            provider_attempts,
            units_consumed,
            cost_total,
            crisis_overrides,
            degraded_responses,
            routing_duration,
            metrics_recording_failures,
            background_task_failures,
        })
    }

    /// Record a completed query
    pub fn record_query(&self, tier: Tier, outcome: QueryOutcome) -> Result<(), prometheus::Error> {
        self.queries_total
            .get_metric_with_label_values(&[tier.as_str(), outcome.as_str()])?
            .inc();
        if outcome == QueryOutcome::Degraded {
            self.degraded_responses.inc();
        }
        Ok(())
    }

    /// Record a cache lookup result
    pub fn record_cache_lookup(&self, result: CacheResult) -> Result<(), prometheus::Error> {
        self.cache_lookups
            .get_metric_with_label_values(&[result.as_str()])?
            .inc();
        Ok(())
    }

    /// Record one provider attempt; `outcome` is "success" or a `ProviderError::error_type()`
    pub fn record_provider_attempt(
        &self,
        provider: &str,
        outcome: &str,
    ) -> Result<(), prometheus::Error> {
        self.provider_attempts
            .get_metric_with_label_values(&[provider, outcome])?
            .inc();
        Ok(())
    }

    /// Record units and cost of an answered request
    ///
    /// # Errors
    ///
    /// Returns an error if `cost` is NaN, infinite, or negative.
    pub fn record_usage(&self, provider: &str, units: u64, cost: f64) -> Result<(), prometheus::Error> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Invalid cost value: {} (must be finite and non-negative)",
                cost
            )));
        }
        self.units_consumed
            .get_metric_with_label_values(&[provider])?
            .inc_by(units);
        self.cost_total
            .get_metric_with_label_values(&[provider])?
            .inc_by(cost);
        Ok(())
    }

    /// Record a crisis override
    pub fn record_crisis(&self, outcome: CrisisOutcome) -> Result<(), prometheus::Error> {
        self.crisis_overrides
            .get_metric_with_label_values(&[outcome.as_str()])?
            .inc();
        Ok(())
    }

    /// Record end-to-end handling duration
    ///
    /// # Errors
    ///
    /// Returns an error if `duration_ms` is NaN, infinite, or negative.
    pub fn record_duration(
        &self,
        outcome: QueryOutcome,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Invalid duration value: {} (must be finite and non-negative)",
                duration_ms
            )));
        }
        self.routing_duration
            .get_metric_with_label_values(&[outcome.as_str()])?
            .observe(duration_ms);
        Ok(())
    }

    /// Log-and-continue wrapper for `record_*` results
    ///
    /// Metrics failures indicate a programming bug (invalid labels, bad
    /// values) but never fail the request that triggered them.
    pub fn observe(&self, operation: &str, result: Result<(), prometheus::Error>) {
        if let Err(e) = result {
            tracing::error!(
                error = %e,
                operation = operation,
                "Metrics recording failed (non-fatal): {}. Request will continue.",
                e
            );
            self.metrics_recording_failure(operation);
        }
    }

    /// Increment the metrics recording failure counter
    ///
    /// Called when a `record_*` method fails. Never fails itself.
    pub fn metrics_recording_failure(&self, operation: &str) {
        self.metrics_recording_failures
            .with_label_values(&[operation])
            .inc();
    }

    /// Total metrics recording failures across all operations
    pub fn metrics_recording_failures_count(&self) -> u64 {
        self.counter_total("careroute_metrics_recording_failures_total")
    }

    /// Increment the background task failure counter
    pub fn background_task_failure(&self, task: &str) {
        self.background_task_failures
            .with_label_values(&[task])
            .inc();
    }

    /// Total background task failures across all tasks
    pub fn background_task_failures_count(&self) -> u64 {
        self.counter_total("careroute_background_task_failures_total")
    }

    /// Sum a counter family across all label combinations
    fn counter_total(&self, name: &str) -> u64 {
        self.registry
            .gather()
            .iter()
            .find(|mf| mf.name() == name)
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn degraded_responses_count(&self) -> u64 {
        self.degraded_responses.get()
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                "Prometheus text encoder failed"
            );
            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("Metrics output is not valid UTF-8: {}", e)))
    }
}
