//! Query routing engine
//!
//! Ties classification, the crisis override, the response cache and the
//! fallback chain together behind a single [`RoutingEngine::submit_query`]
//! entry point. Configuration-derived components (classifier, provider
//! registry, crisis override) are held as `Arc` snapshots behind `RwLock`s so
//! a reload swaps them atomically while in-flight queries finish on the
//! snapshot they started with. Quota counters, the ledger and the cache
//! survive reloads.

use crate::cache::{CacheEntry, ResponseCache};
use crate::config::{Config, QuotaUnit};
use crate::error::{AppError, AppResult};
use crate::ledger::CostLedger;
use crate::metrics::{CacheResult, CrisisOutcome, Metrics, QueryOutcome};
use crate::providers::{Provider, ProviderRegistry};
use crate::quota::QuotaTracker;
use crate::router::{
    Classification, CrisisPatternSet, FallbackOrchestrator, Query, RequestClassifier, Tier,
};
use crate::safety::{CrisisOverride, JsonlSafetyLog, LogOnlySafetyLog, SafetyEventSink};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Maximum allowed query length in characters (100K chars)
pub const MAX_QUERY_LENGTH: usize = 100_000;

/// Per-user context idle longer than this is dropped by maintenance
const CONTEXT_IDLE: Duration = Duration::from_secs(3600);

/// Answer to one submitted query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub query_id: Uuid,
    pub answer_text: String,
    /// Provider that produced the answer (for cached answers, the original
    /// provider); `None` for degraded and static crisis responses
    pub provider_used: Option<String>,
    pub tier: Tier,
    pub cached: bool,
    pub degraded: bool,
    pub crisis: bool,
}

#[derive(Debug)]
struct UserContext {
    recent: VecDeque<String>,
    last_seen: Instant,
}

/// Builder for [`RoutingEngine`]
pub struct EngineBuilder {
    config: Config,
    metrics: Option<Metrics>,
    safety_sink: Option<Arc<dyn SafetyEventSink>>,
    overrides: HashMap<String, Arc<dyn Provider>>,
}

impl EngineBuilder {
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the sink configured by `safety.event_log`
    pub fn with_safety_sink(mut self, sink: Arc<dyn SafetyEventSink>) -> Self {
        self.safety_sink = Some(sink);
        self
    }

    /// Substitute the implementation of a configured provider
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.overrides.insert(name.into(), provider);
        self
    }

    pub fn build(self) -> AppResult<RoutingEngine> {
        let config = self.config;
        config.validate()?;

        let classifier = build_classifier(&config)?;
        let registry = ProviderRegistry::from_config_with(&config, self.overrides)?;
        let sink = self.safety_sink.unwrap_or_else(|| safety_sink_for(&config));
        let crisis = build_crisis_override(&config, Arc::clone(&sink));

        let quota = Arc::new(QuotaTracker::from_config(&config));
        let ledger = Arc::new(CostLedger::new(config.ledger.period));
        let cache = Arc::new(ResponseCache::new(&config.cache));

        let mut orchestrator = FallbackOrchestrator::new(Arc::clone(&quota), Arc::clone(&ledger));
        if let Some(metrics) = &self.metrics {
            orchestrator = orchestrator.with_metrics(metrics.clone());
        }

        tracing::info!(
            providers = registry.len(),
            crisis_patterns = classifier.crisis_patterns().len(),
            cache_enabled = config.cache.enabled,
            "Routing engine initialized"
        );

        Ok(RoutingEngine {
            config: RwLock::new(Arc::new(config)),
            classifier: RwLock::new(Arc::new(classifier)),
            registry: RwLock::new(Arc::new(registry)),
            crisis: RwLock::new(Arc::new(crisis)),
            safety_sink: sink,
            cache,
            quota,
            ledger,
            orchestrator,
            contexts: Mutex::new(HashMap::new()),
            metrics: self.metrics,
        })
    }
}

fn build_classifier(config: &Config) -> AppResult<RequestClassifier> {
    let patterns = match config.classifier.crisis_patterns_file() {
        Some(path) => {
            CrisisPatternSet::from_file_with_base(path, config.classifier.crisis_patterns())?
        }
        None => CrisisPatternSet::new(config.classifier.crisis_patterns())?,
    };
    Ok(RequestClassifier::from_config(
        Arc::new(patterns),
        &config.classifier,
    ))
}

fn safety_sink_for(config: &Config) -> Arc<dyn SafetyEventSink> {
    match &config.safety.event_log {
        Some(path) => Arc::new(JsonlSafetyLog::new(path)),
        None => Arc::new(LogOnlySafetyLog),
    }
}

fn build_crisis_override(config: &Config, sink: Arc<dyn SafetyEventSink>) -> CrisisOverride {
    CrisisOverride::new(
        sink,
        config.safety.static_response.clone(),
        Duration::from_secs(config.safety.timeout_seconds),
    )
}

fn read<T>(lock: &RwLock<Arc<T>>) -> Arc<T> {
    Arc::clone(&lock.read().unwrap_or_else(PoisonError::into_inner))
}

fn replace<T>(lock: &RwLock<Arc<T>>, value: T) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(value);
}

/// The request routing and cost optimization engine
pub struct RoutingEngine {
    config: RwLock<Arc<Config>>,
    classifier: RwLock<Arc<RequestClassifier>>,
    registry: RwLock<Arc<ProviderRegistry>>,
    crisis: RwLock<Arc<CrisisOverride>>,
    safety_sink: Arc<dyn SafetyEventSink>,
    cache: Arc<ResponseCache>,
    quota: Arc<QuotaTracker>,
    ledger: Arc<CostLedger>,
    orchestrator: FallbackOrchestrator,
    contexts: Mutex<HashMap<String, UserContext>>,
    metrics: Option<Metrics>,
}

impl std::fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("cache", &self.cache)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl RoutingEngine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            metrics: None,
            safety_sink: None,
            overrides: HashMap::new(),
        }
    }

    /// Build an engine straight from configuration
    pub fn from_config(config: Config) -> AppResult<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> Arc<Config> {
        read(&self.config)
    }

    pub fn registry(&self) -> Arc<ProviderRegistry> {
        read(&self.registry)
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn crisis_pattern_count(&self) -> usize {
        read(&self.classifier).crisis_patterns().len()
    }

    /// Classify `text` for `user_id` without routing it
    pub fn classify(&self, user_id: &str, text: &str) -> Classification {
        let context = self.recent_context(user_id);
        read(&self.classifier).classify(text, &context)
    }

    /// Answer one query
    ///
    /// # Errors
    ///
    /// Only input validation fails: empty user id, empty or whitespace-only
    /// text, or text longer than [`MAX_QUERY_LENGTH`] characters. Every valid
    /// query gets an answer, degraded if no provider could produce one.
    pub async fn submit_query(&self, user_id: &str, text: &str) -> AppResult<QueryResponse> {
        if user_id.trim().is_empty() {
            return Err(AppError::Validation("user_id cannot be empty".to_string()));
        }
        if text.trim().is_empty() {
            return Err(AppError::Validation(
                "query text cannot be empty or contain only whitespace".to_string(),
            ));
        }
        let char_count = text.chars().count();
        if char_count > MAX_QUERY_LENGTH {
            return Err(AppError::Validation(format!(
                "query text exceeds maximum length of {} characters (got {})",
                MAX_QUERY_LENGTH, char_count
            )));
        }

        let started = Instant::now();
        let config = self.config();
        let registry = self.registry();

        let classification = self.classify(user_id, text);
        let query = Query::new(user_id, text).with_tier(classification.tier);

        tracing::debug!(
            query_id = %query.id(),
            user_id = %user_id,
            tier = %classification.tier,
            confidence = classification.confidence,
            reason = classification.reason,
            "Query classified"
        );

        if classification.is_crisis {
            let response = self.handle_crisis(&query, &classification, &registry).await;
            self.finish(classification.tier, QueryOutcome::Crisis, started);
            return Ok(response);
        }

        if let Some(entry) = self.cache.lookup(text, &classification) {
            self.record_cache(if entry.exact {
                CacheResult::ExactHit
            } else {
                CacheResult::SemanticHit
            });
            self.remember(user_id, text, config.classifier.context_turns());
            self.finish(classification.tier, QueryOutcome::Cached, started);
            return Ok(Self::cached_response(&query, &classification, entry));
        }
        if config.cache.enabled {
            self.record_cache(CacheResult::Miss);
        }

        let outcome = self
            .orchestrator
            .route(&query, classification.tier, &registry, &config)
            .await;

        if let Some(provider) = &outcome.provider_used {
            self.cache
                .store(text, &classification, &outcome.answer, provider);
        }
        self.remember(user_id, text, config.classifier.context_turns());

        let result = if outcome.degraded {
            QueryOutcome::Degraded
        } else {
            QueryOutcome::Answered
        };
        self.finish(classification.tier, result, started);

        Ok(QueryResponse {
            query_id: query.id(),
            answer_text: outcome.answer,
            provider_used: outcome.provider_used,
            tier: classification.tier,
            cached: false,
            degraded: outcome.degraded,
            crisis: false,
        })
    }

    async fn handle_crisis(
        &self,
        query: &Query,
        classification: &Classification,
        registry: &ProviderRegistry,
    ) -> QueryResponse {
        let crisis = read(&self.crisis);
        let safety = registry.safety();
        let response = crisis.handle(query, safety).await;

        if let (Some(provider), Some(entry)) = (&response.provider_used, safety) {
            let units = match entry.config().quota_unit() {
                QuotaUnit::Requests => 1,
                QuotaUnit::Tokens => query.estimate_tokens(),
            };
            let cost_per_unit = entry.config().cost_per_unit();
            self.ledger.record(provider, units, cost_per_unit);
            if let Some(metrics) = &self.metrics {
                metrics.observe(
                    "record_usage",
                    metrics.record_usage(provider, units, units as f64 * cost_per_unit),
                );
            }
        }

        if let Some(metrics) = &self.metrics {
            let outcome = if response.used_static_response() {
                CrisisOutcome::StaticResponse
            } else {
                CrisisOutcome::SafetyProvider
            };
            metrics.observe("record_crisis", metrics.record_crisis(outcome));
        }

        QueryResponse {
            query_id: query.id(),
            answer_text: response.answer_text,
            provider_used: response.provider_used,
            tier: classification.tier,
            cached: false,
            degraded: false,
            crisis: true,
        }
    }

    fn cached_response(
        query: &Query,
        classification: &Classification,
        entry: CacheEntry,
    ) -> QueryResponse {
        QueryResponse {
            query_id: query.id(),
            answer_text: entry.response_text,
            provider_used: Some(entry.provider_used),
            tier: classification.tier,
            cached: true,
            degraded: false,
            crisis: false,
        }
    }

    fn record_cache(&self, result: CacheResult) {
        if let Some(metrics) = &self.metrics {
            metrics.observe("record_cache_lookup", metrics.record_cache_lookup(result));
        }
    }

    fn finish(&self, tier: Tier, outcome: QueryOutcome, started: Instant) {
        if let Some(metrics) = &self.metrics {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics.observe("record_query", metrics.record_query(tier, outcome));
            metrics.observe("record_duration", metrics.record_duration(outcome, elapsed_ms));
        }
    }

    fn recent_context(&self, user_id: &str) -> Vec<String> {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map(|c| c.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Append a non-crisis query to the user's recent context
    fn remember(&self, user_id: &str, text: &str, turns: usize) {
        if turns == 0 {
            return;
        }
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        let context = contexts
            .entry(user_id.to_string())
            .or_insert_with(|| UserContext {
                recent: VecDeque::with_capacity(turns),
                last_seen: Instant::now(),
            });
        context.recent.push_back(text.to_string());
        while context.recent.len() > turns {
            context.recent.pop_front();
        }
        context.last_seen = Instant::now();
    }

    /// Drop per-user context not touched within `max_idle`
    pub fn prune_contexts(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        let before = contexts.len();
        contexts.retain(|_, c| now.saturating_duration_since(c.last_seen) < max_idle);
        before - contexts.len()
    }

    /// Apply a new configuration
    ///
    /// The new configuration is validated and every derived component is
    /// built before anything is swapped, so a failed reload leaves the engine
    /// untouched. Quota usage, ledger totals and cached answers carry over;
    /// cache sizing and the safety event sink are fixed at startup.
    pub fn reload(&self, config: Config) -> AppResult<()> {
        config.validate()?;

        let classifier = build_classifier(&config)?;
        let registry = ProviderRegistry::from_config(&config)?;
        let crisis = build_crisis_override(&config, Arc::clone(&self.safety_sink));

        self.quota.apply_config(&config);
        replace(&self.classifier, classifier);
        replace(&self.registry, registry);
        replace(&self.crisis, crisis);

        tracing::info!(
            providers = config.providers.len(),
            "Configuration reloaded"
        );
        replace(&self.config, config);
        Ok(())
    }

    /// Purge expired cache entries and idle per-user state once
    pub fn run_maintenance(&self) {
        let purged = self.cache.purge_expired();
        let pruned_quota = self.quota.prune_idle();
        let pruned_contexts = self.prune_contexts(CONTEXT_IDLE);
        tracing::debug!(
            purged_cache_entries = purged,
            pruned_quota_entries = pruned_quota,
            pruned_contexts = pruned_contexts,
            "Maintenance pass complete"
        );
    }

    /// Spawn the periodic maintenance task
    pub fn start_maintenance(self: Arc<Self>) -> tokio::task::AbortHandle {
        let interval = Duration::from_secs(self.config().cache.purge_interval_seconds);
        let metrics = self.metrics.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_seconds = interval.as_secs(),
                "Starting background maintenance"
            );
            loop {
                tokio::time::sleep(interval).await;
                self.run_maintenance();
            }
        });

        let abort = handle.abort_handle();
        tokio::spawn(async move {
            match handle.await {
                Ok(_) => {
                    tracing::error!(
                        "Background maintenance task terminated unexpectedly. \
                        Expired cache entries will no longer be purged."
                    );
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Background maintenance task panicked. \
                        Expired cache entries will no longer be purged."
                    );
                    if let Some(metrics) = metrics {
                        metrics.background_task_failure("maintenance");
                    }
                }
            }
        });

        abort
    }
}
