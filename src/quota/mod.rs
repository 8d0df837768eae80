//! Rate and quota tracking
//!
//! Counters are addressable keyed stores: one entry per provider, one per
//! `(user, provider)` pair with a per-user quota, and one per user for the
//! external request rate. Each entry sits behind its own mutex so concurrent
//! requests against different providers never contend, while two requests
//! racing for the last unit of the same provider are serialized.
//!
//! A reservation takes every relevant entry lock in a fixed order
//! (provider, then user quota, then user rate), checks all limits and only
//! then commits, so a request is either fully admitted or leaves no trace.

pub mod window;

pub use window::{RateLimitWindow, UsageWindow};

use crate::config::Config;
use crate::router::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Static limits for one provider, taken from configuration
#[derive(Debug, Clone)]
struct ProviderLimits {
    tier: Tier,
    quota_limit: Option<u64>,
    quota_window: Duration,
    user_quota_limit: Option<u64>,
    rate_limit: Option<u32>,
    rate_window: Duration,
}

#[derive(Debug, Default)]
struct Settings {
    providers: HashMap<String, ProviderLimits>,
    user_rate: Option<(u32, Duration)>,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        let providers = config
            .providers
            .iter()
            .map(|p| {
                (
                    p.name().to_string(),
                    ProviderLimits {
                        tier: p.tier(),
                        quota_limit: p.quota_limit(),
                        quota_window: Duration::from_secs(p.quota_window_seconds()),
                        user_quota_limit: p.user_quota_limit(),
                        rate_limit: p.rate_limit(),
                        rate_window: Duration::from_secs(p.rate_window_seconds()),
                    },
                )
            })
            .collect();

        let user_rate = config.limits.user_rate_limit.map(|limit| {
            (
                limit,
                Duration::from_secs(config.limits.user_rate_window_seconds),
            )
        });

        Self {
            providers,
            user_rate,
        }
    }
}

#[derive(Debug)]
struct ProviderCounters {
    quota: UsageWindow,
    rate: Option<RateLimitWindow>,
}

type Shared<T> = Arc<Mutex<T>>;
type UserKey = (String, String);

/// Units held for one in-flight provider attempt
///
/// Returned by [`QuotaTracker::reserve`]. Passing it to
/// [`QuotaTracker::release`] hands the units back if the attempt produced no
/// answer; a reservation whose window has since rolled over releases nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    provider: String,
    user_id: String,
    units: u64,
    provider_window: Instant,
    user_window: Option<Instant>,
}

impl Reservation {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn units(&self) -> u64 {
        self.units
    }
}

/// Point-in-time quota status of one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub provider: String,
    pub tier: Tier,
    pub units_used: u64,
    pub quota_limit: Option<u64>,
    pub remaining: Option<u64>,
    pub exhausted: bool,
    pub rate_count: u64,
    pub rate_limit: Option<u32>,
}

/// Persisted provider quota window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub provider: String,
    pub window_start: DateTime<Utc>,
    pub units_used: u64,
}

/// Persisted per-user quota window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUsage {
    pub user_id: String,
    pub provider: String,
    pub window_start: DateTime<Utc>,
    pub units_used: u64,
}

/// Serializable view of all quota windows with usage
///
/// Rate windows are short-lived and are not persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    #[serde(default)]
    pub providers: Vec<ProviderUsage>,
    #[serde(default)]
    pub users: Vec<UserUsage>,
}

/// Per-provider and per-user quota and rate tracker
#[derive(Debug)]
pub struct QuotaTracker {
    settings: RwLock<Settings>,
    providers: RwLock<HashMap<String, Shared<ProviderCounters>>>,
    user_quotas: RwLock<HashMap<UserKey, Shared<UsageWindow>>>,
    user_rates: RwLock<HashMap<String, Shared<RateLimitWindow>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fetch or create the entry for `key`, releasing the map lock before returning
fn entry<K, V>(map: &RwLock<HashMap<K, Shared<V>>>, key: &K, init: impl FnOnce() -> V) -> Shared<V>
where
    K: std::hash::Hash + Eq + Clone,
{
    if let Some(existing) = map
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
    {
        return Arc::clone(existing);
    }

    let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(init()))),
    )
}

/// Bring an optional rate window in line with the configured limit
fn sync_rate(
    rate: &mut Option<RateLimitWindow>,
    limit: Option<u32>,
    length: Duration,
    now: Instant,
) {
    *rate = match (limit, rate.take()) {
        (Some(limit), Some(mut existing)) => {
            existing.reconfigure(limit, length);
            Some(existing)
        }
        (Some(limit), None) => Some(RateLimitWindow::new(limit, length, now)),
        (None, _) => None,
    };
}

impl QuotaTracker {
    /// Create a tracker with zero usage for every configured provider
    pub fn from_config(config: &Config) -> Self {
        let tracker = Self {
            settings: RwLock::new(Settings::default()),
            providers: RwLock::new(HashMap::new()),
            user_quotas: RwLock::new(HashMap::new()),
            user_rates: RwLock::new(HashMap::new()),
        };
        tracker.apply_config(config);
        tracker
    }

    /// Replace limits after a configuration reload
    ///
    /// Usage counters of providers that still exist are kept; counters of
    /// removed providers are dropped.
    pub fn apply_config(&self, config: &Config) {
        let settings = Settings::from_config(config);

        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|name, _| settings.providers.contains_key(name));
        self.user_quotas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(_, provider), _| settings.providers.contains_key(provider));

        tracing::debug!(
            providers = settings.providers.len(),
            user_rate_limit = ?settings.user_rate.map(|(limit, _)| limit),
            "Quota limits applied"
        );

        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    fn limits_for(&self, provider: &str) -> Option<(ProviderLimits, Option<(u32, Duration)>)> {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        let limits = settings.providers.get(provider)?.clone();
        // Local answers cost nothing, so the per-user external rate does not apply
        let user_rate = if limits.tier == Tier::Local {
            None
        } else {
            settings.user_rate
        };
        Some((limits, user_rate))
    }

    fn provider_entry(&self, provider: &str, limits: &ProviderLimits, now: Instant) -> Shared<ProviderCounters> {
        entry(&self.providers, &provider.to_string(), || ProviderCounters {
            quota: UsageWindow::new(now),
            rate: limits
                .rate_limit
                .map(|limit| RateLimitWindow::new(limit, limits.rate_window, now)),
        })
    }

    /// Atomically reserve `units` for `user_id` on `provider`
    ///
    /// Provider quota, per-user quota, provider rate window and per-user rate
    /// window must all admit the request; otherwise nothing is committed and
    /// `None` is returned. Unknown providers are never admitted.
    pub fn reserve(&self, provider: &str, user_id: &str, units: u64) -> Option<Reservation> {
        let Some((limits, user_rate)) = self.limits_for(provider) else {
            tracing::warn!(provider = %provider, "Quota check for unknown provider");
            return None;
        };
        let now = Instant::now();

        let provider_counters = self.provider_entry(provider, &limits, now);
        let user_counters = limits.user_quota_limit.map(|_| {
            entry(
                &self.user_quotas,
                &(user_id.to_string(), provider.to_string()),
                || UsageWindow::new(now),
            )
        });
        let user_rate_counters = user_rate.map(|(limit, length)| {
            entry(&self.user_rates, &user_id.to_string(), || {
                RateLimitWindow::new(limit, length, now)
            })
        });

        // Lock order: provider, user quota, user rate
        let mut counters = lock(&provider_counters);
        counters.quota.roll(now, limits.quota_window);
        if !counters.quota.admits(units, limits.quota_limit) {
            return None;
        }
        sync_rate(&mut counters.rate, limits.rate_limit, limits.rate_window, now);
        if let Some(rate) = counters.rate.as_mut()
            && !rate.check(now)
        {
            return None;
        }

        let mut user_quota = user_counters.as_ref().map(|c| lock(c));
        if let Some(window) = user_quota.as_mut() {
            window.roll(now, limits.quota_window);
            if !window.admits(units, limits.user_quota_limit) {
                return None;
            }
        }

        let mut user_rate_window = user_rate_counters.as_ref().map(|c| lock(c));
        if let (Some(window), Some((limit, length))) = (user_rate_window.as_mut(), user_rate) {
            window.reconfigure(limit, length);
            if !window.check(now) {
                return None;
            }
        }

        // Commit
        counters.quota.add(units);
        if let Some(rate) = counters.rate.as_mut() {
            rate.record();
        }
        if let Some(window) = user_quota.as_mut() {
            window.add(units);
        }
        if let Some(window) = user_rate_window.as_mut() {
            window.record();
        }

        Some(Reservation {
            provider: provider.to_string(),
            user_id: user_id.to_string(),
            units,
            provider_window: counters.quota.window_start(),
            user_window: user_quota.as_ref().map(|w| w.window_start()),
        })
    }

    /// All-or-nothing consumption; `true` if the units were committed
    pub fn try_consume(&self, provider: &str, user_id: &str, units: u64) -> bool {
        self.reserve(provider, user_id, units).is_some()
    }

    /// Return the units of an attempt that produced no answer
    ///
    /// Rate window counts are not returned: the request was still made.
    pub fn release(&self, reservation: &Reservation) {
        let provider_counters = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&reservation.provider)
            .cloned();
        let user_counters = self
            .user_quotas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(reservation.user_id.clone(), reservation.provider.clone()))
            .cloned();

        if let Some(counters) = provider_counters {
            let mut counters = lock(&counters);
            if counters.quota.window_start() == reservation.provider_window {
                counters.quota.subtract(reservation.units);
            }
        }

        if let (Some(window), Some(reserved_start)) = (user_counters, reservation.user_window) {
            let mut window = lock(&window);
            if window.window_start() == reserved_start {
                window.subtract(reservation.units);
            }
        }

        tracing::debug!(
            provider = %reservation.provider,
            user_id = %reservation.user_id,
            units = reservation.units,
            "Released quota reservation"
        );
    }

    /// Read-only check: would a one-unit request by `user_id` be admitted now?
    pub fn is_usable(&self, provider: &str, user_id: &str) -> bool {
        let Some((limits, user_rate)) = self.limits_for(provider) else {
            return false;
        };
        let now = Instant::now();

        let provider_ok = match self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
        {
            Some(counters) => {
                let counters = lock(counters);
                let used = counters.quota.effective_used(now, limits.quota_window);
                let quota_ok = limits.quota_limit.is_none_or(|limit| used < limit);
                let rate_ok = match (&counters.rate, limits.rate_limit) {
                    (Some(rate), Some(_)) => rate.would_admit(now),
                    _ => limits.rate_limit != Some(0),
                };
                quota_ok && rate_ok
            }
            None => limits.quota_limit != Some(0) && limits.rate_limit != Some(0),
        };
        if !provider_ok {
            return false;
        }

        if let Some(user_limit) = limits.user_quota_limit {
            let used = self
                .user_quotas
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&(user_id.to_string(), provider.to_string()))
                .map(|w| lock(w).effective_used(now, limits.quota_window))
                .unwrap_or(0);
            if used >= user_limit {
                return false;
            }
        }

        if let Some((limit, _)) = user_rate {
            let admitted = self
                .user_rates
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(user_id)
                .map(|w| lock(w).would_admit(now))
                .unwrap_or(limit > 0);
            if !admitted {
                return false;
            }
        }

        true
    }

    /// Units consumed from `provider` in its current window
    pub fn units_used(&self, provider: &str) -> u64 {
        let Some((limits, _)) = self.limits_for(provider) else {
            return 0;
        };
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .map(|c| lock(c).quota.effective_used(Instant::now(), limits.quota_window))
            .unwrap_or(0)
    }

    /// Units `user_id` consumed from `provider` in the current window
    pub fn user_units_used(&self, user_id: &str, provider: &str) -> u64 {
        let Some((limits, _)) = self.limits_for(provider) else {
            return 0;
        };
        self.user_quotas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(user_id.to_string(), provider.to_string()))
            .map(|w| lock(w).effective_used(Instant::now(), limits.quota_window))
            .unwrap_or(0)
    }

    /// Quota status of every configured provider, sorted by name
    pub fn statuses(&self) -> Vec<QuotaStatus> {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        let counters = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let mut statuses: Vec<QuotaStatus> = settings
            .providers
            .iter()
            .map(|(name, limits)| {
                let (units_used, rate_count) = counters
                    .get(name)
                    .map(|c| {
                        let c = lock(c);
                        let rate_count = c
                            .rate
                            .as_ref()
                            .filter(|r| !r.is_idle(now))
                            .map(|r| r.count())
                            .unwrap_or(0);
                        (c.quota.effective_used(now, limits.quota_window), rate_count)
                    })
                    .unwrap_or((0, 0));
                let remaining = limits.quota_limit.map(|l| l.saturating_sub(units_used));
                QuotaStatus {
                    provider: name.clone(),
                    tier: limits.tier,
                    units_used,
                    quota_limit: limits.quota_limit,
                    remaining,
                    exhausted: remaining == Some(0),
                    rate_count,
                    rate_limit: limits.rate_limit,
                }
            })
            .collect();

        statuses.sort_by(|a, b| a.provider.cmp(&b.provider));
        statuses
    }

    /// Drop per-user entries whose windows have expired
    ///
    /// An expired entry is indistinguishable from a fresh one. Entries
    /// currently held by an in-flight reservation are kept.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;

        {
            let mut quotas = self.user_quotas.write().unwrap_or_else(PoisonError::into_inner);
            let before = quotas.len();
            quotas.retain(|(_, provider), window| {
                let Some(limits) = settings.providers.get(provider) else {
                    return false;
                };
                Arc::strong_count(window) > 1
                    || lock(window).effective_used(now, limits.quota_window) > 0
            });
            removed += before - quotas.len();
        }

        {
            let mut rates = self.user_rates.write().unwrap_or_else(PoisonError::into_inner);
            let before = rates.len();
            rates.retain(|_, window| Arc::strong_count(window) > 1 || !lock(window).is_idle(now));
            removed += before - rates.len();
        }

        if removed > 0 {
            tracing::debug!(removed = removed, "Pruned idle per-user quota entries");
        }
        removed
    }

    /// Capture all quota windows that carry usage
    pub fn snapshot(&self) -> QuotaSnapshot {
        let now = Instant::now();
        let wall_now = Utc::now();
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);

        let to_wall = |instant: Instant| {
            wall_now
                - chrono::Duration::from_std(now.saturating_duration_since(instant))
                    .unwrap_or(chrono::Duration::zero())
        };

        let mut providers: Vec<ProviderUsage> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(name, counters)| {
                let limits = settings.providers.get(name)?;
                let counters = lock(counters);
                let used = counters.quota.effective_used(now, limits.quota_window);
                (used > 0).then(|| ProviderUsage {
                    provider: name.clone(),
                    window_start: to_wall(counters.quota.window_start()),
                    units_used: used,
                })
            })
            .collect();
        providers.sort_by(|a, b| a.provider.cmp(&b.provider));

        let mut users: Vec<UserUsage> = self
            .user_quotas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|((user_id, provider), window)| {
                let limits = settings.providers.get(provider)?;
                let window = lock(window);
                let used = window.effective_used(now, limits.quota_window);
                (used > 0).then(|| UserUsage {
                    user_id: user_id.clone(),
                    provider: provider.clone(),
                    window_start: to_wall(window.window_start()),
                    units_used: used,
                })
            })
            .collect();
        users.sort_by(|a, b| (&a.user_id, &a.provider).cmp(&(&b.user_id, &b.provider)));

        QuotaSnapshot { providers, users }
    }

    /// Load previously persisted windows
    ///
    /// Entries for providers no longer configured, or whose window has already
    /// expired, are skipped.
    pub fn restore(&self, snapshot: &QuotaSnapshot) {
        let now = Instant::now();
        let wall_now = Utc::now();
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);

        // Map a wall-clock window start onto the monotonic clock
        let to_instant = |start: DateTime<Utc>, length: Duration| -> Option<Instant> {
            let elapsed = (wall_now - start).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= length {
                return None;
            }
            Some(now.checked_sub(elapsed).unwrap_or(now))
        };

        let mut restored = 0;
        for usage in &snapshot.providers {
            let Some(limits) = settings.providers.get(&usage.provider) else {
                tracing::warn!(provider = %usage.provider, "Skipping persisted quota for unknown provider");
                continue;
            };
            let Some(start) = to_instant(usage.window_start, limits.quota_window) else {
                continue;
            };
            let counters = self.provider_entry(&usage.provider, limits, now);
            lock(&counters).quota = UsageWindow::with_usage(start, usage.units_used);
            restored += 1;
        }

        for usage in &snapshot.users {
            let Some(limits) = settings.providers.get(&usage.provider) else {
                continue;
            };
            let Some(start) = to_instant(usage.window_start, limits.quota_window) else {
                continue;
            };
            let window = entry(
                &self.user_quotas,
                &(usage.user_id.clone(), usage.provider.clone()),
                || UsageWindow::new(now),
            );
            *lock(&window) = UsageWindow::with_usage(start, usage.units_used);
            restored += 1;
        }

        tracing::info!(restored_windows = restored, "Quota state restored");
    }
}
