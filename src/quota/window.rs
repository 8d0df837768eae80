//! Fixed counting windows
//!
//! Both quota and rate limits are fixed windows that roll over lazily: the
//! first read or write at or after `window_start + length` resets the counter
//! to zero and restarts the window at that instant. A window is only ever
//! touched while its owner's per-key mutex is held, so a rollover happens
//! exactly once per expiry.

use std::time::Duration;
use tokio::time::Instant;

/// Units counted within a fixed window against an optional limit
#[derive(Debug, Clone)]
pub struct UsageWindow {
    window_start: Instant,
    used: u64,
}

impl UsageWindow {
    /// Start an empty window at `now`
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            used: 0,
        }
    }

    /// Restore a window with prior usage
    pub fn with_usage(window_start: Instant, used: u64) -> Self {
        Self { window_start, used }
    }

    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Reset the window if `length` has elapsed since it started
    ///
    /// Returns `true` if a rollover happened.
    pub fn roll(&mut self, now: Instant, length: Duration) -> bool {
        if now.saturating_duration_since(self.window_start) >= length {
            self.window_start = now;
            self.used = 0;
            true
        } else {
            false
        }
    }

    /// Usage as it would read after a rollover check, without mutating
    pub fn effective_used(&self, now: Instant, length: Duration) -> u64 {
        if now.saturating_duration_since(self.window_start) >= length {
            0
        } else {
            self.used
        }
    }

    /// Whether `units` more fit under `limit` (`None` = unlimited)
    pub fn admits(&self, units: u64, limit: Option<u64>) -> bool {
        match limit {
            Some(limit) => self.used.saturating_add(units) <= limit,
            None => true,
        }
    }

    pub fn add(&mut self, units: u64) {
        self.used = self.used.saturating_add(units);
    }

    /// Return units to the window, never going below zero
    pub fn subtract(&mut self, units: u64) {
        self.used = self.used.saturating_sub(units);
    }
}

/// Request counter for a single subject within a fixed window
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    usage: UsageWindow,
    limit: u32,
    length: Duration,
}

impl RateLimitWindow {
    pub fn new(limit: u32, length: Duration, now: Instant) -> Self {
        Self {
            usage: UsageWindow::new(now),
            limit,
            length,
        }
    }

    /// Apply new limits; the current count is kept
    pub fn reconfigure(&mut self, limit: u32, length: Duration) {
        self.limit = limit;
        self.length = length;
    }

    pub fn count(&self) -> u64 {
        self.usage.used()
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window_start(&self) -> Instant {
        self.usage.window_start()
    }

    /// Roll over if expired, then report whether one more request fits
    pub fn check(&mut self, now: Instant) -> bool {
        self.usage.roll(now, self.length);
        self.usage.admits(1, Some(u64::from(self.limit)))
    }

    /// Read-only variant of [`check`](Self::check)
    pub fn would_admit(&self, now: Instant) -> bool {
        self.usage.effective_used(now, self.length) < u64::from(self.limit)
    }

    /// Count one request. Callers must have called `check` under the same lock.
    pub fn record(&mut self) {
        self.usage.add(1);
    }

    /// Whether the window has expired (and could be dropped)
    pub fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.usage.window_start()) >= self.length
    }
}
