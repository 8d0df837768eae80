//! Response cache
//!
//! Stores prior query → answer pairs keyed by the hash of the normalized
//! query text, with an optional embedding per entry for approximate lookup.
//! Entries live in an arena (`Vec` of slots plus a free list) with a
//! key → slot index, all behind one `RwLock`. Lookups only take the read
//! lock; hit counters and access times are atomics on the entry.
//!
//! Crisis-classified queries are never read from or written to the cache.

pub mod embedding;

pub use embedding::{Embedder, HashingEmbedder, content_terms, cosine_similarity};

use crate::config::CacheConfig;
use crate::router::{Classification, Tier, normalize_text, query_hash};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// A cached answer as returned by a lookup
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub response_text: String,
    pub provider_used: String,
    /// Tier of the query the answer was produced for
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    /// Hit count including the lookup that returned this entry
    pub hit_count: u64,
    /// 1.0 for exact hits
    pub similarity: f32,
    pub exact: bool,
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct Slot {
    key: String,
    embedding: Option<Vec<f32>>,
    /// Sorted, deduplicated content terms of the stored query
    terms: Vec<String>,
    response_text: String,
    provider_used: String,
    tier: Tier,
    created: Instant,
    expires: Instant,
    created_at: DateTime<Utc>,
    hit_count: AtomicU64,
    /// Milliseconds since the cache epoch
    last_accessed: AtomicU64,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires
    }

    /// Whether this answer may serve a query classified at `tier`
    fn serves(&self, tier: Tier) -> bool {
        self.tier >= tier
    }

    /// Whether every term of a lookup also occurs in the stored query
    fn covers(&self, terms: &[String]) -> bool {
        !terms.is_empty() && terms.iter().all(|t| self.terms.binary_search(t).is_ok())
    }

    fn touch(&self, epoch: Instant, now: Instant) -> u64 {
        self.last_accessed
            .store(millis_since(epoch, now), Ordering::Relaxed);
        self.hit_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn to_entry(&self, hit_count: u64, similarity: f32, exact: bool) -> CacheEntry {
        CacheEntry {
            key: self.key.clone(),
            response_text: self.response_text.clone(),
            provider_used: self.provider_used.clone(),
            tier: self.tier,
            created_at: self.created_at,
            hit_count,
            similarity,
            exact,
        }
    }
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
}

impl Arena {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn live(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|s| (idx, s)))
    }

    fn remove(&mut self, idx: usize) -> Option<Slot> {
        let slot = self.slots.get_mut(idx)?.take()?;
        self.index.remove(&slot.key);
        self.free.push(idx);
        Some(slot)
    }

    fn insert(&mut self, slot: Slot) {
        let key = slot.key.clone();
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
    }
}

fn term_set(text: &str) -> Vec<String> {
    let mut terms = content_terms(text);
    terms.sort_unstable();
    terms.dedup();
    terms
}

fn millis_since(epoch: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(epoch).as_millis() as u64
}

/// Exact and semantic response cache
pub struct ResponseCache {
    arena: RwLock<Arena>,
    embedder: Arc<dyn Embedder>,
    epoch: Instant,
    ttl: Duration,
    capacity: usize,
    semantic: bool,
    threshold: f32,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .field("semantic", &self.semantic)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Create a cache using the default hashing embedder
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_embedder(
            config,
            Arc::new(HashingEmbedder::new(config.embedding_dimensions)),
        )
    }

    /// Create a cache with a custom embedder
    pub fn with_embedder(config: &CacheConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
            embedder,
            epoch: Instant::now(),
            ttl: Duration::from_secs(config.ttl_seconds),
            capacity: config.capacity.max(1),
            semantic: config.semantic,
            threshold: config.similarity_threshold,
            enabled: config.enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Find a stored answer for `text`
    ///
    /// Exact key match first, then (if enabled) the most similar unexpired
    /// entry at or above the similarity threshold; equal similarities prefer
    /// the most recently created entry. A semantic hit also requires every
    /// content word of `text` to occur in the stored query, so questions that
    /// differ only in their subject never share an answer. Only entries
    /// produced for a tier at least as high as the query's are eligible.
    pub fn lookup(&self, text: &str, classification: &Classification) -> Option<CacheEntry> {
        if !self.enabled || classification.is_crisis {
            return None;
        }

        let key = query_hash(text);
        let now = Instant::now();

        {
            let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = arena.index.get(&key).and_then(|idx| arena.slots[*idx].as_ref())
                && !slot.is_expired(now)
                && slot.serves(classification.tier)
            {
                let hits = slot.touch(self.epoch, now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, provider = %slot.provider_used, "Exact cache hit");
                return Some(slot.to_entry(hits, 1.0, true));
            }
        }

        if self.semantic {
            let embedding = self.embedder.embed(text);
            let terms = term_set(text);
            let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);

            let best = arena
                .live()
                .filter(|(_, slot)| {
                    !slot.is_expired(now) && slot.serves(classification.tier) && slot.covers(&terms)
                })
                .filter_map(|(_, slot)| {
                    let similarity = cosine_similarity(&embedding, slot.embedding.as_ref()?);
                    (similarity >= self.threshold).then_some((slot, similarity))
                })
                .max_by(|(a, sim_a), (b, sim_b)| {
                    sim_a
                        .total_cmp(sim_b)
                        .then_with(|| a.created.cmp(&b.created))
                });

            if let Some((slot, similarity)) = best {
                let hits = slot.touch(self.epoch, now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    similarity = similarity,
                    provider = %slot.provider_used,
                    "Semantic cache hit"
                );
                return Some(slot.to_entry(hits, similarity, false));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store an answer; a later store for the same key replaces it
    ///
    /// Returns `false` when nothing was stored (crisis query, empty text or
    /// cache disabled).
    pub fn store(
        &self,
        text: &str,
        classification: &Classification,
        response_text: &str,
        provider_used: &str,
    ) -> bool {
        if !self.enabled || classification.is_crisis || normalize_text(text).is_empty() {
            return false;
        }

        let key = query_hash(text);
        let embedding = self.semantic.then(|| self.embedder.embed(text));
        let terms = if self.semantic {
            term_set(text)
        } else {
            Vec::new()
        };
        let now = Instant::now();

        let slot = Slot {
            key: key.clone(),
            embedding,
            terms,
            response_text: response_text.to_string(),
            provider_used: provider_used.to_string(),
            tier: classification.tier,
            created: now,
            expires: now + self.ttl,
            created_at: Utc::now(),
            hit_count: AtomicU64::new(0),
            last_accessed: AtomicU64::new(millis_since(self.epoch, now)),
        };

        let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(&idx) = arena.index.get(&key) {
            arena.slots[idx] = Some(slot);
            return true;
        }

        if arena.len() >= self.capacity {
            self.evict(&mut arena, now);
        }
        arena.insert(slot);
        true
    }

    /// Make room for one entry: expired entries first, otherwise the entry
    /// with the fewest hits (least recently accessed among equals)
    fn evict(&self, arena: &mut Arena, now: Instant) {
        let expired: Vec<usize> = arena
            .live()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(idx, _)| idx)
            .collect();

        if !expired.is_empty() {
            let count = expired.len() as u64;
            for idx in expired {
                arena.remove(idx);
            }
            self.evictions.fetch_add(count, Ordering::Relaxed);
            return;
        }

        let victim = arena
            .live()
            .min_by_key(|(_, slot)| {
                (
                    slot.hit_count.load(Ordering::Relaxed),
                    slot.last_accessed.load(Ordering::Relaxed),
                )
            })
            .map(|(idx, _)| idx);

        if let Some(idx) = victim
            && let Some(slot) = arena.remove(idx)
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(provider = %slot.provider_used, "Evicted cache entry");
        }
    }

    /// Remove the entry stored for exactly this text
    pub fn invalidate(&self, text: &str) -> bool {
        let key = query_hash(text);
        let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
        match arena.index.get(&key).copied() {
            Some(idx) => arena.remove(idx).is_some(),
            None => false,
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<usize> = arena
            .live()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(idx, _)| idx)
            .collect();
        for idx in &expired {
            arena.remove(*idx);
        }
        expired.len()
    }

    /// Remove every entry
    pub fn clear(&self) {
        *self.arena.write().unwrap_or_else(PoisonError::into_inner) = Arena::default();
    }

    pub fn len(&self) -> usize {
        self.arena
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
