//! Request classification and provider routing
//!
//! A query is classified into a [`Tier`] ceiling (and independently checked
//! for crisis content), then handed to the fallback orchestrator which walks
//! eligible providers in cost order.

pub mod classifier;
pub mod crisis;
pub mod fallback;

pub use classifier::RequestClassifier;
pub use crisis::CrisisPatternSet;
pub use fallback::{FallbackOrchestrator, RouteOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Cost/capability class of a provider, ordered by ascending cost
///
/// Maps to `tier = "local" | "free" | "premium"` in config.toml. The derived
/// ordering is what the orchestrator uses as a ceiling: a `Free` query may be
/// answered by `Local` or `Free` providers, never `Premium`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Local,
    Free,
    Premium,
}

impl Tier {
    /// Convert to string representation for logging and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Free => "free",
            Self::Premium => "premium",
        }
    }

    /// Whether a provider of `provider_tier` may answer a query with this ceiling
    pub fn admits(&self, provider_tier: Tier) -> bool {
        provider_tier <= *self
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound query. Immutable once created.
#[derive(Debug, Clone)]
pub struct Query {
    id: Uuid,
    user_id: String,
    text: String,
    submitted_at: DateTime<Utc>,
    tier: Option<Tier>,
}

impl Query {
    /// Create a query stamped with a fresh id and the current time
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            text: text.into(),
            submitted_at: Utc::now(),
            tier: None,
        }
    }

    /// Attach the tier the query was classified at
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Classified tier, `None` until the query has been classified
    pub fn tier(&self) -> Option<Tier> {
        self.tier
    }

    /// Estimate token count from the query text (simple heuristic: chars / 4, at least 1)
    pub fn estimate_tokens(&self) -> u64 {
        ((self.text.chars().count() / 4) as u64).max(1)
    }
}

/// Result of classifying a query
///
/// `is_crisis` is computed independently of the tier score; a crisis query
/// still carries a tier, but the engine never consults it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: Tier,
    pub is_crisis: bool,
    /// Confidence in the tier assignment (0.0-1.0)
    pub confidence: f32,
    /// Human-readable reason for the tier assignment
    pub reason: &'static str,
}

/// Normalize query text for exact-match keys and hashing
///
/// Trims, collapses internal whitespace runs to a single space and lowercases.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 hex digest of the normalized query text
///
/// Used as the exact cache key and as the query fingerprint in safety events,
/// so the raw text never has to be stored.
pub fn query_hash(text: &str) -> String {
    hex::encode(Sha256::digest(normalize_text(text).as_bytes()))
}
