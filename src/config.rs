//! Configuration management for careroute
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Provider entries are owned by configuration; request handling only reads
//! them.

use crate::router::Tier;
use crate::router::crisis::DEFAULT_CRISIS_PATTERNS;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    30
}

/// How a provider produces answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Deterministic pattern → canned answer table
    LocalTemplate,
    /// OpenAI-compatible chat completions endpoint
    OpenaiCompatible,
    /// Always answers with a fixed configured response
    Static,
}

/// Unit in which a provider's quota is counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaUnit {
    /// One unit per answered request
    #[default]
    Requests,
    /// Estimated prompt tokens per request
    Tokens,
}

/// Question patterns answered by a local template provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateConfig {
    pub patterns: Vec<String>,
    pub answer: String,
}

/// Individual provider configuration
///
/// All fields are private to enforce invariants. Configuration is loaded via
/// deserialization and validated via Config::validate(). After construction,
/// fields cannot be mutated, ensuring validated data remains valid.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    name: String,
    kind: ProviderKind,
    tier: Tier,
    /// Ordering among providers of equal cost (lower = tried first)
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default)]
    cost_per_unit: f64,
    /// Units allowed per quota window; `None` means unlimited
    #[serde(default)]
    quota_limit: Option<u64>,
    #[serde(default = "default_quota_window")]
    quota_window_seconds: u64,
    #[serde(default)]
    quota_unit: QuotaUnit,
    /// Units a single user may consume from this provider per quota window
    #[serde(default)]
    user_quota_limit: Option<u64>,
    /// Requests allowed per rate window; `None` means unlimited
    #[serde(default)]
    rate_limit: Option<u32>,
    #[serde(default = "default_rate_window")]
    rate_window_seconds: u64,
    /// Designates the crisis override provider
    #[serde(default)]
    safety: bool,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    model: Option<String>,
    /// Environment variable holding the bearer token
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_temperature")]
    temperature: f64,
    #[serde(default)]
    templates: Vec<TemplateConfig>,
    #[serde(default)]
    response: Option<String>,
}

impl ProviderConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn cost_per_unit(&self) -> f64 {
        self.cost_per_unit
    }

    pub fn quota_limit(&self) -> Option<u64> {
        self.quota_limit
    }

    pub fn quota_window_seconds(&self) -> u64 {
        self.quota_window_seconds
    }

    pub fn quota_unit(&self) -> QuotaUnit {
        self.quota_unit
    }

    pub fn user_quota_limit(&self) -> Option<u64> {
        self.user_quota_limit
    }

    pub fn rate_limit(&self) -> Option<u32> {
        self.rate_limit
    }

    pub fn rate_window_seconds(&self) -> u64 {
        self.rate_window_seconds
    }

    pub fn is_safety(&self) -> bool {
        self.safety
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Model identifier sent to remote providers (defaults to the provider name)
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.name)
    }

    pub fn api_key_env(&self) -> Option<&str> {
        self.api_key_env.as_deref()
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn templates(&self) -> &[TemplateConfig] {
        &self.templates
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }
}

fn default_priority() -> u8 {
    1
}

fn default_quota_window() -> u64 {
    86_400
}

fn default_rate_window() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f64 {
    0.7
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Enables approximate (embedding similarity) lookup after an exact miss
    #[serde(default = "default_true")]
    pub semantic: bool,
    /// Minimum cosine similarity for a semantic hit
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_cache_ttl(),
            capacity: default_cache_capacity(),
            semantic: true,
            similarity_threshold: default_similarity_threshold(),
            embedding_dimensions: default_embedding_dimensions(),
            purge_interval_seconds: default_purge_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_similarity_threshold() -> f32 {
    0.90
}

fn default_embedding_dimensions() -> usize {
    256
}

fn default_purge_interval() -> u64 {
    300
}

/// Request classifier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Local classifications below this confidence are upgraded to Free
    #[serde(default = "default_confidence_threshold")]
    confidence_threshold: f32,
    #[serde(default = "default_crisis_patterns")]
    crisis_patterns: Vec<String>,
    /// Optional file with one extra crisis phrase per line
    #[serde(default)]
    crisis_patterns_file: Option<String>,
    /// How many previous queries per user feed the momentum signal
    #[serde(default = "default_context_turns")]
    context_turns: usize,
}

impl ClassifierConfig {
    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn crisis_patterns(&self) -> &[String] {
        &self.crisis_patterns
    }

    pub fn crisis_patterns_file(&self) -> Option<&str> {
        self.crisis_patterns_file.as_deref()
    }

    pub fn context_turns(&self) -> usize {
        self.context_turns
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            crisis_patterns: default_crisis_patterns(),
            crisis_patterns_file: None,
            context_turns: default_context_turns(),
        }
    }
}

fn default_confidence_threshold() -> f32 {
    0.4
}

fn default_crisis_patterns() -> Vec<String> {
    DEFAULT_CRISIS_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_context_turns() -> usize {
    3
}

/// Per-user limits applied to non-local providers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// External provider requests a single user may make per window
    #[serde(default)]
    pub user_rate_limit: Option<u32>,
    #[serde(default = "default_rate_window")]
    pub user_rate_window_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            user_rate_limit: None,
            user_rate_window_seconds: default_rate_window(),
        }
    }
}

/// Fallback orchestration configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Answer returned when every eligible provider is exhausted
    #[serde(default = "default_degraded_response")]
    pub degraded_response: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            degraded_response: default_degraded_response(),
        }
    }
}

fn default_degraded_response() -> String {
    "I'm not able to give a full answer right now. Please try again in a little while."
        .to_string()
}

/// Crisis override configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SafetyConfig {
    /// Answer returned when the safety provider cannot be reached
    #[serde(default = "default_safety_response")]
    pub static_response: String,
    #[serde(default = "default_safety_timeout")]
    pub timeout_seconds: u64,
    /// Append-only JSON lines file receiving every safety event
    #[serde(default)]
    pub event_log: Option<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            static_response: default_safety_response(),
            timeout_seconds: default_safety_timeout(),
            event_log: None,
        }
    }
}

pub(crate) fn default_safety_response() -> String {
    "It sounds like you are going through something really painful, and you don't have to \
    face it alone. If you are in immediate danger, please call your local emergency number \
    now. You can also reach a crisis line: call or text 988 in the US, or find a local \
    helpline at https://findahelpline.com. Talking to someone you trust can help too."
        .to_string()
}

fn default_safety_timeout() -> u64 {
    20
}

/// Ledger period granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerPeriod {
    #[default]
    Daily,
    Monthly,
}

/// Cost ledger configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub period: LedgerPeriod,
}

/// Durable state (ledger + quota windows) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// JSON state file; persistence is disabled when absent
    #[serde(default)]
    pub state_file: Option<String>,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            flush_interval_seconds: default_flush_interval(),
        }
    }
}

fn default_flush_interval() -> u64 {
    60
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-tier provider call timeouts
///
/// If a tier timeout is not specified, the global
/// `server.request_timeout_seconds` is used.
///
/// # Custom Deserialization
///
/// All timeout values must be in range (0, 300] seconds. Invalid values are
/// rejected during TOML parsing, so an invalid `TimeoutsConfig` never exists.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeoutsConfig {
    local: Option<u64>,
    free: Option<u64>,
    premium: Option<u64>,
}

impl TimeoutsConfig {
    /// Create a new TimeoutsConfig with validated timeout values
    ///
    /// # Errors
    ///
    /// Returns an error if any timeout is zero or exceeds 300 seconds.
    pub fn new(
        local: Option<u64>,
        free: Option<u64>,
        premium: Option<u64>,
    ) -> crate::error::AppResult<Self> {
        for (tier_name, timeout_opt) in [("local", local), ("free", free), ("premium", premium)] {
            if let Some(timeout) = timeout_opt {
                if timeout == 0 {
                    return Err(crate::error::AppError::Config(format!(
                        "timeouts.{} must be greater than 0, got {}",
                        tier_name, timeout
                    )));
                }
                if timeout > 300 {
                    return Err(crate::error::AppError::Config(format!(
                        "timeouts.{} cannot exceed 300 seconds (5 minutes), got {}",
                        tier_name, timeout
                    )));
                }
            }
        }
        Ok(Self {
            local,
            free,
            premium,
        })
    }

    pub fn local(&self) -> Option<u64> {
        self.local
    }

    pub fn free(&self) -> Option<u64> {
        self.free
    }

    pub fn premium(&self) -> Option<u64> {
        self.premium
    }
}

/// Validates at deserialization time by calling the validated `new()` constructor.
impl<'de> Deserialize<'de> for TimeoutsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, MapAccess, Visitor};
        use std::fmt;

        #[derive(Deserialize)]
        #[serde(field_identifier, rename_all = "lowercase")]
        enum Field {
            Local,
            Free,
            Premium,
        }

        struct TimeoutsConfigVisitor;

        impl<'de> Visitor<'de> for TimeoutsConfigVisitor {
            type Value = TimeoutsConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a struct with optional timeout fields (local, free, premium)")
            }

            fn visit_map<V>(self, mut map: V) -> Result<TimeoutsConfig, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut local = None;
                let mut free = None;
                let mut premium = None;

                while let Some(key) = map.next_key()? {
                    match key {
                        Field::Local => {
                            if local.is_some() {
                                return Err(de::Error::duplicate_field("local"));
                            }
                            local = Some(map.next_value()?);
                        }
                        Field::Free => {
                            if free.is_some() {
                                return Err(de::Error::duplicate_field("free"));
                            }
                            free = Some(map.next_value()?);
                        }
                        Field::Premium => {
                            if premium.is_some() {
                                return Err(de::Error::duplicate_field("premium"));
                            }
                            premium = Some(map.next_value()?);
                        }
                    }
                }

                TimeoutsConfig::new(local, free, premium)
                    .map_err(|e| de::Error::custom(format!("Invalid timeout configuration: {}", e)))
            }
        }

        deserializer.deserialize_struct(
            "TimeoutsConfig",
            &["local", "free", "premium"],
            TimeoutsConfigVisitor,
        )
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            crate::error::AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self = toml::from_str(&content).map_err(|source| {
            crate::error::AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| crate::error::AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Get the provider call timeout for a tier
    ///
    /// Returns the per-tier timeout if configured, otherwise the global
    /// `server.request_timeout_seconds`.
    pub fn timeout_for_tier(&self, tier: Tier) -> u64 {
        let tier_timeout = match tier {
            Tier::Local => self.timeouts.local(),
            Tier::Free => self.timeouts.free(),
            Tier::Premium => self.timeouts.premium(),
        };

        tier_timeout.unwrap_or(self.server.request_timeout_seconds)
    }

    /// The single provider designated for the crisis override
    pub fn safety_provider(&self) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.safety)
    }

    /// Look up a provider by name
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()`, but can also be called
    /// explicitly when constructing Config via other means (e.g., in tests).
    pub fn validate(&self) -> crate::error::AppResult<()> {
        use crate::error::AppError;

        // ═══════════════════════════════════════════════════════════════════════
        // Phase 1: Provider Field Validation
        // ═══════════════════════════════════════════════════════════════════════
        let mut names = HashSet::new();
        let mut priorities: HashMap<(Tier, u8), &str> = HashMap::new();

        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(AppError::Config(
                    "Configuration error: provider name cannot be empty".to_string(),
                ));
            }

            if !names.insert(provider.name.as_str()) {
                return Err(AppError::Config(format!(
                    "Configuration error: provider name '{}' is defined more than once. \
                    Provider names must be unique.",
                    provider.name
                )));
            }

            if let Some(other) = priorities.insert((provider.tier, provider.priority), &provider.name)
            {
                return Err(AppError::Config(format!(
                    "Configuration error: providers '{}' and '{}' share priority {} in tier '{}'. \
                    priority must be unique per tier.",
                    other, provider.name, provider.priority, provider.tier
                )));
            }

            if provider.cost_per_unit < 0.0 || !provider.cost_per_unit.is_finite() {
                return Err(AppError::Config(format!(
                    "Configuration error: provider '{}' has invalid cost_per_unit {}. \
                    cost_per_unit must be a non-negative finite number.",
                    provider.name, provider.cost_per_unit
                )));
            }

            if provider.quota_window_seconds == 0 {
                return Err(AppError::Config(format!(
                    "Configuration error: provider '{}' has quota_window_seconds=0. \
                    quota_window_seconds must be greater than 0.",
                    provider.name
                )));
            }

            if provider.rate_window_seconds == 0 {
                return Err(AppError::Config(format!(
                    "Configuration error: provider '{}' has rate_window_seconds=0. \
                    rate_window_seconds must be greater than 0.",
                    provider.name
                )));
            }

            if let (Some(user_limit), Some(limit)) = (provider.user_quota_limit, provider.quota_limit)
                && user_limit > limit
            {
                return Err(AppError::Config(format!(
                    "Configuration error: provider '{}' has user_quota_limit {} above quota_limit {}.",
                    provider.name, user_limit, limit
                )));
            }

            match provider.kind {
                ProviderKind::OpenaiCompatible => {
                    let base_url = provider.base_url.as_deref().unwrap_or_default();
                    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                        return Err(AppError::Config(format!(
                            "Configuration error: provider '{}' has invalid base_url '{}'. \
                            base_url must start with 'http://' or 'https://'.",
                            provider.name, base_url
                        )));
                    }
                    if provider.max_tokens == 0 {
                        return Err(AppError::Config(format!(
                            "Configuration error: provider '{}' has max_tokens=0. \
                            max_tokens must be greater than 0.",
                            provider.name
                        )));
                    }
                    if !(0.0..=2.0).contains(&provider.temperature) {
                        return Err(AppError::Config(format!(
                            "Configuration error: provider '{}' has invalid temperature {}. \
                            temperature must be a finite number between 0.0 and 2.0.",
                            provider.name, provider.temperature
                        )));
                    }
                }
                ProviderKind::LocalTemplate => {
                    if provider.templates.is_empty() {
                        return Err(AppError::Config(format!(
                            "Configuration error: local_template provider '{}' has no templates.",
                            provider.name
                        )));
                    }
                    if provider
                        .templates
                        .iter()
                        .any(|t| t.answer.trim().is_empty() || t.patterns.is_empty())
                    {
                        return Err(AppError::Config(format!(
                            "Configuration error: provider '{}' has a template with no patterns \
                            or an empty answer.",
                            provider.name
                        )));
                    }
                }
                ProviderKind::Static => {
                    if provider
                        .response
                        .as_deref()
                        .is_none_or(|r| r.trim().is_empty())
                    {
                        return Err(AppError::Config(format!(
                            "Configuration error: static provider '{}' needs a non-empty response.",
                            provider.name
                        )));
                    }
                }
            }
        }

        // ═══════════════════════════════════════════════════════════════════════
        // Phase 2: Registry Shape Validation
        // ═══════════════════════════════════════════════════════════════════════
        //
        // Local-tier queries may only use Local providers, so at least one must
        // exist. The crisis override needs exactly one designated provider.
        if !self.providers.iter().any(|p| p.tier == Tier::Local) {
            return Err(AppError::Config(
                "Configuration error: no provider has tier = \"local\". \
                At least one local provider is required.\n\n\
                Example fix - add to config.toml:\n\
                [[providers]]\n\
                name = \"local-template\"\n\
                kind = \"local_template\"\n\
                tier = \"local\"\n\
                templates = [{ patterns = [\"hello\"], answer = \"Hi there!\" }]"
                    .to_string(),
            ));
        }

        let safety_count = self.providers.iter().filter(|p| p.safety).count();
        if safety_count != 1 {
            return Err(AppError::Config(format!(
                "Configuration error: exactly one provider must set safety = true, found {}.",
                safety_count
            )));
        }

        // ═══════════════════════════════════════════════════════════════════════
        // Phase 3: Section Validation
        // ═══════════════════════════════════════════════════════════════════════
        if self.cache.ttl_seconds == 0 {
            return Err(AppError::Config(
                "Configuration error: cache.ttl_seconds must be greater than 0".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(AppError::Config(
                "Configuration error: cache.capacity must be greater than 0".to_string(),
            ));
        }
        if !(self.cache.similarity_threshold > 0.0 && self.cache.similarity_threshold <= 1.0) {
            return Err(AppError::Config(format!(
                "Configuration error: cache.similarity_threshold must be in (0, 1], got {}",
                self.cache.similarity_threshold
            )));
        }
        if self.cache.embedding_dimensions == 0 {
            return Err(AppError::Config(
                "Configuration error: cache.embedding_dimensions must be greater than 0"
                    .to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.classifier.confidence_threshold) {
            return Err(AppError::Config(format!(
                "Configuration error: classifier.confidence_threshold must be in [0, 1], got {}",
                self.classifier.confidence_threshold
            )));
        }
        if self.limits.user_rate_window_seconds == 0 {
            return Err(AppError::Config(
                "Configuration error: limits.user_rate_window_seconds must be greater than 0"
                    .to_string(),
            ));
        }
        if self.safety.static_response.trim().is_empty() {
            return Err(AppError::Config(
                "Configuration error: safety.static_response cannot be empty".to_string(),
            ));
        }
        if self.safety.timeout_seconds == 0 || self.safety.timeout_seconds > 300 {
            return Err(AppError::Config(format!(
                "Configuration error: safety.timeout_seconds must be in (0, 300], got {}",
                self.safety.timeout_seconds
            )));
        }
        if self.routing.degraded_response.trim().is_empty() {
            return Err(AppError::Config(
                "Configuration error: routing.degraded_response cannot be empty".to_string(),
            ));
        }
        if self.persistence.flush_interval_seconds == 0 {
            return Err(AppError::Config(
                "Configuration error: persistence.flush_interval_seconds must be greater than 0"
                    .to_string(),
            ));
        }

        // Validate request timeout
        if self.server.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "Configuration error: request_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.server.request_timeout_seconds > 300 {
            return Err(AppError::Config(format!(
                "Configuration error: request_timeout_seconds cannot exceed 300 seconds (5 minutes), got {}",
                self.server.request_timeout_seconds
            )));
        }

        // Free calls must give up no later than premium calls
        let free = self.timeout_for_tier(Tier::Free);
        let premium = self.timeout_for_tier(Tier::Premium);
        if free > premium {
            return Err(AppError::Config(format!(
                "Configuration error: free tier timeout ({}s) exceeds premium tier timeout ({}s).",
                free, premium
            )));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = crate::error::AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(toml_str).map_err(|source| {
            crate::error::AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            }
        })?;

        config.validate()?;
        Ok(config)
    }
}
