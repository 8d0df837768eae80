//! Answer providers and the provider registry
//!
//! Every provider implements the same async [`Provider::attempt`] contract;
//! the registry composes concrete implementations from configuration and
//! pairs each with its (read-only) [`ProviderConfig`].

pub mod fixed;
pub mod local;
pub mod remote;

pub use fixed::StaticProvider;
pub use local::TemplateProvider;
pub use remote::OpenAiCompatibleProvider;

use crate::config::{Config, ProviderConfig, ProviderKind};
use crate::error::{AppError, AppResult, ProviderError};
use crate::router::{Query, Tier};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Successful provider answer
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
}

impl ProviderResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A source of answers
///
/// Implementations must bound their own work by `timeout` and report every
/// failure as a [`ProviderError`]; they never panic and never block the
/// runtime.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(
        &self,
        query: &Query,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// A provider together with the configuration it was built from
#[derive(Clone)]
pub struct RegisteredProvider {
    config: ProviderConfig,
    provider: Arc<dyn Provider>,
}

impl RegisteredProvider {
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn tier(&self) -> Tier {
        self.config.tier()
    }
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("name", &self.config.name())
            .field("tier", &self.config.tier())
            .field("kind", &self.config.kind())
            .finish()
    }
}

/// Catalog of configured providers
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    entries: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    /// Build every provider described by `config`
    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::from_config_with(config, HashMap::new())
    }

    /// Build providers from `config`, substituting `overrides` by name
    ///
    /// Overrides keep the configured tier, cost and limits of the entry they
    /// replace; only the answering implementation changes. Every override must
    /// name a configured provider.
    pub fn from_config_with(
        config: &Config,
        mut overrides: HashMap<String, Arc<dyn Provider>>,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let mut entries = Vec::with_capacity(config.providers.len());
        for provider_config in &config.providers {
            let provider: Arc<dyn Provider> = match overrides.remove(provider_config.name()) {
                Some(custom) => custom,
                None => build_provider(provider_config, &http)?,
            };
            entries.push(RegisteredProvider {
                config: provider_config.clone(),
                provider,
            });
        }

        if let Some(unknown) = overrides.keys().next() {
            return Err(AppError::Config(format!(
                "provider override '{}' does not match any configured provider",
                unknown
            )));
        }

        tracing::info!(
            providers = entries.len(),
            local = entries.iter().filter(|e| e.tier() == Tier::Local).count(),
            free = entries.iter().filter(|e| e.tier() == Tier::Free).count(),
            premium = entries.iter().filter(|e| e.tier() == Tier::Premium).count(),
            "Provider registry built"
        );

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredProvider> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// The provider designated for the crisis override
    pub fn safety(&self) -> Option<&RegisteredProvider> {
        self.entries.iter().find(|e| e.config.is_safety())
    }

    /// Providers eligible for a query with tier ceiling `ceiling`, in attempt order
    ///
    /// Sorted by ascending cost per unit, then priority, then name. The order
    /// depends only on configuration, never on runtime state.
    pub fn candidates(&self, ceiling: Tier) -> Vec<&RegisteredProvider> {
        let mut candidates: Vec<&RegisteredProvider> = self
            .entries
            .iter()
            .filter(|e| ceiling.admits(e.tier()))
            .collect();

        candidates.sort_by(|a, b| {
            a.config
                .cost_per_unit()
                .total_cmp(&b.config.cost_per_unit())
                .then_with(|| a.config.priority().cmp(&b.config.priority()))
                .then_with(|| a.name().cmp(b.name()))
        });
        candidates
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProvider> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_provider(config: &ProviderConfig, http: &reqwest::Client) -> AppResult<Arc<dyn Provider>> {
    Ok(match config.kind() {
        ProviderKind::LocalTemplate => Arc::new(TemplateProvider::from_config(config)),
        ProviderKind::Static => Arc::new(StaticProvider::from_config(config)?),
        ProviderKind::OpenaiCompatible => {
            Arc::new(OpenAiCompatibleProvider::from_config(config, http.clone())?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[[providers]]
name = "local"
kind = "local_template"
tier = "local"
templates = [{ patterns = ["hello"], answer = "Hi!" }]

[[providers]]
name = "free-b"
kind = "static"
tier = "free"
priority = 2
response = "b"

[[providers]]
name = "free-a"
kind = "static"
tier = "free"
priority = 1
response = "a"

[[providers]]
name = "cheap-premium"
kind = "static"
tier = "premium"
cost_per_unit = 0.0
response = "p"

[[providers]]
name = "premium"
kind = "openai_compatible"
tier = "premium"
base_url = "http://localhost:9/v1"
cost_per_unit = 0.01
priority = 2
safety = true
"#;

    struct Echo;

    #[async_trait]
    impl Provider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn attempt(
            &self,
            query: &Query,
            _timeout: Duration,
        ) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse::new(query.text()))
        }
    }

    fn names(candidates: &[&RegisteredProvider]) -> Vec<String> {
        candidates.iter().map(|c| c.name().to_string()).collect()
    }

    #[test]
    fn test_registry_builds_all_kinds() {
        let config = Config::from_str(CONFIG).unwrap();
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.safety().unwrap().name(), "premium");
    }

    #[test]
    fn test_candidates_respect_tier_ceiling() {
        let config = Config::from_str(CONFIG).unwrap();
        let registry = ProviderRegistry::from_config(&config).unwrap();

        assert_eq!(names(&registry.candidates(Tier::Local)), vec!["local"]);
        assert_eq!(
            names(&registry.candidates(Tier::Free)),
            vec!["local", "free-a", "free-b"]
        );
    }

    #[test]
    fn test_candidates_sorted_by_cost_then_priority_then_name() {
        let config = Config::from_str(CONFIG).unwrap();
        let registry = ProviderRegistry::from_config(&config).unwrap();

        // All zero-cost providers use priority 1 except free-b; name breaks the remaining tie
        assert_eq!(
            names(&registry.candidates(Tier::Premium)),
            vec!["cheap-premium", "free-a", "local", "free-b", "premium"]
        );
    }

    #[test]
    fn test_candidate_order_is_stable_across_builds() {
        let config = Config::from_str(CONFIG).unwrap();
        let a = ProviderRegistry::from_config(&config).unwrap();
        let b = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(
            names(&a.candidates(Tier::Premium)),
            names(&b.candidates(Tier::Premium))
        );
    }

    #[tokio::test]
    async fn test_override_replaces_implementation_only() {
        let config = Config::from_str(CONFIG).unwrap();
        let mut overrides: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        overrides.insert("free-a".to_string(), Arc::new(Echo));
        let registry = ProviderRegistry::from_config_with(&config, overrides).unwrap();

        let entry = registry.get("free-a").unwrap();
        assert_eq!(entry.tier(), Tier::Free);
        let response = entry
            .provider()
            .attempt(&Query::new("u", "ping"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.text, "ping");
    }

    #[test]
    fn test_unknown_override_is_rejected() {
        let config = Config::from_str(CONFIG).unwrap();
        let mut overrides: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        overrides.insert("ghost".to_string(), Arc::new(Echo));
        let err = ProviderRegistry::from_config_with(&config, overrides).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
