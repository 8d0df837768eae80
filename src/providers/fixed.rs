//! Fixed-response provider

use super::{Provider, ProviderResponse};
use crate::config::ProviderConfig;
use crate::error::{AppError, AppResult, ProviderError};
use crate::router::Query;
use async_trait::async_trait;
use std::time::Duration;

/// Answers every query with the same configured text
///
/// Useful as a last-resort local provider or as an offline safety provider.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    name: String,
    response: String,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: response.into(),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> AppResult<Self> {
        let response = config.response().ok_or_else(|| {
            AppError::Config(format!(
                "static provider '{}' has no response configured",
                config.name()
            ))
        })?;
        Ok(Self::new(config.name(), response))
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(
        &self,
        _query: &Query,
        _timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse::new(self.response.clone()))
    }
}
