//! OpenAI-compatible chat completions provider
//!
//! Sends a single non-streaming `POST {base_url}/chat/completions` request
//! per attempt, bounded by the caller's timeout. HTTP failures are mapped onto
//! [`ProviderError`] so the orchestrator can decide whether to retry or move
//! on.

use super::{Provider, ProviderResponse};
use crate::config::ProviderConfig;
use crate::error::{AppError, AppResult, ProviderError};
use crate::router::Query;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Remote model behind an OpenAI-compatible HTTP API
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Build from configuration, reading the API key from `api_key_env` if set
    pub fn from_config(config: &ProviderConfig, http: reqwest::Client) -> AppResult<Self> {
        let base_url = config.base_url().ok_or_else(|| {
            AppError::Config(format!(
                "provider '{}' requires base_url",
                config.name()
            ))
        })?;

        let api_key = match config.api_key_env() {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => Some(key),
                _ => {
                    tracing::warn!(
                        provider = %config.name(),
                        env_var = %var,
                        "API key environment variable is not set; sending requests without authorization"
                    );
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            name: config.name().to_string(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: config.model().to_string(),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            api_key,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn transport(&self, reason: impl std::fmt::Display) -> ProviderError {
        ProviderError::Transport {
            provider: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn invalid(&self, reason: impl std::fmt::Display) -> ProviderError {
        ProviderError::InvalidResponse {
            provider: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    async fn send(&self, query: &Query) -> Result<ProviderResponse, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: query.text(),
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.transport(e))?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.classify_status(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.invalid(format!("malformed JSON body: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| self.invalid("response contained no answer text"))?;

        Ok(ProviderResponse::new(content))
    }

    fn classify_status(&self, status: StatusCode, body: &str) -> ProviderError {
        if status == StatusCode::PAYMENT_REQUIRED || body.contains("insufficient_quota") {
            return ProviderError::QuotaExceeded {
                provider: self.name.clone(),
            };
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ProviderError::RateLimited {
                provider: self.name.clone(),
            };
        }
        if status.is_server_error() {
            return self.transport(format!("server returned {}", status));
        }
        self.invalid(format!("unexpected status {}", status))
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(
        &self,
        query: &Query,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        tracing::debug!(
            provider = %self.name,
            model = %self.model,
            query_id = %query.id(),
            timeout_seconds = timeout.as_secs(),
            "Starting remote provider query"
        );

        match tokio::time::timeout(timeout, self.send(query)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: self.name.clone(),
                timeout_seconds: timeout.as_secs(),
            }),
        }
    }
}
