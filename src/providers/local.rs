//! Deterministic local template provider
//!
//! Matches the normalized query against configured patterns and answers with
//! the associated canned text. No network, no cost.
//!
//! A pattern equal to the whole query always answers. A pattern that only
//! occurs inside a longer query answers it only when the query was classified
//! Local (or not classified at all), so a greeting template never answers
//! "Hi, can you compare ..." for a Premium query.

use super::{Provider, ProviderResponse};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::router::{Query, Tier, normalize_text};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Template {
    patterns: Vec<String>,
    answer: String,
}

/// Pattern → answer table
#[derive(Debug, Clone)]
pub struct TemplateProvider {
    name: String,
    templates: Vec<Template>,
}

/// Normalized text with punctuation other than apostrophes removed
fn match_form(text: &str) -> String {
    let stripped: String = normalize_text(text)
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c
            } else {
                ' '
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl TemplateProvider {
    pub fn from_config(config: &ProviderConfig) -> Self {
        let templates = config
            .templates()
            .iter()
            .map(|t| Template {
                patterns: t
                    .patterns
                    .iter()
                    .map(|p| match_form(p))
                    .filter(|p| !p.is_empty())
                    .collect(),
                answer: t.answer.clone(),
            })
            .collect();

        Self {
            name: config.name().to_string(),
            templates,
        }
    }

    /// First template whose pattern equals the query, else (when
    /// `allow_contains`) the first whose pattern occurs in it as whole words
    fn find(&self, text: &str, allow_contains: bool) -> Option<&str> {
        let candidate = match_form(text);
        if candidate.is_empty() {
            return None;
        }
        let padded = format!(" {} ", candidate);

        self.templates
            .iter()
            .find(|t| t.patterns.iter().any(|p| *p == candidate))
            .or_else(|| {
                if !allow_contains {
                    return None;
                }
                self.templates.iter().find(|t| {
                    t.patterns
                        .iter()
                        .any(|p| padded.contains(&format!(" {} ", p)))
                })
            })
            .map(|t| t.answer.as_str())
    }
}

#[async_trait]
impl Provider for TemplateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(
        &self,
        query: &Query,
        _timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        let allow_contains = query.tier().is_none_or(|tier| tier == Tier::Local);
        match self.find(query.text(), allow_contains) {
            Some(answer) => Ok(ProviderResponse::new(answer)),
            None => Err(ProviderError::NoMatch {
                provider: self.name.clone(),
            }),
        }
    }
}
