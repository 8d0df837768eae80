//! Query endpoint handler
//!
//! Handles POST /query: every valid request receives an answer object, even
//! when every provider is exhausted.

use crate::engine::{MAX_QUERY_LENGTH, QueryResponse};
use crate::error::AppError;
use crate::handlers::AppState;
use crate::handlers::extractor::InputJson;
use crate::middleware::RequestId;
use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Deserializer, Serialize};

/// Query request from client
///
/// Validation is enforced during deserialization - invalid instances cannot exist.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    user_id: String,
    text: String,
}

impl QueryRequest {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl<'de> Deserialize<'de> for QueryRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawQueryRequest {
            user_id: String,
            text: String,
        }

        let raw = RawQueryRequest::deserialize(deserializer)?;

        if raw.user_id.trim().is_empty() {
            return Err(serde::de::Error::custom("user_id cannot be empty"));
        }

        if raw.text.trim().is_empty() {
            return Err(serde::de::Error::custom(
                "text cannot be empty or contain only whitespace",
            ));
        }

        // Count Unicode characters, not bytes
        let char_count = raw.text.chars().count();
        if char_count > MAX_QUERY_LENGTH {
            return Err(serde::de::Error::custom(format!(
                "text exceeds maximum length of {} characters (got {})",
                MAX_QUERY_LENGTH, char_count
            )));
        }

        Ok(QueryRequest {
            user_id: raw.user_id,
            text: raw.text,
        })
    }
}

/// POST /query
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    InputJson(request): InputJson<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    tracing::debug!(
        request_id = %request_id,
        user_id = %request.user_id(),
        text_length = request.text().len(),
        "Received query"
    );

    let response = state
        .engine()
        .submit_query(request.user_id(), request.text())
        .await?;

    tracing::info!(
        request_id = %request_id,
        query_id = %response.query_id,
        tier = %response.tier,
        provider = ?response.provider_used,
        cached = response.cached,
        degraded = response.degraded,
        crisis = response.crisis,
        "Query completed"
    );

    Ok(Json(response))
}
