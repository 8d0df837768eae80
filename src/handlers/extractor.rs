//! JSON extractor reporting input errors as 400 Bad Request
//!
//! Axum's `Json` answers data errors (such as a blank `text` rejected during
//! deserialization) with 422. Invalid input is a client error here, so every
//! rejection except a missing content type maps to 400 with the same
//! `{"error": ...}` body that [`AppError`](crate::error::AppError) produces.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;

/// Rejection produced by [`InputJson`]
#[derive(Debug)]
pub struct InputRejection(JsonRejection);

impl IntoResponse for InputRejection {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            JsonRejection::MissingJsonContentType(_) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Content-Type must be application/json".to_string(),
            ),
            _ => (StatusCode::BAD_REQUEST, self.0.body_text()),
        };

        tracing::debug!(status = %status, error = %message, "Rejected request body");

        let body = Json(serde_json::json!({
            "error": message,
        }));
        (status, body).into_response()
    }
}

/// `Json` wrapper whose rejections are input errors
pub struct InputJson<T>(pub T);

impl<S, T> FromRequest<S> for InputJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = InputRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(InputJson(value)),
            Err(rejection) => Err(InputRejection(rejection)),
        }
    }
}
