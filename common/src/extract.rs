//! Request extractors that fail with [`AppError`].

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;

use crate::errors::AppError;

/// JSON body extractor.
///
/// Unlike `axum::Json` it does not insist on a content type, and an empty
/// body reads as `{}` so forms that post nothing still reach the credential
/// fallback. Malformed JSON becomes a `VALIDATION_ERROR` envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::Validation(format!("unreadable request body: {}", e.body_text())))?;

        let body: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &bytes
        };

        serde_json::from_slice(body)
            .map(AppJson)
            .map_err(|e| AppError::Validation(format!("invalid JSON body: {e}")))
    }
}
