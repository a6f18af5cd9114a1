//! Application error types.
//!
//! Every failure a handler can produce is an [`AppError`]. Handlers return
//! [`AppResult`] and axum turns the error into the standard JSON envelope
//! through the [`IntoResponse`] impl below.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

use crate::response::ApiResponse;

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Transport-level failure category for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The request did not complete within its timeout.
    Timeout,
    /// Connection refused, DNS failure or unreachable host.
    Connection,
    /// Certificate or handshake failure.
    Tls,
    /// Anything else reqwest reports.
    Other,
}

impl NetworkErrorKind {
    /// Stable lowercase name used in error details.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkErrorKind::Timeout => "timeout",
            NetworkErrorKind::Connection => "connection",
            NetworkErrorKind::Tls => "tls",
            NetworkErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the dashboard service.
#[derive(Debug, Error)]
pub enum AppError {
    /// No URL, key or app id could be resolved from the request or environment.
    #[error("{0}")]
    MissingConfiguration(String),

    /// A required request field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// Panel, dashboard, snapshot or datasource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Upstream rejected every configured auth header shape.
    #[error("Authentication failed for {service} (HTTP {status}); check the API key")]
    AuthenticationFailure {
        service: &'static str,
        status: u16,
        attempts: usize,
    },

    /// Upstream answered with a non-2xx status other than 401/403.
    #[error("{service} request failed: {message}")]
    UpstreamHttp {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// Upstream answered 200 with an HTML page, usually a login redirect.
    #[error("{service} returned HTML instead of JSON (is the URL pointing at the API?): {snippet}")]
    UnexpectedContentType {
        service: &'static str,
        snippet: String,
    },

    /// Upstream body could not be decoded as JSON.
    #[error("{service} returned an invalid response: {excerpt}")]
    ResponseParse {
        service: &'static str,
        excerpt: String,
    },

    /// Upstream reported an error inside an otherwise successful envelope.
    #[error("{service} query failed: {message}")]
    QueryFailed {
        service: &'static str,
        message: String,
    },

    /// Transport failure talking to the upstream service.
    #[error("{message}")]
    Network {
        service: &'static str,
        kind: NetworkErrorKind,
        message: String,
    },

    /// The caller has no valid session.
    #[error("authentication required")]
    Unauthorized,

    /// Anything unexpected.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine readable error code placed in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingConfiguration(_) => "MISSING_CONFIGURATION",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::AuthenticationFailure { .. } => "AUTHENTICATION_FAILED",
            AppError::UpstreamHttp { .. } => "UPSTREAM_HTTP_ERROR",
            AppError::UnexpectedContentType { .. } => "UNEXPECTED_CONTENT_TYPE",
            AppError::ResponseParse { .. } => "INVALID_RESPONSE",
            AppError::QueryFailed { .. } => "QUERY_FAILED",
            AppError::Network { .. } => "NETWORK_ERROR",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used for this error. Upstream-side failures map to the
    /// gateway statuses so callers can tell them apart from their own mistakes.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingConfiguration(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Network {
                kind: NetworkErrorKind::Timeout,
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            AppError::AuthenticationFailure { .. }
            | AppError::UpstreamHttp { .. }
            | AppError::UnexpectedContentType { .. }
            | AppError::ResponseParse { .. }
            | AppError::QueryFailed { .. }
            | AppError::Network { .. } => StatusCode::BAD_GATEWAY,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Extra structured context for the envelope, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::AuthenticationFailure {
                service,
                status,
                attempts,
            } => Some(json!({ "service": service, "status": status, "attempts": attempts })),
            AppError::UpstreamHttp { service, status, .. } => {
                Some(json!({ "service": service, "status": status }))
            }
            AppError::Network { service, kind, .. } => {
                Some(json!({ "service": service, "kind": kind.as_str() }))
            }
            AppError::UnexpectedContentType { service, .. }
            | AppError::ResponseParse { service, .. }
            | AppError::QueryFailed { service, .. } => Some(json!({ "service": service })),
            _ => None,
        }
    }

    /// Whether this error indicates a bug rather than a user or upstream problem.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, AppError::Internal(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_unexpected() {
            tracing::error!(code = self.code(), error = %self, "unexpected error");
            sentry::capture_error(&self);
        } else {
            tracing::warn!(code = self.code(), status = status.as_u16(), error = %self, "request failed");
        }

        let body = match self.details() {
            Some(details) => ApiResponse::err_with_details(self.code(), self.to_string(), details),
            None => ApiResponse::err(self.code(), self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let message = fields
            .into_iter()
            .map(|(field, errs)| {
                let reason = errs
                    .iter()
                    .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| "is invalid".to_string());
                format!("{field} {reason}")
            })
            .collect::<Vec<_>>()
            .join("; ");
        AppError::Validation(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            AppError::MissingConfiguration("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("Panel 7 not found".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Network {
                service: "Grafana",
                kind: NetworkErrorKind::Timeout,
                message: "timed out".into(),
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::Network {
                service: "Grafana",
                kind: NetworkErrorKind::Connection,
                message: "refused".into(),
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_messages_are_human_readable() {
        let html = AppError::UnexpectedContentType {
            service: "Grafana",
            snippet: "<html>".into(),
        };
        assert!(html.to_string().contains("instead of JSON"));

        let auth = AppError::AuthenticationFailure {
            service: "Grafana",
            status: 401,
            attempts: 4,
        };
        assert!(auth.to_string().starts_with("Authentication failed"));
        assert_eq!(auth.code(), "AUTHENTICATION_FAILED");
        assert_eq!(auth.details().unwrap()["attempts"], 4);
    }

    #[test]
    fn test_validation_errors_are_joined_by_field() {
        let mut errors = ValidationErrors::new();
        let mut blank = validator::ValidationError::new("blank");
        blank.message = Some("is required".into());
        errors.add("query", blank);
        errors.add("datasource_uid", validator::ValidationError::new("length"));

        let err = AppError::from(errors);
        assert_eq!(err.to_string(), "datasource_uid is invalid; query is required");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
