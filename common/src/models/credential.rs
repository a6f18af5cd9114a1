//! Upstream credentials and their resolution.
//!
//! A credential comes from the request body when the user typed one into the
//! settings form, otherwise from the defaults configured through environment
//! variables. Blank strings count as absent on both sides.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::IntegrationDefaults;
use crate::errors::{AppError, AppResult};
use crate::utils::url::{normalize_endpoint, Scheme};

/// External services the dashboard integrates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integration {
    /// Metrics/dashboard service.
    Grafana,
    /// Application-telemetry service.
    AppInsights,
}

impl Integration {
    /// Human readable name used in messages.
    pub fn label(&self) -> &'static str {
        match self {
            Integration::Grafana => "Grafana",
            Integration::AppInsights => "Application Insights",
        }
    }

    fn url_env(&self) -> &'static str {
        match self {
            Integration::Grafana => "GRAFANA_URL",
            Integration::AppInsights => "APP_INSIGHTS_URL",
        }
    }

    fn key_env(&self) -> &'static str {
        match self {
            Integration::Grafana => "GRAFANA_API_TOKEN",
            Integration::AppInsights => "APP_INSIGHTS_API_KEY",
        }
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Connection fields a settings form may submit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CredentialRequest {
    /// Service base URL; scheme optional.
    #[serde(default)]
    pub url: Option<String>,
    /// API key or service-account token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Application Insights application id.
    #[serde(default)]
    pub app_id: Option<String>,
}

/// Effective endpoint and key for one upstream call.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionCredential {
    pub endpoint_url: String,
    pub api_key: String,
}

impl fmt::Debug for ConnectionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCredential")
            .field("endpoint_url", &self.endpoint_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ConnectionCredential {
    /// Resolves URL and key, request first, then configured defaults.
    ///
    /// # Errors
    /// `AppError::MissingConfiguration` when either is still empty; no
    /// network activity happens before this check.
    pub fn resolve(
        integration: Integration,
        request: &CredentialRequest,
        defaults: &IntegrationDefaults,
        default_scheme: Scheme,
    ) -> AppResult<Self> {
        let url = first_present(request.url.as_deref(), defaults.url.as_deref()).ok_or_else(|| {
            AppError::MissingConfiguration(format!(
                "{} URL is not configured: provide url or set {}",
                integration,
                integration.url_env()
            ))
        })?;
        let api_key = first_present(request.api_key.as_deref(), defaults.api_key.as_deref())
            .ok_or_else(|| {
                AppError::MissingConfiguration(format!(
                    "{} API key is not configured: provide api_key or set {}",
                    integration,
                    integration.key_env()
                ))
            })?;

        Ok(Self {
            endpoint_url: normalize_endpoint(&url, default_scheme),
            api_key,
        })
    }
}

/// Resolves the Application Insights application id the same way.
pub fn resolve_app_id(request: &CredentialRequest, defaults: &IntegrationDefaults) -> AppResult<String> {
    first_present(request.app_id.as_deref(), defaults.app_id.as_deref()).ok_or_else(|| {
        AppError::MissingConfiguration(
            "Missing Application Insights credentials: provide app_id or set APP_INSIGHTS_APPLICATION_ID"
                .to_string(),
        )
    })
}

/// First non-blank value, trimmed.
pub fn first_present(primary: Option<&str>, fallback: Option<&str>) -> Option<String> {
    [primary, fallback]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}
