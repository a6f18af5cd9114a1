//! Application Insights client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use common::config::AppConfig;
use common::errors::{AppError, AppResult};
use common::models::credential::resolve_app_id;
use common::models::probe::UNKNOWN_VERSION;
use common::models::{
    ConnectionCredential, ConnectionProbe, CredentialRequest, Integration, QueryProbe, QueryProbeRequest,
};

use super::upstream::{Upstream, UpstreamRequest, APP_INSIGHTS_AUTH};
use super::ObservabilityProbe;

/// Cheap query used by the connection test.
pub const PROBE_QUERY: &str = "requests | take 5";

/// Query API result: `{"tables": [{"rows": [...]}]}` or `{"error": ...}`.
#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    tables: Vec<Table>,
}

#[derive(Debug, Deserialize)]
struct Table {
    #[serde(default)]
    rows: Vec<Value>,
}

impl QueryResult {
    fn rows_count(&self) -> usize {
        self.tables.first().map_or(0, |t| t.rows.len())
    }
}

/// Fails with `QueryFailed` when the body carries a top-level `error`.
///
/// Works on the raw document so the error wins over any shape mismatch in
/// the rest of the body.
fn check_query_error(results: &Value) -> AppResult<()> {
    match error_message(results.get("error")) {
        Some(message) => Err(AppError::QueryFailed {
            service: Integration::AppInsights.label(),
            message,
        }),
        None => Ok(()),
    }
}

fn error_message(error: Option<&Value>) -> Option<String> {
    match error? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => Some(
            obj.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
        ),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Application Insights service.
pub struct AppInsightsService {
    http: reqwest::Client,
    config: Arc<AppConfig>,
}

impl AppInsightsService {
    pub fn new(http: reqwest::Client, config: Arc<AppConfig>) -> Self {
        Self { http, config }
    }

    /// Resolves app id, URL and key in that order.
    fn upstream(&self, request: &CredentialRequest) -> AppResult<(Upstream, String)> {
        let app_id = resolve_app_id(request, &self.config.appinsights)?;
        let credential = ConnectionCredential::resolve(
            Integration::AppInsights,
            request,
            &self.config.appinsights,
            self.config.default_scheme,
        )?;
        let upstream = Upstream::new(
            self.http.clone(),
            Integration::AppInsights.label(),
            credential,
            APP_INSIGHTS_AUTH,
        );
        Ok((upstream, app_id))
    }
}

#[async_trait]
impl ObservabilityProbe for AppInsightsService {
    fn integration(&self) -> Integration {
        Integration::AppInsights
    }

    async fn test_connection(&self, request: &CredentialRequest) -> AppResult<ConnectionProbe> {
        let (upstream, app_id) = self.upstream(request)?;
        let (response, scheme) = upstream
            .send(
                &UpstreamRequest::get(
                    &["v1", "apps", app_id.as_str(), "query"],
                    self.config.timeouts.connection_probe,
                )
                .query(&[("query", PROBE_QUERY)]),
            )
            .await?;
        let body: Value = response.json()?;
        check_query_error(&body)?;
        let result = QueryResult::deserialize(&body).map_err(|e| AppError::ResponseParse {
            service: Integration::AppInsights.label(),
            excerpt: format!("unexpected query result: {e}"),
        })?;

        let rows_count = result.rows_count();
        tracing::info!(app_id = %app_id, rows_count, scheme = scheme.label(), "Application Insights connection test passed");

        Ok(ConnectionProbe {
            message: "Successfully connected to Application Insights".to_string(),
            version: UNKNOWN_VERSION.to_string(),
            database: None,
            datasources: Vec::new(),
            rows_count: Some(rows_count),
            auth_scheme: scheme.label().to_string(),
        })
    }

    async fn test_query(&self, request: QueryProbeRequest) -> AppResult<QueryProbe> {
        let (upstream, app_id) = self.upstream(&request.credential)?;
        let spec = request.into_spec(Utc::now())?;
        let payload = json!({
            "query": spec.expression,
            "timespan": spec.time_range.iso_interval(),
        });

        let (response, _) = upstream
            .send(&UpstreamRequest::post(
                &["v1", "apps", app_id.as_str(), "query"],
                &payload,
                self.config.timeouts.query,
            ))
            .await?;
        let results: Value = response.json()?;
        check_query_error(&results)?;

        Ok(QueryProbe {
            raw_query: false,
            results,
        })
    }
}
