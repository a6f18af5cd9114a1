//! Grafana client: connection test, query test, dashboard and snapshot fetch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use common::config::AppConfig;
use common::errors::{AppError, AppResult};
use common::models::dashboard::QueryResponse;
use common::models::probe::{DatasourceSummary, UNKNOWN_VERSION};
use common::models::{
    ConnectionCredential, ConnectionProbe, CredentialRequest, DashboardInfoRequest, Integration, QueryProbe,
    QueryProbeRequest, QuerySpec, SnapshotInfoRequest,
};
use common::utils::is_schema_discovery;

use super::upstream::{AuthScheme, Upstream, UpstreamRequest, GRAFANA_AUTH};
use super::ObservabilityProbe;

/// Step between points requested from `/api/ds/query`.
pub const DEFAULT_INTERVAL_MS: i64 = 60_000;
pub const DEFAULT_MAX_DATA_POINTS: i64 = 1_000;

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    database: Option<String>,
}

/// Grafana service.
pub struct GrafanaService {
    http: reqwest::Client,
    config: Arc<AppConfig>,
}

impl GrafanaService {
    pub fn new(http: reqwest::Client, config: Arc<AppConfig>) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Resolves credentials; fails before any network activity when they
    /// are missing.
    pub fn upstream(&self, request: &CredentialRequest) -> AppResult<Upstream> {
        let credential = ConnectionCredential::resolve(
            Integration::Grafana,
            request,
            &self.config.grafana,
            self.config.default_scheme,
        )?;
        Ok(Upstream::new(
            self.http.clone(),
            Integration::Grafana.label(),
            credential,
            GRAFANA_AUTH,
        ))
    }

    /// Dashboard definition as Grafana returns it.
    pub async fn dashboard(&self, request: &DashboardInfoRequest) -> AppResult<Value> {
        let upstream = self.upstream(&request.credential)?;
        request.validate()?;
        let (dashboard, _) =
            fetch_dashboard(&upstream, request.dashboard_uid.trim(), self.config.timeouts.dashboard).await?;
        Ok(dashboard)
    }

    /// Snapshot as Grafana returns it.
    pub async fn snapshot(&self, request: &SnapshotInfoRequest) -> AppResult<Value> {
        let upstream = self.upstream(&request.credential)?;
        request.validate()?;
        let key = request.snapshot_key.trim();
        let (response, _) = upstream
            .send(&UpstreamRequest::get(
                &["api", "snapshots", key],
                self.config.timeouts.dashboard,
            ))
            .await?;
        response.not_found(&format!("Snapshot {key}"))?.json()
    }

    async fn datasources(&self, upstream: &Upstream) -> AppResult<Vec<DatasourceSummary>> {
        let (response, _) = upstream
            .send(&UpstreamRequest::get(
                &["api", "datasources"],
                self.config.timeouts.connection_probe,
            ))
            .await?;
        response.json()
    }
}

#[async_trait]
impl ObservabilityProbe for GrafanaService {
    fn integration(&self) -> Integration {
        Integration::Grafana
    }

    async fn test_connection(&self, request: &CredentialRequest) -> AppResult<ConnectionProbe> {
        let upstream = self.upstream(request)?;
        let (response, scheme) = upstream
            .send(&UpstreamRequest::get(
                &["api", "health"],
                self.config.timeouts.connection_probe,
            ))
            .await?;
        let health: HealthBody = response.json()?;

        let datasources = match self.datasources(&upstream.pinned(scheme)).await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "connected to Grafana but could not list datasources");
                Vec::new()
            }
        };

        let version = health
            .version
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        tracing::info!(version = %version, datasources = datasources.len(), scheme = scheme.label(), "Grafana connection test passed");

        Ok(ConnectionProbe {
            message: format!("Successfully connected to Grafana (version {version})"),
            version,
            database: health.database,
            datasources,
            rows_count: None,
            auth_scheme: scheme.label().to_string(),
        })
    }

    async fn test_query(&self, request: QueryProbeRequest) -> AppResult<QueryProbe> {
        let upstream = self.upstream(&request.credential)?;
        let spec = request.into_spec(Utc::now())?;
        let raw_query = is_schema_discovery(&spec.expression);
        let payload = query_payload(&spec, raw_query);

        let (response, _) = upstream
            .send(&UpstreamRequest::post(
                &["api", "ds", "query"],
                &payload,
                self.config.timeouts.query,
            ))
            .await?;
        let results: Value = response.json()?;
        check_query_errors(&results)?;

        Ok(QueryProbe { raw_query, results })
    }
}

/// Body of a single-query `/api/ds/query` call.
pub fn query_payload(spec: &QuerySpec, raw_query: bool) -> Value {
    let mut query = json!({
        "refId": "A",
        "expr": spec.expression,
        "query": spec.expression,
        "rawQuery": raw_query,
        "instant": true,
        "intervalMs": DEFAULT_INTERVAL_MS,
        "maxDataPoints": DEFAULT_MAX_DATA_POINTS,
    });
    if let Some(uid) = &spec.datasource_uid {
        query["datasource"] = json!({ "uid": uid });
    }
    json!({
        "queries": [query],
        "from": spec.time_range.from_ms.to_string(),
        "to": spec.time_range.to_ms.to_string(),
    })
}

/// Fails with `QueryFailed` when any result carries an error.
pub fn check_query_errors(results: &Value) -> AppResult<()> {
    match QueryResponse::embedded_error(results) {
        Some(message) => Err(AppError::QueryFailed {
            service: Integration::Grafana.label(),
            message,
        }),
        None => Ok(()),
    }
}

/// `GET /api/dashboards/uid/{uid}`, with the auth shape that worked.
pub async fn fetch_dashboard(
    upstream: &Upstream,
    uid: &str,
    timeout: Duration,
) -> AppResult<(Value, &'static AuthScheme)> {
    let (response, scheme) = upstream
        .send(&UpstreamRequest::get(&["api", "dashboards", "uid", uid], timeout))
        .await?;
    let dashboard = response.not_found(&format!("Dashboard {uid}"))?.json()?;
    Ok((dashboard, scheme))
}

/// Resolves a legacy datasource name to its uid.
pub async fn datasource_uid_by_name(upstream: &Upstream, name: &str, timeout: Duration) -> AppResult<String> {
    let (response, _) = upstream
        .send(&UpstreamRequest::get(&["api", "datasources", "name", name], timeout))
        .await?;
    let datasource: DatasourceSummary = response.not_found(&format!("Datasource {name}"))?.json()?;
    if datasource.uid.is_empty() {
        return Err(AppError::NotFound(format!("Datasource {name} not found: no uid reported")));
    }
    Ok(datasource.uid)
}
