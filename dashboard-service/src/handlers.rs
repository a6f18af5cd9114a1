//! JSON API handlers.

use std::time::Instant;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use common::errors::AppResult;
use common::extract::AppJson;
use common::middleware::RequestId;
use common::models::{
    ConnectionProbe, CredentialRequest, DashboardInfoRequest, ExportCsvRequest, QueryProbe, QueryProbeRequest,
    SnapshotInfoRequest,
};
use common::response::ApiResponse;

use crate::service::export::CsvExport;
use crate::service::ObservabilityProbe;
use crate::state::AppState;

type ApiResult<T> = AppResult<Json<ApiResponse<T>>>;

fn envelope<T: Serialize>(state: &AppState, data: T, request_id: &RequestId, started: Instant) -> Json<ApiResponse<T>> {
    Json(
        ApiResponse::ok_with_service(data, state.config.service_name.as_str())
            .with_request_id(request_id.as_str())
            .timed(started),
    )
}

async fn connection_test(
    probe: &dyn ObservabilityProbe,
    request: &CredentialRequest,
) -> AppResult<ConnectionProbe> {
    let integration = probe.integration();
    tracing::info!(integration = integration.label(), "testing connection");
    probe.test_connection(request).await
}

async fn query_test(probe: &dyn ObservabilityProbe, request: QueryProbeRequest) -> AppResult<QueryProbe> {
    let integration = probe.integration();
    tracing::info!(integration = integration.label(), "testing query");
    probe.test_query(request).await
}

/// Test the Grafana connection
#[utoipa::path(
    post,
    path = "/settings/api/grafana/test-connection",
    tag = "grafana",
    request_body = CredentialRequest,
    responses(
        (status = 200, description = "Grafana reachable", body = ApiResponse<ConnectionProbe>),
        (status = 400, description = "URL or API key missing"),
        (status = 502, description = "Grafana rejected the key or answered unexpectedly"),
        (status = 504, description = "Grafana timed out")
    )
)]
pub async fn grafana_test_connection(
    State(state): State<AppState>,
    request_id: RequestId,
    AppJson(req): AppJson<CredentialRequest>,
) -> ApiResult<ConnectionProbe> {
    let started = Instant::now();
    let probe = connection_test(&state.grafana(), &req).await?;
    Ok(envelope(&state, probe, &request_id, started))
}

/// Run an ad-hoc Grafana query
#[utoipa::path(
    post,
    path = "/settings/api/grafana/test-query",
    tag = "grafana",
    request_body = QueryProbeRequest,
    responses(
        (status = 200, description = "Raw query result", body = ApiResponse<QueryProbe>),
        (status = 400, description = "Missing configuration or query"),
        (status = 502, description = "Query failed upstream")
    )
)]
pub async fn grafana_test_query(
    State(state): State<AppState>,
    request_id: RequestId,
    AppJson(req): AppJson<QueryProbeRequest>,
) -> ApiResult<QueryProbe> {
    let started = Instant::now();
    let result = query_test(&state.grafana(), req).await?;
    Ok(envelope(&state, result, &request_id, started))
}

/// Test the Application Insights connection
#[utoipa::path(
    post,
    path = "/settings/api/appinsights/test-connection",
    tag = "appinsights",
    request_body = CredentialRequest,
    responses(
        (status = 200, description = "Application Insights reachable", body = ApiResponse<ConnectionProbe>),
        (status = 400, description = "Application id or API key missing"),
        (status = 502, description = "Application Insights rejected the key or answered unexpectedly")
    )
)]
pub async fn appinsights_test_connection(
    State(state): State<AppState>,
    request_id: RequestId,
    AppJson(req): AppJson<CredentialRequest>,
) -> ApiResult<ConnectionProbe> {
    let started = Instant::now();
    let probe = connection_test(&state.appinsights(), &req).await?;
    Ok(envelope(&state, probe, &request_id, started))
}

/// Run an ad-hoc Application Insights query
#[utoipa::path(
    post,
    path = "/settings/api/appinsights/test-query",
    tag = "appinsights",
    request_body = QueryProbeRequest,
    responses(
        (status = 200, description = "Raw query result", body = ApiResponse<QueryProbe>),
        (status = 400, description = "Missing configuration or query"),
        (status = 502, description = "Query failed upstream")
    )
)]
pub async fn appinsights_test_query(
    State(state): State<AppState>,
    request_id: RequestId,
    AppJson(req): AppJson<QueryProbeRequest>,
) -> ApiResult<QueryProbe> {
    let started = Instant::now();
    let result = query_test(&state.appinsights(), req).await?;
    Ok(envelope(&state, result, &request_id, started))
}

/// Fetch a Grafana dashboard definition
#[utoipa::path(
    post,
    path = "/settings/grafana/dashboard-info",
    tag = "grafana",
    request_body = DashboardInfoRequest,
    responses(
        (status = 200, description = "Dashboard JSON as returned by Grafana, in the data field"),
        (status = 404, description = "Dashboard not found")
    )
)]
pub async fn dashboard_info(
    State(state): State<AppState>,
    request_id: RequestId,
    AppJson(req): AppJson<DashboardInfoRequest>,
) -> ApiResult<Value> {
    let started = Instant::now();
    let dashboard = state.grafana().dashboard(&req).await?;
    Ok(envelope(&state, dashboard, &request_id, started))
}

/// Fetch a Grafana dashboard snapshot
#[utoipa::path(
    post,
    path = "/settings/grafana/snapshot-info",
    tag = "grafana",
    request_body = SnapshotInfoRequest,
    responses(
        (status = 200, description = "Snapshot JSON as returned by Grafana, in the data field"),
        (status = 404, description = "Snapshot not found")
    )
)]
pub async fn snapshot_info(
    State(state): State<AppState>,
    request_id: RequestId,
    AppJson(req): AppJson<SnapshotInfoRequest>,
) -> ApiResult<Value> {
    let started = Instant::now();
    let snapshot = state.grafana().snapshot(&req).await?;
    Ok(envelope(&state, snapshot, &request_id, started))
}

/// Export a panel's data as CSV
#[utoipa::path(
    post,
    path = "/settings/grafana/export-csv",
    tag = "grafana",
    request_body = ExportCsvRequest,
    responses(
        (status = 200, description = "CSV attachment", content_type = "text/csv", body = String),
        (status = 400, description = "A required field is missing"),
        (status = 404, description = "Dashboard, panel or datasource not found"),
        (status = 502, description = "Query failed upstream")
    )
)]
pub async fn export_csv(
    State(state): State<AppState>,
    AppJson(req): AppJson<ExportCsvRequest>,
) -> AppResult<CsvExport> {
    state.grafana().export_panel_csv(&req, Utc::now()).await
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is running", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: state.config.app_version.clone(),
        environment: state.config.environment.as_str().to_string(),
        timestamp: Utc::now(),
        active_sessions: state.sessions.len().await,
    })
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
    pub active_sessions: usize,
}
