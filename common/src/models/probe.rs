//! Probe results returned by the settings endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Version reported when the upstream does not say.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Successful connection test.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionProbe {
    /// Message shown to the user.
    pub message: String,
    /// Upstream version, `"unknown"` when not reported.
    pub version: String,
    /// Upstream database status, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Datasources visible with this key (Grafana only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasources: Vec<DatasourceSummary>,
    /// Rows returned by the probe query (Application Insights only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_count: Option<usize>,
    /// Auth header shape that was accepted.
    pub auth_scheme: String,
}

/// One datasource as listed by Grafana.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DatasourceSummary {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub uid: String,
}

/// Successful query test; `results` is the upstream JSON as returned.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueryProbe {
    /// True when the expression was sent as a raw schema-discovery query.
    pub raw_query: bool,
    /// Upstream result document.
    pub results: serde_json::Value,
}
