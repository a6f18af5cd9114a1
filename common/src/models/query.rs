//! Request bodies for the query, fetch and export endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::errors::{AppError, AppResult};
use crate::models::credential::CredentialRequest;
use crate::utils::time_range::{TimeInput, TimeRange};

/// Request body for a query test.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct QueryProbeRequest {
    #[serde(flatten)]
    pub credential: CredentialRequest,

    /// Free-text query expression.
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub query: String,

    /// Grafana datasource uid the query targets.
    #[serde(default)]
    pub datasource_uid: Option<String>,

    /// Window start; defaults to one hour before `to`.
    #[serde(default)]
    pub from: Option<TimeInput>,

    /// Window end; defaults to now.
    #[serde(default)]
    pub to: Option<TimeInput>,
}

/// A query ready to send upstream.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub expression: String,
    pub datasource_uid: Option<String>,
    pub time_range: TimeRange,
}

impl QueryProbeRequest {
    /// Validates the body and resolves its time window.
    pub fn into_spec(self, now: DateTime<Utc>) -> AppResult<QuerySpec> {
        self.validate()?;
        let time_range = TimeRange::from_inputs(self.from.as_ref(), self.to.as_ref(), now)?;
        Ok(QuerySpec {
            expression: self.query.trim().to_string(),
            datasource_uid: self
                .datasource_uid
                .map(|uid| uid.trim().to_string())
                .filter(|uid| !uid.is_empty()),
            time_range,
        })
    }
}

/// Request body for fetching a dashboard definition.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct DashboardInfoRequest {
    #[serde(flatten)]
    pub credential: CredentialRequest,

    /// Dashboard uid.
    #[serde(default, alias = "dashboard_id")]
    #[validate(custom(function = "not_blank"))]
    pub dashboard_uid: String,
}

/// Request body for fetching a dashboard snapshot.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SnapshotInfoRequest {
    #[serde(flatten)]
    pub credential: CredentialRequest,

    /// Snapshot key.
    #[serde(default, alias = "key")]
    #[validate(custom(function = "not_blank"))]
    pub snapshot_key: String,
}

/// Panel id as sent by the front end, number or numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum PanelIdInput {
    Number(i64),
    Text(String),
}

impl PanelIdInput {
    fn as_id(&self) -> Option<i64> {
        match self {
            PanelIdInput::Number(n) => Some(*n),
            PanelIdInput::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Request body for the CSV export.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExportCsvRequest {
    #[serde(flatten)]
    pub credential: CredentialRequest,

    #[serde(default, alias = "dashboard_id")]
    pub dashboard_uid: Option<String>,

    #[serde(default)]
    pub panel_id: Option<PanelIdInput>,

    #[serde(default)]
    pub from: Option<TimeInput>,

    #[serde(default)]
    pub to: Option<TimeInput>,
}

/// Validated export parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTarget {
    pub dashboard_uid: String,
    pub panel_id: i64,
    pub time_range: TimeRange,
}

impl ExportCsvRequest {
    /// Checks the non-credential fields in order, failing on the first problem.
    pub fn target(&self, now: DateTime<Utc>) -> AppResult<ExportTarget> {
        let dashboard_uid = self
            .dashboard_uid
            .as_deref()
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| missing("dashboard_uid"))?
            .to_string();

        let panel_id = match &self.panel_id {
            None => return Err(missing("panel_id")),
            Some(PanelIdInput::Text(s)) if s.trim().is_empty() => return Err(missing("panel_id")),
            Some(input) => input.as_id().ok_or_else(|| {
                AppError::Validation(format!("panel_id must be an integer, got {input:?}"))
            })?,
        };

        let from = self
            .from
            .as_ref()
            .filter(|b| !b.is_blank())
            .ok_or_else(|| missing("from"))?;
        let to = self
            .to
            .as_ref()
            .filter(|b| !b.is_blank())
            .ok_or_else(|| missing("to"))?;

        Ok(ExportTarget {
            dashboard_uid,
            panel_id,
            time_range: TimeRange::required(from, to, now)?,
        })
    }
}

fn missing(field: &str) -> AppError {
    AppError::Validation(format!("{field} is required"))
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.message = Some("is required".into());
        return Err(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn test_query_request_requires_query() {
        let req: QueryProbeRequest = serde_json::from_value(json!({ "url": "g", "query": "  " })).unwrap();
        let err = req.into_spec(now()).unwrap_err();
        assert_eq!(err.to_string(), "query is required");
    }

    #[test]
    fn test_query_request_defaults() {
        let req: QueryProbeRequest =
            serde_json::from_value(json!({ "query": " SHOW MEASUREMENTS ", "datasource_uid": "" }))
                .unwrap();
        let spec = req.into_spec(now()).unwrap();
        assert_eq!(spec.expression, "SHOW MEASUREMENTS");
        assert!(spec.datasource_uid.is_none());
        assert_eq!(spec.time_range, TimeRange::last_hour(now()));
    }

    #[test]
    fn test_dashboard_request_accepts_legacy_field() {
        let req: DashboardInfoRequest =
            serde_json::from_value(json!({ "dashboard_id": "abc", "api_key": "k" })).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.dashboard_uid, "abc");
        assert_eq!(req.credential.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_export_fails_fast_in_field_order() {
        let req: ExportCsvRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(req.target(now()).unwrap_err().to_string(), "dashboard_uid is required");

        let req: ExportCsvRequest =
            serde_json::from_value(json!({ "dashboard_uid": "d", "from": "now-1h" })).unwrap();
        assert_eq!(req.target(now()).unwrap_err().to_string(), "panel_id is required");

        let req: ExportCsvRequest =
            serde_json::from_value(json!({ "dashboard_uid": "d", "panel_id": "42" })).unwrap();
        assert_eq!(req.target(now()).unwrap_err().to_string(), "from is required");

        let req: ExportCsvRequest = serde_json::from_value(
            json!({ "dashboard_uid": "d", "panel_id": 42, "from": "now-1h", "to": "" }),
        )
        .unwrap();
        assert_eq!(req.target(now()).unwrap_err().to_string(), "to is required");
    }

    #[test]
    fn test_export_target_parses() {
        let req: ExportCsvRequest = serde_json::from_value(json!({
            "dashboard_uid": "d",
            "panel_id": "42",
            "from": 1_699_996_400_000_i64,
            "to": "now"
        }))
        .unwrap();
        let target = req.target(now()).unwrap();
        assert_eq!(target.panel_id, 42);
        assert_eq!(target.time_range.from_ms, 1_699_996_400_000);
        assert_eq!(target.time_range.to_ms, 1_700_000_000_000);

        let req: ExportCsvRequest = serde_json::from_value(
            json!({ "dashboard_uid": "d", "panel_id": "forty-two", "from": "now-1h", "to": "now" }),
        )
        .unwrap();
        assert!(matches!(req.target(now()), Err(AppError::Validation(_))));
    }
}
