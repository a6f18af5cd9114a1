//! Panel CSV export.
//!
//! dashboard → panel → datasource → one batched `/api/ds/query` → frames →
//! CSV. Every step either yields the input of the next one or aborts with an
//! [`AppError`] that the handler returns as JSON.

use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use common::errors::{AppError, AppResult};
use common::models::dashboard::{DashboardEnvelope, DatasourceRef, Frame, Panel, PanelTarget, QueryResponse};
use common::models::{ExportCsvRequest, ExportTarget};
use common::utils::header_from_select;

use super::grafana::{
    check_query_errors, datasource_uid_by_name, fetch_dashboard, GrafanaService, DEFAULT_INTERVAL_MS,
    DEFAULT_MAX_DATA_POINTS,
};
use super::upstream::{Upstream, UpstreamRequest};

/// A rendered CSV attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvExport {
    pub filename: String,
    pub body: String,
}

impl IntoResponse for CsvExport {
    fn into_response(self) -> Response {
        let disposition = format!("attachment; filename=\"{}\"", self.filename);
        (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            self.body,
        )
            .into_response()
    }
}

impl GrafanaService {
    /// Exports one panel's data for the requested window.
    pub async fn export_panel_csv(&self, request: &ExportCsvRequest, now: DateTime<Utc>) -> AppResult<CsvExport> {
        let upstream = self.upstream(&request.credential)?;
        let target = request.target(now)?;
        let timeout = self.config().timeouts.export;

        let (dashboard, scheme) = fetch_dashboard(&upstream, &target.dashboard_uid, timeout).await?;
        let upstream = upstream.pinned(scheme);
        let envelope: DashboardEnvelope = serde_json::from_value(dashboard).map_err(|e| AppError::ResponseParse {
            service: upstream.service(),
            excerpt: format!("unexpected dashboard document: {e}"),
        })?;

        let panel = envelope.dashboard.find_panel(target.panel_id).ok_or_else(|| {
            AppError::NotFound(format!(
                "Panel {} not found in dashboard {}",
                target.panel_id, target.dashboard_uid
            ))
        })?;

        let datasource_uid = resolve_datasource(&upstream, panel, timeout).await?;
        let batch = QueryBatch::for_panel(panel, &datasource_uid, &target)?;

        let (response, _) = upstream
            .send(&UpstreamRequest::post(&["api", "ds", "query"], &batch.payload, timeout))
            .await?;
        let results: Value = response.json()?;
        check_query_errors(&results)?;
        let results: QueryResponse = serde_json::from_value(results).map_err(|e| AppError::ResponseParse {
            service: upstream.service(),
            excerpt: format!("unexpected query result: {e}"),
        })?;

        let frames = batch
            .ref_ids
            .iter()
            .filter_map(|ref_id| results.results.get(ref_id))
            .flat_map(|result| result.frames.iter());
        let mut table = frames_to_table(frames);
        if table.rows.is_empty() {
            table.header = header_from_select(batch.first_query.as_deref());
        }

        tracing::info!(
            dashboard_uid = %target.dashboard_uid,
            panel_id = target.panel_id,
            datasource_uid = %datasource_uid,
            queries = batch.ref_ids.len(),
            rows = table.rows.len(),
            "panel exported"
        );

        Ok(CsvExport {
            filename: format!("panel-{}-{}.csv", target.panel_id, now.format("%Y%m%d-%H%M%S")),
            body: table.to_csv(),
        })
    }
}

async fn resolve_datasource(upstream: &Upstream, panel: &Panel, timeout: std::time::Duration) -> AppResult<String> {
    let panel_id = panel.id.unwrap_or_default();
    match panel.effective_datasource() {
        Some(DatasourceRef::Structured { uid: Some(uid), .. }) => Ok(uid.clone()),
        Some(DatasourceRef::Named(name)) => datasource_uid_by_name(upstream, name.trim(), timeout).await,
        _ => Err(AppError::NotFound(format!("Datasource for panel {panel_id} not found"))),
    }
}

/// The batched query for one panel.
#[derive(Debug)]
struct QueryBatch {
    payload: Value,
    /// refIds in the order they were sent.
    ref_ids: Vec<String>,
    first_query: Option<String>,
}

impl QueryBatch {
    fn for_panel(panel: &Panel, datasource_uid: &str, target: &ExportTarget) -> AppResult<Self> {
        let targets: Vec<&PanelTarget> = panel.queryable_targets().collect();
        if targets.is_empty() {
            return Err(AppError::Validation(format!(
                "panel {} has no queries to export",
                target.panel_id
            )));
        }

        let mut ref_ids = Vec::with_capacity(targets.len());
        let mut queries = Vec::with_capacity(targets.len());
        for (index, panel_target) in targets.iter().enumerate() {
            let ref_id = panel_target
                .ref_id
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| assigned_ref_id(index));

            let mut query = match serde_json::to_value(panel_target) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            query.insert("refId".into(), json!(ref_id));
            query.insert("datasource".into(), json!({ "uid": datasource_uid }));
            query.entry("intervalMs").or_insert(json!(DEFAULT_INTERVAL_MS));
            query.entry("maxDataPoints").or_insert(json!(DEFAULT_MAX_DATA_POINTS));

            ref_ids.push(ref_id);
            queries.push(Value::Object(query));
        }

        Ok(Self {
            payload: json!({
                "queries": queries,
                "from": target.time_range.from_ms.to_string(),
                "to": target.time_range.to_ms.to_string(),
            }),
            ref_ids,
            first_query: targets[0].query_text().map(str::to_string),
        })
    }
}

/// `A`, `B`, … `Z`, then `A26`, `A27`, ….
fn assigned_ref_id(index: usize) -> String {
    match u8::try_from(index).ok().filter(|i| *i < 26) {
        Some(i) => char::from(b'A' + i).to_string(),
        None => format!("A{index}"),
    }
}

/// Header plus rows, ready to be written as CSV.
#[derive(Debug, Default, PartialEq)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_record(&mut out, &self.header);
        for row in &self.rows {
            push_record(&mut out, row);
        }
        out
    }
}

fn push_record(out: &mut String, fields: &[String]) {
    let line = fields.iter().map(|f| csv_escape(f)).collect::<Vec<_>>().join(",");
    out.push_str(&line);
    out.push('\n');
}

/// Transposes column-oriented frames into rows.
///
/// The header comes from the first frame that has fields; the time column of
/// each frame is rendered as a UTC timestamp.
pub fn frames_to_table<'a>(frames: impl IntoIterator<Item = &'a Frame>) -> CsvTable {
    let mut table = CsvTable::default();
    for frame in frames {
        if table.header.is_empty() {
            table.header = frame.schema.fields.iter().map(|f| f.name.clone()).collect();
        }

        let time_column = frame.time_column();
        let columns = &frame.data.values;
        for row in 0..frame.row_count() {
            let record = columns
                .iter()
                .enumerate()
                .map(|(col, values)| match values.get(row) {
                    Some(value) if Some(col) == time_column => format_time(value),
                    Some(value) => format_value(value),
                    None => String::new(),
                })
                .collect();
            table.rows.push(record);
        }
    }
    table
}

/// Epoch milliseconds as `YYYY-MM-DD HH:MM:SS.mmm` UTC; anything else as-is.
fn format_time(value: &Value) -> String {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format_value(value))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Quotes a field containing a comma, quote, CR or LF.
pub fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
