//! Read-only views of Grafana dashboard and query documents.
//!
//! Only the fields the export pipeline needs are typed; everything else in a
//! panel target is carried through untouched so backend specific options
//! reach the datasource query unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// `GET /api/dashboards/uid/{uid}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardEnvelope {
    pub dashboard: DashboardDocument,
    #[serde(default)]
    pub meta: Value,
}

/// The dashboard model itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardDocument {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub panels: Vec<Panel>,
}

impl DashboardDocument {
    /// Finds a panel by id at the top level, then one level down inside
    /// panel groups. Deeper nesting is not searched.
    pub fn find_panel(&self, id: i64) -> Option<&Panel> {
        self.panels
            .iter()
            .find(|p| p.id == Some(id))
            .or_else(|| {
                self.panels
                    .iter()
                    .flat_map(|group| group.panels.iter())
                    .find(|p| p.id == Some(id))
            })
    }
}

/// A visualization unit inside a dashboard.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Panel {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub datasource: Option<DatasourceRef>,
    #[serde(default)]
    pub targets: Vec<PanelTarget>,
    /// Children of a row/group panel.
    #[serde(default)]
    pub panels: Vec<Panel>,
}

impl Panel {
    /// The datasource reference of the panel, else the first target's.
    pub fn effective_datasource(&self) -> Option<&DatasourceRef> {
        self.datasource
            .as_ref()
            .filter(|ds| ds.is_usable())
            .or_else(|| {
                self.targets
                    .iter()
                    .filter_map(|t| t.datasource.as_ref())
                    .find(|ds| ds.is_usable())
            })
    }

    /// Targets that carry a non-empty query text.
    pub fn queryable_targets(&self) -> impl Iterator<Item = &PanelTarget> {
        self.targets.iter().filter(|t| t.query_text().is_some())
    }
}

/// How a panel points at its datasource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasourceRef {
    /// `{"type": "...", "uid": "..."}`.
    Structured {
        #[serde(default)]
        uid: Option<String>,
        #[serde(rename = "type", default)]
        kind: Option<String>,
    },
    /// Legacy datasource name.
    Named(String),
}

impl DatasourceRef {
    fn is_usable(&self) -> bool {
        match self {
            DatasourceRef::Structured { uid, .. } => uid.as_deref().is_some_and(|u| !u.is_empty()),
            DatasourceRef::Named(name) => !name.trim().is_empty(),
        }
    }
}

/// One query of a panel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanelTarget {
    #[serde(rename = "refId", default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<DatasourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(rename = "rawSql", default, skip_serializing_if = "Option::is_none")]
    pub raw_sql: Option<String>,
    /// Backend specific options, passed through.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PanelTarget {
    /// First non-empty of `expr`, `query`, `rawSql`.
    pub fn query_text(&self) -> Option<&str> {
        [&self.expr, &self.query, &self.raw_sql]
            .into_iter()
            .filter_map(|q| q.as_deref())
            .map(str::trim)
            .find(|q| !q.is_empty())
    }
}

/// `POST /api/ds/query` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: BTreeMap<String, RefResult>,
}

impl QueryResponse {
    /// First error embedded in any per-query result, as `refId: message`.
    ///
    /// Reads the raw document so an error is found even when the frames next
    /// to it do not fit [`RefResult`].
    pub fn embedded_error(results: &Value) -> Option<String> {
        results
            .get("results")?
            .as_object()?
            .iter()
            .find_map(|(ref_id, result)| {
                let message = match result.get("error")? {
                    Value::String(s) => s.trim().to_string(),
                    Value::Null => return None,
                    Value::Object(obj) => obj
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
                    other => other.to_string(),
                };
                (!message.is_empty()).then(|| format!("{ref_id}: {message}"))
            })
    }
}

/// Result of one query in a batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

/// A column-oriented block of results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub schema: FrameSchema,
    #[serde(default)]
    pub data: FrameData,
}

impl Frame {
    /// Number of samples, i.e. the longest column.
    pub fn row_count(&self) -> usize {
        self.data.values.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Index of the time axis: a `time` typed field, else a field named `time`.
    pub fn time_column(&self) -> Option<usize> {
        let fields = &self.schema.fields;
        fields
            .iter()
            .position(|f| f.kind.as_deref() == Some("time"))
            .or_else(|| fields.iter().position(|f| f.name.eq_ignore_ascii_case("time")))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameSchema {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldSchema {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub values: Vec<Vec<Value>>,
}

/// Grafana sends `null` for empty lists and unnamed fields.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
