//! Request, response and upstream document models.

pub mod credential;
pub mod dashboard;
pub mod probe;
pub mod query;

// Re-export commonly used types
pub use credential::{ConnectionCredential, CredentialRequest, Integration};
pub use dashboard::{DashboardDocument, DashboardEnvelope, DatasourceRef, Frame, Panel, PanelTarget, QueryResponse};
pub use probe::{ConnectionProbe, DatasourceSummary, QueryProbe};
pub use query::{
    DashboardInfoRequest, ExportCsvRequest, ExportTarget, PanelIdInput, QueryProbeRequest, QuerySpec,
    SnapshotInfoRequest,
};
