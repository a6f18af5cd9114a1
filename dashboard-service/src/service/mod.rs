//! Upstream observability clients.

pub mod appinsights;
pub mod export;
pub mod grafana;
pub mod upstream;

use async_trait::async_trait;

use common::errors::AppResult;
use common::models::{ConnectionProbe, CredentialRequest, Integration, QueryProbe, QueryProbeRequest};

pub use appinsights::AppInsightsService;
pub use grafana::GrafanaService;

/// Connection and query tests offered by every integration.
#[async_trait]
pub trait ObservabilityProbe: Send + Sync {
    fn integration(&self) -> Integration;

    /// Checks that the service is reachable and accepts the key.
    async fn test_connection(&self, request: &CredentialRequest) -> AppResult<ConnectionProbe>;

    /// Runs one ad-hoc query and returns the raw result.
    async fn test_query(&self, request: QueryProbeRequest) -> AppResult<QueryProbe>;
}
