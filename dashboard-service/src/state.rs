//! Application state for the dashboard service.

use std::sync::Arc;
use std::time::Duration;

use common::config::AppConfig;
use common::session::SessionStore;
use common::telemetry::ErrorReporter;

use crate::service::{AppInsightsService, GrafanaService};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub http_client: reqwest::Client,
    pub sessions: SessionStore,
    pub reporter: ErrorReporter,
}

impl AppState {
    /// Creates a new application state with one shared HTTP client.
    pub fn new(config: AppConfig, reporter: ErrorReporter) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            http_client,
            sessions: SessionStore::new(),
            reporter,
        })
    }

    pub fn grafana(&self) -> GrafanaService {
        GrafanaService::new(self.http_client.clone(), self.config.clone())
    }

    pub fn appinsights(&self) -> AppInsightsService {
        AppInsightsService::new(self.http_client.clone(), self.config.clone())
    }
}
