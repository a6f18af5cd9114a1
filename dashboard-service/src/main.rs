//! Observability settings dashboard.
//!
//! Serves the settings pages and the JSON API behind them:
//! - connection and ad-hoc query tests against Grafana and Application Insights
//! - dashboard and snapshot lookup
//! - CSV export of a single Grafana panel

mod handlers;
mod pages;
mod routes;
mod service;
mod state;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::AppConfig;
use common::middleware::{panic_response, request_id_middleware};
use common::models::{
    ConnectionProbe, CredentialRequest, DashboardInfoRequest, DatasourceSummary, ExportCsvRequest, PanelIdInput,
    QueryProbe, QueryProbeRequest, SnapshotInfoRequest,
};
use common::report::BuildReportSession;
use common::response::{ApiError, ResponseMeta};
use common::telemetry::{init_tracing, ErrorReporter};
use state::AppState;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "dashboard-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Observability Settings API",
        version = "0.1.0",
        description = "Connection tests, ad-hoc queries and CSV export for Grafana and Application Insights"
    ),
    paths(
        handlers::grafana_test_connection,
        handlers::grafana_test_query,
        handlers::appinsights_test_connection,
        handlers::appinsights_test_query,
        handlers::dashboard_info,
        handlers::snapshot_info,
        handlers::export_csv,
        handlers::health_check,
    ),
    components(schemas(
        CredentialRequest,
        QueryProbeRequest,
        DashboardInfoRequest,
        SnapshotInfoRequest,
        ExportCsvRequest,
        PanelIdInput,
        ConnectionProbe,
        DatasourceSummary,
        QueryProbe,
        ApiError,
        ResponseMeta,
        handlers::HealthResponse,
    )),
    tags(
        (name = "grafana", description = "Grafana endpoints"),
        (name = "appinsights", description = "Application Insights endpoints"),
        (name = "health", description = "Health check endpoints")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load_with_service(SERVICE_NAME).context("invalid configuration")?;
    init_tracing(config.log_json);
    if let Some(path) = &config.env_file {
        debug!(path = %path.display(), "loaded .env file");
    }
    config.validate().context("refusing to start")?;

    let (reporter, reporter_guard) = ErrorReporter::init(&config);
    reporter.set_tag("service", SERVICE_NAME);

    let report_session = if config.report_enforcer_enabled {
        match BuildReportSession::start(&config.reports_dir, &config.app_name) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, dir = %config.reports_dir.display(), "build report enforcer disabled");
                None
            }
        }
    } else {
        None
    };

    let addr = config.bind_address();
    let environment = config.environment.as_str();
    let state = AppState::new(config, reporter).context("failed to build HTTP client")?;
    let app = create_router(state);

    info!(
        service = SERVICE_NAME,
        address = %addr,
        environment,
        error_reporting = reporter_guard.is_active(),
        "starting dashboard service"
    );

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(session) = report_session {
        match session.ensure_report() {
            Ok(Some(path)) => info!(path = %path.display(), "fallback build report written"),
            Ok(None) => {}
            Err(e) => reporter.capture_error(&e),
        }
    }

    info!("server shutdown complete");
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router(&state))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining connections");
}
