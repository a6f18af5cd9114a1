//! Route table.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use common::middleware::require_session;

use crate::handlers;
use crate::pages;
use crate::state::AppState;

/// Creates the application routes.
///
/// Everything under `/dashboard` and `/settings` sits behind the session gate.
pub fn router(state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/dashboard", get(pages::dashboard))
        .route("/settings/general", get(pages::settings_general))
        .route("/settings/preferences", get(pages::settings_preferences))
        .route("/settings/api/grafana/test-connection", post(handlers::grafana_test_connection))
        .route("/settings/api/grafana/test-query", post(handlers::grafana_test_query))
        .route(
            "/settings/api/appinsights/test-connection",
            post(handlers::appinsights_test_connection),
        )
        .route("/settings/api/appinsights/test-query", post(handlers::appinsights_test_query))
        .route("/settings/grafana/dashboard-info", post(handlers::dashboard_info))
        .route("/settings/grafana/snapshot-info", post(handlers::snapshot_info))
        .route("/settings/grafana/export-csv", post(handlers::export_csv))
        .route_layer(middleware::from_fn_with_state(state.sessions.clone(), require_session));

    Router::new()
        .route("/", get(pages::home))
        .route("/login", get(pages::login_page).post(pages::login))
        .route("/logout", get(pages::logout))
        .route("/api/health", get(handlers::health_check))
        .merge(protected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use common::config::AppConfig;
    use common::telemetry::ErrorReporter;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state() -> AppState {
        let config = AppConfig::from_lookup("dashboard-service", |key| match key {
            "APP_ENV" => Some("testing".to_string()),
            _ => None,
        })
        .unwrap();
        AppState::new(config, ErrorReporter::disabled()).unwrap()
    }

    fn app(state: &AppState) -> Router {
        router(state).with_state(state.clone())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn login_request(email: &str, password: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("email={email}&password={password}")))
            .unwrap()
    }

    /// Logs in with the demo account and returns the `name=value` cookie pair.
    async fn login(state: &AppState) -> String {
        let response = app(state)
            .oneshot(login_request("demo%40example.com", "demo123"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/dashboard");
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let state = state();
        let response = app(&state)
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "dashboard-service");
        assert_eq!(body["environment"], "testing");
        assert_eq!(body["active_sessions"], 0);
    }

    #[tokio::test]
    async fn test_api_without_session_is_unauthorized() {
        let state = state();
        let response = app(&state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/settings/api/grafana/test-connection")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_settings_page_redirects_browser_to_login() {
        let state = state();
        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/settings/general")
                    .header(header::ACCEPT, "text/html,application/xhtml+xml")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn test_logged_in_probe_reports_missing_configuration() {
        let state = state();
        let cookie = login(&state).await;

        let response = app(&state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/settings/api/grafana/test-connection")
                    .header(header::COOKIE, &cookie)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"url": "  ", "api_key": ""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "MISSING_CONFIGURATION");
    }

    #[tokio::test]
    async fn test_wrong_password_rerenders_login() {
        let state = state();
        let response = app(&state)
            .oneshot(login_request("demo%40example.com", "wrong"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert!(body_text(response).await.contains("Invalid email or password"));
        assert!(state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_dashboard_shows_session_user() {
        let state = state();
        let cookie = login(&state).await;

        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/dashboard")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("demo@example.com"));
    }

    #[tokio::test]
    async fn test_logout_ends_session() {
        let state = state();
        let cookie = login(&state).await;
        assert_eq!(state.sessions.len().await, 1);

        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/logout")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
        assert!(response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .contains("Max-Age=0"));
        assert!(state.sessions.is_empty().await);

        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/dashboard")
                    .header(header::COOKIE, &cookie)
                    .header(header::ACCEPT, "text/html")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
}
