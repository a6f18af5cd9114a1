//! Session gate middleware.
//!
//! Protected routes need a valid session cookie. Browsers are sent to the
//! login page; API clients get a 401 JSON envelope they can show.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::errors::AppError;
use crate::session::{session_token, SessionStore};

/// Path of the login page.
pub const LOGIN_PATH: &str = "/login";

/// Session gate handler.
///
/// On success the [`SessionUser`](crate::session::SessionUser) is inserted
/// into the request extensions for handlers to pick up.
pub async fn require_session(
    State(store): State<SessionStore>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let user = match session_token(req.headers()) {
        Some(token) => store.get(&token).await,
        None => None,
    };

    match user {
        Some(user) => {
            tracing::debug!(user_id = user.user_id, "session accepted");
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        None if wants_html(&req) => Redirect::to(LOGIN_PATH).into_response(),
        None => AppError::Unauthorized.into_response(),
    }
}

fn wants_html(req: &Request<Body>) -> bool {
    req.headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/html"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    use crate::session::SessionUser;

    fn app(store: SessionStore) -> Router {
        Router::new()
            .route("/dashboard", get(|Extension(user): Extension<SessionUser>| async move { user.email }))
            .route_layer(middleware::from_fn_with_state(store, require_session))
    }

    #[tokio::test]
    async fn test_browser_is_redirected_to_login() {
        let response = app(SessionStore::new())
            .oneshot(
                Request::builder()
                    .uri("/dashboard")
                    .header(header::ACCEPT, "text/html,application/xhtml+xml")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], LOGIN_PATH);
    }

    #[tokio::test]
    async fn test_api_client_gets_401() {
        let response = app(SessionStore::new())
            .oneshot(
                Request::builder()
                    .uri("/dashboard")
                    .header(header::COOKIE, "dashboard_session=stale")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_session_passes_user_through() {
        let store = SessionStore::new();
        let token = store.create(1, "demo@example.com").await;
        let response = app(store)
            .oneshot(
                Request::builder()
                    .uri("/dashboard")
                    .header(header::COOKIE, format!("dashboard_session={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
