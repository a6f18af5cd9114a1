//! In-memory login sessions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "dashboard_session";

/// Sessions older than this are rejected and pruned.
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 12;

/// The logged-in user attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: u64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl SessionUser {
    fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now.signed_duration_since(self.created_at) >= ttl
    }
}

/// Token → user map shared by the login handlers and the session gate.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionUser>>>,
    ttl: TimeDelta,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(TimeDelta::hours(DEFAULT_SESSION_TTL_HOURS))
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: TimeDelta) -> Self {
        Self {
            sessions: Arc::default(),
            ttl,
        }
    }

    /// Starts a session and returns its token. Expired sessions are pruned first.
    pub async fn create(&self, user_id: u64, email: impl Into<String>) -> String {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let user = SessionUser {
            user_id,
            email: email.into(),
            created_at: now,
        };

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, user| !user.is_expired(now, self.ttl));
        let pruned = before - sessions.len();
        if pruned > 0 {
            tracing::debug!(pruned, "expired sessions pruned");
        }
        sessions.insert(token.clone(), user);
        token
    }

    /// Looks up a live session. An expired one is dropped and treated as absent.
    pub async fn get(&self, token: &str) -> Option<SessionUser> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(user) if !user.is_expired(now, self.ttl) => return Some(user.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut sessions = self.sessions.write().await;
        if sessions.get(token).is_some_and(|user| user.is_expired(now, self.ttl)) {
            sessions.remove(token);
            tracing::debug!("expired session rejected");
        }
        None
    }

    /// Ends a session; returns the user it belonged to.
    pub async fn remove(&self, token: &str) -> Option<SessionUser> {
        self.sessions.write().await.remove(token)
    }

    /// Number of sessions that have not expired yet.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|user| !user.is_expired(now, self.ttl))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Extracts the session token from the `Cookie` headers.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value for a fresh session.
pub fn session_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = SessionStore::new();
        let token = store.create(1, "demo@example.com").await;
        assert_eq!(store.get(&token).await.unwrap().email, "demo@example.com");
        assert_eq!(store.len().await, 1);
        assert!(store.remove(&token).await.is_some());
        assert!(store.get(&token).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let store = SessionStore::with_ttl(TimeDelta::zero());
        let token = store.create(1, "demo@example.com").await;
        assert!(store.get(&token).await.is_none());
        assert!(store.sessions.read().await.get(&token).is_none());
        assert!(store.is_empty().await);
    }

    fn stale_user() -> SessionUser {
        SessionUser {
            user_id: 7,
            email: "old@example.com".to_string(),
            created_at: Utc::now() - TimeDelta::hours(DEFAULT_SESSION_TTL_HOURS + 1),
        }
    }

    #[tokio::test]
    async fn test_create_prunes_expired_sessions() {
        let store = SessionStore::new();
        store.sessions.write().await.insert("stale".to_string(), stale_user());
        assert!(store.get("stale").await.is_none());
        assert!(store.is_empty().await);

        store.sessions.write().await.insert("stale".to_string(), stale_user());
        let fresh = store.create(1, "demo@example.com").await;
        let sessions = store.sessions.read().await;
        assert!(!sessions.contains_key("stale"));
        assert!(sessions.contains_key(&fresh));
    }

    #[test]
    fn test_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; dashboard_session=abc-123 ; other=1"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc-123"));

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("dashboard_session="));
        assert!(session_token(&headers).is_none());
        assert!(session_token(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_cookie_attributes() {
        assert!(session_cookie("t", true).ends_with("; Secure"));
        assert!(!session_cookie("t", false).contains("Secure"));
        assert!(clear_session_cookie().contains("Max-Age=0"));
    }
}
