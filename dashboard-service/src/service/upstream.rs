//! Plumbing shared by the Grafana and Application Insights clients.
//!
//! An [`Upstream`] knows one service's base URL, key and the ordered list of
//! auth header shapes it accepts. [`Upstream::send`] walks that list until a
//! shape is not answered with 401/403; [`UpstreamResponse`] then classifies
//! the answer (HTML login page, undecodable body, HTTP error, JSON).

use std::error::Error as StdError;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use common::errors::{AppError, AppResult, NetworkErrorKind};
use common::models::ConnectionCredential;

/// Longest upstream body fragment echoed back to the caller.
const EXCERPT_LEN: usize = 200;

/// One way of presenting the API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `Authorization: <key>`
    RawKey,
    /// `Authorization: token <key>`
    Token,
    /// `Authorization: Bearer <key>` plus `X-Grafana-Org-Id: 1`
    BearerWithOrg,
    /// `x-api-key: <key>`
    ApiKeyHeader,
}

impl AuthScheme {
    pub fn label(&self) -> &'static str {
        match self {
            AuthScheme::Bearer => "bearer",
            AuthScheme::RawKey => "raw",
            AuthScheme::Token => "token",
            AuthScheme::BearerWithOrg => "bearer+org",
            AuthScheme::ApiKeyHeader => "x-api-key",
        }
    }

    fn apply(&self, request: RequestBuilder, key: &str) -> RequestBuilder {
        match self {
            AuthScheme::Bearer => request.bearer_auth(key),
            AuthScheme::RawKey => request.header(AUTHORIZATION, key),
            AuthScheme::Token => request.header(AUTHORIZATION, format!("token {key}")),
            AuthScheme::BearerWithOrg => request.bearer_auth(key).header("X-Grafana-Org-Id", "1"),
            AuthScheme::ApiKeyHeader => request.header("x-api-key", key),
        }
    }
}

/// Shapes tried against Grafana, in order.
pub const GRAFANA_AUTH: &[AuthScheme] = &[
    AuthScheme::Bearer,
    AuthScheme::RawKey,
    AuthScheme::Token,
    AuthScheme::BearerWithOrg,
];

/// Shapes tried against Application Insights, in order.
pub const APP_INSIGHTS_AUTH: &[AuthScheme] = &[AuthScheme::ApiKeyHeader, AuthScheme::Bearer];

/// Description of one upstream call.
#[derive(Debug)]
pub struct UpstreamRequest<'a> {
    method: Method,
    path: &'a [&'a str],
    query: &'a [(&'a str, &'a str)],
    body: Option<&'a Value>,
    timeout: Duration,
}

impl<'a> UpstreamRequest<'a> {
    pub fn get(path: &'a [&'a str], timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            path,
            query: &[],
            body: None,
            timeout,
        }
    }

    pub fn post(path: &'a [&'a str], body: &'a Value, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            path,
            query: &[],
            body: Some(body),
            timeout,
        }
    }

    pub fn query(mut self, pairs: &'a [(&'a str, &'a str)]) -> Self {
        self.query = pairs;
        self
    }
}

/// Client for one upstream service with resolved credentials.
#[derive(Debug, Clone)]
pub struct Upstream {
    http: reqwest::Client,
    service: &'static str,
    credential: ConnectionCredential,
    schemes: &'static [AuthScheme],
}

impl Upstream {
    pub fn new(
        http: reqwest::Client,
        service: &'static str,
        credential: ConnectionCredential,
        schemes: &'static [AuthScheme],
    ) -> Self {
        Self {
            http,
            service,
            credential,
            schemes,
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Same upstream, restricted to a shape that already worked.
    pub fn pinned(&self, scheme: &'static AuthScheme) -> Self {
        Self {
            schemes: std::slice::from_ref(scheme),
            ..self.clone()
        }
    }

    /// Base URL with `path` appended as percent-encoded segments.
    pub fn url(&self, path: &[&str]) -> AppResult<Url> {
        let invalid = |reason: String| {
            AppError::Validation(format!(
                "invalid {} URL {:?}: {reason}",
                self.service, self.credential.endpoint_url
            ))
        };

        let mut url = Url::parse(&self.credential.endpoint_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("not a base URL".to_string()))?
            .pop_if_empty()
            .extend(path);
        Ok(url)
    }

    /// Sends the request, trying each auth shape until one is accepted.
    ///
    /// Returns the response together with the accepted shape. When every
    /// shape gets 401/403 the result is `AuthenticationFailure` carrying the
    /// last status and the number of shapes tried.
    pub async fn send(
        &self,
        request: &UpstreamRequest<'_>,
    ) -> AppResult<(UpstreamResponse, &'static AuthScheme)> {
        let mut url = self.url(request.path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query);
        }

        let mut last_status = StatusCode::UNAUTHORIZED;
        for scheme in self.schemes {
            let mut builder = self
                .http
                .request(request.method.clone(), url.clone())
                .timeout(request.timeout);
            if let Some(body) = request.body {
                builder = builder.json(body);
            }

            let response = scheme
                .apply(builder, &self.credential.api_key)
                .send()
                .await
                .map_err(|e| network_error(self.service, e))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                tracing::debug!(
                    service = self.service,
                    scheme = scheme.label(),
                    status = status.as_u16(),
                    "auth scheme rejected"
                );
                last_status = status;
                continue;
            }

            tracing::debug!(
                service = self.service,
                method = %request.method,
                path = url.path(),
                scheme = scheme.label(),
                status = status.as_u16(),
                "upstream responded"
            );
            let response = UpstreamResponse::read(self.service, response).await?;
            return Ok((response, scheme));
        }

        tracing::warn!(
            service = self.service,
            status = last_status.as_u16(),
            attempts = self.schemes.len(),
            "every auth scheme was rejected"
        );
        Err(AppError::AuthenticationFailure {
            service: self.service,
            status: last_status.as_u16(),
            attempts: self.schemes.len(),
        })
    }
}

/// A fully read upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    service: &'static str,
    pub status: StatusCode,
    content_type: Option<String>,
    pub body: String,
}

impl UpstreamResponse {
    async fn read(service: &'static str, response: reqwest::Response) -> AppResult<Self> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        let body = response.text().await.map_err(|e| network_error(service, e))?;
        Ok(Self {
            service,
            status,
            content_type,
            body,
        })
    }

    /// HTML by content type, or a body that starts like an HTML document.
    pub fn is_html(&self) -> bool {
        if self.content_type.as_deref().is_some_and(|ct| ct.contains("text/html")) {
            return true;
        }
        let head: String = self.body.trim_start().chars().take(14).collect::<String>().to_ascii_lowercase();
        head.starts_with("<!doctype html") || head.starts_with("<html")
    }

    /// Maps a 404 to `NotFound` naming `what`.
    pub fn not_found(self, what: &str) -> AppResult<Self> {
        if self.status != StatusCode::NOT_FOUND {
            return Ok(self);
        }
        let reason = upstream_message(&self.body).unwrap_or_else(|| "HTTP 404".to_string());
        Err(AppError::NotFound(format!("{what} not found: {reason}")))
    }

    /// Decodes a 2xx JSON body, classifying everything else.
    pub fn json<T: DeserializeOwned>(self) -> AppResult<T> {
        if !self.status.is_success() {
            return Err(self.into_http_error());
        }
        if self.is_html() {
            return Err(AppError::UnexpectedContentType {
                service: self.service,
                snippet: excerpt(&self.body),
            });
        }
        serde_json::from_str(&self.body).map_err(|e| {
            tracing::debug!(service = self.service, error = %e, "upstream body is not the expected JSON");
            AppError::ResponseParse {
                service: self.service,
                excerpt: excerpt(&self.body),
            }
        })
    }

    fn into_http_error(self) -> AppError {
        let code = self.status.as_u16();
        let message = match upstream_message(&self.body) {
            Some(reason) => format!("HTTP {code}: {reason}"),
            None => {
                tracing::debug!(service = self.service, status = code, body = %excerpt(&self.body), "non-JSON error body");
                format!("HTTP {code}")
            }
        };
        AppError::UpstreamHttp {
            service: self.service,
            status: code,
            message,
        }
    }
}

/// Error text from the usual JSON error shapes: `message`, `error` or
/// `error.message`.
pub fn upstream_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let found = [
        value.get("message"),
        value.get("error"),
        value.get("error").and_then(|e| e.get("message")),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .map(str::trim)
    .find(|m| !m.is_empty())
    .map(str::to_string);
    found
}

/// First characters of an upstream body, trimmed.
pub fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    let mut out: String = trimmed.chars().take(EXCERPT_LEN).collect();
    if trimmed.chars().nth(EXCERPT_LEN).is_some() {
        out.push_str("...");
    }
    out
}

fn network_error(service: &'static str, err: reqwest::Error) -> AppError {
    let kind = classify(&err);
    let cause = root_cause(&err);
    let message = match kind {
        NetworkErrorKind::Timeout => format!("Request to {service} timed out"),
        NetworkErrorKind::Connection => format!("Could not connect to {service}: {cause}"),
        NetworkErrorKind::Tls => format!("TLS handshake with {service} failed: {cause}"),
        NetworkErrorKind::Other => format!("Request to {service} failed: {cause}"),
    };
    tracing::warn!(service, kind = kind.as_str(), error = %err, "upstream transport error");
    AppError::Network {
        service,
        kind,
        message,
    }
}

fn classify(err: &reqwest::Error) -> NetworkErrorKind {
    if err.is_timeout() {
        return NetworkErrorKind::Timeout;
    }
    // The top-level message carries the URL, so only the causes are inspected.
    let tls = sources(err).any(|e| {
        let text = e.to_string().to_ascii_lowercase();
        ["certificate", "tls", "ssl", "handshake"].iter().any(|needle| text.contains(needle))
    });
    if tls {
        NetworkErrorKind::Tls
    } else if err.is_connect() {
        NetworkErrorKind::Connection
    } else {
        NetworkErrorKind::Other
    }
}

fn sources<'a>(err: &'a (dyn StdError + 'static)) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(err.source(), |e| (*e).source())
}

fn root_cause(err: &reqwest::Error) -> String {
    sources(err)
        .last()
        .map(|e| e.to_string())
        .unwrap_or_else(|| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn upstream(base: &str, schemes: &'static [AuthScheme]) -> Upstream {
        Upstream::new(
            reqwest::Client::new(),
            "Grafana",
            ConnectionCredential {
                endpoint_url: base.to_string(),
                api_key: "k".to_string(),
            },
            schemes,
        )
    }

    #[test]
    fn test_url_keeps_base_path_and_encodes_segments() {
        let up = upstream("https://grafana.example.com/grafana/", GRAFANA_AUTH);
        let url = up.url(&["api", "dashboards", "uid", "a b/c"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://grafana.example.com/grafana/api/dashboards/uid/a%20b%2Fc"
        );

        let up = upstream("https://grafana.example.com", GRAFANA_AUTH);
        assert_eq!(up.url(&["api", "health"]).unwrap().path(), "/api/health");
    }

    #[test]
    fn test_invalid_base_url_is_validation_error() {
        let up = upstream("https://", GRAFANA_AUTH);
        assert!(matches!(up.url(&["api"]), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let long = "x".repeat(500);
        let short = excerpt(&long);
        assert_eq!(short.len(), EXCERPT_LEN + 3);
        assert!(short.ends_with("..."));
        assert_eq!(excerpt("  tiny  "), "tiny");
    }

    #[derive(Debug)]
    struct Layer(&'static str, Option<Box<Layer>>);

    impl std::fmt::Display for Layer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl StdError for Layer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.1.as_deref().map(|e| e as &(dyn StdError + 'static))
        }
    }

    #[test]
    fn test_sources_walk_the_cause_chain() {
        let err = Layer("request", Some(Box::new(Layer("connect", Some(Box::new(Layer("certificate expired", None)))))));
        let chain: Vec<String> = sources(&err).map(|e| e.to_string()).collect();
        assert_eq!(chain, ["connect", "certificate expired"]);
        assert_eq!(sources(&Layer("alone", None)).count(), 0);
    }

    #[test]
    fn test_upstream_message_shapes() {
        assert_eq!(upstream_message(r#"{"message":"Dashboard not found"}"#).as_deref(), Some("Dashboard not found"));
        assert_eq!(
            upstream_message(r#"{"error":{"code":"PathNotFoundError","message":"bad app"}}"#).as_deref(),
            Some("bad app")
        );
        assert_eq!(upstream_message(r#"{"error":"nope"}"#).as_deref(), Some("nope"));
        assert!(upstream_message("<html></html>").is_none());
    }

    #[tokio::test]
    async fn test_every_shape_is_tried_before_giving_up() {
        let server = MockServer::start_async().await;
        let bearer = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/health").header("authorization", "Bearer k");
                then.status(401);
            })
            .await;
        let raw = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/health").header("authorization", "k");
                then.status(401);
            })
            .await;
        let token = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/health").header("authorization", "token k");
                then.status(403);
            })
            .await;

        let err = upstream(&server.base_url(), GRAFANA_AUTH)
            .send(&UpstreamRequest::get(&["api", "health"], TIMEOUT))
            .await
            .unwrap_err();

        // plain bearer and bearer+org share the first mock
        bearer.assert_hits_async(2).await;
        raw.assert_hits_async(1).await;
        token.assert_hits_async(1).await;
        match err {
            AppError::AuthenticationFailure { status, attempts, .. } => {
                assert_eq!(status, 401);
                assert_eq!(attempts, GRAFANA_AUTH.len());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_accepted_shape_wins() {
        let server = MockServer::start_async().await;
        let bearer = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/health").header("authorization", "Bearer k");
                then.status(401);
            })
            .await;
        let raw = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/health").header("authorization", "k");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"version":"10.2.0"}"#);
            })
            .await;
        let token = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/health").header("authorization", "token k");
                then.status(200);
            })
            .await;

        let (response, scheme) = upstream(&server.base_url(), GRAFANA_AUTH)
            .send(&UpstreamRequest::get(&["api", "health"], TIMEOUT))
            .await
            .unwrap();

        assert_eq!(*scheme, AuthScheme::RawKey);
        let body: Value = response.json().unwrap();
        assert_eq!(body["version"], "10.2.0");
        bearer.assert_hits_async(1).await;
        raw.assert_hits_async(1).await;
        token.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_html_and_garbage_bodies_are_classified() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/login-page");
                then.status(200)
                    .header("content-type", "text/html; charset=utf-8")
                    .body("<!DOCTYPE html><html><body>Sign in</body></html>");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.path("/garbage");
                then.status(200)
                    .header("content-type", "application/json")
                    .body("{not json");
            })
            .await;

        let up = upstream(&server.base_url(), GRAFANA_AUTH);
        let (html, _) = up.send(&UpstreamRequest::get(&["login-page"], TIMEOUT)).await.unwrap();
        let err = html.json::<Value>().unwrap_err();
        assert!(err.to_string().contains("instead of JSON"));

        let (garbage, _) = up.send(&UpstreamRequest::get(&["garbage"], TIMEOUT)).await.unwrap();
        assert!(matches!(
            garbage.json::<Value>(),
            Err(AppError::ResponseParse { ref excerpt, .. }) if excerpt == "{not json"
        ));
    }

    #[tokio::test]
    async fn test_http_errors_carry_upstream_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/api/dashboards/uid/missing");
                then.status(404)
                    .header("content-type", "application/json")
                    .body(r#"{"message":"Dashboard not found"}"#);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.path("/api/broken");
                then.status(500).body("Internal Server Error");
            })
            .await;

        let up = upstream(&server.base_url(), GRAFANA_AUTH);
        let (missing, _) = up
            .send(&UpstreamRequest::get(&["api", "dashboards", "uid", "missing"], TIMEOUT))
            .await
            .unwrap();
        let err = missing.not_found("Dashboard missing").unwrap_err();
        assert_eq!(err.to_string(), "Dashboard missing not found: Dashboard not found");

        let (broken, _) = up.send(&UpstreamRequest::get(&["api", "broken"], TIMEOUT)).await.unwrap();
        let broken = broken.not_found("ignored").unwrap();
        match broken.json::<Value>().unwrap_err() {
            AppError::UpstreamHttp { status, message, .. } => {
                assert_eq!(status, 500);
                assert_eq!(message, "HTTP 500");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_post_sends_json_body_and_query_pairs() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/apps/app-1/query")
                    .query_param("mode", "probe")
                    .header("x-api-key", "k")
                    .json_body(json!({ "query": "requests" }));
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"tables":[]}"#);
            })
            .await;

        let body = json!({ "query": "requests" });
        let up = upstream(&server.base_url(), APP_INSIGHTS_AUTH);
        let (response, scheme) = up
            .send(
                &UpstreamRequest::post(&["v1", "apps", "app-1", "query"], &body, TIMEOUT)
                    .query(&[("mode", "probe")]),
            )
            .await
            .unwrap();
        assert_eq!(*scheme, AuthScheme::ApiKeyHeader);
        assert_eq!(response.status, StatusCode::OK);
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_timeout_is_network_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/api/health");
                then.status(200).delay(Duration::from_millis(500));
            })
            .await;

        let err = upstream(&server.base_url(), GRAFANA_AUTH)
            .send(&UpstreamRequest::get(&["api", "health"], Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Network {
                kind: NetworkErrorKind::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let err = upstream("http://127.0.0.1:1", GRAFANA_AUTH)
            .send(&UpstreamRequest::get(&["api", "health"], TIMEOUT))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Network {
                kind: NetworkErrorKind::Connection,
                ..
            }
        ));
    }

    #[test]
    fn test_pinned_upstream_uses_one_shape() {
        let up = upstream("https://g", GRAFANA_AUTH);
        let pinned = up.pinned(&GRAFANA_AUTH[2]);
        assert_eq!(pinned.schemes, &[AuthScheme::Token]);
    }
}
