//! Server-rendered pages and the login flow.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Extension, Form,
};
use serde::Deserialize;

use common::middleware::LOGIN_PATH;
use common::session::{clear_session_cookie, session_cookie, session_token, SessionUser};

use crate::state::AppState;

/// Where a successful login lands.
pub const DASHBOARD_PATH: &str = "/dashboard";

/// Id given to the single configured login user.
const LOGIN_USER_ID: u64 = 1;

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn home(State(state): State<AppState>) -> Html<String> {
    let body = format!(
        "<h1>{}</h1>\n<p>Connect Grafana and Application Insights, test queries and export panel data.</p>\n<p><a href=\"{LOGIN_PATH}\">Sign in</a></p>",
        html_escape(&state.config.app_name)
    );
    Html(layout(&state.config.app_name, &body))
}

pub async fn login_page(State(state): State<AppState>) -> Html<String> {
    Html(login_html(&state.config.app_name, None))
}

pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let accepted = state
        .config
        .login
        .as_ref()
        .is_some_and(|login| login.matches(&form.email, &form.password));

    if !accepted {
        tracing::warn!(email = %form.email, "login rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Html(login_html(&state.config.app_name, Some("Invalid email or password"))),
        )
            .into_response();
    }

    let email = form.email.trim().to_string();
    let token = state.sessions.create(LOGIN_USER_ID, email.clone()).await;
    state.reporter.set_user(LOGIN_USER_ID, &email);
    tracing::info!(user_id = LOGIN_USER_ID, "login accepted");

    (
        [(header::SET_COOKIE, session_cookie(&token, state.config.is_production()))],
        Redirect::to(DASHBOARD_PATH),
    )
        .into_response()
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        if let Some(user) = state.sessions.remove(&token).await {
            tracing::info!(user_id = user.user_id, "logged out");
        }
    }
    ([(header::SET_COOKIE, clear_session_cookie())], Redirect::to(LOGIN_PATH)).into_response()
}

pub async fn dashboard(State(state): State<AppState>, Extension(user): Extension<SessionUser>) -> Html<String> {
    let body = format!(
        "<h1>Dashboard</h1>\n<p>Signed in as <strong>{}</strong> since {}.</p>\n{}",
        html_escape(&user.email),
        user.created_at.format("%Y-%m-%d %H:%M UTC"),
        nav()
    );
    Html(layout(&state.config.app_name, &body))
}

pub async fn settings_general(State(state): State<AppState>) -> Html<String> {
    let config = &state.config;
    let grafana_url = config.grafana.url.as_deref().unwrap_or_default();
    let appinsights_url = config.appinsights.url.as_deref().unwrap_or_default();
    let app_id = config.appinsights.app_id.as_deref().unwrap_or_default();

    let body = format!(
        r#"<h1>General settings</h1>
{nav}
<section id="grafana">
  <h2>Grafana</h2>
  <label>URL <input name="url" value="{grafana_url}"></label>
  <label>API key <input name="api_key" type="password" placeholder="{grafana_key}"></label>
  <button data-endpoint="/settings/api/grafana/test-connection">Test connection</button>
</section>
<section id="appinsights">
  <h2>Application Insights</h2>
  <label>URL <input name="url" value="{appinsights_url}"></label>
  <label>Application id <input name="app_id" value="{app_id}"></label>
  <label>API key <input name="api_key" type="password" placeholder="{appinsights_key}"></label>
  <button data-endpoint="/settings/api/appinsights/test-connection">Test connection</button>
</section>
<pre id="result"></pre>
<script>
document.querySelectorAll("button[data-endpoint]").forEach(function (button) {{
  button.addEventListener("click", async function () {{
    var payload = {{}};
    button.parentElement.querySelectorAll("input").forEach(function (input) {{
      if (input.value) payload[input.name] = input.value;
    }});
    var response = await fetch(button.dataset.endpoint, {{
      method: "POST",
      headers: {{ "content-type": "application/json" }},
      body: JSON.stringify(payload)
    }});
    var envelope = await response.json();
    document.getElementById("result").textContent = envelope.success
      ? JSON.stringify(envelope.data, null, 2)
      : envelope.error.message;
  }});
}});
</script>"#,
        nav = nav(),
        grafana_url = html_escape(grafana_url),
        grafana_key = key_placeholder(config.grafana.api_key.is_some()),
        appinsights_url = html_escape(appinsights_url),
        app_id = html_escape(app_id),
        appinsights_key = key_placeholder(config.appinsights.api_key.is_some()),
    );
    Html(layout(&config.app_name, &body))
}

pub async fn settings_preferences(State(state): State<AppState>) -> Html<String> {
    let config = &state.config;
    let body = format!(
        "<h1>Preferences</h1>\n{}\n<dl>\n  <dt>Environment</dt><dd>{}</dd>\n  <dt>Version</dt><dd>{}</dd>\n  <dt>Default URL scheme</dt><dd>{}</dd>\n</dl>",
        nav(),
        config.environment.as_str(),
        html_escape(&config.app_version),
        config.default_scheme,
    );
    Html(layout(&config.app_name, &body))
}

fn key_placeholder(configured: bool) -> &'static str {
    if configured {
        "configured"
    } else {
        "not set"
    }
}

fn nav() -> String {
    format!(
        "<nav><a href=\"{DASHBOARD_PATH}\">Dashboard</a> | <a href=\"/settings/general\">General</a> | <a href=\"/settings/preferences\">Preferences</a> | <a href=\"/logout\">Sign out</a></nav>"
    )
}

fn login_html(app_name: &str, error: Option<&str>) -> String {
    let error = error
        .map(|message| format!("<p class=\"error\">{}</p>\n", html_escape(message)))
        .unwrap_or_default();
    let body = format!(
        "<h1>Sign in</h1>\n{error}<form method=\"post\" action=\"{LOGIN_PATH}\">\n  <label>Email <input name=\"email\" type=\"email\"></label>\n  <label>Password <input name=\"password\" type=\"password\"></label>\n  <button type=\"submit\">Sign in</button>\n</form>"
    );
    layout(app_name, &body)
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        html_escape(title)
    )
}

fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }

    #[test]
    fn test_login_error_is_rendered() {
        let page = login_html("Ops <Board>", Some("Invalid email or password"));
        assert!(page.contains("<title>Ops &lt;Board&gt;</title>"));
        assert!(page.contains("<p class=\"error\">Invalid email or password</p>"));
        assert!(!login_html("Ops", None).contains("class=\"error\""));
    }
}
