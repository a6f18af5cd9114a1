//! Application configuration.
//!
//! Everything is read from environment variables once at start-up (after a
//! best-effort `.env` load). [`AppConfig::from_lookup`] takes the lookup as a
//! closure so tests never touch the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::utils::url::Scheme;

/// Default value of `SECRET_KEY`; refused in production.
pub const DEFAULT_SECRET_KEY: &str = "set-this-in-production";

/// Demo login accepted outside production when none is configured.
pub const DEMO_LOGIN_EMAIL: &str = "demo@example.com";
pub const DEMO_LOGIN_PASSWORD: &str = "demo123";

/// Public Application Insights query API.
pub const DEFAULT_APP_INSIGHTS_URL: &str = "https://api.applicationinsights.io";

/// Deployment environment, from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::Invalid {
                key: "APP_ENV",
                value: other.to_string(),
            }),
        }
    }
}

/// Configuration problems detected at start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be set in production")]
    MissingInProduction(&'static str),
}

/// Fallback connection settings for one upstream service.
#[derive(Debug, Clone, Default)]
pub struct IntegrationDefaults {
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Application Insights application id; unused for Grafana.
    pub app_id: Option<String>,
}

/// Credentials accepted by the login form.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn matches(&self, email: &str, password: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim()) && self.password == password
    }
}

/// Per-endpoint upstream timeouts.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamTimeouts {
    pub connection_probe: Duration,
    pub query: Duration,
    pub dashboard: Duration,
    pub export: Duration,
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            connection_probe: Duration::from_secs(10),
            query: Duration::from_secs(30),
            dashboard: Duration::from_secs(10),
            export: Duration::from_secs(30),
        }
    }
}

/// Application configuration shared by handlers.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub app_name: String,
    pub app_version: String,
    pub secret_key: String,
    pub sentry_dsn: Option<String>,
    pub log_json: bool,
    pub reports_dir: PathBuf,
    pub report_enforcer_enabled: bool,
    pub default_scheme: Scheme,
    /// `None` in production when `LOGIN_PASSWORD` is unset; login is then refused.
    pub login: Option<LoginCredentials>,
    pub grafana: IntegrationDefaults,
    pub appinsights: IntegrationDefaults,
    pub timeouts: UpstreamTimeouts,
    /// `.env` file read by [`AppConfig::load_with_service`], logged once tracing is up.
    pub env_file: Option<PathBuf>,
}

impl AppConfig {
    /// Loads `.env` (if present) and then the process environment.
    ///
    /// Runs before the subscriber exists, so nothing is logged here; the path
    /// read is kept in `env_file`.
    pub fn load_with_service(service_name: &str) -> Result<Self, ConfigError> {
        let env_file = dotenvy::dotenv().ok();
        let mut config = Self::from_lookup(service_name, |key| std::env::var(key).ok())?;
        config.env_file = env_file;
        Ok(config)
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(service_name: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = match get("APP_ENV") {
            Some(v) => v.parse()?,
            None => Environment::Development,
        };

        let port = match get("SERVER_PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key: "SERVER_PORT",
                value: v,
            })?,
            None => 8080,
        };

        let default_scheme = match get("DEFAULT_URL_SCHEME") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key: "DEFAULT_URL_SCHEME",
                value: v,
            })?,
            None => Scheme::Https,
        };

        let report_enforcer_enabled = match get("REPORT_ENFORCER_ENABLED") {
            Some(v) => parse_bool(&v).ok_or(ConfigError::Invalid {
                key: "REPORT_ENFORCER_ENABLED",
                value: v,
            })?,
            None => true,
        };

        let login = match (get("LOGIN_EMAIL"), get("LOGIN_PASSWORD")) {
            (email, Some(password)) => Some(LoginCredentials {
                email: email.unwrap_or_else(|| DEMO_LOGIN_EMAIL.to_string()),
                password,
            }),
            (_, None) if environment == Environment::Production => None,
            (email, None) => Some(LoginCredentials {
                email: email.unwrap_or_else(|| DEMO_LOGIN_EMAIL.to_string()),
                password: DEMO_LOGIN_PASSWORD.to_string(),
            }),
        };

        Ok(Self {
            service_name: service_name.to_string(),
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            environment,
            app_name: get("APP_NAME").unwrap_or_else(|| "Observability Dashboard".to_string()),
            app_version: get("APP_VERSION").unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            secret_key: get("SECRET_KEY").unwrap_or_else(|| DEFAULT_SECRET_KEY.to_string()),
            sentry_dsn: get("SENTRY_DSN"),
            log_json: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
            reports_dir: get("BUILD_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("build_reports")),
            report_enforcer_enabled,
            default_scheme,
            login,
            grafana: IntegrationDefaults {
                url: get("GRAFANA_URL"),
                api_key: get("GRAFANA_API_TOKEN").or_else(|| get("GRAFANA_API_KEY")),
                app_id: None,
            },
            appinsights: IntegrationDefaults {
                url: Some(get("APP_INSIGHTS_URL").unwrap_or_else(|| DEFAULT_APP_INSIGHTS_URL.to_string())),
                api_key: get("APP_INSIGHTS_API_KEY"),
                app_id: get("APP_INSIGHTS_APPLICATION_ID"),
            },
            timeouts: UpstreamTimeouts::default(),
            env_file: None,
        })
    }

    /// Refuses insecure defaults in production.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment != Environment::Production {
            return Ok(());
        }
        if self.secret_key == DEFAULT_SECRET_KEY {
            return Err(ConfigError::MissingInProduction("SECRET_KEY"));
        }
        if self.sentry_dsn.is_none() {
            return Err(ConfigError::MissingInProduction("SENTRY_DSN"));
        }
        if self.login.is_none() {
            return Err(ConfigError::MissingInProduction("LOGIN_PASSWORD"));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Socket address string the server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup("dashboard-service", |key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.default_scheme, Scheme::Https);
        assert!(config.report_enforcer_enabled);
        assert_eq!(config.login.as_ref().unwrap().email, DEMO_LOGIN_EMAIL);
        assert_eq!(config.appinsights.url.as_deref(), Some(DEFAULT_APP_INSIGHTS_URL));
        assert!(config.grafana.url.is_none());
        assert!(config.env_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = config_from(&[("GRAFANA_URL", "   "), ("GRAFANA_API_KEY", "key-2")]).unwrap();
        assert!(config.grafana.url.is_none());
        assert_eq!(config.grafana.api_key.as_deref(), Some("key-2"));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        assert!(matches!(
            config_from(&[("SERVER_PORT", "http")]),
            Err(ConfigError::Invalid { key: "SERVER_PORT", .. })
        ));
    }

    #[test]
    fn test_production_requires_secrets() {
        let config = config_from(&[("APP_ENV", "production")]).unwrap();
        assert!(config.login.is_none());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingInProduction("SECRET_KEY"))
        ));

        let config = config_from(&[
            ("APP_ENV", "production"),
            ("SECRET_KEY", "s3cret"),
            ("SENTRY_DSN", "https://key@sentry.example.com/1"),
            ("LOGIN_EMAIL", "ops@example.com"),
            ("LOGIN_PASSWORD", "hunter2"),
        ])
        .unwrap();
        assert!(config.validate().is_ok());
        assert!(config.login.unwrap().matches("OPS@example.com", "hunter2"));
    }
}
