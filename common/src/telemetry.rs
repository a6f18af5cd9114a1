//! Logging bootstrap and the error-reporting shim.

use std::borrow::Cow;
use std::error::Error;

use sentry::types::Dsn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` (default `info`); `json` switches the
/// formatter to one JSON object per line.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let (text_layer, json_layer) = if json {
        (None, Some(fmt::layer().json().with_current_span(true)))
    } else {
        (Some(fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .init();
}

/// Keeps the Sentry client alive; events are flushed when it drops.
pub struct ReporterGuard(Option<sentry::ClientInitGuard>);

impl ReporterGuard {
    pub fn is_active(&self) -> bool {
        self.0.as_ref().is_some_and(|guard| guard.is_enabled())
    }
}

/// Thin wrapper over Sentry that does nothing without a DSN.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReporter {
    enabled: bool,
}

impl ErrorReporter {
    /// A reporter that only logs.
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Starts Sentry when `SENTRY_DSN` is configured.
    pub fn init(config: &AppConfig) -> (Self, ReporterGuard) {
        let Some(raw) = config.sentry_dsn.as_deref() else {
            tracing::warn!("SENTRY_DSN not set, error reporting disabled");
            return (Self::disabled(), ReporterGuard(None));
        };

        let dsn: Dsn = match raw.parse() {
            Ok(dsn) => dsn,
            Err(e) => {
                tracing::warn!(error = %e, "invalid SENTRY_DSN, error reporting disabled");
                return (Self::disabled(), ReporterGuard(None));
            }
        };

        let guard = sentry::init(sentry::ClientOptions {
            dsn: Some(dsn),
            environment: Some(Cow::Owned(config.environment.as_str().to_string())),
            release: Some(Cow::Owned(format!("{}@{}", config.service_name, config.app_version))),
            traces_sample_rate: 1.0,
            send_default_pii: true,
            ..Default::default()
        });
        tracing::info!(environment = config.environment.as_str(), "error reporting initialized");

        (Self { enabled: true }, ReporterGuard(Some(guard)))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Attaches the logged-in user to subsequent events.
    pub fn set_user(&self, user_id: u64, email: &str) {
        if !self.enabled {
            return;
        }
        sentry::configure_scope(|scope| {
            scope.set_user(Some(sentry::User {
                id: Some(user_id.to_string()),
                email: Some(email.to_string()),
                ..Default::default()
            }));
        });
    }

    pub fn set_tag(&self, key: &str, value: &str) {
        if !self.enabled {
            return;
        }
        sentry::configure_scope(|scope| scope.set_tag(key, value));
    }

    pub fn capture_message(&self, message: &str, level: sentry::Level) {
        if !self.enabled {
            return;
        }
        sentry::capture_message(message, level);
    }

    /// Sends the error to Sentry, or logs it when reporting is off.
    pub fn capture_error<E: Error + ?Sized>(&self, error: &E) {
        if !self.enabled {
            tracing::error!(error = %error, "unreported error");
            return;
        }
        sentry::capture_error(error);
    }
}
