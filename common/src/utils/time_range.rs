//! Query time windows.
//!
//! Callers may send bounds as epoch milliseconds (number or numeric string),
//! RFC 3339 timestamps, or the relative `now` / `now-<n><unit>` forms the
//! dashboard UI uses. Everything is resolved to epoch milliseconds up front.

use chrono::{DateTime, Duration, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};

/// A time bound as it arrives in a request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum TimeInput {
    /// Epoch milliseconds.
    Millis(i64),
    /// Numeric string, RFC 3339 timestamp or relative expression.
    Text(String),
}

impl TimeInput {
    /// True for empty or whitespace-only text.
    pub fn is_blank(&self) -> bool {
        matches!(self, TimeInput::Text(s) if s.trim().is_empty())
    }

    /// Resolves the bound against `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<i64> {
        match self {
            TimeInput::Millis(ms) => Some(*ms),
            TimeInput::Text(text) => parse_text(text.trim(), now),
        }
    }
}

/// Resolved query window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from_ms: i64,
    pub to_ms: i64,
}

impl TimeRange {
    /// The hour leading up to `now`.
    pub fn last_hour(now: DateTime<Utc>) -> Self {
        let to_ms = now.timestamp_millis();
        Self {
            from_ms: to_ms - Duration::hours(1).num_milliseconds(),
            to_ms,
        }
    }

    /// Builds a window from optional request bounds; both absent means the last hour.
    pub fn from_inputs(
        from: Option<&TimeInput>,
        to: Option<&TimeInput>,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let from = from.filter(|b| !b.is_blank());
        let to = to.filter(|b| !b.is_blank());
        if from.is_none() && to.is_none() {
            return Ok(Self::last_hour(now));
        }

        let to_ms = match to {
            Some(bound) => resolve_field("to", bound, now)?,
            None => now.timestamp_millis(),
        };
        let from_ms = match from {
            Some(bound) => resolve_field("from", bound, now)?,
            None => to_ms
                .checked_sub(Duration::hours(1).num_milliseconds())
                .ok_or_else(|| AppError::Validation("to is out of range".to_string()))?,
        };
        Self::new(from_ms, to_ms)
    }

    /// Builds a window from two required bounds.
    pub fn required(from: &TimeInput, to: &TimeInput, now: DateTime<Utc>) -> AppResult<Self> {
        Self::new(resolve_field("from", from, now)?, resolve_field("to", to, now)?)
    }

    fn new(from_ms: i64, to_ms: i64) -> AppResult<Self> {
        for (field, ms) in [("from", from_ms), ("to", to_ms)] {
            if DateTime::<Utc>::from_timestamp_millis(ms).is_none() {
                return Err(AppError::Validation(format!("{field} is out of range: {ms}")));
            }
        }
        if from_ms > to_ms {
            return Err(AppError::Validation(
                "from must not be later than to".to_string(),
            ));
        }
        Ok(Self { from_ms, to_ms })
    }

    /// ISO 8601 interval (`start/end`) as used by Application Insights `timespan`.
    pub fn iso_interval(&self) -> String {
        format!("{}/{}", rfc3339(self.from_ms), rfc3339(self.to_ms))
    }
}

fn resolve_field(field: &str, bound: &TimeInput, now: DateTime<Utc>) -> AppResult<i64> {
    bound.resolve(now).ok_or_else(|| {
        AppError::Validation(format!("{field} is not a recognized time: {bound:?}"))
    })
}

fn rfc3339(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

fn parse_text(text: &str, now: DateTime<Utc>) -> Option<i64> {
    if let Ok(ms) = text.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    parse_relative(text, now)
}

fn parse_relative(text: &str, now: DateTime<Utc>) -> Option<i64> {
    let rest = text.strip_prefix("now")?;
    if rest.is_empty() {
        return Some(now.timestamp_millis());
    }
    let offset = rest.strip_prefix('-')?;
    let unit = offset.chars().last()?;
    let amount: i64 = offset[..offset.len() - unit.len_utf8()].parse().ok()?;
    let delta = match unit {
        's' => TimeDelta::try_seconds(amount),
        'm' => TimeDelta::try_minutes(amount),
        'h' => TimeDelta::try_hours(amount),
        'd' => TimeDelta::try_days(amount),
        'w' => TimeDelta::try_weeks(amount),
        _ => None,
    }?;
    now.checked_sub_signed(delta).map(|dt| dt.timestamp_millis())
}
