//! Helpers shared by the streaming (container log) fetchers.

use super::FetchError;
use crate::models::{QueryValidation, Row};
use chrono::{DateTime, SecondsFormat, Utc};
use filter::{Evaluator, Filter};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid ANSI escape pattern")
});

/// Failure of a single streaming call, classified so callers can decide
/// whether to skip the target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Access was refused (HTTP 403).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The resource does not exist (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl StreamError {
    /// Classifies a failure by HTTP status code.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            403 => Self::PermissionDenied(message.into()),
            404 => Self::NotFound(message.into()),
            _ => Self::Other(message.into()),
        }
    }
}

/// Removes ANSI escape sequences such as terminal colors.
#[must_use]
pub fn strip_ansi(text: &str) -> std::borrow::Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// A log line with its timestamp prefix split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Zero-based position of the line in the read.
    pub position: usize,
    /// Timestamp written by the runtime.
    pub time: DateTime<Utc>,
    /// Message with ANSI sequences removed.
    pub message: String,
}

/// Splits runtime-timestamped log text into lines within `[from_ms, to_ms]`.
///
/// Each line must start with an RFC 3339 timestamp followed by a space.
/// Lines with an unreadable timestamp, lines outside the window and lines
/// whose message is empty after ANSI stripping are dropped.
pub fn parse_lines(text: &str, from_ms: i64, to_ms: i64) -> impl Iterator<Item = LogLine> + '_ {
    text.lines().enumerate().filter_map(move |(position, raw)| {
        let raw = raw.trim_end_matches('\r');
        let (stamp, message) = raw.split_once(' ').unwrap_or((raw, ""));
        let time = match DateTime::parse_from_rfc3339(stamp) {
            Ok(time) => time.with_timezone(&Utc),
            Err(e) => {
                tracing::trace!(line = position, error = %e, "Skipping line without timestamp");
                return None;
            }
        };
        let ms = time.timestamp_millis();
        if ms < from_ms || ms > to_ms {
            return None;
        }
        let message = strip_ansi(message).trim_end().to_string();
        if message.is_empty() {
            return None;
        }
        Some(LogLine {
            position,
            time,
            message,
        })
    })
}

/// Renders a line timestamp as a row time value.
#[must_use]
pub fn time_value(time: DateTime<Utc>) -> Value {
    Value::String(time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Client-side filter over rows of a fixed schema.
#[derive(Debug, Default)]
pub struct RowFilter {
    evaluator: Option<Evaluator>,
}

impl RowFilter {
    /// Prepares `filter` for rows with the given columns.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::InvalidQuery` if the filter references an
    /// unknown column or holds an invalid pattern.
    pub fn new(filter: Option<&Filter>, columns: &[&str]) -> Result<Self, FetchError> {
        let evaluator = filter.map(|f| Evaluator::new(f, columns)).transpose()?;
        Ok(Self { evaluator })
    }

    /// Returns true if the row passes the filter.
    #[must_use]
    pub fn accepts(&self, row: &Row) -> bool {
        self.evaluator
            .as_ref()
            .map_or(true, |evaluator| evaluator.matches(&row.data))
    }
}

/// Validates filter text against a fixed schema.
#[must_use]
pub fn validate_filter(text: &str, columns: &[&str]) -> QueryValidation {
    if text.trim().is_empty() {
        return QueryValidation::ok();
    }
    match filter::parse(text) {
        Ok(parsed) => match Evaluator::new(&parsed, columns) {
            Ok(_) => QueryValidation::ok(),
            Err(e) => QueryValidation::invalid(e.to_string()),
        },
        Err(e) => QueryValidation::invalid(e.to_string()),
    }
}

/// Lines to request per container.
///
/// With more than one pod and a limit above 100 the limit is spread across
/// pods with 30% headroom, never below one line.
#[must_use]
pub fn tail_lines(limit: usize, pods: usize) -> i64 {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    if limit > 100 && pods > 1 {
        let pods = i64::try_from(pods).unwrap_or(i64::MAX);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let share = ((limit as f64 / pods as f64) * 1.3) as i64;
        share.max(1)
    } else {
        limit
    }
}

/// Whole seconds between `from_ms` and now, rounded up by one second.
///
/// Returns `None` when `from_ms` is not in the past.
#[must_use]
pub fn since_seconds(from_ms: i64, now: DateTime<Utc>) -> Option<i64> {
    let elapsed_ms = now.timestamp_millis().saturating_sub(from_ms);
    (elapsed_ms > 0).then(|| elapsed_ms / 1000 + 1)
}
