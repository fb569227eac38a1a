//! Normalized row model.
//!
//! Every backend turns its native records into `Row`s: the column values
//! keyed by name plus a normalized timestamp and a severity label.

use super::source::Source;
use crate::severity::UNKNOWN_SEVERITY;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Hidden column carrying the synthetic row id produced by SQL backends.
pub const ROW_ID_COLUMN: &str = "__row_id";

/// Errors that can occur while building a row.
#[derive(Debug, Error)]
pub enum RowError {
    /// A selected column has no value.
    #[error("Missing value for column '{0}'")]
    MissingColumn(String),

    /// The time column value cannot be read as a timestamp.
    #[error("Column '{column}' does not hold a valid timestamp: {value}")]
    InvalidTime {
        /// The time column.
        column: String,
        /// The offending value.
        value: String,
    },
}

/// The normalized timestamp of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowTime {
    /// Milliseconds since the Unix epoch.
    pub unixtime: i64,
    /// `YYYY-MM-DD HH:MM:SS` in the caller's time zone.
    pub datetime: String,
    /// Sub-second part in microseconds.
    pub microseconds: u32,
}

impl RowTime {
    /// Builds the normalized form of `instant` rendered in `tz`.
    #[must_use]
    pub fn new(instant: DateTime<Utc>, tz: Tz) -> Self {
        let local = instant.with_timezone(&tz);
        Self {
            unixtime: instant.timestamp_millis(),
            datetime: local.format("%Y-%m-%d %H:%M:%S").to_string(),
            microseconds: instant.timestamp_subsec_micros(),
        }
    }
}

/// A normalized row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    /// Slug of the source the row came from.
    pub source: String,
    /// Identifier of the underlying record, when one is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Normalized timestamp.
    pub time: RowTime,
    /// Severity label.
    pub severity: String,
    /// Column values keyed by column name.
    pub data: Map<String, Value>,
}

impl Row {
    /// Builds a row from positional values.
    ///
    /// `columns` names the value at each position. Columns marked as JSON
    /// on the source are decoded when their text parses, and kept as text
    /// otherwise. A [`ROW_ID_COLUMN`] value becomes the record id rather
    /// than a data column.
    ///
    /// # Errors
    ///
    /// Returns `RowError::MissingColumn` if a column has no value or the
    /// time column is not selected, and `RowError::InvalidTime` if the
    /// time value cannot be parsed.
    pub fn new<S: AsRef<str>>(
        source: &Source,
        columns: &[S],
        values: Vec<Value>,
        tz: Tz,
    ) -> Result<Self, RowError> {
        if values.len() < columns.len() {
            return Err(RowError::MissingColumn(
                columns[values.len()].as_ref().to_string(),
            ));
        }

        let mut data = Map::with_capacity(columns.len());
        let mut synthetic_id = None;
        for (name, value) in columns.iter().map(AsRef::as_ref).zip(values) {
            if name == ROW_ID_COLUMN {
                synthetic_id = Some(value_text(&value));
                continue;
            }
            let decoded = match source.column(name) {
                Some(column) if column.json_string => decode_json(name, value),
                _ => value,
            };
            data.insert(name.to_string(), decoded);
        }

        let time_value = data
            .get(&source.time_column)
            .ok_or_else(|| RowError::MissingColumn(source.time_column.clone()))?;
        let instant = parse_time(time_value).ok_or_else(|| RowError::InvalidTime {
            column: source.time_column.clone(),
            value: value_text(time_value),
        })?;

        let record_id = source
            .uniq_column
            .as_deref()
            .and_then(|c| data.get(c))
            .filter(|v| !v.is_null())
            .map(value_text)
            .or(synthetic_id);

        let severity = severity_of(source, &data);

        Ok(Self {
            source: source.slug.clone(),
            record_id,
            time: RowTime::new(instant, tz),
            severity,
            data,
        })
    }

    /// Sets the record id.
    #[must_use]
    pub fn with_record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }
}

fn decode_json(column: &str, value: Value) -> Value {
    match value {
        Value::String(text) => match serde_json::from_str(&text) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(column = %column, error = %e, "Keeping undecodable JSON column as text");
                Value::String(text)
            }
        },
        other => other,
    }
}

fn severity_of(source: &Source, data: &Map<String, Value>) -> String {
    let configured = source.severity_column.as_deref().and_then(|c| data.get(c));

    let Some(classifier) = source.severity_classifier() else {
        return match configured.map(value_text) {
            Some(text) if !text.trim().is_empty() && text != "null" => text,
            _ => UNKNOWN_SEVERITY.to_string(),
        };
    };

    let body = configured
        .or_else(|| data.get("message"))
        .or_else(|| data.get("body"));

    match body {
        Some(value) if !value.is_null() => classifier.classify(&value_text(value)),
        _ => UNKNOWN_SEVERITY.to_string(),
    }
}

/// Renders a JSON value as text: strings as-is, everything else as JSON.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses a time value.
///
/// Accepts epoch milliseconds (as a number or numeric string), RFC 3339
/// text, and `YYYY-MM-DD HH:MM:SS[.fff]` text taken as UTC.
#[must_use]
pub fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(ms) = text.parse::<i64>() {
                return Utc.timestamp_millis_opt(ms).single();
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}
