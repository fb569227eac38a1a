//! Response models returned by fetchers.

use super::row::Row;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Structured, non-fatal errors carried inside an otherwise successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseError {
    /// Context and resource filters left nothing to read from.
    NoTargetsMatched,
}

/// Why a fetch target was left out of the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The backend refused access.
    PermissionDenied,
    /// The target disappeared.
    NotFound,
    /// Any other failure.
    Failed,
}

/// A target that did not contribute to the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTarget {
    /// Human-readable target label.
    pub target: String,
    /// Why it was skipped.
    pub reason: SkipReason,
    /// Backend message.
    pub detail: String,
}

/// Rows returned for a data request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataResponse {
    /// Matching rows, newest first.
    pub rows: Vec<Row>,
    /// Set when the request could not be served as asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    /// Explanation accompanying `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Targets left out of the result.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedTarget>,
}

impl DataResponse {
    /// A response holding `rows`.
    #[must_use]
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// An empty response explaining that no targets matched.
    #[must_use]
    pub fn no_targets(message: impl Into<String>, skipped: Vec<SkippedTarget>) -> Self {
        Self {
            rows: Vec::new(),
            error: Some(ResponseError::NoTargetsMatched),
            message: Some(message.into()),
            skipped,
        }
    }
}

/// Histogram returned for a graph request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphDataResponse {
    /// Bucket start times in milliseconds, ascending.
    pub timestamps: Vec<i64>,
    /// Counts per series, aligned with `timestamps`.
    pub data: BTreeMap<String, Vec<u64>>,
    /// Sum of all counts.
    pub total: u64,
    /// Set when the request could not be served as asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    /// Explanation accompanying `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Targets left out of the result.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedTarget>,
}

impl GraphDataResponse {
    /// An empty histogram explaining that no targets matched.
    #[must_use]
    pub fn no_targets(
        time_from: i64,
        time_to: i64,
        message: impl Into<String>,
        skipped: Vec<SkippedTarget>,
    ) -> Self {
        let mut timestamps = vec![time_from];
        if time_to != time_from {
            timestamps.push(time_to);
        }
        Self {
            timestamps,
            error: Some(ResponseError::NoTargetsMatched),
            message: Some(message.into()),
            skipped,
            ..Self::default()
        }
    }
}

/// Distinct values suggested for a column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutocompleteResponse {
    /// Suggested values.
    pub items: Vec<String>,
    /// True when more values may exist than were returned.
    pub incomplete: bool,
}

/// Result of validating filter text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryValidation {
    /// Whether the filter can be used with the source.
    pub valid: bool,
    /// Human-readable reason when invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryValidation {
    /// A passing validation.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    /// A failing validation.
    #[must_use]
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one connection probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// Whether the probe succeeded.
    pub result: bool,
    /// Failure description.
    pub error: String,
}

impl ProbeResult {
    /// A successful probe.
    #[must_use]
    pub fn passed() -> Self {
        Self {
            result: true,
            error: String::new(),
        }
    }

    /// A failed probe.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: false,
            error: error.into(),
        }
    }
}

/// A column discovered by the schema probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaColumn {
    /// Column name.
    pub name: String,
    /// Backend type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// True when the column holds JSON text.
    pub json_string: bool,
}

impl SchemaColumn {
    /// Creates a schema column.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, json_string: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            json_string,
        }
    }
}

/// Outcome of the schema probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaProbe {
    /// Whether the probe succeeded.
    pub result: bool,
    /// Failure description.
    pub error: String,
    /// Discovered columns.
    pub data: Vec<SchemaColumn>,
    /// Raw schema text, e.g. a `CREATE TABLE` statement.
    pub raw: String,
}

/// Result of a connection test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionTestResponse {
    /// Whether the backend answered.
    pub reachability: ProbeResult,
    /// Whether the schema could be read.
    pub schema: SchemaProbe,
}

impl ConnectionTestResponse {
    /// A response for an unreachable backend; the schema probe is skipped.
    #[must_use]
    pub fn unreachable(error: impl Into<String>) -> Self {
        Self {
            reachability: ProbeResult::failed(error),
            schema: SchemaProbe {
                result: false,
                error: "Skipped due to reachability test failed".to_string(),
                ..SchemaProbe::default()
            },
        }
    }
}

/// One selectable value of a context field, e.g. a container or deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextOption {
    /// Name of the option.
    pub name: String,
    /// Backend status, e.g. `running` or `Available`.
    pub status: String,
    /// Labels attached to the option.
    pub labels: BTreeMap<String, String>,
    /// Extra backend-specific details.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}
