//! Source data model.
//!
//! A `Source` describes one log source: its columns, which column carries
//! time, how to classify severity and how to reach the backend holding it.

use crate::severity::{SeverityClassifier, SeverityRules};
use filter::ColumnInfo;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use validator::Validate;

/// The kind of backend a source reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A `ClickHouse` table.
    Clickhouse,
    /// A `StarRocks` table.
    Starrocks,
    /// Containers of a Docker engine.
    Docker,
    /// Pods of one or more Kubernetes clusters.
    Kubernetes,
}

impl SourceKind {
    /// Returns true for SQL database kinds.
    #[must_use]
    pub fn is_sql(self) -> bool {
        matches!(self, Self::Clickhouse | Self::Starrocks)
    }

    /// Columns every row of a streaming kind carries; `None` for SQL kinds.
    #[must_use]
    pub fn fixed_columns(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Clickhouse | Self::Starrocks => None,
            Self::Docker => Some(&crate::fetchers::docker::COLUMNS),
            Self::Kubernetes => Some(&crate::fetchers::kubernetes::COLUMNS),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clickhouse => write!(f, "clickhouse"),
            Self::Starrocks => write!(f, "starrocks"),
            Self::Docker => write!(f, "docker"),
            Self::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// A column declared on a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceColumn {
    /// Column name as stored in the backend.
    pub name: String,

    /// Human-friendly name.
    #[serde(default)]
    pub display_name: String,

    /// Backend type, e.g. `DateTime64(3)` or `Map(String, String)`.
    #[serde(rename = "type")]
    pub type_name: String,

    /// True when the column holds JSON-encoded text.
    #[serde(default)]
    pub json_string: bool,

    /// Whether the column may be used as a graph group-by.
    #[serde(default = "default_true")]
    pub groupable: bool,

    /// Whether value autocomplete is offered for the column.
    #[serde(default)]
    pub autocomplete: bool,
}

fn default_true() -> bool {
    true
}

impl SourceColumn {
    /// Creates a column with the given name and type.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: String::new(),
            type_name: type_name.into(),
            json_string: false,
            groupable: true,
            autocomplete: false,
        }
    }

    /// Marks the column as holding JSON text.
    #[must_use]
    pub fn with_json_string(mut self) -> Self {
        self.json_string = true;
        self
    }

    /// Enables autocomplete for the column.
    #[must_use]
    pub fn with_autocomplete(mut self) -> Self {
        self.autocomplete = true;
        self
    }

    /// The outer type, lower-cased, with nullability wrappers removed.
    #[must_use]
    pub fn base_type(&self) -> String {
        filter::sql::base_type(&self.type_name)
    }

    /// Returns true for map-typed columns.
    #[must_use]
    pub fn is_map(&self) -> bool {
        self.base_type() == "map"
    }

    /// Returns true for array-typed columns.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.base_type() == "array"
    }

    /// Returns true for columns holding JSON, either as text or natively.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.json_string || self.base_type() == "json"
    }

    /// Returns true for integer columns, which as time columns hold epoch
    /// milliseconds.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self.base_type().as_str(),
            "int64" | "uint64" | "bigint" | "largeint" | "int" | "integer"
        )
    }

    /// Compiler view of the column.
    #[must_use]
    pub fn column_info(&self) -> ColumnInfo {
        ColumnInfo::new(&self.name, &self.type_name).with_json_string(self.json_string)
    }
}

/// Connection settings for a `ClickHouse` source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickHouseConnection {
    /// Server host name.
    pub host: String,
    /// HTTP(S) port.
    #[serde(default = "default_clickhouse_port")]
    pub port: u16,
    /// User name.
    #[serde(default = "default_user")]
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Database holding the table.
    pub database: String,
    /// Table name.
    pub table: String,
    /// Use HTTPS.
    #[serde(default)]
    pub ssl: bool,
}

fn default_clickhouse_port() -> u16 {
    8123
}

fn default_user() -> String {
    "default".to_string()
}

/// Connection settings for a `StarRocks` source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarRocksConnection {
    /// Frontend host name.
    pub host: String,
    /// MySQL protocol port.
    #[serde(default = "default_starrocks_port")]
    pub port: u16,
    /// User name.
    #[serde(default = "default_starrocks_user")]
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Catalog holding the database.
    #[serde(default = "default_catalog")]
    pub catalog: String,
    /// Database holding the table.
    pub database: String,
    /// Table name.
    pub table: String,
    /// Enable TLS.
    #[serde(default)]
    pub ssl: bool,
    /// Verify the server certificate when TLS is on.
    #[serde(default = "default_true")]
    pub verify: bool,
    /// PEM-encoded CA certificate.
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// PEM-encoded client certificate.
    #[serde(default)]
    pub client_cert: Option<String>,
    /// PEM-encoded client key.
    #[serde(default)]
    pub client_cert_key: Option<String>,
    /// Allowed TLS protocol versions.
    #[serde(default)]
    pub tls_versions: Vec<String>,
}

fn default_starrocks_port() -> u16 {
    9030
}

fn default_starrocks_user() -> String {
    "root".to_string()
}

fn default_catalog() -> String {
    "default_catalog".to_string()
}

/// Connection settings for a Docker source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConnection {
    /// Engine address: a `unix://` socket path or `tcp://`/`http://` URL.
    /// Empty means the local default.
    #[serde(default)]
    pub address: String,
    /// Container names to read. Empty means all containers.
    #[serde(default)]
    pub containers: Vec<String>,
}

/// Connection settings for a Kubernetes source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesConnection {
    /// Inline kubeconfig YAML.
    #[serde(default)]
    pub kubeconfig: Option<String>,
    /// Path to a kubeconfig file, used when no inline kubeconfig is set.
    #[serde(default)]
    pub kubeconfig_path: Option<String>,
    /// Content hash identifying the kubeconfig for caching.
    #[serde(default)]
    pub kubeconfig_hash: Option<String>,
    /// Contexts to read. Empty means the current context, `*` means all.
    #[serde(default)]
    pub contexts: Vec<String>,
    /// Namespaces to read. Empty means every namespace.
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl KubernetesConnection {
    /// Identity of the kubeconfig used for cache keys.
    #[must_use]
    pub fn identity(&self) -> String {
        if let Some(hash) = self.kubeconfig_hash.as_deref().filter(|h| !h.is_empty()) {
            return hash.to_string();
        }
        match (&self.kubeconfig, &self.kubeconfig_path) {
            (Some(inline), _) => crate::cache::fingerprint(inline, std::iter::empty::<&str>()),
            (None, Some(path)) => format!("path:{path}"),
            (None, None) => "default".to_string(),
        }
    }
}

/// Backend connection settings, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// A `ClickHouse` table.
    Clickhouse(ClickHouseConnection),
    /// A `StarRocks` table.
    Starrocks(StarRocksConnection),
    /// A Docker engine.
    Docker(DockerConnection),
    /// Kubernetes clusters.
    Kubernetes(KubernetesConnection),
}

impl BackendConfig {
    /// The kind of backend.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Clickhouse(_) => SourceKind::Clickhouse,
            Self::Starrocks(_) => SourceKind::Starrocks,
            Self::Docker(_) => SourceKind::Docker,
            Self::Kubernetes(_) => SourceKind::Kubernetes,
        }
    }
}

/// A configured log source.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Source {
    /// Unique identifier.
    #[validate(length(min = 1, message = "Source slug cannot be empty"))]
    pub slug: String,

    /// Human-friendly name.
    #[serde(default)]
    pub name: String,

    /// Declared columns.
    #[validate(length(min = 1, message = "Source must declare at least one column"))]
    pub columns: Vec<SourceColumn>,

    /// Column holding the event time.
    #[validate(length(min = 1, message = "Time column cannot be empty"))]
    pub time_column: String,

    /// Optional date column used for partition pruning.
    #[serde(default)]
    pub date_column: Option<String>,

    /// Column whose text is fed to the severity rules.
    #[serde(default)]
    pub severity_column: Option<String>,

    /// Column holding a unique record id.
    #[serde(default)]
    pub uniq_column: Option<String>,

    /// Severity classification rules.
    #[serde(default)]
    pub severity_rules: Option<SeverityRules>,

    /// Default ORDER BY expression.
    #[serde(default)]
    pub order_by_expression: Option<String>,

    /// Backend query settings appended to every statement.
    #[serde(default)]
    pub settings: Option<String>,

    /// Whether raw SQL filter fragments are accepted.
    #[serde(default)]
    pub support_raw_query: bool,

    /// How to reach the backend.
    pub backend: BackendConfig,

    #[serde(skip)]
    classifier: OnceCell<Arc<SeverityClassifier>>,
}

/// Errors that can occur during source validation.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A referenced column is not declared.
    #[error("{role} column '{column}' is not declared on the source")]
    UndeclaredColumn {
        /// What the column is used for.
        role: &'static str,
        /// The referenced name.
        column: String,
    },

    /// Two columns share a name.
    #[error("Column '{0}' is declared more than once")]
    DuplicateColumn(String),

    /// The time column has an unusable type.
    #[error("Time column '{column}' has unsupported type '{type_name}'")]
    InvalidTimeColumn {
        /// Column name.
        column: String,
        /// Declared type.
        type_name: String,
    },

    /// A streaming source names a column its rows do not carry.
    #[error("{role} column '{column}' is not part of the fixed {kind} schema")]
    NotInFixedSchema {
        /// What the column is used for.
        role: &'static str,
        /// The referenced name.
        column: String,
        /// Kind of the source.
        kind: SourceKind,
    },

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl Source {
    /// Creates a source with the required fields.
    #[must_use]
    pub fn new(
        slug: impl Into<String>,
        columns: Vec<SourceColumn>,
        time_column: impl Into<String>,
        backend: BackendConfig,
    ) -> Self {
        Self {
            slug: slug.into(),
            name: String::new(),
            columns,
            time_column: time_column.into(),
            date_column: None,
            severity_column: None,
            uniq_column: None,
            severity_rules: None,
            order_by_expression: None,
            settings: None,
            support_raw_query: false,
            backend,
            classifier: OnceCell::new(),
        }
    }

    /// Sets the date column.
    #[must_use]
    pub fn with_date_column(mut self, column: impl Into<String>) -> Self {
        self.date_column = Some(column.into());
        self
    }

    /// Sets the severity column.
    #[must_use]
    pub fn with_severity_column(mut self, column: impl Into<String>) -> Self {
        self.severity_column = Some(column.into());
        self
    }

    /// Sets the unique record id column.
    #[must_use]
    pub fn with_uniq_column(mut self, column: impl Into<String>) -> Self {
        self.uniq_column = Some(column.into());
        self
    }

    /// Sets severity rules.
    #[must_use]
    pub fn with_severity_rules(mut self, rules: SeverityRules) -> Self {
        self.severity_rules = Some(rules);
        self.classifier = OnceCell::new();
        self
    }

    /// Sets the default ORDER BY expression.
    #[must_use]
    pub fn with_order_by(mut self, expression: impl Into<String>) -> Self {
        self.order_by_expression = Some(expression.into());
        self
    }

    /// Sets backend query settings.
    #[must_use]
    pub fn with_settings(mut self, settings: impl Into<String>) -> Self {
        self.settings = Some(settings.into());
        self
    }

    /// Allows raw SQL filter fragments.
    #[must_use]
    pub fn with_raw_query_support(mut self) -> Self {
        self.support_raw_query = true;
        self
    }

    /// The kind of backend this source reads from.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.backend.kind()
    }

    /// Looks up a declared column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&SourceColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Declared column names.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Declared columns sorted by name.
    #[must_use]
    pub fn sorted_columns(&self) -> Vec<&SourceColumn> {
        let mut columns: Vec<&SourceColumn> = self.columns.iter().collect();
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        columns
    }

    /// Columns keyed by name, in the form the filter compiler expects.
    #[must_use]
    pub fn filter_columns(&self) -> HashMap<String, ColumnInfo> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.column_info()))
            .collect()
    }

    /// Trimmed, non-empty backend settings.
    #[must_use]
    pub fn query_settings(&self) -> Option<&str> {
        self.settings
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Trimmed, non-empty default ORDER BY expression.
    #[must_use]
    pub fn default_order_by(&self) -> Option<&str> {
        self.order_by_expression
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Compiled severity rules, built on first use.
    #[must_use]
    pub fn severity_classifier(&self) -> Option<&SeverityClassifier> {
        let rules = self.severity_rules.as_ref()?;
        Some(
            self.classifier
                .get_or_init(|| Arc::new(SeverityClassifier::new(rules)))
                .as_ref(),
        )
    }

    /// Validates the source beyond field-level checks.
    ///
    /// # Errors
    ///
    /// Returns a `SourceError` if:
    /// - A field-level validation fails
    /// - Column names are duplicated
    /// - The time, date, severity or unique column is not declared
    /// - The time column is neither a date-time nor an integer column
    /// - A streaming source uses a time column other than `time`, or a
    ///   severity, date or unique column outside its fixed schema
    pub fn validate_source(&self) -> Result<(), SourceError> {
        self.validate()?;
        self.validate_fixed_schema()?;

        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SourceError::DuplicateColumn(column.name.clone()));
            }
        }

        let time = self
            .column(&self.time_column)
            .ok_or_else(|| SourceError::UndeclaredColumn {
                role: "Time",
                column: self.time_column.clone(),
            })?;
        let base = time.base_type();
        if !(base.starts_with("datetime") || base == "timestamp" || time.is_integer()) {
            return Err(SourceError::InvalidTimeColumn {
                column: time.name.clone(),
                type_name: time.type_name.clone(),
            });
        }

        for (role, column) in [
            ("Date", &self.date_column),
            ("Severity", &self.severity_column),
            ("Unique", &self.uniq_column),
        ] {
            if let Some(name) = column {
                if self.column(name).is_none() {
                    return Err(SourceError::UndeclaredColumn {
                        role,
                        column: name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn validate_fixed_schema(&self) -> Result<(), SourceError> {
        let kind = self.kind();
        let Some(fixed) = kind.fixed_columns() else {
            return Ok(());
        };

        if self.time_column != "time" {
            return Err(SourceError::NotInFixedSchema {
                role: "Time",
                column: self.time_column.clone(),
                kind,
            });
        }
        for (role, column) in [
            ("Date", &self.date_column),
            ("Severity", &self.severity_column),
            ("Unique", &self.uniq_column),
        ] {
            if let Some(name) = column.as_deref().filter(|n| !fixed.contains(n)) {
                return Err(SourceError::NotInFixedSchema {
                    role,
                    column: name.to_string(),
                    kind,
                });
            }
        }
        Ok(())
    }
}
