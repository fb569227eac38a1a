//! Push-down query execution shared by the SQL backends.
//!
//! [`SqlFetcher`] builds every statement; a [`SqlBackend`] supplies the
//! dialect-specific expressions (time literals, bucketing, quoting, query
//! hints) and runs statements against the database.

use super::{check_range, FetchError, Fetcher};
use crate::columns::{group_key, ColumnError, GroupByColumn};
use crate::config::FetcherSettings;
use crate::graph::Histogram;
use crate::models::{
    value_text, AutocompleteRequest, AutocompleteResponse, BackendConfig, ConnectionTestResponse,
    DataRequest, DataResponse, GraphDataRequest, GraphDataResponse, ProbeResult, QueryValidation,
    Row, SchemaColumn, SchemaProbe, Source, SourceColumn, SourceKind, ROW_ID_COLUMN,
};
use async_trait::async_trait;
use chrono_tz::Tz;
use filter::sql::escape_literal;
use filter::{Dialect, Filter};
use serde_json::Value;

/// Maximum number of autocomplete suggestions.
pub const AUTOCOMPLETE_LIMIT: usize = 500;

/// Where a backend places its query hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintPlacement {
    /// Directly after the `SELECT` keyword.
    AfterSelect,
    /// At the very end of the statement.
    End,
}

/// Dialect-specific parts of a SQL backend.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Connection settings of this backend.
    type Connection: Send + Sync;

    /// Source kind served by the backend.
    const KIND: SourceKind;

    /// Dialect used to compile filters and quote identifiers.
    const DIALECT: Dialect;

    /// Creates the backend.
    fn new(settings: FetcherSettings) -> Self
    where
        Self: Sized;

    /// Extracts this backend's settings from a tagged config.
    fn connection(config: &BackendConfig) -> Option<&Self::Connection>;

    /// Fully qualified, quoted table name.
    fn table(&self, connection: &Self::Connection) -> String;

    /// Expression producing a unique id per returned row.
    fn row_id(&self) -> &'static str;

    /// Select-list item for a column.
    fn select_column(&self, column: &SourceColumn, is_time: bool) -> String;

    /// Literal for an epoch-millisecond instant comparable with date-time columns.
    fn time_literal(&self, ms: i64) -> String;

    /// Literal for the date of an epoch-millisecond instant.
    fn date_literal(&self, ms: i64) -> String;

    /// Expression flooring the time column to epoch-millisecond bucket starts.
    fn bucket(&self, time: &SourceColumn, width_ms: i64) -> String;

    /// Expression producing the group key as text.
    fn group_key(&self, group: &GroupByColumn, column: &SourceColumn) -> String;

    /// Casts an expression to text.
    fn text(&self, expression: &str) -> String;

    /// Renders a query hint from free-text settings.
    fn hint(&self, settings: &str) -> String;

    /// Where the hint goes.
    fn hint_placement(&self) -> HintPlacement;

    /// Statement listing `(name, type)` of the table's columns.
    fn schema_statement(&self, connection: &Self::Connection) -> String;

    /// Statement returning the table's DDL.
    fn show_create_statement(&self, connection: &Self::Connection) -> String;

    /// Runs a statement and returns its rows as positional JSON values.
    async fn query(
        &self,
        connection: &Self::Connection,
        statement: &str,
    ) -> Result<Vec<Vec<Value>>, FetchError>;
}

/// A fetcher that pushes filtering and aggregation down to a SQL database.
#[derive(Debug)]
pub struct SqlFetcher<B> {
    backend: B,
}

impl<B: SqlBackend> SqlFetcher<B> {
    /// Creates a fetcher for the backend.
    #[must_use]
    pub fn new(settings: FetcherSettings) -> Self {
        Self {
            backend: B::new(settings),
        }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn connection<'a>(&self, source: &'a Source) -> Result<&'a B::Connection, FetchError> {
        B::connection(&source.backend).ok_or_else(|| {
            FetchError::Config(format!(
                "Source '{}' is not a {} source",
                source.slug,
                B::KIND
            ))
        })
    }

    fn quote(ident: &str) -> String {
        B::DIALECT.quote(ident)
    }

    /// Wraps a statement body in `SELECT`, placing the source's query hint.
    #[must_use]
    pub fn select(&self, source: &Source, body: &str) -> String {
        match source.query_settings().map(|s| self.backend.hint(s)) {
            None => format!("SELECT {body}"),
            Some(hint) => match self.backend.hint_placement() {
                HintPlacement::AfterSelect => format!("SELECT {hint} {body}"),
                HintPlacement::End => format!("SELECT {body} {hint}"),
            },
        }
    }

    /// Range predicate over the time column, preceded by the equivalent
    /// date predicate when the source has a date column.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Config` if the time column is not declared.
    pub fn time_clause(
        &self,
        source: &Source,
        time_from: i64,
        time_to: i64,
    ) -> Result<String, FetchError> {
        let time = source.column(&source.time_column).ok_or_else(|| {
            FetchError::Config(format!(
                "Time column '{}' is not declared",
                source.time_column
            ))
        })?;

        let quoted = Self::quote(&time.name);
        let range = if time.is_integer() {
            format!("{quoted} BETWEEN {time_from} AND {time_to}")
        } else {
            format!(
                "{quoted} BETWEEN {} AND {}",
                self.backend.time_literal(time_from),
                self.backend.time_literal(time_to)
            )
        };

        Ok(match source.date_column.as_deref() {
            Some(date) => format!(
                "{} BETWEEN {} AND {} AND {range}",
                Self::quote(date),
                self.backend.date_literal(time_from),
                self.backend.date_literal(time_to)
            ),
            None => range,
        })
    }

    fn where_clause(
        &self,
        source: &Source,
        time_from: i64,
        time_to: i64,
        filter: Option<&Filter>,
        raw_filter: Option<&str>,
    ) -> Result<String, FetchError> {
        let mut clauses = vec![self.time_clause(source, time_from, time_to)?];
        if let Some(filter) = filter {
            let compiled = filter::to_sql(filter, &source.filter_columns(), B::DIALECT)?;
            clauses.push(format!("({compiled})"));
        }
        if let Some(raw) = raw_clause(source, raw_filter)? {
            clauses.push(raw);
        }
        Ok(clauses.join(" AND "))
    }

    /// Builds the row statement for a data request.
    ///
    /// # Errors
    ///
    /// Returns a `FetchError` if the filter does not compile, the raw
    /// filter is not allowed, or the source is misconfigured.
    pub fn data_statement(&self, request: &DataRequest) -> Result<String, FetchError> {
        let source = request.source.as_ref();
        let connection = self.connection(source)?;

        let columns: Vec<String> = source
            .sorted_columns()
            .into_iter()
            .map(|c| self.backend.select_column(c, c.name == source.time_column))
            .collect();

        let order_by = request
            .order_by_expression
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .or_else(|| source.default_order_by())
            .map_or_else(
                || format!("{} DESC", Self::quote(&source.time_column)),
                str::to_string,
            );

        let body = format!(
            "{} AS {}, {} FROM {} WHERE {} ORDER BY {order_by} LIMIT {}",
            self.backend.row_id(),
            Self::quote(ROW_ID_COLUMN),
            columns.join(", "),
            self.backend.table(connection),
            self.where_clause(
                source,
                request.time_from,
                request.time_to,
                request.filter.as_ref(),
                request.raw_filter.as_deref(),
            )?,
            request.limit
        );
        Ok(self.select(source, &body))
    }

    /// Builds the bucketed count statement for a graph request.
    ///
    /// # Errors
    ///
    /// Returns a `FetchError` if the filter does not compile, the group-by
    /// column is unknown, or the source is misconfigured.
    pub fn graph_statement(
        &self,
        request: &GraphDataRequest,
        width_ms: i64,
    ) -> Result<String, FetchError> {
        let source = request.source.as_ref();
        let connection = self.connection(source)?;
        let time = source.column(&source.time_column).ok_or_else(|| {
            FetchError::Config(format!(
                "Time column '{}' is not declared",
                source.time_column
            ))
        })?;

        let group = request
            .group_by
            .as_ref()
            .map(|group| {
                source
                    .column(&group.root)
                    .map(|column| self.backend.group_key(group, column))
                    .ok_or_else(|| ColumnError::UnknownColumn(group.root.clone()))
            })
            .transpose()?;

        let (group_select, group_by) = match &group {
            Some(expression) => (format!(", {expression} AS g"), ", g"),
            None => (String::new(), ""),
        };

        let body = format!(
            "{} AS t, COUNT(*) AS c{group_select} FROM {} WHERE {} GROUP BY t{group_by} ORDER BY t",
            self.backend.bucket(time, width_ms),
            self.backend.table(connection),
            self.where_clause(
                source,
                request.time_from,
                request.time_to,
                request.filter.as_ref(),
                request.raw_filter.as_deref(),
            )?,
        );
        Ok(self.select(source, &body))
    }

    /// Builds the distinct-values statement for an autocomplete request.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::InvalidRequest` if the column is not declared.
    pub fn autocomplete_statement(
        &self,
        request: &AutocompleteRequest,
    ) -> Result<String, FetchError> {
        let source = request.source.as_ref();
        let connection = self.connection(source)?;
        if source.column(&request.column).is_none() {
            return Err(FetchError::InvalidRequest(format!(
                "Unknown column: '{}'",
                request.column
            )));
        }

        let quoted = Self::quote(&request.column);
        let pattern = escape_literal(&request.value)
            .replace('%', "\\\\%")
            .replace('_', "\\\\_");

        let body = format!(
            "DISTINCT {quoted} FROM {} WHERE {} AND {} LIKE '%{pattern}%' ORDER BY {quoted} LIMIT {AUTOCOMPLETE_LIMIT}",
            self.backend.table(connection),
            self.time_clause(source, request.time_from, request.time_to)?,
            self.backend.text(&quoted),
        );
        Ok(self.select(source, &body))
    }

    async fn run(
        &self,
        source: &Source,
        connection: &B::Connection,
        statement: &str,
    ) -> Result<Vec<Vec<Value>>, FetchError> {
        tracing::debug!(source = %source.slug, kind = %B::KIND, statement = %statement, "Executing statement");
        let rows = self.backend.query(connection, statement).await?;
        tracing::debug!(source = %source.slug, rows = rows.len(), "Statement finished");
        Ok(rows)
    }
}

#[async_trait]
impl<B: SqlBackend> Fetcher for SqlFetcher<B> {
    async fn validate_query(&self, source: &Source, text: &str) -> QueryValidation {
        if text.trim().is_empty() {
            return QueryValidation::ok();
        }
        let filter = match filter::parse(text) {
            Ok(filter) => filter,
            Err(e) => return QueryValidation::invalid(e.to_string()),
        };
        match filter::to_sql(&filter, &source.filter_columns(), B::DIALECT) {
            Ok(_) => QueryValidation::ok(),
            Err(e) => QueryValidation::invalid(e.to_string()),
        }
    }

    async fn test_connection(&self, config: &BackendConfig) -> ConnectionTestResponse {
        let Some(connection) = B::connection(config) else {
            return ConnectionTestResponse::unreachable(format!(
                "Expected a {} connection, got {}",
                B::KIND,
                config.kind()
            ));
        };

        let table = self.backend.table(connection);
        if let Err(e) = self
            .backend
            .query(connection, &format!("SELECT 1 FROM {table} LIMIT 1"))
            .await
        {
            tracing::warn!(kind = %B::KIND, table = %table, error = %e, "Reachability probe failed");
            return ConnectionTestResponse::unreachable(e.to_string());
        }

        let schema = match self
            .backend
            .query(connection, &self.backend.schema_statement(connection))
            .await
        {
            Ok(rows) => SchemaProbe {
                result: true,
                data: rows
                    .iter()
                    .filter_map(|row| match row.as_slice() {
                        [name, type_name, ..] => Some(SchemaColumn::new(
                            value_text(name),
                            value_text(type_name),
                            false,
                        )),
                        _ => None,
                    })
                    .collect(),
                ..SchemaProbe::default()
            },
            Err(e) => SchemaProbe {
                error: e.to_string(),
                ..SchemaProbe::default()
            },
        };

        let raw = match self
            .backend
            .query(connection, &self.backend.show_create_statement(connection))
            .await
        {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.last())
                .map(value_text)
                .unwrap_or_default(),
            Err(e) => {
                tracing::debug!(table = %table, error = %e, "Could not read table DDL");
                String::new()
            }
        };

        ConnectionTestResponse {
            reachability: ProbeResult::passed(),
            schema: SchemaProbe { raw, ..schema },
        }
    }

    async fn autocomplete(
        &self,
        request: &AutocompleteRequest,
    ) -> Result<AutocompleteResponse, FetchError> {
        check_range(request.time_from, request.time_to)?;
        let statement = self.autocomplete_statement(request)?;
        let connection = self.connection(&request.source)?;
        let rows = self.run(&request.source, connection, &statement).await?;

        let items: Vec<String> = rows
            .iter()
            .filter_map(|row| row.first())
            .filter(|value| !value.is_null())
            .map(value_text)
            .collect();
        let incomplete = items.len() >= AUTOCOMPLETE_LIMIT;
        Ok(AutocompleteResponse { items, incomplete })
    }

    async fn fetch_data(&self, request: &DataRequest, tz: Tz) -> Result<DataResponse, FetchError> {
        check_range(request.time_from, request.time_to)?;
        let source = request.source.as_ref();
        let statement = self.data_statement(request)?;
        let connection = self.connection(source)?;

        let mut columns = vec![ROW_ID_COLUMN];
        columns.extend(source.sorted_columns().into_iter().map(|c| c.name.as_str()));

        let rows = self
            .run(source, connection, &statement)
            .await?
            .into_iter()
            .map(|values| Row::new(source, &columns, values, tz))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DataResponse::with_rows(rows))
    }

    async fn fetch_graph_data(
        &self,
        request: &GraphDataRequest,
    ) -> Result<GraphDataResponse, FetchError> {
        check_range(request.time_from, request.time_to)?;
        let source = request.source.as_ref();
        let grouped = request.group_by.is_some();
        let mut histogram = Histogram::new(request.time_from, request.time_to, grouped);

        let statement = self.graph_statement(request, histogram.width_ms())?;
        let connection = self.connection(source)?;

        for row in self.run(source, connection, &statement).await? {
            let (Some(bucket), Some(count)) = (
                row.first().and_then(as_i64),
                row.get(1).and_then(as_i64).and_then(|c| u64::try_from(c).ok()),
            ) else {
                return Err(FetchError::Query(format!(
                    "Unexpected graph row shape: {}",
                    Value::Array(row)
                )));
            };
            let group = if grouped {
                group_key(row.get(2))
            } else {
                String::new()
            };
            histogram.record_bucket(bucket, &group, count);
        }

        Ok(histogram.finish())
    }
}

/// Wraps a raw SQL predicate in parentheses.
///
/// Raw predicates are only accepted for sources that enable them. The text is
/// spliced verbatim, so quoted literals may contain any characters.
///
/// # Errors
///
/// Returns `FetchError::InvalidQuery` if the source does not accept raw
/// predicates.
pub fn raw_clause(source: &Source, raw: Option<&str>) -> Result<Option<String>, FetchError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if !source.support_raw_query {
        return Err(FetchError::InvalidQuery(format!(
            "Source '{}' does not accept raw queries",
            source.slug
        )));
    }
    Ok(Some(format!("({raw})")))
}

/// Reads an integer from a JSON number or numeric string.
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| {
                #[allow(clippy::cast_possible_truncation)]
                n.as_f64().map(|f| f as i64)
            }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
