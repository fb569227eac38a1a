//! `ClickHouse` backend.
//!
//! Statements go over the HTTP interface and results are read as
//! `JSONCompactEachRow`, one JSON array per row.

use super::sql::{HintPlacement, SqlBackend, SqlFetcher};
use super::FetchError;
use crate::columns::{GroupByColumn, GroupByKind};
use crate::config::FetcherSettings;
use crate::models::{BackendConfig, ClickHouseConnection, SourceColumn, SourceKind};
use async_trait::async_trait;
use clickhouse::Client;
use filter::sql::{json_extract, quote_literal};
use filter::Dialect;
use serde_json::Value;

/// Fetcher for `ClickHouse` sources.
pub type ClickHouseFetcher = SqlFetcher<ClickHouse>;

/// The `ClickHouse` dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickHouse;

impl ClickHouse {
    fn client(connection: &ClickHouseConnection) -> Client {
        let scheme = if connection.ssl { "https" } else { "http" };
        Client::default()
            .with_url(format!("{scheme}://{}:{}", connection.host, connection.port))
            .with_user(&connection.username)
            .with_password(&connection.password)
            .with_database(&connection.database)
            .with_option("output_format_json_quote_64bit_integers", "0")
    }
}

fn quote(ident: &str) -> String {
    Dialect::ClickHouse.quote(ident)
}

fn is_datetime(column: &SourceColumn) -> bool {
    column.base_type().starts_with("datetime")
}

#[async_trait]
impl SqlBackend for ClickHouse {
    type Connection = ClickHouseConnection;
    const KIND: SourceKind = SourceKind::Clickhouse;
    const DIALECT: Dialect = Dialect::ClickHouse;

    fn new(_settings: FetcherSettings) -> Self {
        Self
    }

    fn connection(config: &BackendConfig) -> Option<&Self::Connection> {
        match config {
            BackendConfig::Clickhouse(connection) => Some(connection),
            _ => None,
        }
    }

    fn table(&self, connection: &Self::Connection) -> String {
        format!("{}.{}", quote(&connection.database), quote(&connection.table))
    }

    fn row_id(&self) -> &'static str {
        "generateUUIDv4()"
    }

    fn select_column(&self, column: &SourceColumn, is_time: bool) -> String {
        let quoted = quote(&column.name);
        if is_time && is_datetime(column) {
            format!("toTimeZone({quoted}, 'UTC') AS {quoted}")
        } else {
            quoted
        }
    }

    fn time_literal(&self, ms: i64) -> String {
        format!("fromUnixTimestamp64Milli({ms})")
    }

    fn date_literal(&self, ms: i64) -> String {
        format!("toDate(fromUnixTimestamp64Milli({ms}))")
    }

    fn bucket(&self, time: &SourceColumn, width_ms: i64) -> String {
        let quoted = quote(&time.name);
        if time.is_integer() {
            format!("intDiv({quoted}, {width_ms}) * {width_ms}")
        } else {
            format!("intDiv(toUnixTimestamp64Milli(toDateTime64({quoted}, 3)), {width_ms}) * {width_ms}")
        }
    }

    fn group_key(&self, group: &GroupByColumn, column: &SourceColumn) -> String {
        let quoted = quote(&group.root);
        match &group.kind {
            GroupByKind::Plain => format!("toString({quoted})"),
            GroupByKind::JsonPath(path) if column.json_string => {
                json_extract(&quoted, path, Dialect::ClickHouse)
            }
            GroupByKind::JsonPath(path) => {
                json_extract(&format!("toJSONString({quoted})"), path, Dialect::ClickHouse)
            }
            GroupByKind::MapKey(key) => format!("{quoted}[{}]", quote_literal(key)),
            GroupByKind::ArrayIndex(index) => format!("toString({quoted}[{index}])"),
        }
    }

    fn text(&self, expression: &str) -> String {
        format!("toString({expression})")
    }

    fn hint(&self, settings: &str) -> String {
        format!("SETTINGS {settings}")
    }

    fn hint_placement(&self) -> HintPlacement {
        HintPlacement::End
    }

    fn schema_statement(&self, connection: &Self::Connection) -> String {
        format!(
            "SELECT name, type FROM system.columns WHERE database = {} AND table = {} ORDER BY position",
            quote_literal(&connection.database),
            quote_literal(&connection.table)
        )
    }

    fn show_create_statement(&self, connection: &Self::Connection) -> String {
        format!("SHOW CREATE TABLE {}", self.table(connection))
    }

    async fn query(
        &self,
        connection: &Self::Connection,
        statement: &str,
    ) -> Result<Vec<Vec<Value>>, FetchError> {
        // `?` is a bind placeholder for the client; the statement binds nothing.
        let escaped = statement.replace('?', "??");
        let mut cursor = Self::client(connection)
            .query(&escaped)
            .fetch_bytes("JSONCompactEachRow")
            .map_err(query_error)?;
        let body = cursor.collect().await.map_err(query_error)?;
        parse_compact_rows(&body)
    }
}

fn query_error(err: clickhouse::error::Error) -> FetchError {
    match err {
        clickhouse::error::Error::Network(e) => FetchError::Connection(e.to_string()),
        other => FetchError::Query(other.to_string()),
    }
}

/// Decodes `JSONCompactEachRow` output.
fn parse_compact_rows(body: &[u8]) -> Result<Vec<Vec<Value>>, FetchError> {
    body.split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(|line| {
            serde_json::from_slice::<Vec<Value>>(line)
                .map_err(|e| FetchError::Query(format!("Malformed result row: {e}")))
        })
        .collect()
}
