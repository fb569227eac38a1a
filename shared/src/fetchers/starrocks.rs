//! `StarRocks` backend.
//!
//! `StarRocks` speaks the MySQL protocol. Each call opens its own
//! connection; PEM credentials are staged to a temporary directory for the
//! lifetime of that connection only.

use super::connect::StagedCredentials;
use super::sql::{HintPlacement, SqlBackend, SqlFetcher};
use super::FetchError;
use crate::columns::{GroupByColumn, GroupByKind};
use crate::config::FetcherSettings;
use crate::models::{BackendConfig, SourceColumn, SourceKind, StarRocksConnection};
use async_trait::async_trait;
use filter::sql::{json_extract, quote_literal};
use filter::Dialect;
use mysql_async::prelude::Queryable;
use mysql_async::{ClientIdentity, Conn, OptsBuilder, SslOpts};
use serde_json::{Number, Value};
use std::time::Duration;

/// Fetcher for `StarRocks` sources.
pub type StarRocksFetcher = SqlFetcher<StarRocks>;

/// The `StarRocks` dialect.
#[derive(Debug, Clone, Copy)]
pub struct StarRocks {
    connect_timeout: Duration,
}

fn quote(ident: &str) -> String {
    Dialect::StarRocks.quote(ident)
}

impl StarRocks {
    fn options(connection: &StarRocksConnection, staged: &StagedCredentials) -> OptsBuilder {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(connection.host.clone())
            .tcp_port(connection.port)
            .user(Some(connection.username.clone()))
            .pass(Some(connection.password.clone()))
            .prefer_socket(Some(false));

        if connection.ssl {
            let mut ssl = SslOpts::default().with_danger_accept_invalid_certs(!connection.verify);
            if let Some(ca) = &staged.ca_cert {
                ssl = ssl.with_root_certs(vec![ca.clone().into()]);
            }
            if let (Some(cert), Some(key)) = (&staged.client_cert, &staged.client_key) {
                ssl = ssl.with_client_identity(Some(ClientIdentity::new(
                    cert.clone().into(),
                    key.clone().into(),
                )));
            }
            if !connection.tls_versions.is_empty() {
                tracing::debug!(
                    versions = ?connection.tls_versions,
                    "TLS version pinning is not supported by the client, using its defaults"
                );
            }
            builder = builder.ssl_opts(Some(ssl));
        }

        builder
    }

    async fn connect(&self, connection: &StarRocksConnection) -> Result<(Conn, StagedCredentials), FetchError> {
        let staged = if connection.ssl {
            StagedCredentials::stage(
                connection.ca_cert.as_deref(),
                connection.client_cert.as_deref(),
                connection.client_cert_key.as_deref(),
            )?
        } else {
            StagedCredentials::default()
        };

        let opts = Self::options(connection, &staged);
        let conn = tokio::time::timeout(self.connect_timeout, Conn::new(opts))
            .await
            .map_err(|_| {
                FetchError::Connection(format!(
                    "Timed out connecting to {}:{}",
                    connection.host, connection.port
                ))
            })?
            .map_err(|e| FetchError::Connection(e.to_string()))?;

        Ok((conn, staged))
    }
}

#[async_trait]
impl SqlBackend for StarRocks {
    type Connection = StarRocksConnection;
    const KIND: SourceKind = SourceKind::Starrocks;
    const DIALECT: Dialect = Dialect::StarRocks;

    fn new(settings: FetcherSettings) -> Self {
        Self {
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        }
    }

    fn connection(config: &BackendConfig) -> Option<&Self::Connection> {
        match config {
            BackendConfig::Starrocks(connection) => Some(connection),
            _ => None,
        }
    }

    fn table(&self, connection: &Self::Connection) -> String {
        format!(
            "{}.{}.{}",
            quote(&connection.catalog),
            quote(&connection.database),
            quote(&connection.table)
        )
    }

    fn row_id(&self) -> &'static str {
        "uuid_numeric()"
    }

    fn select_column(&self, column: &SourceColumn, _is_time: bool) -> String {
        quote(&column.name)
    }

    fn time_literal(&self, ms: i64) -> String {
        format!("to_datetime_ntz({ms}, 3)")
    }

    fn date_literal(&self, ms: i64) -> String {
        format!("date(to_datetime_ntz({ms}, 3))")
    }

    fn bucket(&self, time: &SourceColumn, width_ms: i64) -> String {
        let quoted = quote(&time.name);
        if time.is_integer() {
            format!("({quoted} DIV {width_ms}) * {width_ms}")
        } else {
            let seconds = (width_ms / 1000).max(1);
            format!("(unix_timestamp({quoted}) DIV {seconds}) * {width_ms}")
        }
    }

    fn group_key(&self, group: &GroupByColumn, _column: &SourceColumn) -> String {
        let quoted = quote(&group.root);
        match &group.kind {
            GroupByKind::Plain => self.text(&quoted),
            GroupByKind::JsonPath(path) => json_extract(&quoted, path, Dialect::StarRocks),
            GroupByKind::MapKey(key) => format!("{quoted}[{}]", quote_literal(key)),
            GroupByKind::ArrayIndex(index) => self.text(&format!("{quoted}[{index}]")),
        }
    }

    fn text(&self, expression: &str) -> String {
        format!("CAST({expression} AS STRING)")
    }

    fn hint(&self, settings: &str) -> String {
        format!("/*+ SET_VAR({settings}) */")
    }

    fn hint_placement(&self) -> HintPlacement {
        HintPlacement::AfterSelect
    }

    fn schema_statement(&self, connection: &Self::Connection) -> String {
        format!(
            "SELECT column_name, column_type FROM information_schema.columns \
             WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
            quote_literal(&connection.database),
            quote_literal(&connection.table)
        )
    }

    fn show_create_statement(&self, connection: &Self::Connection) -> String {
        format!(
            "SHOW CREATE TABLE {}.{}",
            quote(&connection.database),
            quote(&connection.table)
        )
    }

    async fn query(
        &self,
        connection: &Self::Connection,
        statement: &str,
    ) -> Result<Vec<Vec<Value>>, FetchError> {
        // `_staged` must outlive the connection handshake and the query.
        let (mut conn, _staged) = self.connect(connection).await?;

        let result = conn.query::<mysql_async::Row, _>(statement).await;
        if let Err(e) = conn.disconnect().await {
            tracing::debug!(error = %e, "Error closing StarRocks connection");
        }

        let rows = result.map_err(|e| match e {
            mysql_async::Error::Server(server) => FetchError::Query(server.to_string()),
            other => FetchError::Connection(other.to_string()),
        })?;

        Ok(rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.as_ref(i).map_or(Value::Null, to_json))
                    .collect()
            })
            .collect())
    }
}

/// Converts a protocol value to JSON.
///
/// The text protocol returns most values as bytes; they become strings and
/// are interpreted later by the row model.
fn to_json(value: &mysql_async::Value) -> Value {
    use mysql_async::Value as My;

    match value {
        My::NULL => Value::Null,
        My::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        My::Int(i) => Value::from(*i),
        My::UInt(u) => Value::from(*u),
        My::Float(f) => Number::from_f64(f64::from(*f)).map_or(Value::Null, Value::Number),
        My::Double(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
        My::Date(year, month, day, hour, minute, second, micros) => Value::String(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        )),
        My::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let hours = u32::from(*hours) + days * 24;
            Value::String(format!(
                "{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    }
}
