//! Docker backend.
//!
//! Logs of every selected container are read from the engine API, one task
//! per container and output stream, and filtered in-process.

use super::pipeline::{self, FetchTarget, TaskOutcome};
use super::stream::{parse_lines, time_value, validate_filter, RowFilter, StreamError};
use super::{check_range, FetchError, Fetcher};
use crate::columns::group_key;
use crate::config::FetcherSettings;
use crate::graph::Histogram;
use crate::models::{
    context_values, AutocompleteRequest, AutocompleteResponse, BackendConfig,
    ConnectionTestResponse, ContextFilters, ContextOption, DataRequest, DataResponse, DockerConnection,
    GraphDataRequest, GraphDataResponse, ProbeResult, QueryValidation, Row, SchemaColumn,
    SchemaProbe, Source, SourceColumn,
};
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, LogsOptions};
use bollard::Docker;
use chrono_tz::Tz;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Columns of every Docker row, in value order.
pub const COLUMNS: [&str; 8] = [
    "time",
    "container_id",
    "container_name",
    "container_short_id",
    "message",
    "status",
    "stream",
    "labels",
];

/// Lifecycle states in the order containers are listed.
const STATE_ORDER: [&str; 7] = [
    "running",
    "restarting",
    "paused",
    "removing",
    "created",
    "exited",
    "dead",
];

/// The fixed Docker schema.
#[must_use]
pub fn schema() -> Vec<SourceColumn> {
    COLUMNS
        .iter()
        .map(|name| match *name {
            "time" => SourceColumn::new(*name, "DateTime64"),
            "labels" => SourceColumn::new(*name, "String").with_json_string(),
            _ => SourceColumn::new(*name, "String"),
        })
        .collect()
}

/// A container as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Full id.
    pub id: String,
    /// Name without the leading slash.
    pub name: String,
    /// Lifecycle state, e.g. `running`.
    pub status: String,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
}

impl ContainerInfo {
    /// The first twelve characters of the id.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

/// A container output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Stream name as stored in the `stream` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// The engine operations the fetcher needs.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Lists containers, including stopped ones. An empty `names` lists all.
    async fn list_containers(&self, names: &[String]) -> Result<Vec<ContainerInfo>, StreamError>;

    /// Reads timestamped logs of one stream between two epoch seconds.
    async fn logs(
        &self,
        id: &str,
        stream: OutputStream,
        since: i64,
        until: i64,
    ) -> Result<String, StreamError>;
}

/// Opens engines for connection settings.
pub trait EngineConnector: Send + Sync {
    /// Connects to the engine described by `connection`.
    ///
    /// # Errors
    ///
    /// Returns a `StreamError` if the address is unusable.
    fn connect(&self, connection: &DockerConnection) -> Result<Arc<dyn ContainerEngine>, StreamError>;
}

/// Connects through the Docker engine API.
#[derive(Debug, Clone, Copy)]
pub struct BollardConnector {
    timeout_secs: u64,
}

impl EngineConnector for BollardConnector {
    fn connect(&self, connection: &DockerConnection) -> Result<Arc<dyn ContainerEngine>, StreamError> {
        let address = connection.address.trim();
        let docker = if address.is_empty() {
            Docker::connect_with_local_defaults()
        } else if let Some(path) = address.strip_prefix("unix://") {
            Docker::connect_with_socket(path, self.timeout_secs, bollard::API_DEFAULT_VERSION)
        } else {
            let url = address.replacen("tcp://", "http://", 1);
            Docker::connect_with_http(&url, self.timeout_secs, bollard::API_DEFAULT_VERSION)
        }
        .map_err(engine_error)?;
        Ok(Arc::new(BollardEngine { docker }))
    }
}

struct BollardEngine {
    docker: Docker,
}

fn engine_error(err: bollard::errors::Error) -> StreamError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => StreamError::from_status(status_code, message),
        other => StreamError::Other(other.to_string()),
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn list_containers(&self, names: &[String]) -> Result<Vec<ContainerInfo>, StreamError> {
        let mut filters = HashMap::new();
        if !names.is_empty() {
            filters.insert("name".to_string(), names.to_vec());
        }
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(engine_error)?;

        Ok(summaries
            .into_iter()
            .map(|summary| ContainerInfo {
                id: summary.id.unwrap_or_default(),
                name: summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                status: summary.state.unwrap_or_default(),
                labels: summary.labels.unwrap_or_default().into_iter().collect(),
            })
            .collect())
    }

    async fn logs(
        &self,
        id: &str,
        stream: OutputStream,
        since: i64,
        until: i64,
    ) -> Result<String, StreamError> {
        let options = LogsOptions::<String> {
            stdout: stream == OutputStream::Stdout,
            stderr: stream == OutputStream::Stderr,
            since,
            until,
            timestamps: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut output = self.docker.logs(id, Some(options));
        let mut text = String::new();
        while let Some(chunk) = output.next().await {
            let chunk = chunk.map_err(engine_error)?;
            text.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }
        Ok(text)
    }
}

/// One container output stream to read.
struct StreamTarget {
    engine: Arc<dyn ContainerEngine>,
    container: Arc<ContainerInfo>,
    stream: OutputStream,
}

impl FetchTarget for StreamTarget {
    fn label(&self) -> String {
        format!("{}:{}", self.container.name, self.stream.as_str())
    }
}

/// Fetcher for Docker sources.
pub struct DockerFetcher {
    settings: FetcherSettings,
    connector: Arc<dyn EngineConnector>,
}

impl DockerFetcher {
    /// Creates a fetcher talking to real engines.
    #[must_use]
    pub fn new(settings: FetcherSettings) -> Self {
        Self::with_connector(
            settings,
            Arc::new(BollardConnector {
                timeout_secs: settings.connect_timeout_secs,
            }),
        )
    }

    /// Creates a fetcher using `connector` to reach engines.
    #[must_use]
    pub fn with_connector(settings: FetcherSettings, connector: Arc<dyn EngineConnector>) -> Self {
        Self {
            settings,
            connector,
        }
    }

    fn engine(&self, source: &Source) -> Result<Arc<dyn ContainerEngine>, FetchError> {
        let BackendConfig::Docker(connection) = &source.backend else {
            return Err(FetchError::Config(format!(
                "Source '{}' is not a docker source",
                source.slug
            )));
        };
        self.connector
            .connect(connection)
            .map_err(|e| FetchError::Connection(e.to_string()))
    }

    /// Resolves the container streams a request reads.
    async fn targets(
        &self,
        source: &Source,
        filters: &ContextFilters,
    ) -> Result<Vec<StreamTarget>, FetchError> {
        let engine = self.engine(source)?;
        let configured = match &source.backend {
            BackendConfig::Docker(connection) => connection.containers.clone(),
            _ => Vec::new(),
        };
        let requested: Vec<String> = context_values(filters, "container")
            .into_iter()
            .map(str::to_string)
            .collect();

        let names = if requested.is_empty() {
            configured.clone()
        } else {
            requested
        };

        let containers = engine
            .list_containers(&names)
            .await
            .map_err(|e| FetchError::Connection(e.to_string()))?;

        // The engine's name filter matches substrings; keep exact names only.
        let targets: Vec<StreamTarget> = containers
            .into_iter()
            .filter(|c| names.is_empty() || names.contains(&c.name))
            .filter(|c| configured.is_empty() || configured.contains(&c.name))
            .flat_map(|container| {
                let container = Arc::new(container);
                [OutputStream::Stdout, OutputStream::Stderr].map(|stream| StreamTarget {
                    engine: Arc::clone(&engine),
                    container: Arc::clone(&container),
                    stream,
                })
            })
            .collect();

        tracing::debug!(source = %source.slug, targets = targets.len(), "Resolved container streams");
        Ok(targets)
    }
}

/// Reads one container stream and returns the rows passing `filter`.
async fn read_stream(
    target: &StreamTarget,
    source: &Source,
    row_filter: &RowFilter,
    time_from: i64,
    time_to: i64,
    tz: Tz,
) -> Result<Vec<Row>, StreamError> {
    let since = time_from.div_euclid(1000);
    let until = time_to.div_euclid(1000) + 1;
    let text = target
        .engine
        .logs(&target.container.id, target.stream, since, until)
        .await?;

    let container = target.container.as_ref();
    let labels: Map<String, Value> = container
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let label = target.label();

    let mut rows = Vec::new();
    for line in parse_lines(&text, time_from, time_to) {
        let values = vec![
            time_value(line.time),
            Value::from(container.id.as_str()),
            Value::from(container.name.as_str()),
            Value::from(container.short_id()),
            Value::String(line.message),
            Value::from(container.status.as_str()),
            Value::from(target.stream.as_str()),
            Value::Object(labels.clone()),
        ];
        let row = Row::new(source, &COLUMNS, values, tz)
            .map_err(|e| StreamError::Other(e.to_string()))?
            .with_record_id(format!("{label}#0#{}", line.position));
        if row_filter.accepts(&row) {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn status_rank(status: &str) -> usize {
    STATE_ORDER
        .iter()
        .position(|s| *s == status)
        .unwrap_or(STATE_ORDER.len())
}

#[async_trait]
impl Fetcher for DockerFetcher {
    async fn validate_query(&self, _source: &Source, text: &str) -> QueryValidation {
        validate_filter(text, &COLUMNS)
    }

    async fn test_connection(&self, config: &BackendConfig) -> ConnectionTestResponse {
        let BackendConfig::Docker(connection) = config else {
            return ConnectionTestResponse::unreachable(format!(
                "Expected a docker connection, got {}",
                config.kind()
            ));
        };

        let probe = match self.connector.connect(connection) {
            Ok(engine) => engine.list_containers(&[]).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = probe {
            tracing::warn!(address = %connection.address, error = %e, "Docker engine unreachable");
            return ConnectionTestResponse::unreachable(e.to_string());
        }

        ConnectionTestResponse {
            reachability: ProbeResult::passed(),
            schema: SchemaProbe {
                result: true,
                data: schema()
                    .into_iter()
                    .map(|c| SchemaColumn::new(c.name, c.type_name, c.json_string))
                    .collect(),
                ..SchemaProbe::default()
            },
        }
    }

    async fn autocomplete(
        &self,
        _request: &AutocompleteRequest,
    ) -> Result<AutocompleteResponse, FetchError> {
        Ok(AutocompleteResponse::default())
    }

    async fn fetch_data(&self, request: &DataRequest, tz: Tz) -> Result<DataResponse, FetchError> {
        check_range(request.time_from, request.time_to)?;
        let source = request.source.as_ref();
        let row_filter = RowFilter::new(request.filter.as_ref(), &COLUMNS)?;

        let targets = self.targets(source, &request.context_filters).await?;
        if targets.is_empty() {
            return Ok(DataResponse::no_targets(
                "No containers matched the selection",
                Vec::new(),
            ));
        }

        let row_filter = &row_filter;
        let (from, to) = (request.time_from, request.time_to);
        let report = pipeline::run(
            targets,
            self.settings.max_concurrent_requests,
            move |target| async move {
                TaskOutcome::from(read_stream(&target, source, row_filter, from, to, tz).await)
            },
        )
        .await;

        Ok(DataResponse {
            rows: pipeline::merge_rows(report.results, request.limit),
            skipped: report.skipped,
            ..DataResponse::default()
        })
    }

    async fn fetch_graph_data(
        &self,
        request: &GraphDataRequest,
    ) -> Result<GraphDataResponse, FetchError> {
        check_range(request.time_from, request.time_to)?;
        let source = request.source.as_ref();
        let row_filter = RowFilter::new(request.filter.as_ref(), &COLUMNS)?;

        let targets = self.targets(source, &request.context_filters).await?;
        if targets.is_empty() {
            return Ok(GraphDataResponse::no_targets(
                request.time_from,
                request.time_to,
                "No containers matched the selection",
                Vec::new(),
            ));
        }

        let group_by = request.group_by.as_ref();
        let row_filter = &row_filter;
        let (from, to) = (request.time_from, request.time_to);
        let report = pipeline::run(
            targets,
            self.settings.max_concurrent_requests,
            move |target| async move {
                let points = read_stream(&target, source, row_filter, from, to, Tz::UTC)
                    .await
                    .map(|rows| {
                        rows.into_iter()
                            .map(|row| {
                                let group = group_by
                                    .map_or_else(|| group_key(None), |g| g.key_for(&row.data));
                                (row.time.unixtime, group)
                            })
                            .collect::<Vec<_>>()
                    });
                TaskOutcome::from(points)
            },
        )
        .await;

        let mut histogram = Histogram::new(request.time_from, request.time_to, group_by.is_some());
        for (ts, group) in report.results.into_iter().flatten() {
            histogram.record(ts, &group);
        }
        Ok(GraphDataResponse {
            skipped: report.skipped,
            ..histogram.finish()
        })
    }

    async fn context_options(
        &self,
        source: &Source,
        field: &str,
    ) -> Result<Vec<ContextOption>, FetchError> {
        if field != "container" {
            return Err(FetchError::Unsupported(format!(
                "Unsupported context field: {field}"
            )));
        }

        let containers = self
            .engine(source)?
            .list_containers(&[])
            .await
            .map_err(|e| FetchError::Connection(e.to_string()))?;

        let mut options: Vec<ContextOption> = containers
            .into_iter()
            .map(|c| {
                let mut details = Map::new();
                details.insert("short_id".to_string(), Value::from(c.short_id()));
                details.insert("id".to_string(), Value::from(c.id.as_str()));
                ContextOption {
                    name: c.name,
                    status: c.status,
                    labels: c.labels,
                    details,
                }
            })
            .collect();

        options.sort_by(|a, b| {
            status_rank(&a.status)
                .cmp(&status_rank(&b.status))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(options)
    }
}
