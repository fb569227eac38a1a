//! Kubernetes backend.
//!
//! Reads pod container logs across kubeconfig contexts and namespaces. A
//! container with a terminated previous incarnation has that incarnation's
//! logs read as well, so lines written before a crash are not lost.

pub mod client;
pub mod cluster;
pub mod targets;

pub use client::KubeConnector;
pub use cluster::{
    deployment_status, ClusterApi, ClusterConnector, DeploymentInfo, KubeContexts, PodInfo,
    PodLogOptions,
};
pub use targets::{PodTarget, Resolution, ALL_CONTEXTS};

use super::pipeline::{self, FetchTarget, TaskOutcome};
use super::stream::{
    parse_lines, since_seconds, tail_lines, time_value, validate_filter, RowFilter, StreamError,
};
use super::{check_range, FetchError, Fetcher};
use crate::cache::ConfigCache;
use crate::columns::group_key;
use crate::config::FetcherSettings;
use crate::graph::Histogram;
use crate::models::{
    AutocompleteRequest, AutocompleteResponse, BackendConfig, ConnectionTestResponse,
    ContextFilters, ContextOption, DataRequest, DataResponse, GraphDataRequest, GraphDataResponse,
    KubernetesConnection, ProbeResult, QueryValidation, Row, SchemaColumn, SchemaProbe,
    SkippedTarget, Source, SourceColumn,
};
use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Columns of every Kubernetes row, in value order.
pub const COLUMNS: [&str; 10] = [
    "time",
    "context",
    "namespace",
    "pod_name",
    "container_name",
    "node_name",
    "labels",
    "message",
    "stream",
    "status",
];

/// Prefix of lines read from a previous container incarnation.
pub const PREVIOUS_PREFIX: &str = "[PREVIOUS CONTAINER] ";

/// The fixed Kubernetes schema.
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

/// Fetcher for Kubernetes sources.
pub struct KubernetesFetcher {
    settings: FetcherSettings,
    connector: Arc<dyn ClusterConnector>,
    contexts: ConfigCache<Vec<String>>,
}

impl KubernetesFetcher {
    /// Creates a fetcher talking to real clusters.
    #[must_use]
    pub fn new(settings: FetcherSettings) -> Self {
        Self::with_connector(
            settings,
            Arc::new(KubeConnector::new(Duration::from_secs(
                settings.connect_timeout_secs,
            ))),
        )
    }

    /// Creates a fetcher using `connector` to reach clusters.
    #[must_use]
    pub fn with_connector(settings: FetcherSettings, connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            settings,
            connector,
            contexts: ConfigCache::new(),
        }
    }

    async fn resolve(
        &self,
        source: &Source,
        filters: &ContextFilters,
    ) -> Result<Resolution, FetchError> {
        let connection = connection(&source.backend)?;
        let resolution =
            targets::resolve(self.connector.as_ref(), &self.contexts, connection, filters).await?;
        tracing::debug!(
            source = %source.slug,
            targets = resolution.targets.len(),
            skipped = resolution.skipped.len(),
            "Resolved Kubernetes targets"
        );
        Ok(resolution)
    }
}

fn connection(config: &BackendConfig) -> Result<&KubernetesConnection, FetchError> {
    match config {
        BackendConfig::Kubernetes(connection) => Ok(connection),
        other => Err(FetchError::Config(format!(
            "Expected a kubernetes connection, got {}",
            other.kind()
        ))),
    }
}

/// Time window and log read sizing shared by every task of a request.
#[derive(Debug, Clone, Copy)]
struct ReadWindow {
    time_from: i64,
    time_to: i64,
    tail_lines: i64,
    since_seconds: Option<i64>,
}

impl ReadWindow {
    fn new(time_from: i64, time_to: i64, base_tail: usize, pods: usize) -> Self {
        Self {
            time_from,
            time_to,
            tail_lines: tail_lines(base_tail, pods),
            since_seconds: since_seconds(time_from, Utc::now()),
        }
    }
}

/// Turns the log text of one incarnation into filtered rows.
fn incarnation_rows(
    target: &PodTarget,
    source: &Source,
    row_filter: &RowFilter,
    text: &str,
    incarnation: u8,
    window: ReadWindow,
    tz: Tz,
) -> Result<Vec<Row>, StreamError> {
    let pod = target.pod.as_ref();
    let labels: Map<String, Value> = pod
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let label = format!("{}#{incarnation}", target.label());
    let prefix = if incarnation == 0 { "" } else { PREVIOUS_PREFIX };

    let mut rows = Vec::new();
    for line in parse_lines(text, window.time_from, window.time_to) {
        let values = vec![
            time_value(line.time),
            Value::from(target.context.as_str()),
            Value::from(pod.namespace.as_str()),
            Value::from(pod.name.as_str()),
            Value::from(target.container.as_str()),
            Value::from(pod.node_name.as_str()),
            Value::Object(labels.clone()),
            Value::String(format!("{prefix}{}", line.message)),
            Value::from("stdout"),
            Value::from(pod.phase.as_str()),
        ];
        let row = Row::new(source, &COLUMNS, values, tz)
            .map_err(|e| StreamError::Other(e.to_string()))?
            .with_record_id(format!("{label}#{}", line.position));
        if row_filter.accepts(&row) {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Rows of one pod container.
struct ContainerRead {
    rows: Vec<Row>,
    /// Set when the previous incarnation exists but could not be read.
    previous_skipped: Option<SkippedTarget>,
}

/// Reads one pod container, including its previous incarnation when the
/// container has restarted.
///
/// Only a failure on the current incarnation fails the read. A failure on the
/// previous one keeps the current rows and is reported as a skipped
/// `<target>/previous`.
async fn read_container(
    target: &PodTarget,
    source: &Source,
    row_filter: &RowFilter,
    window: ReadWindow,
    tz: Tz,
) -> Result<ContainerRead, StreamError> {
    let mut options = PodLogOptions {
        container: target.container.clone(),
        tail_lines: Some(window.tail_lines),
        since_seconds: window.since_seconds,
        previous: false,
    };
    let namespace = &target.pod.namespace;
    let pod = &target.pod.name;

    let current = target.api.pod_logs(namespace, pod, &options).await?;
    let mut rows = incarnation_rows(target, source, row_filter, &current, 0, window, tz)?;
    let mut previous_skipped = None;

    if target.pod.restarted.contains(&target.container) {
        options.previous = true;
        match target.api.pod_logs(namespace, pod, &options).await {
            Ok(previous) => {
                rows.extend(incarnation_rows(
                    target, source, row_filter, &previous, 1, window, tz,
                )?);
            }
            Err(e) => {
                previous_skipped = Some(pipeline::skip(format!("{}/previous", target.label()), e));
            }
        }
    }

    Ok(ContainerRead {
        rows,
        previous_skipped,
    })
}

/// Splits container reads into their payloads and the previous incarnations
/// that could not be read.
fn split_reads<T>(reads: Vec<(T, Option<SkippedTarget>)>) -> (Vec<T>, Vec<SkippedTarget>) {
    let (payloads, previous): (Vec<T>, Vec<Option<SkippedTarget>>) = reads.into_iter().unzip();
    (payloads, previous.into_iter().flatten().collect())
}

#[async_trait]
impl Fetcher for KubernetesFetcher {
    async fn validate_query(&self, _source: &Source, text: &str) -> QueryValidation {
        validate_filter(text, &COLUMNS)
    }

    async fn test_connection(&self, config: &BackendConfig) -> ConnectionTestResponse {
        let connection = match connection(config) {
            Ok(connection) => connection,
            Err(e) => return ConnectionTestResponse::unreachable(e.to_string()),
        };

        let contexts =
            match targets::configured_contexts(self.connector.as_ref(), &self.contexts, connection)
                .await
            {
                Ok(contexts) if contexts.is_empty() => {
                    return ConnectionTestResponse::unreachable(
                        "No kubeconfig context matched the configuration",
                    )
                }
                Ok(contexts) => contexts,
                Err(e) => return ConnectionTestResponse::unreachable(e.to_string()),
            };

        for context in contexts.iter() {
            let probe = match self.connector.connect(connection, context).await {
                Ok(api) => api.list_namespaces().await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = probe {
                tracing::warn!(context = %context, error = %e, "Kubernetes context unreachable");
                return ConnectionTestResponse::unreachable(format!("{context}: {e}"));
            }
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

        let resolution = self.resolve(source, &request.context_filters).await?;
        if resolution.targets.is_empty() {
            return Ok(DataResponse::no_targets(
                "No pod containers matched the selection",
                resolution.skipped,
            ));
        }

        let window = ReadWindow::new(
            request.time_from,
            request.time_to,
            request.limit,
            resolution.pods,
        );
        let row_filter = &row_filter;
        let report = pipeline::run(
            resolution.targets,
            self.settings.max_concurrent_requests,
            move |target| async move {
                let read = read_container(&target, source, row_filter, window, tz)
                    .await
                    .map(|read| (read.rows, read.previous_skipped));
                TaskOutcome::from(read)
            },
        )
        .await;

        let (batches, previous_skipped) = split_reads(report.results);
        let mut skipped = resolution.skipped;
        skipped.extend(report.skipped);
        skipped.extend(previous_skipped);
        Ok(DataResponse {
            rows: pipeline::merge_rows(batches, request.limit),
            skipped,
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

        let resolution = self.resolve(source, &request.context_filters).await?;
        if resolution.targets.is_empty() {
            return Ok(GraphDataResponse::no_targets(
                request.time_from,
                request.time_to,
                "No pod containers matched the selection",
                resolution.skipped,
            ));
        }

        let base_tail = usize::try_from(self.settings.graph_tail_limit).unwrap_or(1);
        let window = ReadWindow::new(
            request.time_from,
            request.time_to,
            base_tail,
            resolution.pods,
        );
        let group_by = request.group_by.as_ref();
        let row_filter = &row_filter;
        let report = pipeline::run(
            resolution.targets,
            self.settings.max_concurrent_requests,
            move |target| async move {
                let points = read_container(&target, source, row_filter, window, Tz::UTC)
                    .await
                    .map(|read| {
                        let points = read
                            .rows
                            .into_iter()
                            .map(|row| {
                                let group = group_by
                                    .map_or_else(|| group_key(None), |g| g.key_for(&row.data));
                                (row.time.unixtime, group)
                            })
                            .collect::<Vec<_>>();
                        (points, read.previous_skipped)
                    });
                TaskOutcome::from(points)
            },
        )
        .await;

        let (batches, previous_skipped) = split_reads(report.results);
        let mut histogram = Histogram::new(request.time_from, request.time_to, group_by.is_some());
        for (ts, group) in batches.into_iter().flatten() {
            histogram.record(ts, &group);
        }
        let mut skipped = resolution.skipped;
        skipped.extend(report.skipped);
        skipped.extend(previous_skipped);
        Ok(GraphDataResponse {
            skipped,
            ..histogram.finish()
        })
    }

    async fn context_options(
        &self,
        source: &Source,
        field: &str,
    ) -> Result<Vec<ContextOption>, FetchError> {
        if field != "deployment" {
            return Err(FetchError::Unsupported(format!(
                "Unsupported context field: {field}"
            )));
        }

        let connection = connection(&source.backend)?;
        if connection.namespaces.is_empty() {
            return Err(FetchError::Config(
                "Namespace is required in source configuration".to_string(),
            ));
        }

        let contexts =
            targets::configured_contexts(self.connector.as_ref(), &self.contexts, connection)
                .await?;

        let mut options = Vec::new();
        for context in contexts.iter() {
            let api = self
                .connector
                .connect(connection, context)
                .await
                .map_err(|e| FetchError::Connection(e.to_string()))?;
            for namespace in &connection.namespaces {
                let deployments = api.list_deployments(namespace).await.map_err(|e| {
                    FetchError::Connection(format!("Failed to list deployments: {e}"))
                })?;
                options.extend(deployments.into_iter().map(|d| {
                    let mut details = Map::new();
                    details.insert("namespace".to_string(), Value::from(d.namespace));
                    details.insert("context".to_string(), Value::from(context.as_str()));
                    details.insert("replicas_desired".to_string(), Value::from(d.replicas_desired));
                    details.insert("replicas_ready".to_string(), Value::from(d.replicas_ready));
                    ContextOption {
                        name: d.name,
                        status: d.status,
                        labels: d.labels,
                        details,
                    }
                }));
            }
        }

        options.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(options)
    }
}
