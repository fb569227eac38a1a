//! Backend fetchers.
//!
//! Every backend kind implements [`Fetcher`]. SQL backends push filters
//! and aggregation down to the database; streaming backends read container
//! logs concurrently and filter and aggregate in-process.
//!
//! [`Fetchers`] maps each [`SourceKind`] to its fetcher. The mapping is an
//! exhaustive match, so a new kind does not compile until it has one.

pub mod clickhouse;
pub mod connect;
pub mod docker;
pub mod kubernetes;
pub mod pipeline;
pub mod sql;
pub mod starrocks;
pub mod stream;

use crate::columns::ColumnError;
use crate::config::FetcherSettings;
use crate::models::{
    AutocompleteRequest, AutocompleteResponse, BackendConfig, ConnectionTestResponse,
    ContextOption, DataRequest, DataResponse, GraphDataRequest, GraphDataResponse,
    QueryValidation, RowError, Source, SourceKind,
};
use async_trait::async_trait;
use chrono_tz::Tz;
use filter::FilterError;
use thiserror::Error;

pub use self::clickhouse::ClickHouseFetcher;
pub use self::docker::DockerFetcher;
pub use self::kubernetes::KubernetesFetcher;
pub use self::sql::SqlFetcher;
pub use self::starrocks::StarRocksFetcher;

/// Errors that can occur while serving a fetch operation.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The filter cannot be used with the source.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The request itself is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The group-by reference cannot be resolved.
    #[error(transparent)]
    GroupBy(#[from] ColumnError),

    /// The source configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backend could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed a query.
    #[error("Query error: {0}")]
    Query(String),

    /// A backend record could not be normalized.
    #[error(transparent)]
    Row(#[from] RowError),

    /// The operation is not available for this backend.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Local I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FilterError> for FetchError {
    fn from(err: FilterError) -> Self {
        Self::InvalidQuery(err.to_string())
    }
}

impl From<filter::ParseError> for FetchError {
    fn from(err: filter::ParseError) -> Self {
        Self::InvalidQuery(err.to_string())
    }
}

/// Operations every backend supports.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Checks that `text` is a usable filter for `source`.
    ///
    /// Empty text is always valid and never touches the backend.
    async fn validate_query(&self, source: &Source, text: &str) -> QueryValidation;

    /// Probes reachability and schema of a backend.
    async fn test_connection(&self, config: &BackendConfig) -> ConnectionTestResponse;

    /// Suggests values of a column.
    ///
    /// # Errors
    ///
    /// Returns a `FetchError` if the column is unknown or the backend fails.
    async fn autocomplete(
        &self,
        request: &AutocompleteRequest,
    ) -> Result<AutocompleteResponse, FetchError>;

    /// Returns rows matching a request, newest first, with times rendered in `tz`.
    ///
    /// # Errors
    ///
    /// Returns a `FetchError` if the request is invalid or the backend fails.
    async fn fetch_data(&self, request: &DataRequest, tz: Tz)
        -> Result<DataResponse, FetchError>;

    /// Returns a histogram of rows matching a request.
    ///
    /// # Errors
    ///
    /// Returns a `FetchError` if the request is invalid or the backend fails.
    async fn fetch_graph_data(
        &self,
        request: &GraphDataRequest,
    ) -> Result<GraphDataResponse, FetchError>;

    /// Lists the selectable values of a context field.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Unsupported` for backends or fields without
    /// context options.
    async fn context_options(
        &self,
        source: &Source,
        field: &str,
    ) -> Result<Vec<ContextOption>, FetchError> {
        let _ = source;
        Err(FetchError::Unsupported(format!(
            "Unsupported context field: {field}"
        )))
    }
}

/// Checks the shared preconditions of a time-ranged request.
///
/// # Errors
///
/// Returns `FetchError::InvalidRequest` if the range is inverted.
pub fn check_range(time_from: i64, time_to: i64) -> Result<(), FetchError> {
    if time_from > time_to {
        return Err(FetchError::InvalidRequest(format!(
            "time_from ({time_from}) is after time_to ({time_to})"
        )));
    }
    Ok(())
}

/// The fetcher for every source kind.
pub struct Fetchers {
    clickhouse: ClickHouseFetcher,
    starrocks: StarRocksFetcher,
    docker: DockerFetcher,
    kubernetes: KubernetesFetcher,
}

impl Fetchers {
    /// Creates fetchers talking to real backends.
    #[must_use]
    pub fn new(settings: FetcherSettings) -> Self {
        Self {
            clickhouse: ClickHouseFetcher::new(settings),
            starrocks: StarRocksFetcher::new(settings),
            docker: DockerFetcher::new(settings),
            kubernetes: KubernetesFetcher::new(settings),
        }
    }

    /// Creates a registry from explicit streaming fetchers, e.g. ones built
    /// on fake engines in tests.
    #[must_use]
    pub fn with_streaming(
        settings: FetcherSettings,
        docker: DockerFetcher,
        kubernetes: KubernetesFetcher,
    ) -> Self {
        Self {
            clickhouse: ClickHouseFetcher::new(settings),
            starrocks: StarRocksFetcher::new(settings),
            docker,
            kubernetes,
        }
    }

    /// The fetcher for `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: SourceKind) -> &dyn Fetcher {
        match kind {
            SourceKind::Clickhouse => &self.clickhouse,
            SourceKind::Starrocks => &self.starrocks,
            SourceKind::Docker => &self.docker,
            SourceKind::Kubernetes => &self.kubernetes,
        }
    }

    /// The fetcher for `source`.
    #[must_use]
    pub fn for_source(&self, source: &Source) -> &dyn Fetcher {
        self.for_kind(source.kind())
    }
}
