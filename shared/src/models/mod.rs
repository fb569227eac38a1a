//! Data models for Lantern.
//!
//! This module contains source configuration, normalized rows, and the
//! request and response types exchanged with fetchers.

pub mod request;
pub mod response;
pub mod row;
pub mod source;

pub use request::{
    context_values, AutocompleteRequest, ContextFilters, DataRequest, GraphDataRequest,
    DEFAULT_LIMIT,
};
pub use response::{
    AutocompleteResponse, ConnectionTestResponse, ContextOption, DataResponse, GraphDataResponse,
    ProbeResult, QueryValidation, ResponseError, SchemaColumn, SchemaProbe, SkipReason,
    SkippedTarget,
};
pub use row::{parse_time, value_text, Row, RowError, RowTime, ROW_ID_COLUMN};
pub use source::{
    BackendConfig, ClickHouseConnection, DockerConnection, KubernetesConnection, Source,
    SourceColumn, SourceError, SourceKind, StarRocksConnection,
};
