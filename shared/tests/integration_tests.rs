//! Integration tests for the Lantern fetchers.
//!
//! These tests drive the streaming fetchers end to end through in-memory
//! container engines and clusters, and check dispatch by source kind.

mod integration_tests {
    pub mod common;
    mod docker_tests;
    mod kubernetes_tests;
}

use chrono_tz::Tz;
use integration_tests::common::{
    docker_fetcher, docker_source, kubernetes_fetcher, kubernetes_source, line, settings,
    FakeCluster, FakeClusters, FakeEngine, T0,
};
use shared::fetchers::docker::OutputStream;
use shared::fetchers::{FetchError, Fetchers};
use shared::models::{
    AutocompleteRequest, BackendConfig, ClickHouseConnection, DataRequest, Source, SourceColumn,
};
use std::sync::Arc;

fn registry() -> Fetchers {
    let engine = FakeEngine::default()
        .container("aaaaaaaaaaaa1111", "web", "running", &[])
        .logs("aaaaaaaaaaaa1111", OutputStream::Stdout, line(1_000, "from docker"));
    let cluster = FakeCluster::default()
        .namespace("shop")
        .pod("shop", "web-1", &["app"], &[])
        .logs("web-1", "app", false, line(2_000, "from kubernetes"));

    Fetchers::with_streaming(
        settings(),
        docker_fetcher(engine),
        kubernetes_fetcher(Arc::new(FakeClusters::new("prod").context("prod", cluster))),
    )
}

#[tokio::test]
async fn test_dispatch_by_source_kind() {
    let fetchers = registry();

    for (source, expected) in [
        (docker_source(&[]), "from docker"),
        (kubernetes_source(&[], &[]), "from kubernetes"),
    ] {
        let request = DataRequest::new(Arc::clone(&source), T0, T0 + 10_000);
        let response = fetchers
            .for_source(&source)
            .fetch_data(&request, Tz::UTC)
            .await
            .unwrap();
        assert_eq!(response.rows.len(), 1);
        assert_eq!(response.rows[0].data["message"], expected);
        assert_eq!(response.rows[0].source, source.slug);
    }
}

#[tokio::test]
async fn test_rows_are_formatted_in_caller_timezone() {
    let fetchers = registry();
    let source = docker_source(&[]);
    let request = DataRequest::new(Arc::clone(&source), T0, T0 + 10_000);

    let tz: Tz = "Europe/Berlin".parse().unwrap();
    let response = fetchers
        .for_source(&source)
        .fetch_data(&request, tz)
        .await
        .unwrap();

    // 10:00:01Z is 11:00:01 in Berlin in March; the epoch value is unchanged.
    assert!(response.rows[0].time.datetime.contains("11:00:01"));
    assert_eq!(response.rows[0].time.unixtime, T0 + 1_000);
}

#[tokio::test]
async fn test_inverted_range_is_rejected() {
    let fetchers = registry();
    let source = docker_source(&[]);
    let request = DataRequest::new(Arc::clone(&source), T0 + 1, T0);

    let err = fetchers
        .for_source(&source)
        .fetch_data(&request, Tz::UTC)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_sql_validation_stays_offline() {
    let fetchers = registry();
    let source = Source::new(
        "events",
        vec![
            SourceColumn::new("ts", "DateTime64(3)"),
            SourceColumn::new("level", "String"),
        ],
        "ts",
        BackendConfig::Clickhouse(ClickHouseConnection {
            host: "unreachable.invalid".to_string(),
            port: 8123,
            username: "default".to_string(),
            password: String::new(),
            database: "logs".to_string(),
            table: "events".to_string(),
            ssl: false,
        }),
    );
    let fetcher = fetchers.for_source(&source);

    assert!(fetcher.validate_query(&source, "").await.valid);
    assert!(fetcher.validate_query(&source, "level = error").await.valid);
    let invalid = fetcher.validate_query(&source, "host = web").await;
    assert!(!invalid.valid);
    assert!(invalid.error.is_some());

    let err = fetcher
        .autocomplete(&AutocompleteRequest::new(
            Arc::new(source.clone()),
            "missing",
            T0,
            T0 + 1,
            "x",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidRequest(_)));

    assert!(matches!(
        fetcher.context_options(&source, "container").await,
        Err(FetchError::Unsupported(_))
    ));
}
