//! Integration tests for the Docker fetcher.
//!
//! Tests cover:
//! - Merging both output streams of several containers
//! - Skipping containers that refuse access
//! - The "no targets matched" condition
//! - Client-side filtering and grouped graphs
//! - Container context options

use chrono_tz::Tz;
use shared::fetchers::docker::OutputStream;
use shared::fetchers::stream::StreamError;
use shared::fetchers::Fetcher;
use shared::models::{
    DataRequest, GraphDataRequest, ResponseError, SkipReason,
};

use super::common::{docker_fetcher, docker_source, line, FakeEngine, T0};

fn engine() -> FakeEngine {
    FakeEngine::default()
        .container("aaaaaaaaaaaa1111", "web", "running", &[("app", "shop")])
        .container("bbbbbbbbbbbb2222", "worker", "exited", &[("app", "jobs")])
        .logs(
            "aaaaaaaaaaaa1111",
            OutputStream::Stdout,
            line(1_000, "GET /") + &line(4_000, "GET /cart"),
        )
        .logs(
            "aaaaaaaaaaaa1111",
            OutputStream::Stderr,
            line(2_000, "\x1b[31mpanic\x1b[0m: out of stock"),
        )
        .logs(
            "bbbbbbbbbbbb2222",
            OutputStream::Stdout,
            line(3_000, "job done") + "not a timestamp\n" + &line(20_000, "too late"),
        )
}

#[tokio::test]
async fn test_fetch_merges_streams_newest_first() {
    let fetcher = docker_fetcher(engine());
    let request = DataRequest::new(docker_source(&[]), T0, T0 + 10_000);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert!(response.error.is_none());
    assert!(response.skipped.is_empty());
    let messages: Vec<&str> = response
        .rows
        .iter()
        .map(|r| r.data["message"].as_str().unwrap())
        .collect();
    assert_eq!(
        messages,
        vec!["GET /cart", "job done", "panic: out of stock", "GET /"]
    );

    let stderr = &response.rows[2];
    assert_eq!(stderr.data["stream"], "stderr");
    assert_eq!(stderr.data["container_short_id"], "aaaaaaaaaaaa");
    assert_eq!(stderr.data["labels"]["app"], "shop");
    assert_eq!(stderr.record_id.as_deref(), Some("web:stderr#0#0"));
    assert_eq!(stderr.time.unixtime, T0 + 2_000);
}

#[tokio::test]
async fn test_limit_truncates_after_merge() {
    let fetcher = docker_fetcher(engine());
    let request = DataRequest::new(docker_source(&[]), T0, T0 + 10_000).with_limit(2);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert_eq!(response.rows.len(), 2);
    assert_eq!(response.rows[0].time.unixtime, T0 + 4_000);
    assert_eq!(response.rows[1].time.unixtime, T0 + 3_000);
}

#[tokio::test]
async fn test_denied_container_is_skipped() {
    let engine = FakeEngine::default()
        .container("aaaaaaaaaaaa1111", "web", "running", &[])
        .container("bbbbbbbbbbbb2222", "secret", "running", &[])
        .logs(
            "aaaaaaaaaaaa1111",
            OutputStream::Stdout,
            line(1_000, "one") + &line(2_000, "two"),
        )
        .failing(
            "bbbbbbbbbbbb2222",
            OutputStream::Stdout,
            StreamError::PermissionDenied("access denied".to_string()),
        )
        .failing(
            "bbbbbbbbbbbb2222",
            OutputStream::Stderr,
            StreamError::PermissionDenied("access denied".to_string()),
        );
    let fetcher = docker_fetcher(engine);
    let request = DataRequest::new(docker_source(&[]), T0, T0 + 10_000);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert_eq!(response.rows.len(), 2);
    assert!(response.rows.iter().all(|r| r.data["container_name"] == "web"));
    assert_eq!(response.skipped.len(), 2);
    assert!(response
        .skipped
        .iter()
        .all(|s| s.reason == SkipReason::PermissionDenied && s.target.starts_with("secret:")));
}

#[tokio::test]
async fn test_no_matching_container_reports_no_targets() {
    let fetcher = docker_fetcher(engine());
    let request = DataRequest::new(docker_source(&[]), T0, T0 + 10_000)
        .with_context("container", vec!["db".to_string()]);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert!(response.rows.is_empty());
    assert_eq!(response.error, Some(ResponseError::NoTargetsMatched));
    assert!(response.message.is_some());
}

#[tokio::test]
async fn test_container_names_match_exactly() {
    let engine = engine().container("cccccccccccc3333", "web-canary", "running", &[]);
    let fetcher = docker_fetcher(engine);
    let request = DataRequest::new(docker_source(&["web"]), T0, T0 + 10_000);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert_eq!(response.rows.len(), 3);
    assert!(response.rows.iter().all(|r| r.data["container_name"] == "web"));
}

#[tokio::test]
async fn test_filter_is_applied_per_row() {
    let fetcher = docker_fetcher(engine());
    let request = DataRequest::new(docker_source(&[]), T0, T0 + 10_000)
        .with_filter(filter::parse("stream = 'stderr' or labels:app = jobs").unwrap());

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    let messages: Vec<&str> = response
        .rows
        .iter()
        .map(|r| r.data["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["job done", "panic: out of stock"]);
}

#[tokio::test]
async fn test_unknown_filter_field_is_rejected() {
    let fetcher = docker_fetcher(engine());
    let source = docker_source(&[]);

    let validation = fetcher.validate_query(&source, "pod_name = api").await;
    assert!(!validation.valid);
    assert!(validation.error.unwrap().contains("pod_name"));

    assert!(fetcher.validate_query(&source, "").await.valid);
    assert!(fetcher.validate_query(&source, "container_name = web").await.valid);
}

#[tokio::test]
async fn test_graph_grouped_by_label() {
    let fetcher = docker_fetcher(engine());
    let source = docker_source(&[]);
    let group = shared::columns::resolve_group_by(&source, "labels:app").unwrap();
    let request = GraphDataRequest::new(source, T0, T0 + 10_000).with_group_by(group);

    let graph = fetcher.fetch_graph_data(&request).await.unwrap();

    assert_eq!(graph.total, 4);
    assert_eq!(graph.data["shop"].iter().sum::<u64>(), 3);
    assert_eq!(graph.data["jobs"].iter().sum::<u64>(), 1);
    assert_eq!(graph.timestamps.first(), Some(&T0));
    assert_eq!(graph.timestamps.last(), Some(&(T0 + 10_000)));
    for series in graph.data.values() {
        assert_eq!(series.len(), graph.timestamps.len());
    }
}

#[tokio::test]
async fn test_container_options_ordered_by_state() {
    let engine = engine()
        .container("dddddddddddd4444", "cache", "paused", &[])
        .container("eeeeeeeeeeee5555", "api", "running", &[]);
    let fetcher = docker_fetcher(engine);

    let options = fetcher
        .context_options(&docker_source(&[]), "container")
        .await
        .unwrap();

    let names: Vec<&str> = options.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["api", "web", "cache", "worker"]);
    assert_eq!(options[1].details["short_id"], "aaaaaaaaaaaa");
    assert_eq!(options[1].labels["app"], "shop");

    let err = fetcher
        .context_options(&docker_source(&[]), "deployment")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Unsupported context field: deployment"));
}
