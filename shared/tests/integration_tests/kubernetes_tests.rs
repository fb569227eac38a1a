//! Integration tests for the Kubernetes fetcher.
//!
//! Tests cover:
//! - Reading pod containers across namespaces and contexts
//! - Restart recovery through the previous container incarnation
//! - Skipping denied targets without failing the request
//! - Deployment, pod and container selection
//! - Grouped graphs and deployment context options

use chrono_tz::Tz;
use shared::columns::resolve_group_by;
use shared::fetchers::kubernetes::PREVIOUS_PREFIX;
use shared::fetchers::stream::StreamError;
use shared::fetchers::{FetchError, Fetcher};
use shared::models::{
    BackendConfig, DataRequest, GraphDataRequest, ResponseError, SkipReason,
};
use std::sync::Arc;

use super::common::{
    kubernetes_fetcher, kubernetes_source, line, FakeCluster, FakeClusters, T0,
};

fn prod() -> FakeCluster {
    FakeCluster::default()
        .namespace("shop")
        .namespace("billing")
        .pod("shop", "web-1", &["app", "proxy"], &[("app", "web")])
        .pod("shop", "web-2", &["app"], &[("app", "web")])
        .pod("billing", "invoice-1", &["app"], &[("app", "invoice")])
        .deployment("shop", "web", &[("app", "web")])
        .deployment("billing", "invoice", &[("app", "invoice")])
        .logs("web-1", "app", false, line(1_000, "web-1 started"))
        .logs("web-1", "proxy", false, line(1_500, "proxy ready"))
        .logs("web-2", "app", false, line(2_000, "web-2 started"))
        .logs("invoice-1", "app", false, line(3_000, "invoice sent"))
}

fn clusters() -> Arc<FakeClusters> {
    Arc::new(FakeClusters::new("prod").context("prod", prod()))
}

fn messages(rows: &[shared::models::Row]) -> Vec<&str> {
    rows.iter()
        .map(|r| r.data["message"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_fetch_reads_every_container() {
    let fetcher = kubernetes_fetcher(clusters());
    let request = DataRequest::new(kubernetes_source(&[], &[]), T0, T0 + 10_000);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert!(response.skipped.is_empty());
    assert_eq!(
        messages(&response.rows),
        vec!["invoice sent", "web-2 started", "proxy ready", "web-1 started"]
    );

    let proxy = &response.rows[2];
    assert_eq!(proxy.data["context"], "prod");
    assert_eq!(proxy.data["namespace"], "shop");
    assert_eq!(proxy.data["pod_name"], "web-1");
    assert_eq!(proxy.data["container_name"], "proxy");
    assert_eq!(proxy.data["node_name"], "node-1");
    assert_eq!(proxy.data["status"], "Running");
    assert_eq!(proxy.data["stream"], "stdout");
    assert_eq!(proxy.data["labels"]["app"], "web");
    assert_eq!(proxy.record_id.as_deref(), Some("prod/shop/web-1/proxy#0#0"));
}

#[tokio::test]
async fn test_restarted_container_includes_previous_incarnation() {
    let cluster = FakeCluster::default()
        .namespace("shop")
        .pod("shop", "web-1", &["app"], &[])
        .restarted("app")
        .logs("web-1", "app", false, line(5_000, "booted again"))
        .logs("web-1", "app", true, line(1_000, "out of memory"));
    let fetcher = kubernetes_fetcher(Arc::new(FakeClusters::new("prod").context("prod", cluster)));
    let request = DataRequest::new(kubernetes_source(&[], &["shop"]), T0, T0 + 10_000);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert_eq!(
        messages(&response.rows),
        vec![
            "booted again".to_string(),
            format!("{PREVIOUS_PREFIX}out of memory")
        ]
    );
    assert_eq!(
        response.rows[1].record_id.as_deref(),
        Some("prod/shop/web-1/app#1#0")
    );
}

#[tokio::test]
async fn test_missing_previous_incarnation_keeps_current_rows() {
    let cluster = FakeCluster::default()
        .namespace("shop")
        .pod("shop", "web-1", &["app"], &[])
        .restarted("app")
        .logs("web-1", "app", false, line(5_000, "booted again"));
    let fetcher = kubernetes_fetcher(Arc::new(FakeClusters::new("prod").context("prod", cluster)));
    let request = DataRequest::new(kubernetes_source(&[], &["shop"]), T0, T0 + 10_000);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert_eq!(messages(&response.rows), vec!["booted again"]);
    assert_eq!(response.skipped.len(), 1);
    assert_eq!(response.skipped[0].target, "prod/shop/web-1/app/previous");
    assert_eq!(response.skipped[0].reason, SkipReason::NotFound);

    let graph_request = GraphDataRequest::new(kubernetes_source(&[], &["shop"]), T0, T0 + 10_000);
    let graph = fetcher.fetch_graph_data(&graph_request).await.unwrap();
    assert_eq!(graph.total, 1);
    assert_eq!(graph.skipped.len(), 1);
    assert_eq!(graph.skipped[0].target, "prod/shop/web-1/app/previous");
}

#[tokio::test]
async fn test_denied_target_is_skipped() {
    let cluster = FakeCluster::default()
        .namespace("shop")
        .pod("shop", "a", &["app"], &[])
        .pod("shop", "b", &["app"], &[])
        .failing("a", "app", StreamError::PermissionDenied("forbidden".to_string()))
        .logs(
            "b",
            "app",
            false,
            line(1_000, "first") + &line(2_000, "second"),
        );
    let fetcher = kubernetes_fetcher(Arc::new(FakeClusters::new("prod").context("prod", cluster)));
    let request = DataRequest::new(kubernetes_source(&[], &["shop"]), T0, T0 + 10_000);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert_eq!(messages(&response.rows), vec!["second", "first"]);
    assert_eq!(response.skipped.len(), 1);
    assert_eq!(response.skipped[0].target, "prod/shop/a/app");
    assert_eq!(response.skipped[0].reason, SkipReason::PermissionDenied);
}

#[tokio::test]
async fn test_denied_namespace_is_skipped() {
    let cluster = prod().deny_pods("billing");
    let fetcher = kubernetes_fetcher(Arc::new(FakeClusters::new("prod").context("prod", cluster)));
    let request = DataRequest::new(kubernetes_source(&[], &[]), T0, T0 + 10_000);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert_eq!(response.rows.len(), 3);
    assert_eq!(response.skipped.len(), 1);
    assert_eq!(response.skipped[0].target, "prod/billing");
}

#[tokio::test]
async fn test_unmatched_selection_reports_no_targets() {
    let fetcher = kubernetes_fetcher(clusters());
    let request = DataRequest::new(kubernetes_source(&[], &[]), T0, T0 + 10_000)
        .with_context("namespace", vec!["payments".to_string()]);

    let response = fetcher.fetch_data(&request, Tz::UTC).await.unwrap();

    assert!(response.rows.is_empty());
    assert_eq!(response.error, Some(ResponseError::NoTargetsMatched));

    let graph_request = GraphDataRequest::new(kubernetes_source(&[], &[]), T0, T0 + 10_000)
        .with_context("pod_name", vec!["ghost".to_string()]);
    let graph = fetcher.fetch_graph_data(&graph_request).await.unwrap();
    assert_eq!(graph.error, Some(ResponseError::NoTargetsMatched));
    assert_eq!(graph.timestamps, vec![T0, T0 + 10_000]);
    assert_eq!(graph.total, 0);
}

#[tokio::test]
async fn test_deployment_and_container_selection() {
    let fetcher = kubernetes_fetcher(clusters());

    let by_deployment = DataRequest::new(kubernetes_source(&[], &[]), T0, T0 + 10_000)
        .with_context("deployment", vec!["web".to_string()]);
    let response = fetcher.fetch_data(&by_deployment, Tz::UTC).await.unwrap();
    assert_eq!(
        messages(&response.rows),
        vec!["web-2 started", "proxy ready", "web-1 started"]
    );

    let by_container = by_deployment.with_context("container_name", vec!["proxy".to_string()]);
    let response = fetcher.fetch_data(&by_container, Tz::UTC).await.unwrap();
    assert_eq!(messages(&response.rows), vec!["proxy ready"]);
}

#[tokio::test]
async fn test_all_contexts_and_context_filter() {
    let staging = FakeCluster::default()
        .namespace("shop")
        .pod("shop", "web-1", &["app"], &[])
        .logs("web-1", "app", false, line(6_000, "staging web"));
    let clusters = Arc::new(
        FakeClusters::new("prod")
            .context("prod", prod())
            .context("staging", staging),
    );
    let fetcher = kubernetes_fetcher(Arc::clone(&clusters));

    let everything = DataRequest::new(kubernetes_source(&["*"], &["shop"]), T0, T0 + 10_000);
    let response = fetcher.fetch_data(&everything, Tz::UTC).await.unwrap();
    assert_eq!(response.rows.len(), 4);
    assert_eq!(response.rows[0].data["context"], "staging");

    let only_staging = everything.with_context("context", vec!["staging".to_string()]);
    let response = fetcher.fetch_data(&only_staging, Tz::UTC).await.unwrap();
    assert_eq!(messages(&response.rows), vec!["staging web"]);

    // Both requests share the configured selection, so the kubeconfig was
    // read once.
    assert_eq!(clusters.loads(), 1);
}

#[tokio::test]
async fn test_graph_grouped_by_namespace() {
    let fetcher = kubernetes_fetcher(clusters());
    let source = kubernetes_source(&[], &[]);
    let group = resolve_group_by(&source, "namespace").unwrap();
    let request = GraphDataRequest::new(source, T0, T0 + 10_000).with_group_by(group);

    let graph = fetcher.fetch_graph_data(&request).await.unwrap();

    assert_eq!(graph.total, 4);
    assert_eq!(graph.data["shop"].iter().sum::<u64>(), 3);
    assert_eq!(graph.data["billing"].iter().sum::<u64>(), 1);
    let billing_bucket = graph
        .timestamps
        .iter()
        .position(|ts| *ts == T0 + 3_000)
        .unwrap();
    assert_eq!(graph.data["billing"][billing_bucket], 1);
}

#[tokio::test]
async fn test_graph_grouped_by_pod_label() {
    let fetcher = kubernetes_fetcher(clusters());
    let source = kubernetes_source(&[], &[]);
    let group = resolve_group_by(&source, "labels:app").unwrap();
    let request = GraphDataRequest::new(source, T0, T0 + 10_000).with_group_by(group);

    let graph = fetcher.fetch_graph_data(&request).await.unwrap();

    assert_eq!(graph.data["web"].iter().sum::<u64>(), 3);
    assert_eq!(graph.data["invoice"].iter().sum::<u64>(), 1);
}

#[tokio::test]
async fn test_deployment_options() {
    let fetcher = kubernetes_fetcher(clusters());

    let options = fetcher
        .context_options(&kubernetes_source(&[], &["shop", "billing"]), "deployment")
        .await
        .unwrap();
    let names: Vec<&str> = options.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["invoice", "web"]);
    assert_eq!(options[1].details["namespace"], "shop");
    assert_eq!(options[1].details["replicas_desired"], 2);
    assert_eq!(options[1].status, "Progressing");

    let err = fetcher
        .context_options(&kubernetes_source(&[], &[]), "deployment")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Config(msg) if msg.contains("Namespace is required")));
}

#[tokio::test]
async fn test_connection_probe() {
    let fetcher = kubernetes_fetcher(clusters());
    let source = kubernetes_source(&[], &[]);

    let response = fetcher.test_connection(&source.backend).await;
    assert!(response.reachability.result);
    assert!(response.schema.result);
    assert!(response.schema.data.iter().any(|c| c.name == "pod_name"));

    let missing = kubernetes_source(&["nowhere"], &[]);
    let response = fetcher.test_connection(&missing.backend).await;
    assert!(!response.reachability.result);
    assert!(!response.schema.result);

    let wrong_kind = BackendConfig::Docker(shared::models::DockerConnection::default());
    assert!(!fetcher.test_connection(&wrong_kind).await.reachability.result);
}
