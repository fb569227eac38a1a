//! Common test utilities and helpers for integration tests.
//!
//! This module provides in-memory container engines and clusters that stand
//! in for Docker and Kubernetes behind the fetchers' connector seams.

use async_trait::async_trait;
use shared::config::FetcherSettings;
use shared::fetchers::docker::{
    self, ContainerEngine, ContainerInfo, EngineConnector, OutputStream,
};
use shared::fetchers::kubernetes::{
    self, ClusterApi, ClusterConnector, DeploymentInfo, KubeContexts, PodInfo, PodLogOptions,
};
use shared::fetchers::stream::StreamError;
use shared::fetchers::{DockerFetcher, KubernetesFetcher};
use shared::models::{
    BackendConfig, DockerConnection, KubernetesConnection, Source,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Start of the test window: 2024-03-01T10:00:00Z.
pub const T0: i64 = 1_709_287_200_000;

/// A log line stamped `offset_ms` after [`T0`].
pub fn line(offset_ms: i64, message: &str) -> String {
    let time = chrono::DateTime::from_timestamp_millis(T0 + offset_ms)
        .unwrap()
        .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
    format!("{time} {message}\n")
}

/// Settings with a small worker pool.
pub fn settings() -> FetcherSettings {
    FetcherSettings::default().with_max_concurrent_requests(2)
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ============================================================================
// DOCKER
// ============================================================================

/// An engine holding fixed containers and log text.
#[derive(Default)]
pub struct FakeEngine {
    containers: Vec<ContainerInfo>,
    logs: HashMap<(String, &'static str), Result<String, StreamError>>,
}

impl FakeEngine {
    /// Adds a container.
    pub fn container(mut self, id: &str, name: &str, status: &str, pairs: &[(&str, &str)]) -> Self {
        self.containers.push(ContainerInfo {
            id: id.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            labels: labels(pairs),
        });
        self
    }

    /// Sets the log text of one container stream.
    pub fn logs(mut self, id: &str, stream: OutputStream, text: String) -> Self {
        self.logs.insert((id.to_string(), stream.as_str()), Ok(text));
        self
    }

    /// Makes reads of one container stream fail.
    pub fn failing(mut self, id: &str, stream: OutputStream, err: StreamError) -> Self {
        self.logs.insert((id.to_string(), stream.as_str()), Err(err));
        self
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn list_containers(&self, names: &[String]) -> Result<Vec<ContainerInfo>, StreamError> {
        // Like the engine, the name filter matches substrings.
        Ok(self
            .containers
            .iter()
            .filter(|c| names.is_empty() || names.iter().any(|n| c.name.contains(n.as_str())))
            .cloned()
            .collect())
    }

    async fn logs(
        &self,
        id: &str,
        stream: OutputStream,
        _since: i64,
        _until: i64,
    ) -> Result<String, StreamError> {
        self.logs
            .get(&(id.to_string(), stream.as_str()))
            .cloned()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

struct FakeEngineConnector(Arc<FakeEngine>);

impl EngineConnector for FakeEngineConnector {
    fn connect(&self, _connection: &DockerConnection) -> Result<Arc<dyn ContainerEngine>, StreamError> {
        let engine: Arc<dyn ContainerEngine> = self.0.clone();
        Ok(engine)
    }
}

/// A Docker fetcher reading from `engine`.
pub fn docker_fetcher(engine: FakeEngine) -> DockerFetcher {
    DockerFetcher::with_connector(settings(), Arc::new(FakeEngineConnector(Arc::new(engine))))
}

/// A Docker source over the fixed schema.
pub fn docker_source(containers: &[&str]) -> Arc<Source> {
    Arc::new(Source::new(
        "containers",
        docker::schema(),
        "time",
        BackendConfig::Docker(DockerConnection {
            address: String::new(),
            containers: containers.iter().map(ToString::to_string).collect(),
        }),
    ))
}

// ============================================================================
// KUBERNETES
// ============================================================================

/// One cluster context held in memory.
#[derive(Default)]
pub struct FakeCluster {
    namespaces: Vec<String>,
    deployments: Vec<DeploymentInfo>,
    pods: Vec<PodInfo>,
    logs: HashMap<(String, String, bool), Result<String, StreamError>>,
    denied_pod_listing: BTreeSet<String>,
}

impl FakeCluster {
    /// Adds a namespace.
    pub fn namespace(mut self, name: &str) -> Self {
        self.namespaces.push(name.to_string());
        self
    }

    /// Adds a pod.
    pub fn pod(
        mut self,
        namespace: &str,
        name: &str,
        containers: &[&str],
        pairs: &[(&str, &str)],
    ) -> Self {
        self.pods.push(PodInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            node_name: "node-1".to_string(),
            phase: "Running".to_string(),
            labels: labels(pairs),
            containers: containers.iter().map(ToString::to_string).collect(),
            restarted: BTreeSet::new(),
        });
        self
    }

    /// Marks a container of the last added pod as restarted.
    pub fn restarted(mut self, container: &str) -> Self {
        if let Some(pod) = self.pods.last_mut() {
            pod.restarted.insert(container.to_string());
        }
        self
    }

    /// Adds a deployment selecting pods by `match_labels`.
    pub fn deployment(mut self, namespace: &str, name: &str, match_labels: &[(&str, &str)]) -> Self {
        self.deployments.push(DeploymentInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            replicas_desired: 2,
            replicas_ready: 1,
            status: "Progressing".to_string(),
            labels: labels(match_labels),
            match_labels: labels(match_labels),
        });
        self
    }

    /// Sets the logs of one container incarnation.
    pub fn logs(mut self, pod: &str, container: &str, previous: bool, text: String) -> Self {
        self.logs
            .insert((pod.to_string(), container.to_string(), previous), Ok(text));
        self
    }

    /// Makes log reads of one container fail.
    pub fn failing(mut self, pod: &str, container: &str, err: StreamError) -> Self {
        self.logs
            .insert((pod.to_string(), container.to_string(), false), Err(err));
        self
    }

    /// Refuses pod listing in a namespace.
    pub fn deny_pods(mut self, namespace: &str) -> Self {
        self.denied_pod_listing.insert(namespace.to_string());
        self
    }
}

fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector.split(',').all(|pair| match pair.split_once('=') {
        Some((k, v)) => labels.get(k).is_some_and(|value| value == v),
        None => false,
    })
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>, StreamError> {
        Ok(self.namespaces.clone())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<DeploymentInfo>, StreamError> {
        Ok(self
            .deployments
            .iter()
            .filter(|d| d.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<PodInfo>, StreamError> {
        if self.denied_pod_listing.contains(namespace) {
            return Err(StreamError::PermissionDenied(format!(
                "pods is forbidden in namespace {namespace}"
            )));
        }
        Ok(self
            .pods
            .iter()
            .filter(|p| p.namespace == namespace)
            .filter(|p| selector.map_or(true, |s| selector_matches(s, &p.labels)))
            .cloned()
            .collect())
    }

    async fn pod_logs(
        &self,
        _namespace: &str,
        pod: &str,
        options: &PodLogOptions,
    ) -> Result<String, StreamError> {
        self.logs
            .get(&(pod.to_string(), options.container.clone(), options.previous))
            .cloned()
            .unwrap_or_else(|| {
                if options.previous {
                    Err(StreamError::NotFound("previous terminated container not found".to_string()))
                } else {
                    Ok(String::new())
                }
            })
    }
}

/// Clusters keyed by context name, with a counter of kubeconfig loads.
pub struct FakeClusters {
    clusters: HashMap<String, Arc<FakeCluster>>,
    current: Option<String>,
    loads: AtomicUsize,
}

impl FakeClusters {
    /// Clusters with `current` as the current context.
    pub fn new(current: &str) -> Self {
        Self {
            clusters: HashMap::new(),
            current: Some(current.to_string()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Adds a context.
    pub fn context(mut self, name: &str, cluster: FakeCluster) -> Self {
        self.clusters.insert(name.to_string(), Arc::new(cluster));
        self
    }

    /// Number of times contexts were read from the kubeconfig.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnector for FakeClusters {
    async fn contexts(&self, _connection: &KubernetesConnection) -> Result<KubeContexts, StreamError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let mut available: Vec<String> = self.clusters.keys().cloned().collect();
        available.sort();
        Ok(KubeContexts {
            available,
            current: self.current.clone(),
        })
    }

    async fn connect(
        &self,
        _connection: &KubernetesConnection,
        context: &str,
    ) -> Result<Arc<dyn ClusterApi>, StreamError> {
        let cluster = self
            .clusters
            .get(context)
            .cloned()
            .ok_or_else(|| StreamError::Other(format!("Unknown context '{context}'")))?;
        let api: Arc<dyn ClusterApi> = cluster;
        Ok(api)
    }
}

/// A Kubernetes fetcher reading from `clusters`.
pub fn kubernetes_fetcher(clusters: Arc<FakeClusters>) -> KubernetesFetcher {
    KubernetesFetcher::with_connector(settings(), clusters)
}

/// A Kubernetes source over the fixed schema.
pub fn kubernetes_source(contexts: &[&str], namespaces: &[&str]) -> Arc<Source> {
    Arc::new(Source::new(
        "pods",
        kubernetes::schema(),
        "time",
        BackendConfig::Kubernetes(KubernetesConnection {
            kubeconfig: Some("apiVersion: v1\nkind: Config\n".to_string()),
            contexts: contexts.iter().map(ToString::to_string).collect(),
            namespaces: namespaces.iter().map(ToString::to_string).collect(),
            ..KubernetesConnection::default()
        }),
    ))
}
