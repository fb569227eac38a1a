//! The cluster operations the Kubernetes fetcher relies on.
//!
//! [`ClusterApi`] is implemented over `kube` in the `client` module and by
//! in-memory fakes in tests.

use crate::fetchers::stream::StreamError;
use crate::models::KubernetesConnection;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A pod as seen by the fetcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodInfo {
    /// Pod name.
    pub name: String,
    /// Namespace of the pod.
    pub namespace: String,
    /// Node the pod is scheduled on, empty if unscheduled.
    pub node_name: String,
    /// Pod phase, e.g. `Running`.
    pub phase: String,
    /// Pod labels.
    pub labels: BTreeMap<String, String>,
    /// Container names in declaration order.
    pub containers: Vec<String>,
    /// Containers with a terminated previous incarnation.
    pub restarted: BTreeSet<String>,
}

/// A deployment as seen by the fetcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentInfo {
    /// Deployment name.
    pub name: String,
    /// Namespace of the deployment.
    pub namespace: String,
    /// Desired replica count.
    pub replicas_desired: i32,
    /// Ready replica count.
    pub replicas_ready: i32,
    /// Summarized rollout status, see [`deployment_status`].
    pub status: String,
    /// Deployment labels.
    pub labels: BTreeMap<String, String>,
    /// The pod selector's `matchLabels`.
    pub match_labels: BTreeMap<String, String>,
}

impl DeploymentInfo {
    /// The `matchLabels` as a label selector string, `None` when empty.
    #[must_use]
    pub fn selector(&self) -> Option<String> {
        if self.match_labels.is_empty() {
            return None;
        }
        Some(
            self.match_labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Options of one pod log read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodLogOptions {
    /// Container to read.
    pub container: String,
    /// Lines to read from the end.
    pub tail_lines: Option<i64>,
    /// Only lines newer than this many seconds.
    pub since_seconds: Option<i64>,
    /// Read the previous incarnation instead of the current one.
    pub previous: bool,
}

/// Contexts known to a kubeconfig.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeContexts {
    /// Every context name, in file order.
    pub available: Vec<String>,
    /// The `current-context`, if set.
    pub current: Option<String>,
}

/// API operations against one cluster context.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Lists namespace names.
    async fn list_namespaces(&self) -> Result<Vec<String>, StreamError>;

    /// Lists deployments in `namespace`.
    async fn list_deployments(&self, namespace: &str) -> Result<Vec<DeploymentInfo>, StreamError>;

    /// Lists pods in `namespace`, optionally restricted by a label selector.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<PodInfo>, StreamError>;

    /// Reads timestamped logs of one pod container.
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &PodLogOptions,
    ) -> Result<String, StreamError>;
}

/// Loads kubeconfigs and opens per-context APIs.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Contexts defined by the connection's kubeconfig.
    async fn contexts(&self, connection: &KubernetesConnection) -> Result<KubeContexts, StreamError>;

    /// Opens the API of one context.
    async fn connect(
        &self,
        connection: &KubernetesConnection,
        context: &str,
    ) -> Result<Arc<dyn ClusterApi>, StreamError>;
}

/// Summarizes deployment conditions.
///
/// An `Available=True` condition wins outright. Otherwise the last
/// `Progressing=True` or `ReplicaFailure=True` condition decides between
/// `Progressing` and `Failed`. Anything else is `Unknown`.
#[must_use]
pub fn deployment_status<'a, I>(conditions: I) -> &'static str
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut status = "Unknown";
    for (kind, value) in conditions {
        if value != "True" {
            continue;
        }
        match kind {
            "Available" => return "Available",
            "Progressing" => status = "Progressing",
            "ReplicaFailure" => status = "Failed",
            _ => {}
        }
    }
    status
}
