//! Resolution of the pod containers a request reads.
//!
//! Contexts, namespaces, deployments, pods and containers are narrowed in
//! that order. Failures at a level skip the affected branch and are
//! reported alongside the targets that did resolve.

use super::cluster::{ClusterApi, ClusterConnector, KubeContexts, PodInfo};
use crate::cache::{fingerprint, ConfigCache};
use crate::fetchers::pipeline::{skip, FetchTarget};
use crate::fetchers::stream::StreamError;
use crate::fetchers::FetchError;
use crate::models::{context_values, ContextFilters, KubernetesConnection, SkippedTarget};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Configured context value selecting every context of the kubeconfig.
pub const ALL_CONTEXTS: &str = "*";

/// One pod container to read.
pub struct PodTarget {
    /// Kubeconfig context.
    pub context: String,
    /// The pod.
    pub pod: Arc<PodInfo>,
    /// Container name.
    pub container: String,
    /// API of the context.
    pub api: Arc<dyn ClusterApi>,
}

impl FetchTarget for PodTarget {
    fn label(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.context, self.pod.namespace, self.pod.name, self.container
        )
    }
}

/// The outcome of target resolution.
#[derive(Default)]
pub struct Resolution {
    /// Containers to read.
    pub targets: Vec<PodTarget>,
    /// Branches that could not be resolved.
    pub skipped: Vec<SkippedTarget>,
    /// Distinct pods across all targets.
    pub pods: usize,
}

/// Picks contexts according to the configured selection.
///
/// No configured contexts means the current context, [`ALL_CONTEXTS`]
/// means every context, and otherwise configured names that exist are
/// kept in configured order.
#[must_use]
pub fn choose_contexts(configured: &[String], contexts: &KubeContexts) -> Vec<String> {
    if configured.is_empty() {
        return contexts.current.iter().cloned().collect();
    }
    if configured.iter().any(|c| c == ALL_CONTEXTS) {
        return contexts.available.clone();
    }
    configured
        .iter()
        .filter(|c| {
            let known = contexts.available.contains(c);
            if !known {
                tracing::warn!(context = %c, "Configured context not found in kubeconfig");
            }
            known
        })
        .cloned()
        .collect()
}

/// Keeps `values` that are also requested, or all of them if nothing is.
fn narrow(values: Vec<String>, requested: &[&str]) -> Vec<String> {
    if requested.is_empty() {
        return values;
    }
    values
        .into_iter()
        .filter(|v| requested.contains(&v.as_str()))
        .collect()
}

/// Contexts selected by the connection, cached by kubeconfig identity and
/// configured selection.
///
/// # Errors
///
/// Returns `FetchError::Config` if the kubeconfig cannot be loaded.
pub async fn configured_contexts(
    connector: &dyn ClusterConnector,
    cache: &ConfigCache<Vec<String>>,
    connection: &KubernetesConnection,
) -> Result<Arc<Vec<String>>, FetchError> {
    let key = fingerprint(&connection.identity(), &connection.contexts);
    cache
        .get_or_try_load(&key, || async {
            let contexts = connector
                .contexts(connection)
                .await
                .map_err(|e| FetchError::Config(e.to_string()))?;
            Ok(choose_contexts(&connection.contexts, &contexts))
        })
        .await
}

/// Namespaces to read in one context.
async fn namespaces(
    api: &dyn ClusterApi,
    connection: &KubernetesConnection,
    requested: &[&str],
) -> Result<Vec<String>, StreamError> {
    let available = if connection.namespaces.is_empty() {
        api.list_namespaces().await?
    } else {
        connection.namespaces.clone()
    };
    Ok(narrow(available, requested))
}

/// Pods of one namespace, restricted to the requested deployments.
async fn pods(
    api: &dyn ClusterApi,
    namespace: &str,
    deployments: &[&str],
) -> Result<Vec<PodInfo>, StreamError> {
    if deployments.is_empty() {
        return api.list_pods(namespace, None).await;
    }

    let mut seen = BTreeSet::new();
    let mut pods = Vec::new();
    for deployment in api.list_deployments(namespace).await? {
        if !deployments.contains(&deployment.name.as_str()) {
            continue;
        }
        let Some(selector) = deployment.selector() else {
            tracing::debug!(deployment = %deployment.name, "Deployment has no matchLabels");
            continue;
        };
        for pod in api.list_pods(namespace, Some(&selector)).await? {
            if seen.insert(pod.name.clone()) {
                pods.push(pod);
            }
        }
    }
    Ok(pods)
}

/// Resolves the containers a request reads.
///
/// # Errors
///
/// Returns `FetchError::Config` if the kubeconfig cannot be loaded.
pub async fn resolve(
    connector: &dyn ClusterConnector,
    cache: &ConfigCache<Vec<String>>,
    connection: &KubernetesConnection,
    filters: &ContextFilters,
) -> Result<Resolution, FetchError> {
    let contexts = configured_contexts(connector, cache, connection).await?;
    let contexts = narrow(contexts.as_ref().clone(), &context_values(filters, "context"));
    let requested_namespaces = context_values(filters, "namespace");
    let deployments = context_values(filters, "deployment");
    let pod_names = context_values(filters, "pod_name");
    let container_names = context_values(filters, "container_name");

    let mut resolution = Resolution::default();
    for context in contexts {
        let api = match connector.connect(connection, &context).await {
            Ok(api) => api,
            Err(e) => {
                resolution.skipped.push(skip(context, e));
                continue;
            }
        };

        let namespaces = match namespaces(api.as_ref(), connection, &requested_namespaces).await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                resolution.skipped.push(skip(context, e));
                continue;
            }
        };

        for namespace in namespaces {
            let pods = match pods(api.as_ref(), &namespace, &deployments).await {
                Ok(pods) => pods,
                Err(e) => {
                    resolution.skipped.push(skip(format!("{context}/{namespace}"), e));
                    continue;
                }
            };

            for pod in pods {
                if !pod_names.is_empty() && !pod_names.contains(&pod.name.as_str()) {
                    continue;
                }
                let pod = Arc::new(pod);
                let before = resolution.targets.len();
                for container in &pod.containers {
                    if !container_names.is_empty() && !container_names.contains(&container.as_str())
                    {
                        continue;
                    }
                    resolution.targets.push(PodTarget {
                        context: context.clone(),
                        pod: Arc::clone(&pod),
                        container: container.clone(),
                        api: Arc::clone(&api),
                    });
                }
                if resolution.targets.len() > before {
                    resolution.pods += 1;
                }
            }
        }
    }

    tracing::debug!(
        targets = resolution.targets.len(),
        pods = resolution.pods,
        skipped = resolution.skipped.len(),
        "Resolved pod containers"
    );
    Ok(resolution)
}
