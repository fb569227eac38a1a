//! [`ClusterConnector`] over the Kubernetes API.

use super::cluster::{
    deployment_status, ClusterApi, ClusterConnector, DeploymentInfo, KubeContexts, PodInfo,
    PodLogOptions,
};
use crate::cache::{fingerprint, ConfigCache};
use crate::fetchers::stream::StreamError;
use crate::models::KubernetesConnection;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams, LogParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::sync::Arc;
use std::time::Duration;

/// Connects with kubeconfig credentials.
///
/// Parsed kubeconfigs are cached by kubeconfig identity and clients by
/// identity and context. Entries live for the life of the connector.
pub struct KubeConnector {
    connect_timeout: Duration,
    kubeconfigs: ConfigCache<Kubeconfig>,
    clients: ConfigCache<Client>,
}

impl KubeConnector {
    /// Creates a connector with empty caches.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            kubeconfigs: ConfigCache::new(),
            clients: ConfigCache::new(),
        }
    }

    async fn kubeconfig(
        &self,
        connection: &KubernetesConnection,
    ) -> Result<Arc<Kubeconfig>, StreamError> {
        self.kubeconfigs
            .get_or_try_load(&connection.identity(), || async {
                let loaded = match (&connection.kubeconfig, &connection.kubeconfig_path) {
                    (Some(inline), _) => Kubeconfig::from_yaml(inline),
                    (None, Some(path)) => Kubeconfig::read_from(path),
                    (None, None) => Kubeconfig::read(),
                };
                loaded.map_err(|e| StreamError::Other(format!("Failed to load kubeconfig: {e}")))
            })
            .await
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn contexts(&self, connection: &KubernetesConnection) -> Result<KubeContexts, StreamError> {
        let kubeconfig = self.kubeconfig(connection).await?;
        Ok(KubeContexts {
            available: kubeconfig.contexts.iter().map(|c| c.name.clone()).collect(),
            current: kubeconfig.current_context.clone(),
        })
    }

    async fn connect(
        &self,
        connection: &KubernetesConnection,
        context: &str,
    ) -> Result<Arc<dyn ClusterApi>, StreamError> {
        let kubeconfig = self.kubeconfig(connection).await?;
        let key = fingerprint(&connection.identity(), [context]);

        let client = self
            .clients
            .get_or_try_load(&key, || async {
                tracing::debug!(context = %context, "Creating Kubernetes client");
                let options = KubeConfigOptions {
                    context: Some(context.to_string()),
                    ..KubeConfigOptions::default()
                };
                let mut config = Config::from_custom_kubeconfig((*kubeconfig).clone(), &options)
                    .await
                    .map_err(|e| StreamError::Other(format!("Invalid context '{context}': {e}")))?;
                config.connect_timeout = Some(self.connect_timeout);
                Client::try_from(config).map_err(api_error)
            })
            .await?;

        Ok(Arc::new(KubeApi {
            client: (*client).clone(),
        }))
    }
}

fn api_error(err: kube::Error) -> StreamError {
    match err {
        kube::Error::Api(response) => StreamError::from_status(response.code, response.message),
        other => StreamError::Other(other.to_string()),
    }
}

struct KubeApi {
    client: Client,
}

fn deployment_info(deployment: Deployment, namespace: &str) -> DeploymentInfo {
    let spec = deployment.spec.unwrap_or_default();
    let status = deployment.status.unwrap_or_default();
    let summary = deployment_status(
        status
            .conditions
            .iter()
            .flatten()
            .map(|c| (c.type_.as_str(), c.status.as_str())),
    );

    DeploymentInfo {
        name: deployment.metadata.name.unwrap_or_default(),
        namespace: deployment
            .metadata
            .namespace
            .unwrap_or_else(|| namespace.to_string()),
        replicas_desired: spec.replicas.unwrap_or(0),
        replicas_ready: status.ready_replicas.unwrap_or(0),
        status: summary.to_string(),
        labels: deployment.metadata.labels.unwrap_or_default(),
        match_labels: spec.selector.match_labels.unwrap_or_default(),
    }
}

fn pod_info(pod: Pod, namespace: &str) -> PodInfo {
    let spec = pod.spec.unwrap_or_default();
    let status = pod.status.unwrap_or_default();

    let restarted = status
        .container_statuses
        .iter()
        .flatten()
        .filter(|cs| {
            cs.last_state
                .as_ref()
                .and_then(|state| state.terminated.as_ref())
                .is_some_and(|terminated| terminated.finished_at.is_some())
        })
        .map(|cs| cs.name.clone())
        .collect();

    PodInfo {
        name: pod.metadata.name.unwrap_or_default(),
        namespace: pod
            .metadata
            .namespace
            .unwrap_or_else(|| namespace.to_string()),
        node_name: spec.node_name.unwrap_or_default(),
        phase: status.phase.unwrap_or_default(),
        labels: pod.metadata.labels.unwrap_or_default(),
        containers: spec.containers.into_iter().map(|c| c.name).collect(),
        restarted,
    }
}

#[async_trait]
impl ClusterApi for KubeApi {
    async fn list_namespaces(&self) -> Result<Vec<String>, StreamError> {
        let namespaces = Api::<Namespace>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(api_error)?;
        Ok(namespaces
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<DeploymentInfo>, StreamError> {
        let deployments = Api::<Deployment>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default())
            .await
            .map_err(api_error)?;
        Ok(deployments
            .items
            .into_iter()
            .map(|d| deployment_info(d, namespace))
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<PodInfo>, StreamError> {
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        let pods = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .list(&params)
            .await
            .map_err(api_error)?;
        Ok(pods
            .items
            .into_iter()
            .map(|p| pod_info(p, namespace))
            .collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &PodLogOptions,
    ) -> Result<String, StreamError> {
        let params = LogParams {
            container: Some(options.container.clone()),
            timestamps: true,
            tail_lines: options.tail_lines,
            since_seconds: options.since_seconds,
            previous: options.previous,
            ..LogParams::default()
        };
        Api::<Pod>::namespaced(self.client.clone(), namespace)
            .logs(pod, &params)
            .await
            .map_err(api_error)
    }
}
