//! The read-only view of the API server the collectors list from.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::kube::*;
use crate::urn::ClusterType;

/// Lists cluster objects. Implementations must be safe for concurrent use.
#[async_trait::async_trait]
pub trait ApiClient: Debug + Send + Sync {
    /// Paths advertised by the API server discovery endpoint.
    async fn api_paths(&self) -> anyhow::Result<Vec<String>>;
    async fn version(&self) -> anyhow::Result<Option<VersionInfo>>;

    async fn nodes(&self) -> anyhow::Result<Vec<Node>>;
    async fn pods(&self) -> anyhow::Result<Vec<Pod>>;
    async fn services(&self) -> anyhow::Result<Vec<Service>>;
    async fn endpoints(&self) -> anyhow::Result<Vec<Endpoints>>;
    async fn namespaces(&self) -> anyhow::Result<Vec<Namespace>>;
    async fn config_maps(&self) -> anyhow::Result<Vec<ConfigMap>>;
    async fn secrets(&self) -> anyhow::Result<Vec<Secret>>;
    async fn persistent_volumes(&self) -> anyhow::Result<Vec<PersistentVolume>>;
    async fn persistent_volume_claims(&self) -> anyhow::Result<Vec<PersistentVolumeClaim>>;
    async fn volume_attachments(&self) -> anyhow::Result<Vec<VolumeAttachment>>;
    async fn daemon_sets(&self) -> anyhow::Result<Vec<DaemonSet>>;
    async fn deployments(&self) -> anyhow::Result<Vec<Deployment>>;
    async fn replica_sets(&self) -> anyhow::Result<Vec<ReplicaSet>>;
    async fn stateful_sets(&self) -> anyhow::Result<Vec<StatefulSet>>;
    async fn jobs(&self) -> anyhow::Result<Vec<Job>>;
    async fn cron_jobs(&self) -> anyhow::Result<Vec<CronJob>>;
    async fn ingresses(&self) -> anyhow::Result<Vec<Ingress>>;
}

/// Remembers the detected cluster flavour so the discovery endpoint is
/// only queried once.
#[derive(Debug, Default)]
pub struct ClusterTypeCache(tokio::sync::OnceCell<ClusterType>);

impl ClusterTypeCache {
    pub async fn get(&self, client: &dyn ApiClient) -> anyhow::Result<ClusterType> {
        self.0
            .get_or_try_init(|| async {
                let paths = client.api_paths().await?;
                let detected = ClusterType::detect(paths.iter().map(String::as_str));
                log::info!(cluster_type = detected.as_str(); "detected cluster type");
                Ok::<_, anyhow::Error>(detected)
            })
            .await
            .copied()
    }
}

/// A fixed picture of a cluster, as loaded from a JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterState {
    pub api_paths: Vec<String>,
    pub version: Option<VersionInfo>,
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub services: Vec<Service>,
    pub endpoints: Vec<Endpoints>,
    pub namespaces: Vec<Namespace>,
    pub config_maps: Vec<ConfigMap>,
    pub secrets: Vec<Secret>,
    pub persistent_volumes: Vec<PersistentVolume>,
    pub persistent_volume_claims: Vec<PersistentVolumeClaim>,
    pub volume_attachments: Vec<VolumeAttachment>,
    pub daemon_sets: Vec<DaemonSet>,
    pub deployments: Vec<Deployment>,
    pub replica_sets: Vec<ReplicaSet>,
    pub stateful_sets: Vec<StatefulSet>,
    pub jobs: Vec<Job>,
    pub cron_jobs: Vec<CronJob>,
    pub ingresses: Vec<Ingress>,
    pub events: Vec<Event>,
}

/// Serves a [`ClusterState`]. Individual listings can be made to fail.
#[derive(Debug, Default)]
pub struct StaticApiClient {
    state: ClusterState,
    failing: Mutex<HashSet<&'static str>>,
    stalled: Mutex<HashSet<&'static str>>,
}

impl StaticApiClient {
    pub fn new(state: ClusterState) -> Self {
        Self {
            state,
            failing: Mutex::new(HashSet::new()),
            stalled: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let state = serde_json::from_str(json).context("parse cluster state")?;
        Ok(Self::new(state))
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    /// Makes the listing of `what` (e.g. `"pods"`) fail from now on.
    pub fn fail(&self, what: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(what);
        }
    }

    /// Makes the listing of `what` never return.
    pub fn stall(&self, what: &'static str) {
        if let Ok(mut stalled) = self.stalled.lock() {
            stalled.insert(what);
        }
    }

    async fn list<T: Clone>(&self, what: &'static str, items: &[T]) -> anyhow::Result<Vec<T>> {
        let stalled = self
            .stalled
            .lock()
            .map(|s| s.contains(what))
            .unwrap_or(false);
        if stalled {
            futures::future::pending::<()>().await;
        }
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(what))
            .unwrap_or(false);
        if failing {
            anyhow::bail!("listing {} failed: connection refused", what);
        }
        Ok(items.to_vec())
    }
}

#[async_trait::async_trait]
impl ApiClient for StaticApiClient {
    async fn api_paths(&self) -> anyhow::Result<Vec<String>> {
        self.list("api_paths", &self.state.api_paths).await
    }

    async fn version(&self) -> anyhow::Result<Option<VersionInfo>> {
        self.list("version", &[()]).await?;
        Ok(self.state.version.clone())
    }

    async fn nodes(&self) -> anyhow::Result<Vec<Node>> {
        self.list("nodes", &self.state.nodes).await
    }

    async fn pods(&self) -> anyhow::Result<Vec<Pod>> {
        self.list("pods", &self.state.pods).await
    }

    async fn services(&self) -> anyhow::Result<Vec<Service>> {
        self.list("services", &self.state.services).await
    }

    async fn endpoints(&self) -> anyhow::Result<Vec<Endpoints>> {
        self.list("endpoints", &self.state.endpoints).await
    }

    async fn namespaces(&self) -> anyhow::Result<Vec<Namespace>> {
        self.list("namespaces", &self.state.namespaces).await
    }

    async fn config_maps(&self) -> anyhow::Result<Vec<ConfigMap>> {
        self.list("configmaps", &self.state.config_maps).await
    }

    async fn secrets(&self) -> anyhow::Result<Vec<Secret>> {
        self.list("secrets", &self.state.secrets).await
    }

    async fn persistent_volumes(&self) -> anyhow::Result<Vec<PersistentVolume>> {
        self.list("persistentvolumes", &self.state.persistent_volumes).await
    }

    async fn persistent_volume_claims(&self) -> anyhow::Result<Vec<PersistentVolumeClaim>> {
        self.list(
            "persistentvolumeclaims",
            &self.state.persistent_volume_claims,
        )
        .await
    }

    async fn volume_attachments(&self) -> anyhow::Result<Vec<VolumeAttachment>> {
        self.list("volumeattachments", &self.state.volume_attachments).await
    }

    async fn daemon_sets(&self) -> anyhow::Result<Vec<DaemonSet>> {
        self.list("daemonsets", &self.state.daemon_sets).await
    }

    async fn deployments(&self) -> anyhow::Result<Vec<Deployment>> {
        self.list("deployments", &self.state.deployments).await
    }

    async fn replica_sets(&self) -> anyhow::Result<Vec<ReplicaSet>> {
        self.list("replicasets", &self.state.replica_sets).await
    }

    async fn stateful_sets(&self) -> anyhow::Result<Vec<StatefulSet>> {
        self.list("statefulsets", &self.state.stateful_sets).await
    }

    async fn jobs(&self) -> anyhow::Result<Vec<Job>> {
        self.list("jobs", &self.state.jobs).await
    }

    async fn cron_jobs(&self) -> anyhow::Result<Vec<CronJob>> {
        self.list("cronjobs", &self.state.cron_jobs).await
    }

    async fn ingresses(&self) -> anyhow::Result<Vec<Ingress>> {
        self.list("ingresses", &self.state.ingresses).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_api_shaped_json() {
        let client = StaticApiClient::from_json(
            r#"{
                "apiPaths": ["/api", "/oapi"],
                "pods": [{
                    "metadata": {"name": "p1", "namespace": "ns", "labels": {"app": "a"}},
                    "spec": {"nodeName": "n1", "containers": [{"name": "c1", "image": "img:1"}]},
                    "status": {"phase": "Running", "podIP": "10.1.0.3"}
                }]
            }"#,
        )
        .unwrap();
        let pods = client.pods().await.unwrap();
        assert_eq!(pods[0].metadata.labels["app"], "a");
        assert_eq!(pods[0].status.pod_ip, "10.1.0.3");
        assert_eq!(client.api_paths().await.unwrap().len(), 2);
        assert!(client.nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cluster_type_is_detected_once() {
        let client = StaticApiClient::new(ClusterState {
            api_paths: vec!["/api".into(), "/oapi".into()],
            ..Default::default()
        });
        let cache = ClusterTypeCache::default();
        assert_eq!(cache.get(&client).await.unwrap(), ClusterType::OpenShift);
        client.fail("api_paths");
        assert_eq!(cache.get(&client).await.unwrap(), ClusterType::OpenShift);
    }

    #[tokio::test]
    async fn listings_can_fail() {
        let client = StaticApiClient::default();
        client.fail("pods");
        assert!(client.pods().await.is_err());
        assert!(client.services().await.is_ok());
    }
}
