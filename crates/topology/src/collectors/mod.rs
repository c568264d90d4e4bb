//! Per-kind collectors. Each one lists a single resource kind and emits
//! components, the relations that follow directly from the object, and
//! correlation records for the correlators.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::config::TopologyConfig;
use crate::kube::{ObjectMeta, Resource};
use crate::model::{Component, Relation, RelationType};
use crate::urn::UrnBuilder;
use crate::{Error, Result};

mod cluster;
mod configmap;
mod ingress;
mod namespace;
mod node;
mod pod;
mod secret;
mod service;
mod storage;
mod workloads;

pub use cluster::ClusterCollector;
pub use configmap::{cut_data, ConfigMapCollector};
pub use ingress::IngressCollector;
pub use namespace::NamespaceCollector;
pub use node::NodeCollector;
pub use pod::PodCollector;
pub use secret::{secret_digest, SecretCollector};
pub use service::ServiceCollector;
pub use storage::PersistentVolumeCollector;
pub use workloads::{
    CronJobCollector, DaemonSetCollector, DeploymentCollector, JobCollector, ReplicaSetCollector,
    StatefulSetCollector,
};

/// Lists one resource kind and emits it.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs to completion. Side channels held by the collector are closed
    /// when it is dropped, which happens right after this returns.
    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()>;
}

/// Everything a collector or correlator needs during one run: the API
/// client, the URN builder and the engine-owned output channels.
#[derive(Debug)]
pub struct RunContext {
    pub client: Arc<dyn ApiClient>,
    pub urn: UrnBuilder,
    pub config: Arc<TopologyConfig>,
    components: mpsc::Sender<Component>,
    relations: mpsc::Sender<Relation>,
    errors: mpsc::Sender<Error>,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        client: Arc<dyn ApiClient>,
        urn: UrnBuilder,
        config: Arc<TopologyConfig>,
        components: mpsc::Sender<Component>,
        relations: mpsc::Sender<Relation>,
        errors: mpsc::Sender<Error>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            urn,
            config,
            components,
            relations,
            errors,
            cancel,
        }
    }

    pub async fn component(&self, component: Component) {
        self.forward(&self.components, component).await;
    }

    pub async fn relation(&self, relation: Relation) {
        self.forward(&self.relations, relation).await;
    }

    pub async fn error(&self, error: Error) {
        self.forward(&self.errors, error).await;
    }

    /// Sends on any of the run's channels. Once the run is cancelled the
    /// item is dropped instead of blocking; returns whether it was sent.
    pub async fn forward<T: Send>(&self, tx: &mpsc::Sender<T>, item: T) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            res = tx.send(item) => res.is_ok(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The tags every component carries: the object's labels, the cluster
    /// name and, for namespaced objects, the namespace.
    pub fn tags(&self, meta: &ObjectMeta) -> Map<String, Value> {
        let mut tags: Map<String, Value> = meta
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        tags.insert("cluster-name".into(), self.config.cluster_name.clone().into());
        if !meta.namespace.is_empty() {
            tags.insert("namespace".into(), meta.namespace.clone().into());
        }
        tags
    }

    /// Builds the component for `obj` with its name, tags and either the
    /// raw object or its identifying metadata.
    pub fn object_component<R: Resource>(
        &self,
        external_id: String,
        component_type: &str,
        obj: &R,
    ) -> Component {
        let meta = obj.meta();
        let mut component = Component::new(external_id, component_type)
            .with("name", meta.name.as_str())
            .with("tags", Value::Object(self.tags(meta)))
            .with("identifiers", Value::Array(Vec::new()));

        if self.config.source_properties_enabled {
            match serde_json::to_value(obj) {
                Ok(raw) => component.set("sourceProperties", raw),
                Err(err) => log::warn!(kind = R::KIND, name = meta.name.as_str(); "could not serialize source properties: {}", err),
            }
        } else {
            component.set("kind", R::KIND);
            if let Some(ts) = meta.creation_timestamp {
                component.set("creationTimestamp", ts.to_rfc3339());
            }
            put_non_empty(&mut component, "uid", &meta.uid);
            put_non_empty(&mut component, "generateName", &meta.generate_name);
        }
        component
    }

    /// Relations from the object's owners to it. Owners of a kind without
    /// a URN mapping are skipped.
    pub fn owner_relations(&self, meta: &ObjectMeta, owned: &str) -> Vec<Relation> {
        meta.owner_references
            .iter()
            .filter_map(|owner| {
                match self.urn.external_id(&owner.kind, &meta.namespace, &owner.name) {
                    Ok(owner_urn) => Some(Relation::new(owner_urn, owned, RelationType::Owns)),
                    Err(err) => {
                        log::debug!(owned = owned; "skipping owner relation: {}", err);
                        None
                    }
                }
            })
            .collect()
    }

    /// The namespace enclosing a namespaced object.
    pub fn namespace_relation(&self, namespace: &str, target: &str) -> Relation {
        Relation::new(self.urn.namespace(namespace), target, RelationType::Encloses)
    }

    /// Emits the owner relations of an object, or the namespace relation
    /// when it has no known owner.
    pub async fn ownership(&self, meta: &ObjectMeta, owned: &str) {
        let owners = self.owner_relations(meta, owned);
        if owners.is_empty() {
            self.relation(self.namespace_relation(&meta.namespace, owned))
                .await;
        }
        for relation in owners {
            self.relation(relation).await;
        }
    }
}

pub(crate) fn put_non_empty(component: &mut Component, key: &str, value: &str) {
    if !value.is_empty() {
        component.set(key, value);
    }
}

/// Maps an API listing failure to the per-run error of `collector`.
pub(crate) fn listing<T>(collector: &str, res: anyhow::Result<T>) -> Result<T> {
    res.map_err(|err| Error::api(collector, err))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::client::{ClusterState, StaticApiClient};
    use crate::urn::ClusterType;

    /// A context over a static cluster whose outputs are collected.
    pub struct Harness {
        pub ctx: RunContext,
        components: mpsc::Receiver<Component>,
        relations: mpsc::Receiver<Relation>,
        errors: mpsc::Receiver<Error>,
    }

    pub struct Output {
        pub components: Vec<Component>,
        pub relations: Vec<Relation>,
        pub errors: Vec<Error>,
    }

    impl Output {
        pub fn component(&self, id: &str) -> &Component {
            self.components
                .iter()
                .find(|c| c.external_id == id)
                .unwrap_or_else(|| panic!("no component {}", id))
        }

        pub fn has_relation(&self, source: &str, target: &str, relation_type: RelationType) -> bool {
            self.relations.iter().any(|r| {
                r.source_id == source && r.target_id == target && r.relation_type == relation_type
            })
        }
    }

    impl Harness {
        pub fn new(state: ClusterState, config: TopologyConfig) -> Self {
            let (ctx_tx, components) = mpsc::channel(1024);
            let (rel_tx, relations) = mpsc::channel(1024);
            let (err_tx, errors) = mpsc::channel(1024);
            let ctx = RunContext::new(
                Arc::new(StaticApiClient::new(state)),
                UrnBuilder::new(ClusterType::Kubernetes, &config.cluster_name),
                Arc::new(config),
                ctx_tx,
                rel_tx,
                err_tx,
                CancellationToken::new(),
            );
            Self {
                ctx,
                components,
                relations,
                errors,
            }
        }

        pub fn output(mut self) -> Output {
            drop(self.ctx);
            let mut out = Output {
                components: Vec::new(),
                relations: Vec::new(),
                errors: Vec::new(),
            };
            while let Ok(c) = self.components.try_recv() {
                out.components.push(c);
            }
            while let Ok(r) = self.relations.try_recv() {
                out.relations.push(r);
            }
            while let Ok(e) = self.errors.try_recv() {
                out.errors.push(e);
            }
            out
        }
    }

    pub fn config() -> TopologyConfig {
        TopologyConfig {
            cluster_name: "mycluster".into(),
            ..Default::default()
        }
    }

    pub fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: name.into(),
            namespace: namespace.into(),
            uid: format!("uid-{}", name),
            ..Default::default()
        }
    }
}
