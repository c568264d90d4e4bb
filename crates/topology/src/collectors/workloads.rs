use std::marker::PhantomData;

use futures::future::BoxFuture;

use super::{listing, Collector, RunContext};
use crate::client::ApiClient;
use crate::kube::{CronJob, DaemonSet, Deployment, Job, ReplicaSet, Resource, StatefulSet};
use crate::model::Component;
use crate::urn::UrnBuilder;
use crate::Result;

/// A controller kind collected the same way: one component per object,
/// owned by its owners or else enclosed by its namespace.
pub trait Workload: Resource + Sized + Send + Sync + 'static {
    const COLLECTOR: &'static str;
    const COMPONENT_TYPE: &'static str;

    fn list(client: &dyn ApiClient) -> BoxFuture<'_, anyhow::Result<Vec<Self>>>;

    fn urn(urn: &UrnBuilder, namespace: &str, name: &str) -> String;

    /// Adds the kind-specific fields.
    fn details(&self, component: &mut Component);
}

pub struct WorkloadCollector<W>(PhantomData<fn() -> W>);

impl<W> Default for WorkloadCollector<W> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<W> std::fmt::Debug for WorkloadCollector<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WorkloadCollector")
    }
}

pub type DaemonSetCollector = WorkloadCollector<DaemonSet>;
pub type DeploymentCollector = WorkloadCollector<Deployment>;
pub type ReplicaSetCollector = WorkloadCollector<ReplicaSet>;
pub type StatefulSetCollector = WorkloadCollector<StatefulSet>;
pub type JobCollector = WorkloadCollector<Job>;
pub type CronJobCollector = WorkloadCollector<CronJob>;

#[async_trait::async_trait]
impl<W: Workload> Collector for WorkloadCollector<W> {
    fn name(&self) -> &'static str {
        W::COLLECTOR
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let objects = listing(W::COLLECTOR, W::list(ctx.client.as_ref()).await)?;
        for obj in &objects {
            let meta = obj.meta();
            let urn = W::urn(&ctx.urn, &meta.namespace, &meta.name);
            let mut component = ctx.object_component(urn.clone(), W::COMPONENT_TYPE, obj);
            if !ctx.config.source_properties_enabled {
                obj.details(&mut component);
            }
            ctx.component(component).await;
            ctx.ownership(meta, &urn).await;
        }
        log::debug!(collector = W::COLLECTOR, count = objects.len(); "collected workloads");
        Ok(())
    }
}

fn put<T: Into<serde_json::Value>>(component: &mut Component, key: &str, value: Option<T>) {
    if let Some(value) = value {
        component.set(key, value);
    }
}

impl Workload for DaemonSet {
    const COLLECTOR: &'static str = "daemonset";
    const COMPONENT_TYPE: &'static str = "daemonset";

    fn list(client: &dyn ApiClient) -> BoxFuture<'_, anyhow::Result<Vec<Self>>> {
        client.daemon_sets()
    }

    fn urn(urn: &UrnBuilder, namespace: &str, name: &str) -> String {
        urn.daemonset(namespace, name)
    }

    fn details(&self, component: &mut Component) {
        let strategy = self.spec.update_strategy.as_ref();
        put(component, "updateStrategy", strategy.map(|s| s.strategy_type.clone()));
    }
}

impl Workload for Deployment {
    const COLLECTOR: &'static str = "deployment";
    const COMPONENT_TYPE: &'static str = "deployment";

    fn list(client: &dyn ApiClient) -> BoxFuture<'_, anyhow::Result<Vec<Self>>> {
        client.deployments()
    }

    fn urn(urn: &UrnBuilder, namespace: &str, name: &str) -> String {
        urn.deployment(namespace, name)
    }

    fn details(&self, component: &mut Component) {
        let strategy = self.spec.strategy.as_ref();
        put(component, "deploymentStrategy", strategy.map(|s| s.strategy_type.clone()));
        put(component, "desiredReplicas", self.spec.replicas);
    }
}

impl Workload for ReplicaSet {
    const COLLECTOR: &'static str = "replicaset";
    const COMPONENT_TYPE: &'static str = "replicaset";

    fn list(client: &dyn ApiClient) -> BoxFuture<'_, anyhow::Result<Vec<Self>>> {
        client.replica_sets()
    }

    fn urn(urn: &UrnBuilder, namespace: &str, name: &str) -> String {
        urn.replicaset(namespace, name)
    }

    fn details(&self, component: &mut Component) {
        put(component, "desiredReplicas", self.spec.replicas);
    }
}

impl Workload for StatefulSet {
    const COLLECTOR: &'static str = "statefulset";
    const COMPONENT_TYPE: &'static str = "statefulset";

    fn list(client: &dyn ApiClient) -> BoxFuture<'_, anyhow::Result<Vec<Self>>> {
        client.stateful_sets()
    }

    fn urn(urn: &UrnBuilder, namespace: &str, name: &str) -> String {
        urn.statefulset(namespace, name)
    }

    fn details(&self, component: &mut Component) {
        let spec = &self.spec;
        let strategy = spec.update_strategy.as_ref();
        put(component, "updateStrategy", strategy.map(|s| s.strategy_type.clone()));
        put(component, "desiredReplicas", spec.replicas);
        if !spec.pod_management_policy.is_empty() {
            component.set("podManagementPolicy", spec.pod_management_policy.as_str());
        }
        if !spec.service_name.is_empty() {
            component.set("serviceName", spec.service_name.as_str());
        }
    }
}

impl Workload for Job {
    const COLLECTOR: &'static str = "job";
    const COMPONENT_TYPE: &'static str = "job";

    fn list(client: &dyn ApiClient) -> BoxFuture<'_, anyhow::Result<Vec<Self>>> {
        client.jobs()
    }

    fn urn(urn: &UrnBuilder, namespace: &str, name: &str) -> String {
        urn.job(namespace, name)
    }

    fn details(&self, component: &mut Component) {
        put(component, "backoffLimit", self.spec.backoff_limit);
        put(component, "parallelism", self.spec.parallelism);
    }
}

impl Workload for CronJob {
    const COLLECTOR: &'static str = "cronjob";
    const COMPONENT_TYPE: &'static str = "cronjob";

    fn list(client: &dyn ApiClient) -> BoxFuture<'_, anyhow::Result<Vec<Self>>> {
        client.cron_jobs()
    }

    fn urn(urn: &UrnBuilder, namespace: &str, name: &str) -> String {
        urn.cronjob(namespace, name)
    }

    fn details(&self, component: &mut Component) {
        component.set("schedule", self.spec.schedule.as_str());
        component.set("concurrencyPolicy", self.spec.concurrency_policy.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClusterState;
    use crate::collectors::testing::{config, meta, Harness};
    use crate::kube::{DeploymentSpec, OwnerReference, ReplicaSetSpec, UpdateStrategy};
    use crate::model::RelationType;

    fn owned(mut metadata: crate::kube::ObjectMeta, kind: &str, name: &str) -> crate::kube::ObjectMeta {
        metadata.owner_references.push(OwnerReference {
            kind: kind.into(),
            name: name.into(),
            ..Default::default()
        });
        metadata
    }

    #[tokio::test]
    async fn deployments_and_owned_replicasets() {
        let state = ClusterState {
            deployments: vec![Deployment {
                metadata: meta("ns", "web"),
                spec: DeploymentSpec {
                    replicas: Some(3),
                    strategy: Some(UpdateStrategy {
                        strategy_type: "RollingUpdate".into(),
                    }),
                },
            }],
            replica_sets: vec![ReplicaSet {
                metadata: owned(meta("ns", "web-5d4f"), "Deployment", "web"),
                spec: ReplicaSetSpec { replicas: Some(3) },
            }],
            ..Default::default()
        };
        let h = Harness::new(state, config());
        Box::<DeploymentCollector>::default().run(&h.ctx).await.unwrap();
        Box::<ReplicaSetCollector>::default().run(&h.ctx).await.unwrap();
        let out = h.output();

        let dep = out.component("urn:kubernetes:/mycluster:ns:deployment/web");
        assert_eq!(dep.data["deploymentStrategy"], "RollingUpdate");
        assert_eq!(dep.data["desiredReplicas"], 3);
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:namespace/ns",
            "urn:kubernetes:/mycluster:ns:deployment/web",
            RelationType::Encloses
        ));
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:ns:deployment/web",
            "urn:kubernetes:/mycluster:ns:replicaset/web-5d4f",
            RelationType::Owns
        ));
        assert!(!out.has_relation(
            "urn:kubernetes:/mycluster:namespace/ns",
            "urn:kubernetes:/mycluster:ns:replicaset/web-5d4f",
            RelationType::Encloses
        ));
    }

    #[tokio::test]
    async fn cronjobs_own_their_jobs() {
        let state = ClusterState {
            jobs: vec![Job {
                metadata: owned(meta("ns", "backup-1"), "CronJob", "backup"),
                ..Default::default()
            }],
            ..Default::default()
        };
        let h = Harness::new(state, config());
        Box::<JobCollector>::default().run(&h.ctx).await.unwrap();
        let out = h.output();
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:ns:cronjob/backup",
            "urn:kubernetes:/mycluster:ns:job/backup-1",
            RelationType::Owns
        ));
    }

    #[tokio::test]
    async fn unknown_owner_kinds_fall_back_to_the_namespace() {
        let state = ClusterState {
            stateful_sets: vec![StatefulSet {
                metadata: owned(meta("ns", "db"), "Operator", "pg"),
                ..Default::default()
            }],
            ..Default::default()
        };
        let h = Harness::new(state, config());
        Box::<StatefulSetCollector>::default().run(&h.ctx).await.unwrap();
        let out = h.output();
        assert_eq!(out.relations.len(), 1);
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:namespace/ns",
            "urn:kubernetes:/mycluster:ns:statefulset/db",
            RelationType::Encloses
        ));
    }
}
