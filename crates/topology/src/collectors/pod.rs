use indexmap::IndexSet;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{listing, Collector, RunContext};
use crate::correlators::{
    ContainerCorrelation, PodIdentifier, PodLabelCorrelation, VolumeCorrelation,
};
use crate::kube::Pod;
use crate::model::{Component, Relation, RelationType};
use crate::Result;

const CONTROLLER_KINDS: &[&str] = &["DaemonSet", "Deployment", "ReplicaSet", "StatefulSet", "Job"];

/// Collects pods and publishes the container, volume and label records
/// the correlators join against.
#[derive(Debug)]
pub struct PodCollector {
    containers: mpsc::Sender<ContainerCorrelation>,
    volumes: mpsc::Sender<VolumeCorrelation>,
    pod_labels: mpsc::Sender<PodLabelCorrelation>,
}

impl PodCollector {
    pub fn new(
        containers: mpsc::Sender<ContainerCorrelation>,
        volumes: mpsc::Sender<VolumeCorrelation>,
        pod_labels: mpsc::Sender<PodLabelCorrelation>,
    ) -> Self {
        Self {
            containers,
            volumes,
            pod_labels,
        }
    }
}

#[async_trait::async_trait]
impl Collector for PodCollector {
    fn name(&self) -> &'static str {
        "pod"
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let pods = listing(self.name(), ctx.client.pods().await)?;
        for pod in pods {
            let component = pod_component(ctx, &pod);
            let pod_urn = component.external_id.clone();
            ctx.component(component).await;

            if !pod.spec.node_name.is_empty() {
                ctx.relation(Relation::new(
                    pod_urn.as_str(),
                    ctx.urn.node(&pod.spec.node_name),
                    RelationType::ScheduledOn,
                ))
                .await;
            }

            let controllers = controller_relations(ctx, &pod, &pod_urn);
            if controllers.is_empty() {
                ctx.relation(ctx.namespace_relation(&pod.metadata.namespace, &pod_urn))
                    .await;
            }
            for relation in controllers {
                ctx.relation(relation).await;
            }
            for relation in reference_relations(ctx, &pod, &pod_urn) {
                ctx.relation(relation).await;
            }

            let identifier = PodIdentifier {
                external_id: pod_urn.clone(),
                namespace: pod.metadata.namespace.clone(),
                name: pod.metadata.name.clone(),
                node_name: pod.spec.node_name.clone(),
            };
            let labels = PodLabelCorrelation {
                pod_external_id: pod_urn,
                namespace: pod.metadata.namespace.clone(),
                name: pod.metadata.name.clone(),
                labels: pod.metadata.labels.clone(),
            };
            ctx.forward(&self.pod_labels, labels).await;

            if !pod.spec.volumes.is_empty() {
                let volumes = VolumeCorrelation {
                    pod: identifier.clone(),
                    volumes: pod.spec.volumes.clone(),
                    containers: pod.spec.containers.clone(),
                };
                ctx.forward(&self.volumes, volumes).await;
            }

            if !pod.spec.containers.is_empty() {
                let containers = ContainerCorrelation {
                    pod: identifier,
                    pod_ip: pod.status.pod_ip,
                    pod_phase: pod.status.phase,
                    labels: pod.metadata.labels,
                    containers: pod.spec.containers,
                    statuses: pod.status.container_statuses,
                };
                ctx.forward(&self.containers, containers).await;
            }
        }
        Ok(())
    }
}

fn pod_component(ctx: &RunContext, pod: &Pod) -> Component {
    let mut tags = ctx.tags(&pod.metadata);
    if !pod.spec.service_account_name.is_empty() {
        tags.insert(
            "service-account".into(),
            pod.spec.service_account_name.clone().into(),
        );
    }

    let urn = ctx.urn.pod(&pod.metadata.namespace, &pod.metadata.name);
    let mut component = ctx
        .object_component(urn, "pod", pod)
        .with("tags", Value::Object(tags));

    let mut status = pod.status.clone();
    status.container_statuses.clear();
    match serde_json::to_value(&status) {
        Ok(status) if !ctx.config.source_properties_enabled => component.set("status", status),
        Ok(_) => component.set("status", serde_json::json!({ "phase": pod.status.phase })),
        Err(err) => log::warn!(pod = pod.metadata.name.as_str(); "could not serialize pod status: {}", err),
    }
    if !ctx.config.source_properties_enabled && !pod.spec.restart_policy.is_empty() {
        component.set("restartPolicy", pod.spec.restart_policy.as_str());
    }
    component
}

fn controller_relations(ctx: &RunContext, pod: &Pod, pod_urn: &str) -> Vec<Relation> {
    let finished = matches!(pod.status.phase.as_str(), "Succeeded" | "Failed");
    pod.metadata
        .owner_references
        .iter()
        .filter(|owner| CONTROLLER_KINDS.contains(&owner.kind.as_str()))
        .filter(|owner| {
            if owner.kind == "Job" && finished {
                log::debug!(pod = pod.metadata.name.as_str(), job = owner.name.as_str(); "skipping relation to finished job");
                return false;
            }
            true
        })
        .filter_map(|owner| {
            ctx.urn
                .external_id(&owner.kind, &pod.metadata.namespace, &owner.name)
                .ok()
        })
        .map(|owner_urn| Relation::new(owner_urn, pod_urn, RelationType::Owns))
        .collect()
}

/// `uses` relations for the config maps and secrets the pod's containers
/// read through `envFrom` or `valueFrom`.
fn reference_relations(ctx: &RunContext, pod: &Pod, pod_urn: &str) -> Vec<Relation> {
    let ns = &pod.metadata.namespace;
    let mut targets = IndexSet::new();
    for container in &pod.spec.containers {
        for env in &container.env_from {
            if let Some(cm) = &env.config_map_ref {
                targets.insert(ctx.urn.configmap(ns, &cm.name));
            } else if let Some(secret) = &env.secret_ref {
                targets.insert(ctx.urn.secret(ns, &secret.name));
            }
        }
        for source in container.env.iter().filter_map(|e| e.value_from.as_ref()) {
            if let Some(cm) = &source.config_map_key_ref {
                targets.insert(ctx.urn.configmap(ns, &cm.name));
            } else if let Some(secret) = &source.secret_key_ref {
                targets.insert(ctx.urn.secret(ns, &secret.name));
            }
        }
    }
    targets
        .into_iter()
        .map(|target| Relation::new(pod_urn, target, RelationType::Uses))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClusterState;
    use crate::collectors::testing::{config, meta, Harness};
    use crate::kube::{
        Container, EnvFromSource, EnvVar, EnvVarSource, KeySelector, LocalObjectReference,
        OwnerReference, PodSpec, PodStatus,
    };

    struct Receivers {
        containers: mpsc::Receiver<ContainerCorrelation>,
        volumes: mpsc::Receiver<VolumeCorrelation>,
        labels: mpsc::Receiver<PodLabelCorrelation>,
    }

    fn collector() -> (Box<PodCollector>, Receivers) {
        let (ctx_tx, containers) = mpsc::channel(16);
        let (vtx, volumes) = mpsc::channel(16);
        let (ltx, labels) = mpsc::channel(16);
        (
            Box::new(PodCollector::new(ctx_tx, vtx, ltx)),
            Receivers {
                containers,
                volumes,
                labels,
            },
        )
    }

    fn pod(name: &str, owner: Option<(&str, &str)>, phase: &str) -> Pod {
        let mut metadata = meta("ns", name);
        if let Some((kind, owner)) = owner {
            metadata.owner_references.push(OwnerReference {
                kind: kind.into(),
                name: owner.into(),
                ..Default::default()
            });
        }
        Pod {
            metadata,
            spec: PodSpec {
                node_name: "n1".into(),
                service_account_name: "default".into(),
                containers: vec![Container {
                    name: "c1".into(),
                    image: "img:1".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            status: PodStatus {
                phase: phase.into(),
                ..Default::default()
            },
        }
    }

    async fn collect(pods: Vec<Pod>) -> (crate::collectors::testing::Output, Receivers) {
        let h = Harness::new(
            ClusterState {
                pods,
                ..Default::default()
            },
            config(),
        );
        let (c, rx) = collector();
        c.run(&h.ctx).await.unwrap();
        (h.output(), rx)
    }

    #[tokio::test]
    async fn pod_relations_and_records() {
        let (out, mut rx) = collect(vec![pod("p1", Some(("ReplicaSet", "rs1")), "Running")]).await;

        let pod = out.component("urn:kubernetes:/mycluster:ns:pod/p1");
        assert_eq!(pod.data["tags"]["service-account"], "default");
        assert_eq!(pod.data["tags"]["namespace"], "ns");
        assert_eq!(pod.data["status"]["phase"], "Running");
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:ns:pod/p1",
            "urn:kubernetes:/mycluster:node/n1",
            RelationType::ScheduledOn
        ));
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:ns:replicaset/rs1",
            "urn:kubernetes:/mycluster:ns:pod/p1",
            RelationType::Owns
        ));
        assert!(!out
            .relations
            .iter()
            .any(|r| r.relation_type == RelationType::Encloses));

        let record = rx.containers.recv().await.unwrap();
        assert_eq!(record.pod.node_name, "n1");
        assert_eq!(record.containers.len(), 1);
        assert_eq!(rx.labels.recv().await.unwrap().name, "p1");
        assert!(rx.volumes.try_recv().is_err());
    }

    #[tokio::test]
    async fn finished_job_pods_are_enclosed_by_namespace() {
        let (out, _rx) = collect(vec![pod("p2", Some(("Job", "j1")), "Succeeded")]).await;
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:namespace/ns",
            "urn:kubernetes:/mycluster:ns:pod/p2",
            RelationType::Encloses
        ));
        assert!(!out
            .relations
            .iter()
            .any(|r| r.relation_type == RelationType::Owns));
    }

    #[tokio::test]
    async fn env_references_use_configmaps_and_secrets() {
        let mut p = pod("p3", None, "Running");
        p.spec.containers[0].env_from.push(EnvFromSource {
            config_map_ref: Some(LocalObjectReference { name: "cm1".into() }),
            secret_ref: None,
        });
        p.spec.containers[0].env.push(EnvVar {
            name: "PASSWORD".into(),
            value: None,
            value_from: Some(EnvVarSource {
                config_map_key_ref: None,
                secret_key_ref: Some(KeySelector {
                    name: "s1".into(),
                    key: "pw".into(),
                }),
            }),
        });
        let (out, _rx) = collect(vec![p]).await;
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:ns:pod/p3",
            "urn:kubernetes:/mycluster:ns:configmap/cm1",
            RelationType::Uses
        ));
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:ns:pod/p3",
            "urn:kubernetes:/mycluster:ns:secret/s1",
            RelationType::Uses
        ));
    }

    #[tokio::test]
    async fn shared_references_yield_one_relation_each() {
        let mut p = pod("p4", None, "Running");
        let cfg = || EnvFromSource {
            config_map_ref: Some(LocalObjectReference { name: "cfg".into() }),
            secret_ref: None,
        };
        p.spec.containers[0].env_from.push(cfg());
        p.spec.containers[0].env_from.push(EnvFromSource {
            config_map_ref: None,
            secret_ref: Some(LocalObjectReference { name: "sec".into() }),
        });
        p.spec.containers.push(Container {
            name: "c2".into(),
            image: "img:1".into(),
            env_from: vec![cfg()],
            ..Default::default()
        });
        let (out, _rx) = collect(vec![p]).await;
        let uses: Vec<&str> = out
            .relations
            .iter()
            .filter(|r| r.relation_type == RelationType::Uses)
            .map(|r| r.target_id.as_str())
            .collect();
        assert_eq!(
            uses,
            vec![
                "urn:kubernetes:/mycluster:ns:configmap/cfg",
                "urn:kubernetes:/mycluster:ns:secret/sec",
            ]
        );
    }
}
