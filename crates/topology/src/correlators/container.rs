use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{ContainerCorrelation, Correlator, NodeIdentifierCorrelation};
use crate::collectors::RunContext;
use crate::kube::{Container, ContainerStatus, ObjectMeta};
use crate::model::{Component, Relation, RelationType};
use crate::Result;

/// Binds every pod container to its pod and to the node the pod runs on.
#[derive(Debug)]
pub struct ContainerCorrelator {
    node_ids: mpsc::Receiver<NodeIdentifierCorrelation>,
    containers: mpsc::Receiver<ContainerCorrelation>,
}

impl ContainerCorrelator {
    pub fn new(
        node_ids: mpsc::Receiver<NodeIdentifierCorrelation>,
        containers: mpsc::Receiver<ContainerCorrelation>,
    ) -> Self {
        Self {
            node_ids,
            containers,
        }
    }
}

#[async_trait::async_trait]
impl Correlator for ContainerCorrelator {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn run(mut self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let mut nodes = HashMap::new();
        while let Some(node) = self.node_ids.recv().await {
            nodes.insert(node.node_name.clone(), node);
        }

        while let Some(record) = self.containers.recv().await {
            if !record.pod.is_scheduled() {
                log::debug!(pod = record.pod.external_id.as_str(); "pod is not scheduled yet, skipping its containers");
                continue;
            }
            let Some(node) = nodes.get(&record.pod.node_name) else {
                log::debug!(pod = record.pod.external_id.as_str(); "pod is not scheduled on a known node, skipping its containers");
                continue;
            };
            for (container, status) in merge(&record.containers, &record.statuses) {
                let component = container_component(ctx, &record, node, container, status);
                let container_urn = component.external_id.clone();
                ctx.component(component).await;
                ctx.relation(Relation::new(
                    container_urn.as_str(),
                    record.pod.external_id.as_str(),
                    RelationType::EnclosedIn,
                ))
                .await;
                ctx.relation(Relation::new(
                    container_urn,
                    node.node_external_id.as_str(),
                    RelationType::ScheduledOn,
                ))
                .await;
            }
        }
        Ok(())
    }
}

/// Pairs each declared container with its status, if one was reported.
fn merge<'a>(
    containers: &'a [Container],
    statuses: &'a [ContainerStatus],
) -> impl Iterator<Item = (&'a Container, Option<&'a ContainerStatus>)> {
    containers
        .iter()
        .map(move |c| (c, statuses.iter().find(|s| s.name == c.name)))
}

/// `docker://abc` → `abc`.
fn strip_runtime(container_id: &str) -> &str {
    container_id.rsplit('/').next().unwrap_or(container_id)
}

fn container_component(
    ctx: &RunContext,
    record: &ContainerCorrelation,
    node: &NodeIdentifierCorrelation,
    container: &Container,
    status: Option<&ContainerStatus>,
) -> Component {
    let pod = &record.pod;
    let container_id = status.map(|s| strip_runtime(&s.container_id)).unwrap_or_default();
    let image = status
        .map(|s| s.image.as_str())
        .filter(|i| !i.is_empty())
        .unwrap_or(&container.image);

    let meta = ObjectMeta {
        namespace: pod.namespace.clone(),
        labels: record.labels.clone(),
        ..Default::default()
    };
    let mut component = Component::new(ctx.urn.container(&pod.external_id, &container.name), "container")
        .with("name", container.name.as_str())
        .with("tags", Value::Object(ctx.tags(&meta)))
        .with(
            "docker",
            json!({
                "image": image,
                "imageId": status.map(|s| s.image_id.as_str()).unwrap_or_default(),
                "containerId": container_id,
            }),
        )
        .with("pod", pod.name.as_str())
        .with("podIP", record.pod_ip.as_str())
        .with("podPhase", record.pod_phase.as_str())
        .with("restartCount", status.map(|s| s.restart_count).unwrap_or_default());

    if !container_id.is_empty() {
        let alias = match &node.node_identifier {
            Some(node_id) => ctx.urn.container_alias(node_id, container_id),
            None => format!("urn:container:/{}", container_id),
        };
        component.set("identifiers", vec![alias]);
    }

    if let Some(status) = status {
        if let Some(started) = status.state.running.as_ref().and_then(|r| r.started_at) {
            component.set("startTime", started.to_rfc3339());
        }
        let terminated = status
            .state
            .terminated
            .as_ref()
            .or(status.last_state.terminated.as_ref());
        if let Some(terminated) = terminated {
            component.set("exitCode", terminated.exit_code);
        }
    }

    if let Some(port) = container.ports.first() {
        if port.container_port != 0 {
            component.set("containerPort", port.container_port);
        }
        if let Some(host_port) = port.host_port.filter(|p| *p != 0) {
            component.set("hostPort", host_port);
        }
    }
    component
}
