use serde_json::json;
use tokio::sync::mpsc;

use super::{listing, Collector, RunContext};
use crate::correlators::NodeIdentifierCorrelation;
use crate::kube::Node;
use crate::model::{Component, Relation, RelationType};
use crate::{Error, Result};

const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

#[derive(Debug)]
pub struct NodeCollector {
    node_ids: mpsc::Sender<NodeIdentifierCorrelation>,
}

impl NodeCollector {
    pub fn new(node_ids: mpsc::Sender<NodeIdentifierCorrelation>) -> Self {
        Self { node_ids }
    }
}

#[async_trait::async_trait]
impl Collector for NodeCollector {
    fn name(&self) -> &'static str {
        "node"
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let nodes = listing(self.name(), ctx.client.nodes().await)?;
        for node in &nodes {
            let hostname = hostname(node);
            let component = node_component(ctx, node, &hostname);
            let external_id = component.external_id.clone();
            let identifiers = component.identifiers().iter().map(|s| s.to_string()).collect();

            ctx.component(component).await;
            ctx.relation(Relation::new(
                external_id.as_str(),
                ctx.urn.cluster(),
                RelationType::EnclosedIn,
            ))
            .await;

            let node_identifier = match node.address("InternalIP") {
                Some(_) => Some(hostname),
                None => {
                    log::warn!(node = node.metadata.name.as_str(); "node has no internal IP, containers will not be bound to it");
                    ctx.error(Error::MissingInternalIp(node.metadata.name.clone()))
                        .await;
                    None
                }
            };
            let record = NodeIdentifierCorrelation {
                node_name: node.metadata.name.clone(),
                node_external_id: external_id,
                node_identifier,
                identifiers,
            };
            ctx.forward(&self.node_ids, record).await;
        }
        log::debug!(count = nodes.len(); "collected nodes");
        Ok(())
    }
}

/// The node's hostname: its hostname label, else a Hostname or InternalDNS
/// address, else the node name.
fn hostname(node: &Node) -> String {
    node.metadata
        .labels
        .get(HOSTNAME_LABEL)
        .map(String::as_str)
        .or_else(|| node.address("Hostname"))
        .or_else(|| node.address("InternalDNS"))
        .filter(|h| !h.is_empty())
        .unwrap_or(&node.metadata.name)
        .to_string()
}

fn node_component(ctx: &RunContext, node: &Node, hostname: &str) -> Component {
    let identifiers = ctx.urn.node_identifiers(
        &node.metadata.name,
        &node.status.addresses,
        &node.spec.provider_id,
        hostname,
    );
    let mut component = ctx
        .object_component(ctx.urn.node(&node.metadata.name), "node", node)
        .with("identifiers", identifiers)
        .with("instanceId", hostname)
        .with("sts_host", hostname);
    if !ctx.config.source_properties_enabled {
        component.set(
            "status",
            json!({
                "phase": node.status.phase,
                "nodeInfo": node.status.node_info,
                "kubeletEndpoint": node.status.daemon_endpoints.kubelet_endpoint,
            }),
        );
    }
    component
}
