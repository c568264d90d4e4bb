use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;

use super::{listing, Collector, RunContext};
use crate::correlators::{EndpointTarget, ServiceSelectorCorrelation};
use crate::kube::{Endpoints, Service};
use crate::model::{Component, Relation, RelationType};
use crate::urn::UrnBuilder;
use crate::Result;

/// Collects services and publishes their selectors, joined with the pods
/// their endpoints target, to the service↔pod correlator.
#[derive(Debug)]
pub struct ServiceCollector {
    selectors: mpsc::Sender<ServiceSelectorCorrelation>,
}

impl ServiceCollector {
    pub fn new(selectors: mpsc::Sender<ServiceSelectorCorrelation>) -> Self {
        Self { selectors }
    }
}

#[async_trait::async_trait]
impl Collector for ServiceCollector {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let services = listing(self.name(), ctx.client.services().await)?;
        let mut targets = if ctx.config.resources.endpoints {
            endpoint_targets(listing("endpoints", ctx.client.endpoints().await)?)
        } else {
            HashMap::new()
        };

        for service in services {
            let component = service_component(ctx, &service);
            let service_urn = component.external_id.clone();
            ctx.component(component).await;

            if service.spec.service_type == "ExternalName" {
                let external = external_service_component(ctx, &service);
                let relation =
                    Relation::new(service_urn.as_str(), external.external_id.as_str(), RelationType::Uses);
                ctx.component(external).await;
                ctx.relation(relation).await;
            }
            ctx.relation(ctx.namespace_relation(&service.metadata.namespace, &service_urn))
                .await;

            let key = (
                service.metadata.namespace.clone(),
                service.metadata.name.clone(),
            );
            let record = ServiceSelectorCorrelation {
                service_external_id: service_urn,
                namespace: service.metadata.namespace,
                selector: service.spec.selector,
                endpoints: targets.remove(&key).unwrap_or_default(),
            };
            ctx.forward(&self.selectors, record).await;
        }
        Ok(())
    }
}

/// Pod targets of every endpoints object, keyed by the (namespace, name)
/// of the service it belongs to.
fn endpoint_targets(endpoints: Vec<Endpoints>) -> HashMap<(String, String), Vec<EndpointTarget>> {
    endpoints
        .into_iter()
        .map(|ep| {
            let targets: Vec<EndpointTarget> = ep
                .subsets
                .iter()
                .flat_map(|subset| &subset.addresses)
                .filter_map(|addr| addr.target_ref.as_ref())
                .filter(|target| target.kind == "Pod")
                .map(|target| EndpointTarget {
                    namespace: if target.namespace.is_empty() {
                        ep.metadata.namespace.clone()
                    } else {
                        target.namespace.clone()
                    },
                    name: target.name.clone(),
                })
                .collect();
            ((ep.metadata.namespace, ep.metadata.name), targets)
        })
        .collect()
}

fn has_cluster_ip(service: &Service) -> bool {
    !service.spec.cluster_ip.is_empty() && !service.is_headless()
}

/// Alternative identifiers of a service, from its IPs, ports and load
/// balancer ingress points.
pub(crate) fn service_identifiers(urn: &UrnBuilder, service: &Service) -> Vec<String> {
    let spec = &service.spec;
    let mut ids = Vec::new();

    for ip in spec.external_ips.iter().filter(|ip| !ip.is_empty()) {
        for port in &spec.ports {
            ids.push(urn.endpoint(ip, Some(port.port)));
            if spec.service_type == "NodePort" {
                if let Some(node_port) = port.node_port.filter(|p| *p != 0) {
                    ids.push(urn.endpoint(ip, Some(node_port)));
                }
            }
        }
    }

    match spec.service_type.as_str() {
        "ClusterIP" | "" if has_cluster_ip(service) => {
            ids.push(urn.endpoint(&spec.cluster_ip, None));
        }
        "NodePort" if has_cluster_ip(service) => {
            ids.push(urn.endpoint(&spec.cluster_ip, None));
            for node_port in spec.ports.iter().filter_map(|p| p.node_port).filter(|p| *p != 0) {
                ids.push(urn.endpoint(&spec.cluster_ip, Some(node_port)));
            }
        }
        "LoadBalancer" => {
            if let Some(lb_ip) = spec.load_balancer_ip.as_deref().filter(|ip| !ip.is_empty()) {
                ids.push(urn.endpoint(lb_ip, None));
            }
            if has_cluster_ip(service) {
                ids.push(urn.endpoint(&spec.cluster_ip, None));
            }
        }
        _ => {}
    }

    for point in &service.status.load_balancer.ingress {
        if !point.ip.is_empty() {
            ids.push(urn.ingress_point(&point.ip));
        }
        if !point.hostname.is_empty() {
            ids.push(urn.ingress_point(&point.hostname));
        }
    }

    ids.push(urn.service_alias(&service.metadata.namespace, &service.metadata.name));
    ids
}

fn service_component(ctx: &RunContext, service: &Service) -> Component {
    let mut tags = ctx.tags(&service.metadata);
    tags.insert(
        "service-type".into(),
        service.spec.service_type.clone().into(),
    );
    if service.is_headless() {
        tags.insert("service".into(), "headless".into());
    }
    let urn = ctx
        .urn
        .service(&service.metadata.namespace, &service.metadata.name);
    ctx.object_component(urn, "service", service)
        .with("tags", Value::Object(tags))
        .with("identifiers", service_identifiers(&ctx.urn, service))
}

fn external_service_component(ctx: &RunContext, service: &Service) -> Component {
    let (ns, name) = (&service.metadata.namespace, &service.metadata.name);
    let mut identifiers = Vec::new();
    if let Some(external) = service
        .spec
        .external_name
        .as_deref()
        .filter(|n| !n.is_empty() && *n != "None")
    {
        identifiers.push(format!("urn:endpoint:/{}", external));
        for port in service.spec.ports.iter().filter(|p| p.port != 0) {
            identifiers.push(ctx.urn.endpoint(external, Some(port.port)));
        }
    }
    identifiers.push(
        format!("urn:external-service:/{}:{}:{}", ctx.urn.cluster_name(), ns, name).to_lowercase(),
    );

    let mut component = Component::new(ctx.urn.external_service(ns, name), "external-service")
        .with("name", name.as_str())
        .with("kind", "ExternalService")
        .with("tags", Value::Object(ctx.tags(&service.metadata)))
        .with("identifiers", identifiers)
        .with("uid", service.metadata.uid.as_str());
    if let Some(ts) = service.metadata.creation_timestamp {
        component.set("creationTimestamp", ts.to_rfc3339());
    }
    component
}
