use serde_json::Value;

use super::{listing, Collector, RunContext};
use crate::kube::Ingress;
use crate::model::{Component, Relation, RelationType};
use crate::Result;

#[derive(Debug, Default)]
pub struct IngressCollector;

#[async_trait::async_trait]
impl Collector for IngressCollector {
    fn name(&self) -> &'static str {
        "ingress"
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let ingresses = listing(self.name(), ctx.client.ingresses().await)?;
        for ingress in &ingresses {
            let ns = &ingress.metadata.namespace;
            let urn = ctx.urn.ingress(ns, &ingress.metadata.name);
            ctx.component(ctx.object_component(urn.clone(), "ingress", ingress))
                .await;

            for service in backend_services(ingress) {
                ctx.relation(Relation::new(
                    urn.as_str(),
                    ctx.urn.service(ns, service),
                    RelationType::RoutesTo,
                ))
                .await;
            }

            for point in ingress_points(ingress) {
                let endpoint = endpoint_component(ctx, ingress, point);
                let relation =
                    Relation::new(endpoint.external_id.as_str(), urn.as_str(), RelationType::RoutesTo);
                ctx.component(endpoint).await;
                ctx.relation(relation).await;
            }
        }
        Ok(())
    }
}

/// Services routed to by the default backend and every rule path, in
/// order of appearance and without repeats.
fn backend_services(ingress: &Ingress) -> Vec<&str> {
    let default = ingress
        .spec
        .default_backend
        .as_ref()
        .and_then(|b| b.service_name());
    let paths = ingress
        .spec
        .rules
        .iter()
        .filter_map(|rule| rule.http.as_ref())
        .flat_map(|http| &http.paths)
        .filter_map(|path| path.backend.service_name());

    let mut services: Vec<&str> = Vec::new();
    for name in default.into_iter().chain(paths) {
        if !services.contains(&name) {
            services.push(name);
        }
    }
    services
}

fn ingress_points(ingress: &Ingress) -> impl Iterator<Item = &str> {
    ingress
        .status
        .load_balancer
        .ingress
        .iter()
        .flat_map(|point| [point.ip.as_str(), point.hostname.as_str()])
        .filter(|point| !point.is_empty())
}

fn endpoint_component(ctx: &RunContext, ingress: &Ingress, point: &str) -> Component {
    let mut component = Component::new(ctx.urn.endpoint(point, None), "endpoint")
        .with("name", point)
        .with("tags", Value::Object(ctx.tags(&ingress.metadata)))
        .with("identifiers", vec![ctx.urn.ingress_point(point)]);
    if let Some(ts) = ingress.metadata.creation_timestamp {
        component.set("creationTimestamp", ts.to_rfc3339());
    }
    component
}
