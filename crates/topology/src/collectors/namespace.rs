use super::{listing, Collector, RunContext};
use crate::Result;

#[derive(Debug, Default)]
pub struct NamespaceCollector;

#[async_trait::async_trait]
impl Collector for NamespaceCollector {
    fn name(&self) -> &'static str {
        "namespace"
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let namespaces = listing(self.name(), ctx.client.namespaces().await)?;
        for ns in &namespaces {
            let urn = ctx.urn.namespace(&ns.metadata.name);
            let mut component = ctx
                .object_component(urn.clone(), "namespace", ns)
                .with("identifiers", vec![urn]);
            if !ctx.config.source_properties_enabled && !ns.status.phase.is_empty() {
                component.set("phase", ns.status.phase.as_str());
            }
            ctx.component(component).await;
        }
        Ok(())
    }
}
