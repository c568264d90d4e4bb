use serde_json::{Map, Value};

use super::{listing, Collector, RunContext};
use crate::model::Component;
use crate::Result;

/// Emits the cluster root once the API server has identified itself.
#[derive(Debug, Default)]
pub struct ClusterCollector;

#[async_trait::async_trait]
impl Collector for ClusterCollector {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let Some(version) = listing(self.name(), ctx.client.version().await)? else {
            log::debug!("api server version unknown, not emitting the cluster component");
            return Ok(());
        };

        let mut tags = Map::new();
        tags.insert("cluster-name".into(), ctx.urn.cluster_name().into());
        tags.insert("cluster-type".into(), ctx.urn.cluster_type().as_str().into());
        let component = Component::new(ctx.urn.cluster(), "cluster")
            .with("name", ctx.urn.cluster_name())
            .with("tags", Value::Object(tags))
            .with("version", version.git_version);
        ctx.component(component).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClusterState;
    use crate::collectors::testing::{config, Harness};
    use crate::kube::VersionInfo;

    #[tokio::test]
    async fn cluster_component_needs_a_version() {
        let h = Harness::new(ClusterState::default(), config());
        Box::new(ClusterCollector).run(&h.ctx).await.unwrap();
        assert!(h.output().components.is_empty());

        let h = Harness::new(
            ClusterState {
                version: Some(VersionInfo {
                    git_version: "v1.29.2".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            config(),
        );
        Box::new(ClusterCollector).run(&h.ctx).await.unwrap();
        let out = h.output();
        let cluster = out.component("urn:cluster:/kubernetes:mycluster");
        assert_eq!(cluster.data["version"], "v1.29.2");
        assert_eq!(cluster.name(), Some("mycluster"));
    }
}
