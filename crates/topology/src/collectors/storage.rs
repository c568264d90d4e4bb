use std::collections::HashMap;

use serde_json::{Map, Value};

use super::{listing, Collector, RunContext};
use crate::kube::PersistentVolume;
use crate::model::{Component, Relation, RelationType};
use crate::Result;

/// Collects persistent volumes, their backing sources and the nodes they
/// are attached to.
#[derive(Debug, Default)]
pub struct PersistentVolumeCollector;

#[async_trait::async_trait]
impl Collector for PersistentVolumeCollector {
    fn name(&self) -> &'static str {
        "persistentvolume"
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let volumes = listing(self.name(), ctx.client.persistent_volumes().await)?;
        let attachments = match ctx.client.volume_attachments().await {
            Ok(attachments) => attachments,
            Err(err) => {
                log::warn!(collector = self.name(); "could not list volume attachments: {:#}", err);
                Vec::new()
            }
        };
        let attached: HashMap<&str, &str> = attachments
            .iter()
            .filter_map(|va| {
                va.spec
                    .source
                    .persistent_volume_name
                    .as_deref()
                    .map(|pv| (pv, va.spec.node_name.as_str()))
            })
            .collect();

        for pv in &volumes {
            let urn = ctx.urn.persistent_volume(&pv.metadata.name);
            let node = attached.get(pv.metadata.name.as_str()).copied();
            ctx.component(volume_component(ctx, pv, &urn, node)).await;

            match volume_source(ctx, pv, &urn) {
                Some(source) => {
                    let relation =
                        Relation::new(urn.as_str(), source.external_id.as_str(), RelationType::Exposes);
                    ctx.component(source).await;
                    ctx.relation(relation).await;
                }
                None => log::debug!(pv = pv.metadata.name.as_str(); "unknown persistent volume source, skipping it"),
            }
        }

        for (pv, node) in attached {
            ctx.relation(Relation::new(
                ctx.urn.node(node),
                ctx.urn.persistent_volume(pv),
                RelationType::Exposes,
            ))
            .await;
        }
        Ok(())
    }
}

fn volume_component(
    ctx: &RunContext,
    pv: &PersistentVolume,
    urn: &str,
    node: Option<&str>,
) -> Component {
    let mut tags = ctx.tags(&pv.metadata);
    if let Some(node) = node {
        tags.insert("persistent-volume-node".into(), node.into());
    }
    let mut component = ctx
        .object_component(urn.to_string(), "persistent-volume", pv)
        .with("tags", Value::Object(tags));
    if !ctx.config.source_properties_enabled {
        for (key, value) in [
            ("storageClassName", &pv.spec.storage_class_name),
            ("status", &pv.status.phase),
            ("statusMessage", &pv.status.message),
        ] {
            super::put_non_empty(&mut component, key, value);
        }
    }
    component
}

/// The component for the storage backing a persistent volume, if its
/// source is one of the known kinds.
fn volume_source(ctx: &RunContext, pv: &PersistentVolume, pv_urn: &str) -> Option<Component> {
    let spec = &pv.spec;
    let mut tags = Map::new();
    let (kind, name, source) = if let Some(ebs) = &spec.aws_elastic_block_store {
        tags.insert("volume-id".into(), ebs.volume_id.clone().into());
        if let Some(partition) = ebs.partition {
            tags.insert("partition".into(), partition.to_string().into());
        }
        ("aws-ebs", ebs.volume_id.clone(), serde_json::to_value(ebs))
    } else if let Some(pd) = &spec.gce_persistent_disk {
        tags.insert("pd-name".into(), pd.pd_name.clone().into());
        ("gce-pd", pd.pd_name.clone(), serde_json::to_value(pd))
    } else if let Some(nfs) = &spec.nfs {
        tags.insert("nfs-server".into(), nfs.server.clone().into());
        tags.insert("nfs-path".into(), nfs.path.clone().into());
        ("nfs", format!("{}:{}", nfs.server, nfs.path), serde_json::to_value(nfs))
    } else if let Some(host_path) = &spec.host_path {
        tags.insert("path".into(), host_path.path.clone().into());
        ("host-path", host_path.path.clone(), serde_json::to_value(host_path))
    } else if let Some(csi) = spec.csi.as_ref().filter(|_| ctx.config.csi_pv_mapper_enabled) {
        tags.insert("csi-driver".into(), csi.driver.clone().into());
        tags.insert("csi-volume-handle".into(), csi.volume_handle.clone().into());
        ("csi", csi.volume_handle.clone(), serde_json::to_value(csi))
    } else {
        return None;
    };

    tags.insert("kind".into(), kind.into());
    tags.insert("cluster-name".into(), ctx.urn.cluster_name().into());
    let mut component = Component::new(ctx.urn.volume_source(pv_urn, kind), "volume-source")
        .with("name", name)
        .with("tags", Value::Object(tags))
        .with("kind", "VolumeSource");
    match source {
        Ok(source) => component.set("source", source),
        Err(err) => log::warn!(pv = pv.metadata.name.as_str(); "could not serialize volume source: {}", err),
    }
    Some(component)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClusterState;
    use crate::collectors::testing::{config, meta, Harness};
    use crate::kube::{
        AwsElasticBlockStoreSource, CsiPersistentVolumeSource, PersistentVolumeSpec,
        PersistentVolumeStatus, VolumeAttachment, VolumeAttachmentSource, VolumeAttachmentSpec,
    };

    fn ebs_volume(name: &str) -> PersistentVolume {
        PersistentVolume {
            metadata: meta("", name),
            spec: PersistentVolumeSpec {
                storage_class_name: "gp2".into(),
                aws_elastic_block_store: Some(AwsElasticBlockStoreSource {
                    volume_id: "vol-0abc".into(),
                    fs_type: "ext4".into(),
                    partition: Some(0),
                }),
                ..Default::default()
            },
            status: PersistentVolumeStatus {
                phase: "Bound".into(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn volume_with_source_and_attachment() {
        let state = ClusterState {
            persistent_volumes: vec![ebs_volume("pv1")],
            volume_attachments: vec![VolumeAttachment {
                metadata: meta("", "va1"),
                spec: VolumeAttachmentSpec {
                    attacher: "ebs.csi.aws.com".into(),
                    node_name: "n1".into(),
                    source: VolumeAttachmentSource {
                        persistent_volume_name: Some("pv1".into()),
                    },
                },
            }],
            ..Default::default()
        };
        let h = Harness::new(state, config());
        Box::new(PersistentVolumeCollector).run(&h.ctx).await.unwrap();
        let out = h.output();

        let pv_urn = "urn:kubernetes:/mycluster:persistent-volume/pv1";
        let pv = out.component(pv_urn);
        assert_eq!(pv.data["tags"]["persistent-volume-node"], "n1");
        assert_eq!(pv.data["storageClassName"], "gp2");
        assert_eq!(pv.data["status"], "Bound");

        let source_urn = "urn:kubernetes:/mycluster:persistent-volume/pv1:volume-source/aws-ebs";
        let source = out.component(source_urn);
        assert_eq!(source.data["tags"]["volume-id"], "vol-0abc");
        assert_eq!(source.data["source"]["volumeID"], "vol-0abc");
        assert!(out.has_relation(pv_urn, source_urn, RelationType::Exposes));
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:node/n1",
            pv_urn,
            RelationType::Exposes
        ));
    }

    #[tokio::test]
    async fn csi_sources_need_the_mapper() {
        let mut pv = ebs_volume("pv2");
        pv.spec.aws_elastic_block_store = None;
        pv.spec.csi = Some(CsiPersistentVolumeSource {
            driver: "pd.csi.storage.gke.io".into(),
            volume_handle: "projects/p/disks/d".into(),
            fs_type: String::new(),
        });
        let state = ClusterState {
            persistent_volumes: vec![pv],
            ..Default::default()
        };

        let h = Harness::new(state.clone(), config());
        Box::new(PersistentVolumeCollector).run(&h.ctx).await.unwrap();
        assert_eq!(h.output().components.len(), 1);

        let mut cfg = config();
        cfg.csi_pv_mapper_enabled = true;
        let h = Harness::new(state, cfg);
        Box::new(PersistentVolumeCollector).run(&h.ctx).await.unwrap();
        let out = h.output();
        assert_eq!(out.components.len(), 2);
        out.component("urn:kubernetes:/mycluster:persistent-volume/pv2:volume-source/csi");
    }
}
