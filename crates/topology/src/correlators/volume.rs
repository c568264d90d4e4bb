use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;

use super::{Correlator, PodIdentifier, VolumeCorrelation};
use crate::collectors::RunContext;
use crate::kube::{ObjectMeta, Volume};
use crate::model::{Component, Relation, RelationType};
use crate::{Error, Result};

/// Resolves pod volumes to what backs them and the container mounts to
/// those volumes. With claim discovery it also emits the claims.
#[derive(Debug)]
pub struct VolumeCorrelator {
    volumes: mpsc::Receiver<VolumeCorrelation>,
    discover_claims: bool,
}

impl VolumeCorrelator {
    pub fn new(volumes: mpsc::Receiver<VolumeCorrelation>, discover_claims: bool) -> Self {
        Self {
            volumes,
            discover_claims,
        }
    }

    /// Lists the claims, emits them bound to their volumes and returns the
    /// set of known (namespace, claim) pairs.
    async fn list_claims(&self, ctx: &RunContext) -> Result<HashMap<(String, String), String>> {
        let claims = ctx
            .client
            .persistent_volume_claims()
            .await
            .map_err(|err| Error::api(self.name(), err))?;

        let mut known = HashMap::new();
        for claim in &claims {
            let (ns, name) = (&claim.metadata.namespace, &claim.metadata.name);
            let urn = ctx.urn.persistent_volume_claim(ns, name);
            let mut component = ctx.object_component(urn.clone(), "persistent-volume-claim", claim);
            if !ctx.config.source_properties_enabled {
                if let Some(class) = claim.spec.storage_class_name.as_deref() {
                    component.set("storageClassName", class);
                }
                if !claim.status.phase.is_empty() {
                    component.set("status", claim.status.phase.as_str());
                }
            }
            ctx.component(component).await;
            ctx.relation(ctx.namespace_relation(ns, &urn)).await;
            if !claim.spec.volume_name.is_empty() {
                ctx.relation(Relation::new(
                    urn.as_str(),
                    ctx.urn.persistent_volume(&claim.spec.volume_name),
                    RelationType::Claims,
                ))
                .await;
            }
            known.insert((ns.clone(), name.clone()), urn);
        }
        Ok(known)
    }

    /// Emits what backs `volume` and the pod's claim on it. Returns the
    /// external id container mounts of the volume should point at.
    async fn map_volume(
        &self,
        ctx: &RunContext,
        pod: &PodIdentifier,
        volume: &Volume,
        claims: &HashMap<(String, String), String>,
    ) -> Option<String> {
        if volume.downward_api.is_some() {
            return Some(pod.external_id.clone());
        }

        let target = if let Some(pvc) = &volume.persistent_volume_claim {
            let key = (pod.namespace.clone(), pvc.claim_name.clone());
            match claims.get(&key) {
                Some(urn) => urn.clone(),
                None => {
                    if self.discover_claims {
                        log::error!(pod = pod.external_id.as_str(), claim = pvc.claim_name.as_str(); "unknown persistent volume claim");
                    } else {
                        log::warn!(pod = pod.external_id.as_str(), claim = pvc.claim_name.as_str(); "cannot resolve persistent volume claim, claim collection is disabled");
                    }
                    return None;
                }
            }
        } else {
            let component = volume_component(ctx, pod, volume);
            let urn = component.external_id.clone();
            ctx.component(component).await;
            urn
        };

        ctx.relation(Relation::new(
            pod.external_id.as_str(),
            target.as_str(),
            RelationType::Claims,
        ))
        .await;
        Some(target)
    }
}

#[async_trait::async_trait]
impl Correlator for VolumeCorrelator {
    fn name(&self) -> &'static str {
        "volume"
    }

    async fn run(mut self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let claims = if self.discover_claims {
            self.list_claims(ctx).await?
        } else {
            HashMap::new()
        };

        while let Some(record) = self.volumes.recv().await {
            let pod = &record.pod;
            let mut targets = HashMap::new();
            for volume in &record.volumes {
                if let Some(target) = self.map_volume(ctx, pod, volume, &claims).await {
                    targets.insert(volume.name.as_str(), target);
                }
            }

            if !pod.is_scheduled() {
                continue;
            }
            for container in &record.containers {
                let container_urn = ctx.urn.container(&pod.external_id, &container.name);
                for mount in &container.volume_mounts {
                    let Some(target) = targets.get(mount.name.as_str()) else {
                        if self.discover_claims {
                            log::warn!(pod = pod.external_id.as_str(), container = container.name.as_str(), volume = mount.name.as_str(); "container mounts an unknown volume");
                        }
                        continue;
                    };
                    let relation =
                        Relation::new(container_urn.as_str(), target.as_str(), RelationType::Mounts)
                            .with("name", mount.name.as_str())
                            .with("readOnly", mount.read_only)
                            .with("mountPath", mount.mount_path.as_str())
                            .with("subPath", mount.sub_path.as_str())
                            .with("mountPropagation", mount.mount_propagation.clone());
                    ctx.relation(relation).await;
                }
            }
        }
        Ok(())
    }
}

/// `emptyDir` → `empty-dir`.
fn kebab(source_type: &str) -> String {
    let mut out = String::with_capacity(source_type.len() + 4);
    for c in source_type.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn volume_component(ctx: &RunContext, pod: &PodIdentifier, volume: &Volume) -> Component {
    let meta = ObjectMeta {
        namespace: pod.namespace.clone(),
        ..Default::default()
    };
    let mut tags = ctx.tags(&meta);
    tags.insert("kind".into(), kebab(volume.source_type()).into());

    let mut component = Component::new(ctx.urn.volume(&pod.external_id, &volume.name), "volume")
        .with("name", volume.name.as_str())
        .with("tags", Value::Object(tags));
    match serde_json::to_value(volume) {
        Ok(Value::Object(mut source)) => {
            source.remove("name");
            let key = if ctx.config.source_properties_enabled {
                "sourceProperties"
            } else {
                "source"
            };
            component.set(key, Value::Object(source));
        }
        Ok(_) => {}
        Err(err) => log::warn!(volume = volume.name.as_str(); "could not serialize volume source: {}", err),
    }
    component
}
