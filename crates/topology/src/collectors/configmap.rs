use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::{listing, Collector, RunContext};
use crate::Result;

#[derive(Debug, Default)]
pub struct ConfigMapCollector;

#[async_trait::async_trait]
impl Collector for ConfigMapCollector {
    fn name(&self) -> &'static str {
        "configmap"
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let config_maps = listing(self.name(), ctx.client.config_maps().await)?;
        for cm in &config_maps {
            let urn = ctx.urn.configmap(&cm.metadata.namespace, &cm.metadata.name);
            let (data, truncated) = cut_data(&cm.data, ctx.config.configmap_max_datasize);
            if truncated {
                log::debug!(configmap = urn.as_str(); "config map data truncated");
            }

            let mut component = ctx
                .object_component(urn.clone(), "configmap", cm)
                .with("identifiers", vec![urn.clone()]);
            if !data.is_empty() {
                component.set("data", serde_json::to_value(data).unwrap_or_default());
            }
            if truncated {
                component.set("truncated", true);
            }

            ctx.component(component).await;
            ctx.relation(ctx.namespace_relation(&cm.metadata.namespace, &urn))
                .await;
        }
        Ok(())
    }
}

fn replacement(dropped: &str) -> String {
    let hash = hex::encode(Sha256::digest(dropped.as_bytes()));
    format!("[dropped {} chars, hashsum: {}]", dropped.len(), &hash[..16])
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Bounds config map data to `max_size` bytes. Values that alone exceed
/// the bound are replaced by a digest of what was dropped; if the rest is
/// still too large every remaining value is cut proportionally. Returns
/// the bounded data and whether anything was cut. A bound of zero
/// disables cutting.
pub fn cut_data(data: &BTreeMap<String, String>, max_size: usize) -> (BTreeMap<String, String>, bool) {
    if max_size == 0 {
        return (data.clone(), false);
    }

    let mut out = BTreeMap::new();
    let mut rest = Vec::new();
    let mut rest_size = 0;
    for (key, value) in data {
        if value.len() > max_size {
            out.insert(key.clone(), replacement(value));
        } else {
            rest.push((key, value));
            rest_size += value.len();
        }
    }
    let mut truncated = !out.is_empty();

    if rest_size > max_size {
        truncated = true;
        let ratio = max_size as f64 / rest_size as f64;
        for (key, value) in rest {
            let keep = floor_char_boundary(value, (ratio * value.len() as f64).floor() as usize);
            let (kept, dropped) = value.split_at(keep);
            out.insert(key.clone(), format!("{}{}", kept, replacement(dropped)));
        }
    } else {
        for (key, value) in rest {
            out.insert(key.clone(), value.clone());
        }
    }
    (out, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClusterState;
    use crate::collectors::testing::{config, meta, Harness};
    use crate::kube::ConfigMap;
    use crate::model::RelationType;
    use proptest::prelude::*;

    fn data(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn small_data_is_kept() {
        let d = data(&[("a", "1"), ("b", "22")]);
        assert_eq!(cut_data(&d, 10), (d.clone(), false));
        assert_eq!(cut_data(&d, 0), (d, false));
    }

    #[test]
    fn oversized_values_are_replaced() {
        let d = data(&[("big", "0123456789abc"), ("small", "x")]);
        let (out, truncated) = cut_data(&d, 10);
        assert!(truncated);
        assert_eq!(out["small"], "x");
        assert!(out["big"].starts_with("[dropped 13 chars, hashsum: "));
        assert_eq!(out["big"].len(), "[dropped 13 chars, hashsum: ]".len() + 16);
    }

    #[test]
    fn remaining_values_are_cut_proportionally() {
        let d = data(&[("a", "aaaaaaaa"), ("b", "bbbb")]);
        let (out, truncated) = cut_data(&d, 9);
        assert!(truncated);
        assert!(out["a"].starts_with("aaaaaa[dropped 2 chars"));
        assert!(out["b"].starts_with("bbb[dropped 1 chars"));
    }

    proptest! {
        #[test]
        fn cutting_never_splits_characters(value in "\\PC{0,40}", max in 1usize..20) {
            let d = data(&[("k", value.as_str())]);
            let (out, truncated) = cut_data(&d, max);
            prop_assert_eq!(truncated, value.len() > max);
            if !truncated {
                prop_assert_eq!(&out["k"], &value);
            }
        }
    }

    #[tokio::test]
    async fn emits_truncated_config_map() {
        let mut cfg = config();
        cfg.configmap_max_datasize = 4;
        let h = Harness::new(
            ClusterState {
                config_maps: vec![ConfigMap {
                    metadata: meta("ns", "cm1"),
                    data: data(&[("key", "value")]),
                }],
                ..Default::default()
            },
            cfg,
        );
        Box::new(ConfigMapCollector).run(&h.ctx).await.unwrap();
        let out = h.output();
        let cm = out.component("urn:kubernetes:/mycluster:ns:configmap/cm1");
        assert_eq!(cm.data["truncated"], true);
        assert_eq!(cm.identifiers(), vec!["urn:kubernetes:/mycluster:ns:configmap/cm1"]);
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:namespace/ns",
            "urn:kubernetes:/mycluster:ns:configmap/cm1",
            RelationType::Encloses
        ));
    }
}
