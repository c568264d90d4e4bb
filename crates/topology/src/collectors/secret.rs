use std::collections::BTreeMap;

use base64::Engine;
use sha2::{Digest, Sha256};

use super::{listing, Collector, RunContext};
use crate::kube::Secret;
use crate::Result;

const REDACTED: &str = "<redacted>";
const REDACTED_ANNOTATIONS: &[&str] = &[
    "kubectl.kubernetes.io/last-applied-configuration",
    "openshift.io/token-secret.value",
];

#[derive(Debug, Default)]
pub struct SecretCollector;

#[async_trait::async_trait]
impl Collector for SecretCollector {
    fn name(&self) -> &'static str {
        "secret"
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let secrets = listing(self.name(), ctx.client.secrets().await)?;
        for secret in secrets {
            let urn = ctx
                .urn
                .secret(&secret.metadata.namespace, &secret.metadata.name);
            let digest = secret_digest(&secret.data);
            let pruned = prune(secret, &digest);

            let mut component = ctx
                .object_component(urn.clone(), "secret", &pruned)
                .with("identifiers", vec![urn.clone()]);
            if !ctx.config.source_properties_enabled {
                component.set("data", digest);
            }
            ctx.component(component).await;
            ctx.relation(ctx.namespace_relation(&pruned.metadata.namespace, &urn))
                .await;
        }
        Ok(())
    }
}

/// Drops the secret's values, keeping only their digest, and redacts the
/// annotations known to carry a copy of them.
fn prune(mut secret: Secret, digest: &str) -> Secret {
    for annotation in REDACTED_ANNOTATIONS {
        if let Some(value) = secret.metadata.annotations.get_mut(*annotation) {
            *value = REDACTED.to_string();
        }
    }
    secret.data = BTreeMap::from([("<data hash>".to_string(), digest.to_string())]);
    secret
}

/// Hex sha256 over the key-sorted `key + value` pairs of a secret's data.
/// Values are hashed decoded when they are valid base64.
pub fn secret_digest(data: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        match base64::engine::general_purpose::STANDARD.decode(value) {
            Ok(decoded) => hasher.update(decoded),
            Err(_) => hasher.update(value.as_bytes()),
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClusterState;
    use crate::collectors::testing::{config, meta, Harness};

    #[test]
    fn digest_of_empty_data() {
        assert_eq!(
            secret_digest(&BTreeMap::new()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_is_over_decoded_values() {
        let encoded = BTreeMap::from([("a".to_string(), "Yg==".to_string())]);
        // sha256("ab")
        let expected = "fb8e20fc2e4c3f248c60c39bd652f3c1347298bb977b8b4d5903b85055620603";
        assert_eq!(secret_digest(&encoded), expected);
    }

    #[tokio::test]
    async fn secret_values_never_leave_the_collector() {
        let mut metadata = meta("ns", "s1");
        metadata.annotations.insert(
            "kubectl.kubernetes.io/last-applied-configuration".into(),
            "{\"data\":{\"password\":\"aHVudGVyMg==\"}}".into(),
        );
        let secret = Secret {
            metadata,
            secret_type: "Opaque".into(),
            data: BTreeMap::from([("password".to_string(), "aHVudGVyMg==".to_string())]),
        };
        let mut cfg = config();
        cfg.source_properties_enabled = true;
        let h = Harness::new(
            ClusterState {
                secrets: vec![secret],
                ..Default::default()
            },
            cfg,
        );
        Box::new(SecretCollector).run(&h.ctx).await.unwrap();
        let out = h.output();
        let component = out.component("urn:kubernetes:/mycluster:ns:secret/s1");
        let rendered = serde_json::to_string(component).unwrap();
        assert!(!rendered.contains("aHVudGVyMg=="));
        assert_eq!(
            component.data["sourceProperties"]["metadata"]["annotations"]
                ["kubectl.kubernetes.io/last-applied-configuration"],
            REDACTED
        );
    }
}
