//! Canonical identifiers for cluster components.
//!
//! Every component external id has the shape
//! `urn:<cluster_type>:/<cluster_name>[:<namespace>]:<kind>/<name>[:<sub_kind>/<sub_name>]`
//! and is lowercased. A handful of identifiers (cluster root, endpoints,
//! ingress points, aliases) live outside that grammar and are only used as
//! alternative identifiers or the well-known cluster component.

use std::fmt;

use crate::kube::NodeAddress;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterType {
    Kubernetes,
    OpenShift,
}

impl ClusterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Kubernetes => "kubernetes",
            ClusterType::OpenShift => "openshift",
        }
    }

    /// Detects OpenShift from the API paths the server advertises.
    pub fn detect<'a>(api_paths: impl IntoIterator<Item = &'a str>) -> Self {
        let openshift = api_paths
            .into_iter()
            .any(|p| p == "/apis/quota.openshift.io" || p == "/oapi");
        if openshift {
            ClusterType::OpenShift
        } else {
            ClusterType::Kubernetes
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct UrnBuilder {
    cluster_type: ClusterType,
    cluster_name: String,
    prefix: String,
}

impl UrnBuilder {
    pub fn new(cluster_type: ClusterType, cluster_name: &str) -> Self {
        let cluster_name = cluster_name.to_lowercase();
        let prefix = format!("urn:{}:/{}", cluster_type.as_str(), cluster_name);
        Self {
            cluster_type,
            cluster_name,
            prefix,
        }
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn component(&self, namespace: &str, kind: &str, name: &str) -> String {
        let urn = if namespace.is_empty() {
            format!("{}:{}/{}", self.prefix, kind, name)
        } else {
            format!("{}:{}:{}/{}", self.prefix, namespace, kind, name)
        };
        urn.to_lowercase()
    }

    pub fn node(&self, name: &str) -> String {
        self.component("", "node", name)
    }

    pub fn namespace(&self, name: &str) -> String {
        self.component("", "namespace", name)
    }

    pub fn persistent_volume(&self, name: &str) -> String {
        self.component("", "persistent-volume", name)
    }

    pub fn pod(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "pod", name)
    }

    pub fn service(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "service", name)
    }

    pub fn daemonset(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "daemonset", name)
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "deployment", name)
    }

    pub fn replicaset(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "replicaset", name)
    }

    pub fn statefulset(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "statefulset", name)
    }

    pub fn configmap(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "configmap", name)
    }

    pub fn secret(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "secret", name)
    }

    pub fn cronjob(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "cronjob", name)
    }

    pub fn job(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "job", name)
    }

    pub fn ingress(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "ingress", name)
    }

    pub fn persistent_volume_claim(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "persistent-volume-claim", name)
    }

    /// The external-name target of an `ExternalName` service.
    pub fn external_service(&self, namespace: &str, name: &str) -> String {
        self.component(namespace, "external-service", name)
    }

    pub fn container(&self, pod_urn: &str, name: &str) -> String {
        format!("{}:container/{}", pod_urn, name.to_lowercase())
    }

    pub fn volume(&self, pod_urn: &str, name: &str) -> String {
        format!("{}:volume/{}", pod_urn, name.to_lowercase())
    }

    pub fn volume_source(&self, pv_urn: &str, source_type: &str) -> String {
        format!("{}:volume-source/{}", pv_urn, source_type.to_lowercase())
    }

    /// Builds the external id for an object of the given Kubernetes Kind.
    pub fn external_id(&self, kind: &str, namespace: &str, name: &str) -> Result<String> {
        let urn = match kind {
            "Pod" => self.pod(namespace, name),
            "Service" => self.service(namespace, name),
            "DaemonSet" => self.daemonset(namespace, name),
            "Deployment" => self.deployment(namespace, name),
            "ReplicaSet" => self.replicaset(namespace, name),
            "StatefulSet" => self.statefulset(namespace, name),
            "ConfigMap" => self.configmap(namespace, name),
            "Secret" => self.secret(namespace, name),
            "Namespace" => self.namespace(name),
            "CronJob" => self.cronjob(namespace, name),
            "Job" => self.job(namespace, name),
            "Ingress" => self.ingress(namespace, name),
            "Node" => self.node(name),
            "PersistentVolume" => self.persistent_volume(name),
            "PersistentVolumeClaim" => self.persistent_volume_claim(namespace, name),
            other => return Err(Error::UnknownKind(other.to_string())),
        };
        Ok(urn)
    }

    /// The well-known cluster root component.
    pub fn cluster(&self) -> String {
        format!("urn:cluster:/{}:{}", self.cluster_type, self.cluster_name)
    }

    pub fn endpoint(&self, ip: &str, port: Option<i32>) -> String {
        match port {
            Some(port) => format!("urn:endpoint:/{}:{}:{}", self.cluster_name, ip, port),
            None => format!("urn:endpoint:/{}:{}", self.cluster_name, ip),
        }
    }

    pub fn service_alias(&self, namespace: &str, name: &str) -> String {
        format!("urn:service:/{}:{}:{}", self.cluster_name, namespace, name).to_lowercase()
    }

    pub fn ingress_point(&self, point: &str) -> String {
        format!("urn:ingress-point:/{}", point.to_lowercase())
    }

    pub fn container_alias(&self, node_identifier: &str, container_id: &str) -> String {
        format!("urn:container:/{}:{}", node_identifier, container_id)
    }

    /// Alternative identifiers of a node, derived from its addresses,
    /// provider id and hostname.
    pub fn node_identifiers(
        &self,
        node_name: &str,
        addresses: &[NodeAddress],
        provider_id: &str,
        hostname: &str,
    ) -> Vec<String> {
        let mut ids = Vec::new();
        for addr in addresses {
            match addr.address_type.as_str() {
                "InternalIP" => ids.push(format!(
                    "urn:ip:/{}:{}:{}",
                    self.cluster_name, node_name, addr.address
                )),
                "ExternalIP" => ids.push(format!("urn:ip:/{}:{}", self.cluster_name, addr.address)),
                "InternalDNS" => ids.push(format!(
                    "urn:host:/{}:{}",
                    self.cluster_name, addr.address
                )),
                "ExternalDNS" => ids.push(format!("urn:host:/{}", addr.address)),
                _ => {}
            }
        }

        if let Some(azure_id) = provider_id.strip_prefix("azure:///") {
            ids.push(format!("urn:azure:/{}", azure_id));
            ids.push(format!("urn:azure:/{}", azure_id.to_uppercase()));
        }

        if !hostname.is_empty() {
            ids.push(format!("urn:host:/{}", hostname));
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn builder() -> UrnBuilder {
        UrnBuilder::new(ClusterType::Kubernetes, "MyCluster")
    }

    #[test]
    fn builds_namespaced_and_cluster_scoped_urns() {
        let b = builder();
        assert_eq!(b.node("n1"), "urn:kubernetes:/mycluster:node/n1");
        assert_eq!(b.pod("ns", "p1"), "urn:kubernetes:/mycluster:ns:pod/p1");
        assert_eq!(
            b.container(&b.pod("ns", "p1"), "c1"),
            "urn:kubernetes:/mycluster:ns:pod/p1:container/c1"
        );
        assert_eq!(b.namespace("ns"), "urn:kubernetes:/mycluster:namespace/ns");
        assert_eq!(
            b.persistent_volume("PV-1"),
            "urn:kubernetes:/mycluster:persistent-volume/pv-1"
        );
        assert_eq!(b.cluster(), "urn:cluster:/kubernetes:mycluster");
    }

    #[test]
    fn external_id_dispatches_on_kind() {
        let b = builder();
        assert_eq!(
            b.external_id("Deployment", "ns", "web").unwrap(),
            "urn:kubernetes:/mycluster:ns:deployment/web"
        );
        assert_eq!(
            b.external_id("Namespace", "", "ns").unwrap(),
            "urn:kubernetes:/mycluster:namespace/ns"
        );
        assert_matches!(b.external_id("Gadget", "ns", "x"), Err(Error::UnknownKind(k)) if k == "Gadget");
    }

    #[test]
    fn openshift_is_detected_from_api_paths() {
        assert_eq!(
            ClusterType::detect(["/api", "/apis/quota.openshift.io"]),
            ClusterType::OpenShift
        );
        assert_eq!(ClusterType::detect(["/oapi"]), ClusterType::OpenShift);
        assert_eq!(ClusterType::detect(["/api", "/apis"]), ClusterType::Kubernetes);
        let b = UrnBuilder::new(ClusterType::OpenShift, "c");
        assert_eq!(b.pod("ns", "p"), "urn:openshift:/c:ns:pod/p");
    }

    #[test]
    fn node_identifiers_cover_address_types() {
        let b = builder();
        let addrs = vec![
            NodeAddress {
                address_type: "InternalIP".into(),
                address: "10.0.0.5".into(),
            },
            NodeAddress {
                address_type: "ExternalIP".into(),
                address: "1.2.3.4".into(),
            },
            NodeAddress {
                address_type: "InternalDNS".into(),
                address: "n1.internal".into(),
            },
            NodeAddress {
                address_type: "ExternalDNS".into(),
                address: "n1.example.com".into(),
            },
        ];
        let ids = b.node_identifiers("n1", &addrs, "azure:///subscriptions/abc", "host-1");
        assert_eq!(
            ids,
            vec![
                "urn:ip:/mycluster:n1:10.0.0.5",
                "urn:ip:/mycluster:1.2.3.4",
                "urn:host:/mycluster:n1.internal",
                "urn:host:/n1.example.com",
                "urn:azure:/subscriptions/abc",
                "urn:azure:/SUBSCRIPTIONS/ABC",
                "urn:host:/host-1",
            ]
        );
    }

    fn grammar() -> regex::Regex {
        regex::Regex::new(
            r"^urn:(kubernetes|openshift):/[^:A-Z]+(:[^:/A-Z]+)?:[a-z-]+/[^:A-Z]+(:[a-z-]+/[^:A-Z]+)?$",
        )
        .unwrap()
    }

    proptest! {
        #[test]
        fn urns_are_lowercase_and_canonical(
            cluster in "[A-Za-z][A-Za-z0-9-]{0,12}",
            ns in "[A-Za-z][A-Za-z0-9-]{0,12}",
            name in "[A-Za-z][A-Za-z0-9.-]{0,20}",
            kind in prop::sample::select(vec!["Pod", "Service", "Deployment", "Job", "Secret", "Node", "Namespace", "PersistentVolume"]),
        ) {
            let b = UrnBuilder::new(ClusterType::Kubernetes, &cluster);
            let urn = b.external_id(kind, &ns, &name).unwrap();
            prop_assert_eq!(urn.clone(), urn.to_lowercase());
            prop_assert!(grammar().is_match(&urn), "{} does not match the urn grammar", urn);
            let container = b.container(&b.pod(&ns, &name), &name);
            prop_assert!(grammar().is_match(&container), "{} does not match the urn grammar", container);
        }
    }
}
