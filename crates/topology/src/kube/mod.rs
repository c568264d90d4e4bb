//! Serde models of the Kubernetes API objects the collectors read.
//!
//! Only the fields the collectors consume are modelled; everything else in
//! the API JSON is ignored on deserialization. Field names follow the API's
//! camelCase wire format so that `kubectl get -o json` output loads as-is.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod corev1;
mod network;
mod workloads;

pub use corev1::*;
pub use network::*;
pub use workloads::*;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub generate_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub uid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectReference {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub api_version: String,
    pub resource_version: String,
    pub field_path: String,
}

/// A Kubernetes object with standard metadata.
pub trait Resource: Serialize {
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn namespace(&self) -> &str {
        &self.meta().namespace
    }
}

macro_rules! resource {
    ($($ty:ty => $kind:literal),* $(,)?) => {
        $(
            impl Resource for $ty {
                const KIND: &'static str = $kind;

                fn meta(&self) -> &ObjectMeta {
                    &self.metadata
                }
            }
        )*
    };
}

resource! {
    Node => "Node",
    Pod => "Pod",
    Service => "Service",
    Endpoints => "Endpoints",
    Namespace => "Namespace",
    ConfigMap => "ConfigMap",
    Secret => "Secret",
    PersistentVolume => "PersistentVolume",
    PersistentVolumeClaim => "PersistentVolumeClaim",
    VolumeAttachment => "VolumeAttachment",
    DaemonSet => "DaemonSet",
    Deployment => "Deployment",
    ReplicaSet => "ReplicaSet",
    StatefulSet => "StatefulSet",
    Job => "Job",
    CronJob => "CronJob",
    Ingress => "Ingress",
    Event => "Event",
}

/// Server version as reported by `/version`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionInfo {
    pub major: String,
    pub minor: String,
    pub git_version: String,
    pub platform: String,
}
