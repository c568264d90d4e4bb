//! Correlators join the records collectors publish on side channels. Each
//! one drains its channels until the producing collectors close them, so
//! nothing is emitted before its prerequisites are complete.

use std::collections::BTreeMap;

use crate::collectors::RunContext;
use crate::kube::{Container, ContainerStatus, Volume};
use crate::Result;

mod container;
mod service_pod;
mod volume;

pub use container::ContainerCorrelator;
pub use service_pod::{selector_matches, ServicePodCorrelator};
pub use volume::VolumeCorrelator;

#[async_trait::async_trait]
pub trait Correlator: Send {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, ctx: &RunContext) -> Result<()>;
}

/// How a node is known to the container correlator.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdentifierCorrelation {
    pub node_name: String,
    pub node_external_id: String,
    /// The host identifier containers are bound to; `None` when the node
    /// has no internal IP.
    pub node_identifier: Option<String>,
    pub identifiers: Vec<String>,
}

/// The parts of a pod the correlators need.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodIdentifier {
    pub external_id: String,
    pub namespace: String,
    pub name: String,
    pub node_name: String,
}

impl PodIdentifier {
    /// Containers of unscheduled pods are not emitted, so nothing may
    /// point at them.
    pub fn is_scheduled(&self) -> bool {
        !self.node_name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerCorrelation {
    pub pod: PodIdentifier,
    pub pod_ip: String,
    pub pod_phase: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<Container>,
    pub statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeCorrelation {
    pub pod: PodIdentifier,
    pub volumes: Vec<Volume>,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodLabelCorrelation {
    pub pod_external_id: String,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// A pod targeted by one of a service's endpoint addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointTarget {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSelectorCorrelation {
    pub service_external_id: String,
    pub namespace: String,
    pub selector: BTreeMap<String, String>,
    pub endpoints: Vec<EndpointTarget>,
}
