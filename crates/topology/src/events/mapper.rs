use std::collections::HashMap;

use dashmap::DashSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::{AlertType, EventCategory};
use crate::kube::Event;
use crate::model::Data;
use crate::urn::{ClusterType, UrnBuilder};
use crate::{Error, Result};

/// A Kubernetes event mapped to the structured event format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedEvent {
    pub title: String,
    pub text: String,
    pub host: String,
    pub source_type_name: String,
    pub alert_type: AlertType,
    pub event_type: String,
    /// Unix seconds of the event's last occurrence.
    pub timestamp: i64,
    pub tags: Vec<String>,
    pub context: EventContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventContext {
    pub source: String,
    pub category: EventCategory,
    pub source_identifier: String,
    pub element_identifiers: Vec<String>,
    pub source_links: Vec<String>,
    pub data: Data,
}

static CONTAINER_FIELD_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"spec\.containers\{(.*?)\}").unwrap());

static UNKNOWN_REASONS: Lazy<DashSet<String>> = Lazy::new(DashSet::new);

static DEFAULT_CATEGORIES: Lazy<HashMap<&'static str, EventCategory>> = Lazy::new(|| {
    use EventCategory::*;
    HashMap::from([
        // containers
        ("BackOff", Alerts),
        ("Created", Activities),
        ("ExceededGracePeriod", Activities),
        ("Killing", Activities),
        ("Preempting", Activities),
        ("Started", Activities),
        // images
        ("Pulling", Activities),
        ("Pulled", Activities),
        // kubelet
        ("NodeReady", Activities),
        ("NodeNotReady", Activities),
        ("NodeSchedulable", Activities),
        ("Starting", Activities),
        ("VolumeResizeSuccessful", Activities),
        ("FileSystemResizeSuccessful", Activities),
        ("SuccessfulAttachVolume", Activities),
        ("SuccessfulMountVolume", Activities),
        ("Rebooted", Activities),
        ("ContainerGCFailed", Activities),
        ("ImageGCFailed", Activities),
        ("NodeAllocatableEnforced", Activities),
        ("SandboxChanged", Changes),
        // controllers
        ("Completed", Activities),
        ("NoPods", Activities),
        ("NotTriggerScaleUp", Alerts),
        ("SawCompletedJob", Activities),
        ("ScalingReplicaSet", Activities),
        ("Scheduled", Activities),
        ("SuccessfulCreate", Activities),
        ("SuccessfulDelete", Activities),
        // autoscalers
        ("SuccessfulRescale", Activities),
        ("DesiredReplicasComputed", Others),
        ("FailedComputeMetricsReplicas", Alerts),
        ("FailedRescale", Alerts),
        ("EnsuringLoadBalancer", Activities),
        ("AddedInterface", Changes),
        ("BuildStarted", Activities),
        ("ScaleDown", Activities),
        ("BuildCompleted", Activities),
        ("DeploymentCreated", Changes),
        ("OperationStarted", Activities),
        ("ResourceUpdated", Changes),
        ("OperationCompleted", Activities),
        ("WaitForFirstConsumer", Others),
        ("Running", Activities),
        ("Pending", Others),
        ("ProvisioningSucceeded", Activities),
        ("Succeeded", Activities),
        ("NodeNotSchedulable", Alerts),
        ("Updated", Changes),
        ("Deleted", Changes),
        ("Inject", Others),
        ("DeletingNode", Activities),
        ("RemovingNode", Activities),
        ("ReplicationControllerScaled", Activities),
        ("DetectedUnhealthy", Alerts),
        ("ConnectivityRestored", Alerts),
        ("DeletingLoadBalancer", Changes),
        ("JobAlreadyActive", Others),
        ("BuildFailed", Alerts),
        ("NeedsReinstall", Alerts),
        ("AllRequirementsMet", Activities),
        ("InstallSucceeded", Activities),
        ("InstallWaiting", Others),
        ("CreatedSCCRanges", Changes),
        ("UpdatedLoadBalancer", Changes),
        ("TriggeredScaleUp", Activities),
        ("RELOAD", Changes),
        ("EvictedByVPA", Activities),
        ("ScaleUp", Activities),
        ("ScaledUpGroup", Activities),
        ("ScaleDownEmpty", Activities),
        ("CREATE", Activities),
        // volumes
        ("Provisioning", Activities),
        ("ExternalProvisioning", Activities),
        ("Resizing", Activities),
        // nodes
        ("NodeHasInsufficientMemory", Alerts),
    ])
});

/// Returns true the first time a reason is seen by this process.
fn first_sighting(reason: &str) -> bool {
    UNKNOWN_REASONS.insert(reason.to_string())
}

/// Extracts `c1` from a field path like `spec.containers{c1}`.
pub(crate) fn container_name(field_path: &str) -> Option<&str> {
    CONTAINER_FIELD_PATH
        .captures(field_path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|name| !name.is_empty())
}

#[derive(Debug, Clone)]
pub struct EventMapper {
    urn: UrnBuilder,
    cluster_name: String,
    overrides: HashMap<String, EventCategory>,
}

impl EventMapper {
    pub fn new(
        cluster_type: ClusterType,
        cluster_name: &str,
        overrides: HashMap<String, EventCategory>,
    ) -> Self {
        Self {
            urn: UrnBuilder::new(cluster_type, cluster_name),
            cluster_name: cluster_name.to_string(),
            overrides,
        }
    }

    pub fn map(&self, event: &Event) -> Result<MappedEvent> {
        check_event(event)?;
        let obj = &event.involved_object;
        let alert_type = alert_type(event);

        Ok(MappedEvent {
            title: format!(
                "{} - {} {} ({}x)",
                event.reason, obj.name, obj.kind, event.count
            ),
            text: event.message.clone(),
            host: self.host(event),
            source_type_name: self.urn.cluster_type().to_string(),
            alert_type,
            event_type: event.reason.clone(),
            timestamp: event.last_timestamp.map_or(0, |t| t.timestamp()),
            tags: self.tags(event, alert_type),
            context: EventContext {
                source: self.urn.cluster_type().to_string(),
                category: self.category(event, alert_type),
                source_identifier: event.metadata.uid.clone(),
                element_identifiers: self.element_identifiers(event),
                source_links: Vec::new(),
                data: Data::new(),
            },
        })
    }

    fn host(&self, event: &Event) -> String {
        match event.involved_object.kind.as_str() {
            "Node" | "Pod" if self.cluster_name.is_empty() => event.source.host.clone(),
            "Node" | "Pod" => format!("{}-{}", event.source.host, self.cluster_name),
            // the sink falls back to the local hostname
            _ => String::new(),
        }
    }

    fn category(&self, event: &Event, alert_type: AlertType) -> EventCategory {
        if let Some(category) = self.overrides.get(&event.reason) {
            return *category;
        }
        if matches!(alert_type, AlertType::Warning | AlertType::Error) {
            return EventCategory::Alerts;
        }
        if let Some(category) = DEFAULT_CATEGORIES.get(event.reason.as_str()) {
            return *category;
        }
        if first_sighting(&event.reason) {
            log::warn!(
                reason = event.reason.as_str(),
                kind = event.involved_object.kind.as_str(),
                name = event.involved_object.name.as_str();
                "kubernetes event has an unknown reason, categorising as Others"
            );
        }
        EventCategory::Others
    }

    fn tags(&self, event: &Event, alert_type: AlertType) -> Vec<String> {
        let obj = &event.involved_object;
        let mut tags = Vec::with_capacity(8);
        if !obj.namespace.is_empty() {
            tags.push(format!("kube_namespace:{}", obj.namespace));
        }
        if let Some(container) = container_name(&obj.field_path) {
            tags.push(format!("kube_container_name:{}", container));
        }
        tags.push(format!("source_component:{}", event.source.component));
        tags.push(format!("kube_object_name:{}", obj.name));
        tags.push(format!("kube_object_kind:{}", obj.kind));
        tags.push(format!("kube_cluster_name:{}", self.cluster_name));
        tags.push(format!("kube_reason:{}", event.reason));
        tags.push(format!("alert_type:{}", alert_type));
        tags
    }

    fn element_identifiers(&self, event: &Event) -> Vec<String> {
        let obj = &event.involved_object;
        let mut ids = Vec::with_capacity(2);
        if let Some(container) = container_name(&obj.field_path) {
            let pod = self.urn.pod(&obj.namespace, &obj.name);
            ids.push(self.urn.container(&pod, container));
        }
        match self.urn.external_id(&obj.kind, &obj.namespace, &obj.name) {
            Ok(urn) => ids.push(urn),
            Err(err) => log::warn!(
                event = event.metadata.name.as_str();
                "no identifier for involved object {}/{}: {}", obj.namespace, obj.name, err
            ),
        }
        ids
    }
}

fn check_event(event: &Event) -> Result<()> {
    let obj = &event.involved_object;
    let missing = [
        ("reason", event.reason.is_empty()),
        ("message", event.message.is_empty()),
        ("involved object name", obj.name.is_empty()),
        ("involved object kind", obj.kind.is_empty()),
    ]
    .into_iter()
    .find_map(|(field, empty)| empty.then_some(field));

    match missing {
        Some(field) => Err(Error::InvalidEvent(format!(
            "event {:?} has no {}",
            event.metadata.name, field
        ))),
        None => Ok(()),
    }
}

fn alert_type(event: &Event) -> AlertType {
    match event.event_type.to_lowercase().as_str() {
        "normal" => AlertType::Info,
        "warning" => AlertType::Warning,
        other => {
            log::warn!(event_type = other; "unhandled kubernetes event type, falling back to info");
            AlertType::Info
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube::{EventSource, ObjectReference};
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn backoff() -> Event {
        Event {
            reason: "BackOff".into(),
            message: "err".into(),
            event_type: "Warning".into(),
            count: 3,
            last_timestamp: Utc.timestamp_opt(1_700_000_000, 0).single(),
            involved_object: ObjectReference {
                kind: "Pod".into(),
                name: "p1".into(),
                namespace: "ns".into(),
                field_path: "spec.containers{c1}".into(),
                uid: "u".into(),
                ..Default::default()
            },
            source: EventSource {
                component: "kubelet".into(),
                host: "h".into(),
            },
            ..Default::default()
        }
    }

    fn mapper() -> EventMapper {
        EventMapper::new(ClusterType::Kubernetes, "mycluster", HashMap::new())
    }

    #[test]
    fn maps_a_pod_backoff() {
        let event = mapper().map(&backoff()).unwrap();
        assert_eq!(event.title, "BackOff - p1 Pod (3x)");
        assert_eq!(event.host, "h-mycluster");
        assert_eq!(event.alert_type, AlertType::Warning);
        assert_eq!(event.timestamp, 1_700_000_000);
        assert_eq!(event.context.category, EventCategory::Alerts);
        assert_eq!(event.context.source, "kubernetes");
        assert_eq!(event.text, "err");
        assert!(event.tags.contains(&"kube_container_name:c1".to_string()));
        assert!(event.tags.contains(&"alert_type:warning".to_string()));
        assert_eq!(
            event.context.element_identifiers,
            vec![
                "urn:kubernetes:/mycluster:ns:pod/p1:container/c1",
                "urn:kubernetes:/mycluster:ns:pod/p1",
            ]
        );
    }

    #[test]
    fn category_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert("BackOff".to_string(), EventCategory::Changes);
        let m = EventMapper::new(ClusterType::Kubernetes, "mycluster", overrides);
        assert_eq!(
            m.map(&backoff()).unwrap().context.category,
            EventCategory::Changes
        );

        let mut normal = backoff();
        normal.event_type = "normal".into();
        normal.reason = "SandboxChanged".into();
        assert_eq!(
            mapper().map(&normal).unwrap().context.category,
            EventCategory::Changes
        );

        normal.reason = "SomethingNobodyEmits".into();
        assert_eq!(
            mapper().map(&normal).unwrap().context.category,
            EventCategory::Others
        );
    }

    #[test]
    fn unknown_reasons_are_reported_once() {
        assert!(first_sighting("FluxCapacitorOverload"));
        assert!(!first_sighting("FluxCapacitorOverload"));
    }

    #[test]
    fn host_is_only_set_for_nodes_and_pods() {
        let mut event = backoff();
        event.involved_object.kind = "Deployment".into();
        event.involved_object.field_path.clear();
        let mapped = mapper().map(&event).unwrap();
        assert_eq!(mapped.host, "");
        assert_eq!(
            mapped.context.element_identifiers,
            vec!["urn:kubernetes:/mycluster:ns:deployment/p1"]
        );
    }

    #[test]
    fn unexpected_types_fall_back_to_info() {
        let mut event = backoff();
        event.event_type = "Critical".into();
        event.reason = "Pulled".into();
        let mapped = mapper().map(&event).unwrap();
        assert_eq!(mapped.alert_type, AlertType::Info);
        assert_eq!(mapped.context.category, EventCategory::Activities);
    }

    proptest! {
        #[test]
        fn events_missing_a_required_field_are_rejected(field in 0usize..4) {
            let mut event = backoff();
            match field {
                0 => event.reason.clear(),
                1 => event.message.clear(),
                2 => event.involved_object.name.clear(),
                _ => event.involved_object.kind.clear(),
            }
            assert_matches!(mapper().map(&event), Err(Error::InvalidEvent(_)));
        }
    }
}
