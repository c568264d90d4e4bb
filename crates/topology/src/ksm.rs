//! Aggregation of kube-state-metrics families into cluster-level gauges.
//!
//! Each aggregator keys its accumulator on the tuple of allowed label
//! values of a metric. A fixed-size tuple keeps the key hashable without
//! allocating a `Vec` per metric, which caps the number of labels at
//! [`MAX_LABELS`].

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Mutex;

use crate::kube::Pod;

pub const MAX_LABELS: usize = 4;

const CONTAINER_INFO: &str = "kube_pod_container_info";
const TERMINATED_REASON: &str = "kube_pod_container_status_terminated_reason";
const WAITING_REASON: &str = "kube_pod_container_status_waiting_reason";
pub const STATUS_REASONS: &str = "kube_pod_container_status_reasons";

/// One sample of a metric family.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metric {
    pub labels: HashMap<String, String>,
    pub value: f64,
}

impl Metric {
    pub fn new<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>, value: f64) -> Self {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricFamily {
    pub name: String,
    pub metrics: Vec<Metric>,
}

/// Receives flushed gauges.
pub trait GaugeSender: Debug + Send + Sync {
    fn gauge(&self, name: &str, value: f64, tags: &[String]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Accumulates the metric values.
    SumValues,
    /// Accumulates one per metric, regardless of its value.
    CountObjects,
}

type LabelValues = [String; MAX_LABELS];

#[derive(Debug)]
pub struct Aggregator {
    gauge: &'static str,
    family: &'static str,
    labels: Vec<&'static str>,
    shape: Shape,
    accumulator: BTreeMap<LabelValues, f64>,
}

impl Aggregator {
    pub fn sum_values(gauge: &'static str, family: &'static str, labels: &[&'static str]) -> Option<Self> {
        Self::new(gauge, family, labels, Shape::SumValues)
    }

    pub fn count_objects(gauge: &'static str, family: &'static str, labels: &[&'static str]) -> Option<Self> {
        Self::new(gauge, family, labels, Shape::CountObjects)
    }

    fn new(gauge: &'static str, family: &'static str, labels: &[&'static str], shape: Shape) -> Option<Self> {
        if labels.len() > MAX_LABELS {
            log::error!(
                family = family, labels = labels.len();
                "aggregator uses more than {} labels, disabling it", MAX_LABELS
            );
            return None;
        }
        Some(Self {
            gauge,
            family,
            labels: labels.to_vec(),
            shape,
            accumulator: BTreeMap::new(),
        })
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn accumulate(&mut self, metric: &Metric) {
        let mut key = LabelValues::default();
        for (slot, label) in key.iter_mut().zip(&self.labels) {
            *slot = metric.labels.get(*label).cloned().unwrap_or_default();
        }
        let increment = match self.shape {
            Shape::SumValues => metric.value,
            Shape::CountObjects => 1.0,
        };
        *self.accumulator.entry(key).or_default() += increment;
    }

    /// Emits one gauge per label tuple and resets the accumulator.
    pub fn flush(&mut self, sender: &dyn GaugeSender) {
        for (values, total) in std::mem::take(&mut self.accumulator) {
            let tags: Vec<String> = self
                .labels
                .iter()
                .zip(values.iter())
                .map(|(label, value)| format!("{}:{}", label, value))
                .collect();
            sender.gauge(self.gauge, total, &tags);
        }
    }
}

/// The aggregators of every supported metric family.
#[derive(Debug)]
pub struct Aggregators {
    by_family: HashMap<&'static str, Aggregator>,
}

impl Default for Aggregators {
    fn default() -> Self {
        let ns = &["namespace"][..];
        let owner = &["namespace", "owner_name", "owner_kind"][..];
        let all = [
            Aggregator::sum_values("persistentvolumes.by_phase", "kube_persistentvolume_status_phase", &["storageclass", "phase"]),
            Aggregator::count_objects("service.count", "kube_service_spec_type", &["namespace", "type"]),
            Aggregator::sum_values("namespace.count", "kube_namespace_status_phase", &["phase"]),
            Aggregator::count_objects("replicaset.count", "kube_replicaset_owner", owner),
            Aggregator::count_objects("job.count", "kube_job_owner", owner),
            Aggregator::count_objects("deployment.count", "kube_deployment_labels", ns),
            Aggregator::count_objects("daemonset.count", "kube_daemonset_labels", ns),
            Aggregator::count_objects("statefulset.count", "kube_statefulset_labels", ns),
            Aggregator::count_objects("cronjob.count", "kube_cronjob_labels", ns),
            Aggregator::count_objects("endpoint.count", "kube_endpoint_labels", ns),
            Aggregator::count_objects("hpa.count", "kube_horizontalpodautoscaler_labels", ns),
            Aggregator::count_objects("vpa.count", "kube_verticalpodautoscaler_labels", ns),
            Aggregator::count_objects(
                "node.count",
                "kube_node_info",
                &["kubelet_version", "container_runtime_version", "kernel_version", "os_image"],
            ),
            Aggregator::count_objects(
                "pod.count",
                "kube_pod_info",
                &["node", "namespace", "created_by_kind", "created_by_name"],
            ),
        ];
        Self {
            by_family: all
                .into_iter()
                .flatten()
                .map(|a| (a.family(), a))
                .collect(),
        }
    }
}

impl Aggregators {
    pub fn accumulate(&mut self, families: &[MetricFamily]) {
        for family in families {
            if let Some(aggregator) = self.by_family.get_mut(family.name.as_str()) {
                family.metrics.iter().for_each(|m| aggregator.accumulate(m));
            }
        }
    }

    pub fn flush(&mut self, sender: &dyn GaugeSender) {
        let mut families: Vec<_> = self.by_family.keys().copied().collect();
        families.sort_unstable();
        for family in families {
            if let Some(aggregator) = self.by_family.get_mut(family) {
                aggregator.flush(sender);
            }
        }
    }
}

/// Appends the synthesized `kube_pod_container_status_reasons` family.
///
/// Every container from `kube_pod_container_info` appears with reason
/// `Unknown` and value 0; every terminated or waiting reason appears with
/// value 1. Both are kept, so a container with a known reason is reported
/// twice and the receiver keeps the non-zero state.
pub fn aggregate_status_reasons(mut families: Vec<MetricFamily>) -> Vec<MetricFamily> {
    let mut baseline = Vec::new();
    let mut reasons = Vec::new();

    for family in &families {
        match family.name.as_str() {
            CONTAINER_INFO => baseline.extend(family.metrics.iter().map(|m| {
                let mut m = m.clone();
                m.labels.insert("reason".into(), "Unknown".into());
                m.value = 0.0;
                m
            })),
            TERMINATED_REASON | WAITING_REASON => reasons.extend(family.metrics.iter().map(|m| Metric {
                labels: m.labels.clone(),
                value: 1.0,
            })),
            _ => {}
        }
    }

    baseline.extend(reasons);
    families.push(MetricFamily {
        name: STATUS_REASONS.to_string(),
        metrics: baseline,
    });
    families
}

/// Reports, for every container of every pod, whether it was last
/// terminated for running out of memory. Containers that never were get a
/// 0-valued gauge.
pub fn report_oom_kills(cluster_name: &str, pods: &[Pod], sender: &dyn GaugeSender) {
    for pod in pods {
        for status in &pod.status.container_statuses {
            let oom_killed = status.state.running.is_none()
                && status
                    .last_state
                    .terminated
                    .as_ref()
                    .is_some_and(|t| t.reason == "OOMKilled");
            let tags = vec![
                format!("kube_cluster_name:{}", cluster_name),
                format!("kube_namespace:{}", pod.metadata.namespace),
                format!("pod:{}", pod.metadata.name),
                format!("pod_name:{}", pod.metadata.name),
                format!("container_name:{}", status.name),
            ];
            sender.gauge(
                "container.status.report.count.oom",
                if oom_killed { 1.0 } else { 0.0 },
                &tags,
            );
        }
    }
}

/// Forwards gauges to the process-wide `metrics` recorder, prefixing their
/// names. Tags of the form `k:v` become labels.
#[derive(Debug, Clone)]
pub struct MetricsGaugeSender {
    prefix: &'static str,
}

impl MetricsGaugeSender {
    pub const KSM_PREFIX: &'static str = "kubernetes_state.";

    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl Default for MetricsGaugeSender {
    fn default() -> Self {
        Self::new(Self::KSM_PREFIX)
    }
}

impl GaugeSender for MetricsGaugeSender {
    fn gauge(&self, name: &str, value: f64, tags: &[String]) {
        let labels: Vec<metrics::Label> = tags
            .iter()
            .map(|tag| match tag.split_once(':') {
                Some((k, v)) => metrics::Label::new(k.to_string(), v.to_string()),
                None => metrics::Label::new(tag.clone(), String::new()),
            })
            .collect();
        metrics::gauge!(format!("{}{}", self.prefix, name), labels).set(value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentGauge {
    pub name: String,
    pub value: f64,
    pub tags: Vec<String>,
}

/// Keeps every gauge in memory.
#[derive(Debug, Default)]
pub struct MemoryGaugeSender {
    gauges: Mutex<Vec<SentGauge>>,
}

impl MemoryGaugeSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gauges(&self) -> Vec<SentGauge> {
        self.gauges.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl GaugeSender for MemoryGaugeSender {
    fn gauge(&self, name: &str, value: f64, tags: &[String]) {
        if let Ok(mut gauges) = self.gauges.lock() {
            gauges.push(SentGauge {
                name: name.to_string(),
                value,
                tags: tags.to_vec(),
            });
        }
    }
}
