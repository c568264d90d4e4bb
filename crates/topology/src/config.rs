use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

use crate::events::EventCategory;

pub const DEFAULT_CONFIGMAP_MAX_DATASIZE: usize = 100 * 1024;
pub const DEFAULT_MAX_EVENTS_PER_RUN: usize = 300;

/// Configuration of the cluster topology and events checks.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub cluster_name: String,
    pub collect_topology: bool,
    /// Collect window in minutes.
    pub collect_timeout: u64,
    pub source_properties_enabled: bool,
    pub configmap_max_datasize: usize,
    pub csi_pv_mapper_enabled: bool,
    pub resources: ResourcesConfig,

    pub collect_events: bool,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "kubernetes_event_resync_period_s")]
    pub event_resync_period: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "kubernetes_event_read_timeout_ms")]
    pub event_read_timeout: Duration,
    pub max_events_per_run: usize,
    pub filtered_event_types: Vec<String>,
    /// Raw reason→category overrides, validated by [`TopologyConfig::category_overrides`].
    pub event_categories: HashMap<String, String>,

    pub skip_leader_election: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            collect_topology: true,
            collect_timeout: 5,
            source_properties_enabled: false,
            configmap_max_datasize: DEFAULT_CONFIGMAP_MAX_DATASIZE,
            csi_pv_mapper_enabled: false,
            resources: ResourcesConfig::default(),
            collect_events: true,
            event_resync_period: Duration::from_secs(300),
            event_read_timeout: Duration::from_millis(2000),
            max_events_per_run: DEFAULT_MAX_EVENTS_PER_RUN,
            filtered_event_types: Vec::new(),
            event_categories: HashMap::new(),
            skip_leader_election: false,
        }
    }
}

impl TopologyConfig {
    pub fn collect_timeout(&self) -> Duration {
        Duration::from_secs(self.collect_timeout * 60)
    }

    /// Returns the operator-supplied category overrides, dropping entries
    /// whose category is not one of the known categories.
    pub fn category_overrides(&self) -> HashMap<String, EventCategory> {
        self.event_categories
            .iter()
            .filter_map(|(reason, category)| match category.parse::<EventCategory>() {
                Ok(c) => Some((reason.clone(), c)),
                Err(_) => {
                    log::warn!(
                        reason = reason.as_str(), category = category.as_str();
                        "ignoring event category override: unknown category"
                    );
                    None
                }
            })
            .collect()
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.cluster_name.is_empty() {
            return Err(crate::Error::Config("cluster_name must be set".into()));
        }
        if self.collect_timeout == 0 {
            return Err(crate::Error::Config(
                "collect_timeout must be at least one minute".into(),
            ));
        }
        Ok(())
    }
}

/// Which optional resource kinds are collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub persistentvolumes: bool,
    pub persistentvolumeclaims: bool,
    pub endpoints: bool,
    pub namespaces: bool,
    pub configmaps: bool,
    pub daemonsets: bool,
    pub deployments: bool,
    pub replicasets: bool,
    pub statefulsets: bool,
    pub ingresses: bool,
    pub jobs: bool,
    pub cronjobs: bool,
    pub secrets: bool,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            persistentvolumes: true,
            persistentvolumeclaims: true,
            endpoints: true,
            namespaces: true,
            configmaps: true,
            daemonsets: true,
            deployments: true,
            replicasets: true,
            statefulsets: true,
            ingresses: true,
            jobs: true,
            cronjobs: true,
            secrets: true,
        }
    }
}
