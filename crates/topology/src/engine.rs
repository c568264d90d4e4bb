//! One topology run.
//!
//! The engine gates on leadership, detects the cluster flavour, then fans
//! out one task per collector and per correlator. A single drain loop
//! forwards their output to the [`Submitter`] until every task is done or
//! the collect window elapses. Components go out as they arrive; relations
//! are held back and only released once both of their endpoints are known
//! to have been emitted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::{ApiClient, ClusterTypeCache};
use crate::collectors::{
    ClusterCollector, Collector, ConfigMapCollector, CronJobCollector, DaemonSetCollector,
    DeploymentCollector, IngressCollector, JobCollector, NamespaceCollector, NodeCollector,
    PersistentVolumeCollector, PodCollector, ReplicaSetCollector, RunContext, SecretCollector,
    ServiceCollector, StatefulSetCollector,
};
use crate::config::TopologyConfig;
use crate::correlators::{ContainerCorrelator, Correlator, ServicePodCorrelator, VolumeCorrelator};
use crate::leader::{self, LeaderElector};
use crate::model::{Component, Instance, Relation};
use crate::submitter::{Sink, Submitter};
use crate::urn::{ClusterType, UrnBuilder};
use crate::Error;

pub const CHECK_NAME: &str = "kubernetes_topology";

const ITEM_CHANNEL_CAPACITY: usize = 1000;
const SIDE_CHANNEL_CAPACITY: usize = 100;

/// What a finished run emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub components: usize,
    pub relations: usize,
    pub dropped_relations: usize,
    pub errors: usize,
    pub timed_out: bool,
}

#[derive(Debug)]
pub struct TopologyEngine {
    config: Arc<TopologyConfig>,
    client: Arc<dyn ApiClient>,
    elector: Arc<dyn LeaderElector>,
    sink: Arc<dyn Sink>,
    cluster_type: Arc<ClusterTypeCache>,
}

impl TopologyEngine {
    pub fn new(
        config: Arc<TopologyConfig>,
        client: Arc<dyn ApiClient>,
        elector: Arc<dyn LeaderElector>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            config,
            client,
            elector,
            sink,
            cluster_type: Arc::new(ClusterTypeCache::default()),
        }
    }

    /// Shares the cluster type detection with other checks.
    pub fn with_cluster_type(mut self, cache: Arc<ClusterTypeCache>) -> Self {
        self.cluster_type = cache;
        self
    }

    /// Runs one snapshot. Returns `None` when the run was skipped, either
    /// because topology collection is off or this agent is not the leader.
    pub async fn run(&self) -> Option<RunStats> {
        if !self.config.collect_topology {
            return None;
        }
        if !leader::may_run(CHECK_NAME, self.config.skip_leader_election, self.elector.as_ref()).await {
            return None;
        }

        let started = Instant::now();
        let cluster_type = self.cluster_type.get(self.client.as_ref()).await;
        let instance_type = match &cluster_type {
            Ok(ct) => ct.as_str(),
            Err(_) => ClusterType::Kubernetes.as_str(),
        };
        let submitter = Submitter::new(
            CHECK_NAME,
            Instance::new(instance_type, self.config.cluster_name.as_str()),
            self.sink.clone(),
        );

        let mut stats = RunStats::default();
        submitter.start_snapshot().await;
        match cluster_type {
            Ok(cluster_type) => self.collect(cluster_type, &submitter, &mut stats).await,
            Err(err) => {
                stats.errors += 1;
                submitter.handle_error(&Error::api(CHECK_NAME, err)).await;
            }
        }
        submitter.stop_snapshot().await;
        submitter.complete().await;

        let elapsed = started.elapsed();
        metrics::histogram!("topology_run_duration_seconds").record(elapsed.as_secs_f64());
        metrics::counter!("topology_components_total").increment(stats.components as u64);
        metrics::counter!("topology_relations_total").increment(stats.relations as u64);
        log::info!(
            check = CHECK_NAME,
            components = stats.components,
            relations = stats.relations,
            dropped = stats.dropped_relations,
            errors = stats.errors,
            timed_out = stats.timed_out;
            "topology run finished in {:?}", elapsed
        );
        Some(stats)
    }

    async fn collect(&self, cluster_type: ClusterType, submitter: &Submitter, stats: &mut RunStats) {
        let (components_tx, mut components) = mpsc::channel(ITEM_CHANNEL_CAPACITY);
        let (relations_tx, mut relations) = mpsc::channel(ITEM_CHANNEL_CAPACITY);
        let (errors_tx, mut errors) = mpsc::channel(ITEM_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let urn = UrnBuilder::new(cluster_type, &self.config.cluster_name);
        let cluster_urn = urn.cluster();
        let ctx = Arc::new(RunContext::new(
            self.client.clone(),
            urn,
            self.config.clone(),
            components_tx,
            relations_tx,
            errors_tx,
            cancel.clone(),
        ));

        let (collectors, correlators) = self.tasks();
        let tracker = TaskTracker::new();
        for collector in collectors {
            let (name, task_ctx) = (collector.name(), ctx.clone());
            let task = Box::pin(async move { collector.run(&task_ctx).await });
            spawn(&tracker, &ctx, &cancel, name, task);
        }
        for correlator in correlators {
            let (name, task_ctx) = (correlator.name(), ctx.clone());
            let task = Box::pin(async move { correlator.run(&task_ctx).await });
            spawn(&tracker, &ctx, &cancel, name, task);
        }
        tracker.close();

        let mut drain = Drain {
            submitter,
            stats,
            emitted: HashSet::new(),
            pending: IndexMap::new(),
        };
        let deadline = tokio::time::sleep(self.config.collect_timeout());
        tokio::pin!(deadline);
        let done = tracker.wait();
        tokio::pin!(done);

        loop {
            tokio::select! {
                Some(component) = components.recv() => drain.component(component).await,
                Some(relation) = relations.recv() => drain.relation(relation),
                Some(error) = errors.recv() => drain.error(&error).await,
                _ = &mut done => break,
                _ = &mut deadline => {
                    let timeout = Error::Timeout(self.config.collect_timeout());
                    log::warn!(check = CHECK_NAME; "{}, stopping the snapshot with what was collected", timeout);
                    cancel.cancel();
                    drain.stats.timed_out = true;
                    drain.error(&timeout).await;
                    break;
                }
            }
        }

        // Whatever made it into the channels before the loop exited.
        while let Ok(component) = components.try_recv() {
            drain.component(component).await;
        }
        while let Ok(relation) = relations.try_recv() {
            drain.relation(relation);
        }
        while let Ok(error) = errors.try_recv() {
            drain.error(&error).await;
        }
        cancel.cancel();

        drain.finish(&cluster_urn).await;
    }

    /// The collectors enabled by the configuration and the correlators
    /// joining their side channels.
    fn tasks(&self) -> (Vec<Box<dyn Collector>>, Vec<Box<dyn Correlator>>) {
        let resources = &self.config.resources;
        let (node_tx, node_rx) = mpsc::channel(SIDE_CHANNEL_CAPACITY);
        let (container_tx, container_rx) = mpsc::channel(SIDE_CHANNEL_CAPACITY);
        let (volume_tx, volume_rx) = mpsc::channel(SIDE_CHANNEL_CAPACITY);
        let (pod_label_tx, pod_label_rx) = mpsc::channel(SIDE_CHANNEL_CAPACITY);
        let (selector_tx, selector_rx) = mpsc::channel(SIDE_CHANNEL_CAPACITY);

        let mut collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(ClusterCollector),
            Box::new(NodeCollector::new(node_tx)),
            Box::new(PodCollector::new(container_tx, volume_tx, pod_label_tx)),
            Box::new(ServiceCollector::new(selector_tx)),
        ];
        let optional: Vec<(bool, Box<dyn Collector>)> = vec![
            (resources.persistentvolumes, Box::new(PersistentVolumeCollector)),
            (resources.namespaces, Box::new(NamespaceCollector)),
            (resources.configmaps, Box::new(ConfigMapCollector)),
            (resources.secrets, Box::new(SecretCollector)),
            (resources.daemonsets, Box::<DaemonSetCollector>::default()),
            (resources.deployments, Box::<DeploymentCollector>::default()),
            (resources.replicasets, Box::<ReplicaSetCollector>::default()),
            (resources.statefulsets, Box::<StatefulSetCollector>::default()),
            (resources.jobs, Box::<JobCollector>::default()),
            (resources.cronjobs, Box::<CronJobCollector>::default()),
            (resources.ingresses, Box::new(IngressCollector)),
        ];
        collectors.extend(optional.into_iter().filter(|(on, _)| *on).map(|(_, c)| c));

        let correlators: Vec<Box<dyn Correlator>> = vec![
            Box::new(ContainerCorrelator::new(node_rx, container_rx)),
            Box::new(VolumeCorrelator::new(volume_rx, resources.persistentvolumeclaims)),
            Box::new(ServicePodCorrelator::new(pod_label_rx, selector_rx)),
        ];
        (collectors, correlators)
    }
}

/// Runs one collector or correlator on the tracker. A cancelled run drops
/// the task at its next suspension point.
fn spawn(
    tracker: &TaskTracker,
    ctx: &Arc<RunContext>,
    cancel: &CancellationToken,
    name: &'static str,
    task: BoxFuture<'static, crate::Result<()>>,
) {
    let (ctx, cancel) = (ctx.clone(), cancel.clone());
    tracker.spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!(task = name; "cancelled");
            }
            res = task => match res {
                Ok(()) => log::debug!(task = name; "finished"),
                Err(err) => {
                    metrics::counter!("topology_task_errors_total", "task" => name).increment(1);
                    ctx.error(err).await;
                }
            },
        }
    });
}

struct Drain<'a> {
    submitter: &'a Submitter,
    stats: &'a mut RunStats,
    emitted: HashSet<String>,
    pending: IndexMap<String, Relation>,
}

impl Drain<'_> {
    async fn component(&mut self, component: Component) {
        if !self.emitted.insert(component.external_id.clone()) {
            log::debug!(component = component.external_id.as_str(); "dropping duplicate component");
            return;
        }
        self.stats.components += 1;
        self.submitter.submit_component(component).await;
    }

    fn relation(&mut self, relation: Relation) {
        self.pending.entry(relation.external_id.clone()).or_insert(relation);
    }

    async fn error(&mut self, error: &Error) {
        self.stats.errors += 1;
        self.submitter.handle_error(error).await;
    }

    async fn finish(mut self, cluster_urn: &str) {
        let pending = std::mem::take(&mut self.pending);
        let (valid, dropped) = correlate_relations(pending.into_values(), &self.emitted, cluster_urn);
        if let Some(first) = dropped.first() {
            let violation = Error::InvariantViolation {
                count: dropped.len(),
                first: first.external_id.clone(),
            };
            self.stats.dropped_relations = dropped.len();
            self.error(&violation).await;
        }
        for relation in valid {
            self.stats.relations += 1;
            self.submitter.submit_relation(relation).await;
        }
    }
}

/// Splits relations into those whose endpoints were both emitted and the
/// rest. Relations into the cluster itself are always kept.
pub fn correlate_relations(
    relations: impl IntoIterator<Item = Relation>,
    emitted: &HashSet<String>,
    cluster_urn: &str,
) -> (Vec<Relation>, Vec<Relation>) {
    relations.into_iter().partition(|r| {
        emitted.contains(&r.source_id)
            && (r.target_id == cluster_urn || emitted.contains(&r.target_id))
    })
}
