use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clusteragent_topology::events::EventsCheck;
use clusteragent_topology::TopologyEngine;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Runs the cluster checks, each on its own fixed period, until cancelled.
#[derive(Debug)]
pub struct Scheduler {
    topology: Arc<TopologyEngine>,
    interval: Duration,
    events: Option<(Arc<EventsCheck>, Duration)>,
}

impl Scheduler {
    pub fn new(topology: TopologyEngine, interval: Duration) -> Self {
        Self {
            topology: Arc::new(topology),
            interval,
            events: None,
        }
    }

    /// Runs the events check every `period` next to the topology check.
    pub fn with_events(mut self, events: EventsCheck, period: Duration) -> Self {
        self.events = Some((Arc::new(events), period));
        self
    }

    /// Returns once the token is cancelled and every in-flight run has
    /// finished.
    pub async fn run(self, token: &CancellationToken) {
        let tracker = TaskTracker::new();

        let topology = self.topology.clone();
        tracker.spawn(every("topology", self.interval, token.clone(), move || {
            let topology = topology.clone();
            async move {
                topology.run().await;
            }
        }));

        if let Some((events, period)) = self.events.clone() {
            tracker.spawn(every("events", period, token.clone(), move || {
                let events = events.clone();
                async move {
                    if let Err(err) = events.run().await {
                        log::warn!(check = "events"; "events run failed: {}", err);
                    }
                }
            }));
        }

        tracker.close();
        tracker.wait().await;
    }
}

async fn every<F, Fut>(name: &'static str, period: Duration, token: CancellationToken, mut run: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::debug!(check = name; "scheduler stopped");
                return;
            }
            _ = ticker.tick() => run().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clusteragent_topology::events::MemoryEventSender;
    use clusteragent_topology::leader::AlwaysLeader;
    use clusteragent_topology::token::MemoryTokenStore;
    use clusteragent_topology::{MemorySink, StaticApiClient, TopologyConfig};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn runs_each_check_on_its_own_period() {
        let config = Arc::new(TopologyConfig {
            cluster_name: "mycluster".into(),
            ..Default::default()
        });
        let client = Arc::new(StaticApiClient::from_json("{}").unwrap());
        let sink = Arc::new(MemorySink::new());
        let sender = Arc::new(MemoryEventSender::new());

        let topology = TopologyEngine::new(config.clone(), client.clone(), Arc::new(AlwaysLeader), sink.clone());
        let events = EventsCheck::new(
            config,
            client.clone(),
            client,
            Arc::new(AlwaysLeader),
            Arc::new(MemoryTokenStore::new()),
            sender.clone(),
        );
        let scheduler = Scheduler::new(topology, Duration::from_secs(60))
            .with_events(events, Duration::from_secs(100));

        let token = CancellationToken::new();
        let stop = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(150)).await;
            stop.cancel();
        });
        scheduler.run(&token).await;

        // Topology ticks at 0s, 60s and 120s; events at 0s and 100s.
        let starts = sink.kinds().into_iter().filter(|k| *k == "start").count();
        assert_eq!(starts, 3);
        assert_eq!(sender.commits(), 2);
    }
}
