use std::sync::Arc;

use anyhow::Context;
use clusteragent::config::{AgentConfig, Command};
use clusteragent::output::JsonLinesEventSender;
use clusteragent::scheduler::Scheduler;
use clusteragent_topology::events::EventsCheck;
use clusteragent_topology::leader::AlwaysLeader;
use clusteragent_topology::token::MemoryTokenStore;
use clusteragent_topology::{ClusterTypeCache, JsonLinesSink, StaticApiClient, TopologyEngine};
use tokio_util::sync::CancellationToken;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    match Command::from_args(&args)? {
        Command::Interpret { config, traces } => {
            let config = match config {
                Some(path) => AgentConfig::load(&path)?,
                None => AgentConfig::default(),
            };
            for trace in clusteragent::interpret_file(&traces, config.interpreter)? {
                println!("{}", serde_json::to_string(&trace)?);
            }
            Ok(())
        }
        Command::Collect { config, cluster_state } => {
            let config = AgentConfig::load(&config)?;
            config.validate_collection()?;
            let state = std::fs::read_to_string(&cluster_state)
                .with_context(|| format!("read cluster state {}", cluster_state.display()))?;
            let client = Arc::new(StaticApiClient::from_json(&state)?);

            let topology = Arc::new(config.topology);
            let cluster_type = Arc::new(ClusterTypeCache::default());
            let engine = TopologyEngine::new(
                topology.clone(),
                client.clone(),
                Arc::new(AlwaysLeader),
                Arc::new(JsonLinesSink::stdout()),
            )
            .with_cluster_type(cluster_type.clone());
            let events = topology.collect_events.then(|| {
                EventsCheck::new(
                    topology.clone(),
                    client.clone(),
                    client.clone(),
                    Arc::new(AlwaysLeader),
                    Arc::new(MemoryTokenStore::new()),
                    Arc::new(JsonLinesEventSender::stdout()),
                )
                .with_cluster_type(cluster_type.clone())
            });

            let token = CancellationToken::new();
            let shutdown = token.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => log::info!("received shutdown signal, finishing in-flight runs"),
                    Err(err) => log::error!("could not listen for shutdown signal: {}", err),
                }
                shutdown.cancel();
            });

            let mut scheduler = Scheduler::new(engine, config.run_interval);
            if let Some(events) = events {
                scheduler = scheduler.with_events(events, topology.event_resync_period);
            }
            scheduler.run(&token).await;
            log::info!("all checks stopped");
            Ok(())
        }
    }
}
