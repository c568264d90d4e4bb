//! Kubernetes topology collection.
//!
//! A topology run lists the cluster through an [`ApiClient`], turns every
//! object into typed components and relations, and hands them to a
//! [`Submitter`] as one consistent snapshot:
//!
//! ```text
//! start · (component | relation | error)* · stop · complete
//! ```
//!
//! Collectors each own one resource kind. Joins across kinds (containers
//! to nodes, services to pods, volumes to claims) are done by correlators
//! fed through side channels. The [`TopologyEngine`] runs all of them in
//! parallel within a bounded collect window and guarantees that every
//! relation it emits points at components emitted in the same snapshot.
//!
//! The crate also carries the Kubernetes events check, which maps cluster
//! events to structured events behind a resume token, and the
//! kube-state-metrics aggregators.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use clusteragent_topology::{
//!     AlwaysLeader, JsonLinesSink, StaticApiClient, TopologyConfig, TopologyEngine,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = TopologyConfig {
//!     cluster_name: "mycluster".into(),
//!     ..Default::default()
//! };
//! let client = StaticApiClient::from_json(&std::fs::read_to_string("state.json")?)?;
//! let engine = TopologyEngine::new(
//!     Arc::new(config),
//!     Arc::new(client),
//!     Arc::new(AlwaysLeader),
//!     Arc::new(JsonLinesSink::stdout()),
//! );
//! engine.run().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod collectors;
pub mod config;
pub mod correlators;
pub mod engine;
mod error;
pub mod events;
pub mod ksm;
pub mod kube;
pub mod leader;
pub mod model;
pub mod submitter;
pub mod token;
pub mod urn;

pub use client::{ApiClient, ClusterState, ClusterTypeCache, StaticApiClient};
pub use config::{ResourcesConfig, TopologyConfig};
pub use engine::{RunStats, TopologyEngine};
pub use error::{Error, Result};
pub use leader::{AlwaysLeader, LeaderElector};
pub use model::{Component, Instance, Relation, RelationType};
pub use submitter::{JsonLinesSink, MemorySink, Record, Sink, Submitter};
pub use urn::{ClusterType, UrnBuilder};
