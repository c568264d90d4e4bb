use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clusteragent_interpreter::InterpreterConfig;
use clusteragent_topology::TopologyConfig;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cluster-agent/config.json";

/// The agent's configuration file.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub topology: TopologyConfig,
    pub interpreter: InterpreterConfig,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "run_interval_s")]
    pub run_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            topology: TopologyConfig::default(),
            interpreter: InterpreterConfig::default(),
            run_interval: Duration::from_secs(60),
        }
    }
}

impl AgentConfig {
    pub fn parse(json: &str) -> Result<Self> {
        let config: AgentConfig = serde_json::from_str(json).context("parse agent config")?;
        if config.run_interval.is_zero() {
            anyhow::bail!("run_interval_s must be positive");
        }
        Ok(config)
    }

    /// Checks the settings the topology and events checks cannot run
    /// without. Interpreting traces does not need them.
    pub fn validate_collection(&self) -> Result<()> {
        self.topology.validate().context("invalid topology config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&contents)
    }
}

/// What the agent was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Collect from a static cluster state file until interrupted.
    Collect { config: PathBuf, cluster_state: PathBuf },
    /// Interpret a file of traces and exit.
    Interpret { config: Option<PathBuf>, traces: PathBuf },
}

impl Command {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let value = |flag: &str| {
            args.iter()
                .position(|arg| arg == flag)
                .and_then(|index| args.get(index + 1))
                .map(PathBuf::from)
        };

        let config = value("-c");
        if let Some(traces) = value("--interpret") {
            return Ok(Command::Interpret { config, traces });
        }
        let cluster_state = value("--cluster-state")
            .context("usage: cluster-agent [-c <config>] (--cluster-state <file> | --interpret <file>)")?;
        Ok(Command::Collect {
            config: config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            cluster_state,
        })
    }
}
