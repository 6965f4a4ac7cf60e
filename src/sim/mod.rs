//! In-process mesh simulation.
//!
//! Participants join one room over a simulated network, wait for the mesh
//! to settle, flood one message from the first participant, then the last
//! participant leaves and the rest repair around it.

pub mod network;
pub mod node;

use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{info, warn};

use liomesh_overlay::{Constraints, MeshConfig};

pub use node::{NodeReport, Received};

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub nodes: usize,
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Total run time. Each phase gets a third of it.
    pub run: Duration,
    /// Gap between consecutive joins.
    pub join_interval: Duration,
    pub constraints: Constraints,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: 6,
            min_latency: Duration::from_millis(5),
            max_latency: Duration::from_millis(80),
            run: Duration::from_secs(10),
            join_interval: Duration::from_millis(200),
            constraints: Constraints {
                max_peers: 3,
                min_peers: 2,
            },
        }
    }
}

impl SimConfig {
    /// Create from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_parse("LIOMESH_NODES") {
            config.nodes = n;
        }
        if let Some(ms) = env_parse("LIOMESH_MIN_LATENCY_MS") {
            config.min_latency = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("LIOMESH_MAX_LATENCY_MS") {
            config.max_latency = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse("LIOMESH_RUN_SECS") {
            config.run = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("LIOMESH_MAX_PEERS") {
            config.constraints.max_peers = n;
        }
        if let Some(n) = env_parse("LIOMESH_MIN_PEERS") {
            config.constraints.min_peers = n;
        }
        config
    }

    /// Mesh settings for participant `index`.
    pub fn mesh_config(&self, index: usize) -> MeshConfig {
        let mut config = MeshConfig::from_env(participant_id(index));
        config.constraints = self.constraints;
        config.nick = Some(participant_nick(config.nick.as_deref(), index));
        config
    }

    fn phase(&self) -> Duration {
        self.run / 3
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

pub fn participant_id(index: usize) -> String {
    format!("peer-{index}")
}

/// Nick for participant `index`. A configured nick is used as a prefix so
/// every participant stays distinguishable.
pub fn participant_nick(prefix: Option<&str>, index: usize) -> String {
    format!("{}{index}", prefix.unwrap_or("nick"))
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    /// Id of the participant that left, if any.
    pub departed: Option<String>,
    /// Application deliveries across all participants.
    pub deliveries: usize,
    pub nodes: Vec<NodeReport>,
}

/// Run one simulation to completion.
pub async fn run(config: SimConfig) -> SimReport {
    let clock = Instant::now();
    let (net_tx, network) = network::spawn(config.min_latency, config.max_latency);
    info!(
        nodes = config.nodes,
        max_peers = config.constraints.max_peers,
        min_peers = config.constraints.min_peers,
        "starting simulation"
    );

    let mut nodes = Vec::with_capacity(config.nodes);
    for index in 0..config.nodes {
        let handle = node::spawn(config.mesh_config(index), net_tx.clone(), clock);
        let join = network::NetCommand::Join {
            id: handle.id.clone(),
            inputs: handle.inputs.clone(),
        };
        if net_tx.send(join).is_err() {
            warn!(peer = %handle.id, "network stopped before join");
        }
        nodes.push(handle);
        sleep(config.join_interval).await;
    }

    sleep(config.phase()).await;
    if let Some(first) = nodes.first() {
        let _ = first.inputs.send(node::NodeInput::Propagate {
            kind: "chat".into(),
            payload: json!({ "text": "hello from the first participant" }),
        });
    }

    sleep(config.phase()).await;
    let departed = match nodes.last() {
        Some(last) if nodes.len() > 1 => {
            info!(peer = %last.id, "participant leaving");
            let _ = last.inputs.send(node::NodeInput::Leave);
            Some(last.id.clone())
        }
        _ => None,
    };

    sleep_until((clock + config.run).max(Instant::now() + config.phase())).await;

    let mut reports = Vec::with_capacity(nodes.len());
    for handle in nodes {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = handle.inputs.send(node::NodeInput::Shutdown { reply: reply_tx });
        match reply_rx.await {
            Ok(report) => reports.push(report),
            Err(_) => warn!(peer = %handle.id, "participant stopped without a report"),
        }
        let _ = handle.task.await;
    }
    drop(net_tx);
    let _ = network.await;

    let deliveries = reports.iter().map(|r| r.received.len()).sum();
    info!(deliveries, "simulation finished");
    SimReport {
        departed,
        deliveries,
        nodes: reports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nicks_are_unique_per_participant() {
        assert_eq!(participant_nick(None, 0), "nick0");
        assert_eq!(participant_nick(Some("alice-"), 0), "alice-0");
        assert_eq!(participant_nick(Some("alice-"), 3), "alice-3");
        assert_ne!(participant_nick(Some("alice"), 1), participant_nick(Some("alice"), 2));
    }

    #[test]
    fn mesh_config_carries_constraints_and_nick() {
        let sim = SimConfig::default();
        let first = sim.mesh_config(0);
        let second = sim.mesh_config(1);
        assert_eq!(first.self_id, "peer-0");
        assert_eq!(first.constraints, sim.constraints);
        assert!(first.nick.is_some());
        assert_ne!(first.nick, second.nick);
    }
}
