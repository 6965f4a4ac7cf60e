//! Mesh configuration.

use std::time::Duration;

use crate::gossip::DEFAULT_CACHE_CAPACITY;
use crate::optimizer::DEFAULT_TRIM_THRESHOLD;

/// Peer-count constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    /// 0 = unlimited.
    pub max_peers: usize,
    /// Self-healing floor.
    pub min_peers: usize,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_peers: 0,
            min_peers: 2,
        }
    }
}

impl Constraints {
    /// Admission control and self-healing only apply to a bounded mesh.
    pub fn is_constrained(&self) -> bool {
        self.max_peers > 0
    }
}

/// Latency probe timings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Delay between connection creation and the first ping.
    pub initial_delay: Duration,
    /// Backoff between failed send attempts.
    pub retry_interval: Duration,
    /// Attempts before the peer is declared unreachable.
    pub max_attempts: u32,
    /// Interval between heartbeat pings after admission. `None` stops
    /// probing once the peer is admitted.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            retry_interval: Duration::from_secs(1),
            max_attempts: 3,
            heartbeat_interval: Some(Duration::from_secs(1)),
        }
    }
}

/// Configuration for one mesh participant.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub self_id: String,
    pub nick: Option<String>,
    pub constraints: Constraints,
    pub probe: ProbeConfig,
    pub dedup_capacity: usize,
    /// Hang up the slowest outlier to make room for a new offer at capacity.
    pub self_optimize: bool,
    /// Send our adjacency list to admitted peers after each weight update.
    pub share_adjacency: bool,
    pub trim_threshold: f64,
}

impl MeshConfig {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            nick: None,
            constraints: Constraints::default(),
            probe: ProbeConfig::default(),
            dedup_capacity: DEFAULT_CACHE_CAPACITY,
            self_optimize: true,
            share_adjacency: true,
            trim_threshold: DEFAULT_TRIM_THRESHOLD,
        }
    }

    /// Create from environment variables, falling back to defaults.
    pub fn from_env(self_id: impl Into<String>) -> Self {
        let mut config = Self::new(self_id);
        config.nick = std::env::var("LIOMESH_NICK")
            .ok()
            .filter(|s| !s.is_empty());
        if let Some(v) = env_parse("LIOMESH_MAX_PEERS") {
            config.constraints.max_peers = v;
        }
        if let Some(v) = env_parse("LIOMESH_MIN_PEERS") {
            config.constraints.min_peers = v;
        }
        if let Some(v) = env_parse("LIOMESH_SELF_OPTIMIZE") {
            config.self_optimize = v;
        }
        if let Some(v) = env_parse("LIOMESH_DEDUP_CAPACITY") {
            config.dedup_capacity = v;
        }
        if let Some(ms) = env_parse("LIOMESH_PROBE_DELAY_MS") {
            config.probe.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("LIOMESH_RETRY_MS") {
            config.probe.retry_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("LIOMESH_HEARTBEAT_MS") {
            config.probe.heartbeat_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        config
    }

    pub fn with_constraints(mut self, max_peers: usize, min_peers: usize) -> Self {
        self.constraints = Constraints {
            max_peers,
            min_peers,
        };
        self
    }

    pub fn with_nick(mut self, nick: impl Into<String>) -> Self {
        self.nick = Some(nick.into());
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
