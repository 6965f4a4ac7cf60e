//! Metric names for the overlay engine.
//!
//! Call sites use these constants rather than raw strings. Nothing here
//! installs an exporter; without one the `metrics` macros are no-ops.

use metrics::{counter, gauge, histogram};

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Total peers admitted to the mesh (counter).
pub const PEERS_ADMITTED: &str = "liomesh_peers_admitted_total";
/// Total peers ended with a removal notification (counter).
pub const PEERS_ENDED: &str = "liomesh_peers_ended_total";
/// Total peers given up after an exhausted probe budget (counter).
pub const PEERS_UNREACHABLE: &str = "liomesh_peers_unreachable_total";
/// Total offers and connect attempts refused by admission control (counter).
pub const OFFERS_REJECTED: &str = "liomesh_offers_rejected_total";
/// Total self-healing connection attempts (counter).
pub const HEAL_ATTEMPTS: &str = "liomesh_heal_attempts_total";
/// Current number of live connections (gauge).
pub const LIVE_PEERS: &str = "liomesh_live_peers";

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// Measured one-hop latency in milliseconds (histogram).
pub const PROBE_RTT_MS: &str = "liomesh_probe_rtt_milliseconds";
/// Probe sends refused because the channel was not open (counter).
pub const PROBE_SEND_FAILURES: &str = "liomesh_probe_send_failures_total";

// ---------------------------------------------------------------------------
// Gossip
// ---------------------------------------------------------------------------

/// Propagate frames sent to neighbors (counter).
pub const GOSSIP_FORWARDED: &str = "liomesh_gossip_forwarded_total";
/// Propagate frames dropped as duplicates (counter).
pub const GOSSIP_DUPLICATES: &str = "liomesh_gossip_duplicates_total";
/// Application payloads delivered (counter).
pub const GOSSIP_DELIVERED: &str = "liomesh_gossip_delivered_total";
/// Dedup cache entries evicted by capacity (counter).
pub const GOSSIP_EVICTIONS: &str = "liomesh_gossip_evictions_total";
/// Frames dropped because they failed to decode (counter).
pub const WIRE_MALFORMED: &str = "liomesh_wire_malformed_total";

pub fn record_rtt(rtt_ms: f64) {
    histogram!(PROBE_RTT_MS).record(rtt_ms);
}

pub fn record_live_peers(n: usize) {
    gauge!(LIVE_PEERS).set(n as f64);
}

pub fn incr(name: &'static str) {
    counter!(name).increment(1);
}

pub fn incr_by(name: &'static str, n: u64) {
    if n > 0 {
        counter!(name).increment(n);
    }
}
