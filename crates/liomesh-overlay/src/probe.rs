//! Per-connection latency probing.
//!
//! The probe never touches the transport itself. The controller asks it for
//! a ping, tries to send it, and reports whether the send went through; the
//! probe answers with the next step (admit, heartbeat, retry, give up).
//! Pongs are matched against the single outstanding ping per peer.
//!
//! ```text
//! created ──initial_delay──▶ ping ──sent──▶ Confirmed ──heartbeat──▶ ping ...
//!                              │
//!                              └─failed──▶ Retry (retry_interval) ... Exhausted
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::ProbeConfig;
use crate::wire::{Ping, Pong};

/// What the controller should do after a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    /// First successful send on this connection: the channel is live.
    Confirmed { next: Option<Duration> },
    /// Heartbeat send succeeded.
    Continue { next: Option<Duration> },
    /// Send failed; try again after `after`.
    Retry { after: Duration },
    /// Retry budget exhausted.
    Exhausted,
}

#[derive(Debug, Default)]
struct ProbeSession {
    failures: u32,
    confirmed: bool,
    outstanding: Option<i64>,
}

/// Latency probe state for every live connection.
#[derive(Debug)]
pub struct LatencyProbe {
    config: ProbeConfig,
    sessions: HashMap<String, ProbeSession>,
}

impl LatencyProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    /// Begin probing `peer_id`. Returns the delay before the first ping.
    ///
    /// Restarting an existing session resets it.
    pub fn start(&mut self, peer_id: &str) -> Duration {
        self.sessions
            .insert(peer_id.to_owned(), ProbeSession::default());
        self.config.initial_delay
    }

    pub fn stop(&mut self, peer_id: &str) {
        self.sessions.remove(peer_id);
    }

    pub fn is_probing(&self, peer_id: &str) -> bool {
        self.sessions.contains_key(peer_id)
    }

    /// Build the next ping and mark it outstanding.
    pub fn ping(&mut self, peer_id: &str, now_ms: i64) -> Option<Ping> {
        let session = self.sessions.get_mut(peer_id)?;
        session.outstanding = Some(now_ms);
        Some(Ping { sent_at: now_ms })
    }

    /// Report the outcome of sending the last ping.
    pub fn record_send(&mut self, peer_id: &str, sent: bool) -> ProbeStep {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            return ProbeStep::Exhausted;
        };

        if sent {
            session.failures = 0;
            let next = self.config.heartbeat_interval;
            if session.confirmed {
                return ProbeStep::Continue { next };
            }
            session.confirmed = true;
            return ProbeStep::Confirmed { next };
        }

        session.outstanding = None;
        session.failures += 1;
        if session.failures >= self.config.max_attempts {
            self.sessions.remove(peer_id);
            ProbeStep::Exhausted
        } else {
            ProbeStep::Retry {
                after: self.config.retry_interval,
            }
        }
    }

    /// Build the reply to a ping. `handling_started` is when the frame
    /// handler began, so `delay` covers local processing.
    pub fn answer(ping: &Ping, handling_started: Instant, now_ms: i64) -> Pong {
        let delay = handling_started.elapsed().as_millis() as i64;
        Pong {
            sent_at: ping.sent_at,
            now: now_ms,
            delay,
        }
    }

    /// Match a pong to the outstanding ping and return the link weight.
    ///
    /// `weight = max(0, (now - sent_at) - delay)`. Stale or unsolicited
    /// pongs return `None`.
    pub fn record_pong(&mut self, peer_id: &str, pong: &Pong, now_ms: i64) -> Option<f64> {
        let session = self.sessions.get_mut(peer_id)?;
        if session.outstanding != Some(pong.sent_at) {
            return None;
        }
        session.outstanding = None;
        let rtt = now_ms - pong.sent_at - pong.delay.max(0);
        Some(rtt.max(0) as f64)
    }
}
