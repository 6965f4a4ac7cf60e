//! Mesh membership controller.
//!
//! Owns the topology graph, the latency probe and the gossip propagator for
//! one participant, and drives the transport. The host feeds it transport
//! events, signaling events and fired timers; application events come out
//! on an unbounded channel.
//!
//! Per remote peer:
//!
//! ```text
//! Unknown ──offer/connect──▶ Probing ──first ping sent──▶ Admitted
//!                               │                            │
//!                               └──────────▶ Ended ◀─────────┘
//! ```
//!
//! A peer whose probe budget runs out is also recorded as unreachable and
//! its teardown does not trigger a replacement.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::MeshConfig;
use crate::error::{Error, Result};
use crate::event::MeshEvent;
use crate::graph::TopologyGraph;
use crate::gossip::GossipPropagator;
use crate::metrics::{
    self, GOSSIP_DELIVERED, HEAL_ATTEMPTS, OFFERS_REJECTED, PEERS_ADMITTED, PEERS_ENDED,
    PEERS_UNREACHABLE, PROBE_SEND_FAILURES, WIRE_MALFORMED,
};
use crate::optimizer;
use crate::probe::{LatencyProbe, ProbeStep};
use crate::transport::{Role, RoomMember, Timer, Transport};
use crate::wire::{self, Envelope, Forwarded, Frame, MessageId, Ping, Pong, ReportedEdge};

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Probing,
    Admitted,
    Ended,
}

/// Why a connection is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    /// We hung up on purpose (application, trim, leave, self-optimize).
    Hangup,
    /// The far side or the channel went away.
    Closed,
    /// Probe budget exhausted.
    Unreachable,
}

#[derive(Debug, Clone)]
struct PeerLink {
    state: PeerState,
    role: Role,
    epoch: u64,
    nick: Option<String>,
    channel_open: bool,
}

/// Read-only view of one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub peer_id: String,
    pub state: PeerState,
    pub role: Role,
    pub nick: Option<String>,
    pub channel_open: bool,
}

/// Membership controller for one participant.
pub struct MeshController<T> {
    config: MeshConfig,
    transport: T,
    graph: TopologyGraph,
    probe: LatencyProbe,
    gossip: GossipPropagator,
    peers: BTreeMap<String, PeerLink>,
    roster: Vec<RoomMember>,
    unreachable: HashSet<String>,
    /// Peers that refused one of our offers this session.
    rejected_by: HashSet<String>,
    next_epoch: u64,
    events: mpsc::UnboundedSender<MeshEvent>,
}

impl<T: Transport> std::fmt::Debug for MeshController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshController")
            .field("self_id", &self.config.self_id)
            .field("live_peers", &self.live_peer_count())
            .field("graph_edges", &self.graph.edge_count())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> MeshController<T> {
    pub fn new(config: MeshConfig, transport: T, events: mpsc::UnboundedSender<MeshEvent>) -> Self {
        let probe = LatencyProbe::new(config.probe.clone());
        let gossip = GossipPropagator::new(config.self_id.clone(), config.dedup_capacity);
        // Never connect to ourselves.
        let unreachable = HashSet::from([config.self_id.clone()]);
        Self {
            config,
            transport,
            graph: TopologyGraph::new(),
            probe,
            gossip,
            peers: BTreeMap::new(),
            roster: Vec::new(),
            unreachable,
            rejected_by: HashSet::new(),
            next_epoch: 0,
            events,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn self_id(&self) -> &str {
        &self.config.self_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn graph(&self) -> &TopologyGraph {
        &self.graph
    }

    pub fn gossip(&self) -> &GossipPropagator {
        &self.gossip
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn roster(&self) -> &[RoomMember] {
        &self.roster
    }

    pub fn peer_state(&self, peer_id: &str) -> Option<PeerState> {
        self.peers.get(peer_id).map(|link| link.state)
    }

    pub fn peer_info(&self, peer_id: &str) -> Option<PeerInfo> {
        self.peers.get(peer_id).map(|link| PeerInfo {
            peer_id: peer_id.to_owned(),
            state: link.state,
            role: link.role,
            nick: link.nick.clone(),
            channel_open: link.channel_open,
        })
    }

    /// Ids of connections that have not ended, in sorted order.
    pub fn live_peers(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|(_, link)| link.state != PeerState::Ended)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn live_peer_count(&self) -> usize {
        self.peers
            .values()
            .filter(|link| link.state != PeerState::Ended)
            .count()
    }

    pub fn admitted_peers(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|(_, link)| link.state == PeerState::Admitted)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn peer_by_nick(&self, nick: &str) -> Option<&str> {
        self.peers
            .iter()
            .find(|(_, link)| link.state != PeerState::Ended && link.nick.as_deref() == Some(nick))
            .map(|(id, _)| id.as_str())
    }

    pub fn is_unreachable(&self, peer_id: &str) -> bool {
        self.unreachable.contains(peer_id)
    }

    /// neighbor id → measured or gossiped latency for `peer_id`.
    pub fn neighbor_latencies(&self, peer_id: &str) -> BTreeMap<String, f64> {
        self.graph.neighbor_latencies(peer_id)
    }

    /// The neighbor we would drop first: the slowest latency outlier.
    pub fn droppable_peer(&self) -> Option<String> {
        let latencies = self.graph.neighbor_latencies(&self.config.self_id);
        optimizer::trim_candidates(&latencies, self.config.trim_threshold)
            .into_iter()
            .map(|(id, _)| id)
            .find(|id| self.is_live(id))
    }

    fn is_live(&self, peer_id: &str) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|link| link.state != PeerState::Ended)
    }

    fn at_capacity(&self) -> bool {
        let c = self.config.constraints;
        c.is_constrained() && self.live_peer_count() >= c.max_peers
    }

    // ── Signaling ─────────────────────────────────────────────────────

    /// We joined a room. Connect to members in reverse listed order until
    /// the constraints say stop.
    pub fn handle_room_joined(&mut self, members: Vec<RoomMember>, now_ms: i64) {
        self.roster = members;
        let order: Vec<String> = self
            .roster
            .iter()
            .rev()
            .filter(|m| m.id != self.config.self_id && m.is_connectable())
            .map(|m| m.id.clone())
            .collect();
        info!(self_id = %self.config.self_id, members = self.roster.len(), "joined room");

        let c = self.config.constraints;
        for peer_id in order {
            if c.is_constrained() {
                let count = self.live_peer_count();
                if count >= c.max_peers || (c.min_peers > 0 && count >= c.min_peers) {
                    break;
                }
            }
            self.connect(&peer_id, now_ms);
        }
    }

    pub fn handle_member_joined(&mut self, member: RoomMember) {
        if member.id == self.config.self_id {
            return;
        }
        debug!(peer = %member.id, "member joined room");
        self.roster.retain(|m| m.id != member.id);
        self.roster.push(member);
    }

    /// A member left the room: forget it and end any connection to it.
    pub fn handle_member_left(&mut self, peer_id: &str, now_ms: i64) {
        self.roster.retain(|m| m.id != peer_id);
        self.rejected_by.remove(peer_id);
        if self.is_live(peer_id) {
            self.end_peer(peer_id, EndReason::Closed);
            self.heal(now_ms);
        }
    }

    /// Hang up every connection and forget the roster.
    pub fn leave_room(&mut self) {
        for peer_id in self.live_peers() {
            self.end_peer(&peer_id, EndReason::Hangup);
        }
        self.roster.clear();
        self.rejected_by.clear();
        info!(self_id = %self.config.self_id, "left room");
    }

    // ── Connection lifecycle ──────────────────────────────────────────

    /// Offer a connection to `peer_id`. Returns `false` if admission
    /// control refused or the peer is already connected or unreachable.
    pub fn connect(&mut self, peer_id: &str, now_ms: i64) -> bool {
        if self.unreachable.contains(peer_id) || self.is_live(peer_id) {
            return false;
        }
        if self.at_capacity() {
            metrics::incr(OFFERS_REJECTED);
            debug!(peer = %peer_id, "connect skipped, at max peers");
            return false;
        }
        self.create_link(peer_id, Role::Initiator, None, now_ms);
        true
    }

    /// An offer arrived from `peer_id`. Returns whether it was accepted.
    pub fn handle_offer(&mut self, peer_id: &str, nick: Option<String>, now_ms: i64) -> bool {
        if peer_id == self.config.self_id {
            return false;
        }
        if self.is_live(peer_id) {
            // Renegotiation on an existing connection.
            if let Some(link) = self.peers.get_mut(peer_id) {
                if link.nick.is_none() {
                    link.nick = nick;
                }
            }
            return true;
        }
        if self.at_capacity() && !self.make_room() {
            metrics::incr(OFFERS_REJECTED);
            debug!(peer = %peer_id, "offer rejected, at max peers");
            return false;
        }
        self.create_link(peer_id, Role::Responder, nick, now_ms);
        true
    }

    /// Hang up the slowest outlier so a new offer fits.
    fn make_room(&mut self) -> bool {
        if !self.config.self_optimize {
            return false;
        }
        let Some(victim) = self.droppable_peer() else {
            return false;
        };
        info!(peer = %victim, "dropping latency outlier to admit new peer");
        self.end_peer(&victim, EndReason::Hangup);
        true
    }

    fn create_link(&mut self, peer_id: &str, role: Role, nick: Option<String>, now_ms: i64) {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.peers.insert(
            peer_id.to_owned(),
            PeerLink {
                state: PeerState::Probing,
                role,
                epoch,
                nick,
                channel_open: false,
            },
        );
        self.transport.open(peer_id, role);
        let delay = self.probe.start(peer_id);
        self.transport.schedule(
            Timer::Probe {
                peer_id: peer_id.to_owned(),
                epoch,
            },
            delay,
        );
        debug!(peer = %peer_id, ?role, epoch, now_ms, "connection created");
        metrics::record_live_peers(self.live_peer_count());

        if !self.config.constraints.is_constrained() {
            self.emit_admitted(peer_id);
        }
    }

    /// `peer_id` refused our offer. The pending link is forgotten without a
    /// removal event or a replacement attempt, and healing skips the peer
    /// for the rest of the session.
    pub fn handle_offer_rejected(&mut self, peer_id: &str) {
        let pending = self
            .peers
            .get(peer_id)
            .is_some_and(|link| link.state == PeerState::Probing && link.role == Role::Initiator);
        if !pending {
            trace!(peer = %peer_id, "rejection without a pending offer ignored");
            return;
        }
        self.peers.remove(peer_id);
        self.probe.stop(peer_id);
        self.rejected_by.insert(peer_id.to_owned());
        debug!(peer = %peer_id, "offer rejected by peer");
        metrics::record_live_peers(self.live_peer_count());
    }

    pub fn handle_channel_open(&mut self, peer_id: &str) {
        if let Some(link) = self.peers.get_mut(peer_id) {
            if link.state != PeerState::Ended {
                link.channel_open = true;
                trace!(peer = %peer_id, "data channel open");
            }
        }
    }

    /// The data channel or connection to `peer_id` closed underneath us.
    pub fn handle_channel_close(&mut self, peer_id: &str, now_ms: i64) {
        if !self.is_live(peer_id) {
            return;
        }
        self.end_peer(peer_id, EndReason::Closed);
        self.heal(now_ms);
    }

    /// Local explicit termination.
    pub fn hang_up(&mut self, peer_id: &str) -> bool {
        if !self.is_live(peer_id) {
            return false;
        }
        self.end_peer(peer_id, EndReason::Hangup);
        true
    }

    /// Hang up the slowest outlier if the mesh is above its floor.
    pub fn trim(&mut self) -> Option<String> {
        let c = self.config.constraints;
        if !c.is_constrained() || self.live_peer_count() <= c.min_peers {
            return None;
        }
        let victim = self.droppable_peer()?;
        info!(peer = %victim, "trimming latency outlier");
        self.end_peer(&victim, EndReason::Hangup);
        Some(victim)
    }

    fn end_peer(&mut self, peer_id: &str, reason: EndReason) {
        let Some(link) = self.peers.get_mut(peer_id) else {
            return;
        };
        if link.state == PeerState::Ended {
            return;
        }
        link.state = PeerState::Ended;
        link.channel_open = false;
        self.probe.stop(peer_id);

        match reason {
            EndReason::Unreachable => {
                self.unreachable.insert(peer_id.to_owned());
                self.transport.end(peer_id, false);
                metrics::incr(PEERS_UNREACHABLE);
                info!(peer = %peer_id, "peer unreachable, giving up");
            }
            EndReason::Hangup | EndReason::Closed => {
                if reason == EndReason::Hangup {
                    self.transport.end(peer_id, true);
                }
                let self_id = self.config.self_id.clone();
                self.graph.remove_edge(&self_id, peer_id);
                metrics::incr(PEERS_ENDED);
                info!(peer = %peer_id, ?reason, "peer ended");
                self.emit(MeshEvent::PeerEnded {
                    peer_id: peer_id.to_owned(),
                });
            }
        }
        metrics::record_live_peers(self.live_peer_count());
    }

    /// Reconnect to one random roster member if we fell below the floor.
    fn heal(&mut self, now_ms: i64) {
        let c = self.config.constraints;
        if !c.is_constrained() {
            return;
        }
        let self_id = self.config.self_id.clone();
        if self.graph.degree(&self_id) >= c.min_peers {
            return;
        }
        let candidates: Vec<String> = self
            .roster
            .iter()
            .filter(|m| m.is_connectable())
            .map(|m| m.id.clone())
            .filter(|id| {
                *id != self_id
                    && !self.graph.is_neighbor(&self_id, id)
                    && !self.unreachable.contains(id)
                    && !self.rejected_by.contains(id)
                    && !self.is_live(id)
            })
            .collect();
        let Some(pick) = candidates.choose(&mut rand::thread_rng()).cloned() else {
            debug!("below min peers but no reconnection candidates");
            return;
        };
        info!(peer = %pick, neighbors = self.graph.degree(&self_id), "self-healing connection");
        metrics::incr(HEAL_ATTEMPTS);
        self.connect(&pick, now_ms);
    }

    // ── Timers ────────────────────────────────────────────────────────

    pub fn handle_timer(&mut self, timer: Timer, now_ms: i64) {
        match timer {
            Timer::Probe { peer_id, epoch } => self.run_probe(&peer_id, epoch, now_ms),
        }
    }

    fn run_probe(&mut self, peer_id: &str, epoch: u64, now_ms: i64) {
        let current = self
            .peers
            .get(peer_id)
            .filter(|link| link.state != PeerState::Ended && link.epoch == epoch);
        if current.is_none() {
            trace!(peer = %peer_id, epoch, "stale probe timer ignored");
            return;
        }
        let Some(ping) = self.probe.ping(peer_id, now_ms) else {
            return;
        };
        let sent = match Envelope::ping(&ping, now_ms).and_then(|env| env.encode()) {
            Ok(frame) => self.transport.send_direct(peer_id, &frame),
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "failed to encode ping");
                false
            }
        };
        if !sent {
            metrics::incr(PROBE_SEND_FAILURES);
        }

        let timer = Timer::Probe {
            peer_id: peer_id.to_owned(),
            epoch,
        };
        match self.probe.record_send(peer_id, sent) {
            ProbeStep::Confirmed { next } => {
                if let Some(link) = self.peers.get_mut(peer_id) {
                    link.state = PeerState::Admitted;
                }
                metrics::incr(PEERS_ADMITTED);
                info!(peer = %peer_id, "peer admitted");
                if self.config.constraints.is_constrained() {
                    self.emit_admitted(peer_id);
                }
                if let Some(next) = next {
                    self.transport.schedule(timer, next);
                }
            }
            ProbeStep::Continue { next } => {
                if let Some(next) = next {
                    self.transport.schedule(timer, next);
                }
            }
            ProbeStep::Retry { after } => {
                debug!(peer = %peer_id, "probe send failed, retrying");
                self.transport.schedule(timer, after);
            }
            ProbeStep::Exhausted => self.end_peer(peer_id, EndReason::Unreachable),
        }
    }

    // ── Inbound frames ────────────────────────────────────────────────

    /// A frame arrived on the data channel from `peer_id`.
    pub fn handle_message(&mut self, peer_id: &str, raw: &str, now_ms: i64) {
        let started = Instant::now();
        if !self.is_live(peer_id) {
            trace!(peer = %peer_id, "frame from ended peer ignored");
            return;
        }
        let frame = match Envelope::decode(raw).and_then(Envelope::into_frame) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::incr(WIRE_MALFORMED);
                debug!(peer = %peer_id, error = %e, "malformed frame dropped");
                return;
            }
        };

        match frame {
            Frame::Ping(ping) => self.on_ping(peer_id, &ping, started, now_ms),
            Frame::Pong(pong) => self.on_pong(peer_id, &pong, now_ms),
            Frame::Connections(edges) => self.on_connections(peer_id, &edges),
            Frame::Propagate(forwarded) => self.on_propagate(peer_id, forwarded, now_ms),
            Frame::App(envelope) => self.on_app(peer_id, envelope, now_ms),
        }
    }

    fn on_ping(&mut self, peer_id: &str, ping: &Ping, started: Instant, now_ms: i64) {
        let pong = LatencyProbe::answer(ping, started, now_ms);
        match Envelope::pong(&pong, now_ms).and_then(|env| env.encode()) {
            Ok(frame) => {
                if !self.transport.send_direct(peer_id, &frame) {
                    debug!(peer = %peer_id, "pong not sent, channel closed");
                }
            }
            Err(e) => warn!(peer = %peer_id, error = %e, "failed to encode pong"),
        }
    }

    fn on_pong(&mut self, peer_id: &str, pong: &Pong, now_ms: i64) {
        let Some(weight) = self.probe.record_pong(peer_id, pong, now_ms) else {
            trace!(peer = %peer_id, "stale pong ignored");
            return;
        };
        let self_id = self.config.self_id.clone();
        let previous = self.graph.upsert_edge(&self_id, peer_id, weight);
        metrics::record_rtt(weight);
        debug!(peer = %peer_id, rtt_ms = weight, "latency measured");
        if self.config.share_adjacency && previous != Some(weight) {
            self.share_adjacency(now_ms);
        }
    }

    fn on_connections(&mut self, peer_id: &str, edges: &[ReportedEdge]) {
        let self_id = self.config.self_id.clone();
        let mut applied = 0usize;
        for edge in edges {
            if edge.id == self_id || edge.id == peer_id {
                continue;
            }
            if !edge.weight.is_finite() || edge.weight < 0.0 {
                debug!(peer = %peer_id, neighbor = %edge.id, "invalid reported weight dropped");
                continue;
            }
            self.graph.upsert_edge(peer_id, &edge.id, edge.weight);
            applied += 1;
        }
        trace!(peer = %peer_id, applied, "adjacency list merged");
    }

    fn on_propagate(&mut self, peer_id: &str, forwarded: Forwarded, now_ms: i64) {
        if wire::is_reserved(&forwarded.message.kind) || forwarded.from == self.config.self_id {
            metrics::incr(WIRE_MALFORMED);
            debug!(peer = %peer_id, id = %forwarded.message.id, "invalid propagate dropped");
            return;
        }
        let neighbors = self.admitted_peers();
        let transport = &mut self.transport;
        let delivered = self
            .gossip
            .receive(peer_id, forwarded, &neighbors, now_ms, |to, frame| {
                transport.send_direct(to, frame)
            });
        if let Some(forwarded) = delivered {
            let Forwarded {
                from,
                nick,
                message,
            } = forwarded;
            self.deliver(message.kind, message.payload, from, nick, true);
        }
    }

    fn on_app(&mut self, peer_id: &str, envelope: Envelope, now_ms: i64) {
        let nick = self.peers.get(peer_id).and_then(|link| link.nick.clone());
        if envelope.shout && self.config.constraints.is_constrained() {
            let neighbors = self.admitted_peers();
            let transport = &mut self.transport;
            let fresh = self.gossip.reshout(
                peer_id,
                nick.clone(),
                envelope.clone(),
                &neighbors,
                now_ms,
                |to, frame| transport.send_direct(to, frame),
            );
            if !fresh {
                trace!(peer = %peer_id, id = %envelope.id, "shout already seen");
                return;
            }
        }
        self.deliver(envelope.kind, envelope.payload, peer_id.to_owned(), nick, false);
    }

    fn deliver(&mut self, kind: String, payload: Value, from: String, nick: Option<String>, forwarded: bool) {
        metrics::incr(GOSSIP_DELIVERED);
        self.emit(MeshEvent::DataReceived {
            kind,
            payload,
            from,
            nick,
            forwarded,
        });
    }

    // ── Outbound application messages ─────────────────────────────────

    /// Flood a message to every participant reachable through the mesh.
    pub fn propagate_message(&mut self, kind: &str, payload: Value, now_ms: i64) -> Result<MessageId> {
        check_kind(kind)?;
        let id = MessageId::generate(now_ms);
        let forwarded = Forwarded {
            from: self.config.self_id.clone(),
            nick: self.config.nick.clone(),
            message: Envelope::new(kind, payload, id.clone()),
        };
        let neighbors = self.admitted_peers();
        let transport = &mut self.transport;
        let sent = self
            .gossip
            .originate(&forwarded, &neighbors, now_ms, |to, frame| {
                transport.send_direct(to, frame)
            });
        debug!(id = %id, sent, "message originated");
        Ok(id)
    }

    /// Send directly to every live peer, flagged for wide distribution.
    pub fn shout(&mut self, kind: &str, payload: Value, now_ms: i64) -> Result<MessageId> {
        check_kind(kind)?;
        let id = MessageId::generate(now_ms);
        let mut envelope = Envelope::new(kind, payload, id.clone());
        envelope.shout = true;
        let frame = envelope.encode()?;

        let constrained = self.config.constraints.is_constrained();
        if constrained {
            let self_id = self.config.self_id.clone();
            self.gossip.record_direct(&id, &self_id, now_ms);
        }
        for peer_id in self.live_peers() {
            if self.transport.send_direct(&peer_id, &frame) && constrained {
                self.gossip.record_direct(&id, &peer_id, now_ms);
            }
        }
        Ok(id)
    }

    /// Send directly to one peer.
    pub fn whisper(&mut self, peer_id: &str, kind: &str, payload: Value, now_ms: i64) -> Result<MessageId> {
        check_kind(kind)?;
        if !self.is_live(peer_id) {
            return Err(Error::UnknownPeer(peer_id.to_owned()));
        }
        let id = MessageId::generate(now_ms);
        let frame = Envelope::new(kind, payload, id.clone()).encode()?;
        if !self.transport.send_direct(peer_id, &frame) {
            return Err(Error::ChannelClosed(peer_id.to_owned()));
        }
        Ok(id)
    }

    /// Send our own adjacency list to every admitted peer.
    ///
    /// Only edges to live connections are reported; an edge measured before
    /// a peer went unreachable stays in the local graph but is not gossiped.
    pub fn share_adjacency(&mut self, now_ms: i64) -> usize {
        let edges: Vec<ReportedEdge> = self
            .graph
            .neighbor_latencies(&self.config.self_id)
            .into_iter()
            .filter(|(id, _)| self.is_live(id))
            .map(|(id, weight)| ReportedEdge { id, weight })
            .collect();
        let frame = match Envelope::connections(&edges, now_ms).and_then(|env| env.encode()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode adjacency list");
                return 0;
            }
        };
        let mut sent = 0;
        for peer_id in self.admitted_peers() {
            if self.transport.send_direct(&peer_id, &frame) {
                sent += 1;
            }
        }
        trace!(edges = edges.len(), sent, "adjacency shared");
        sent
    }

    fn emit_admitted(&mut self, peer_id: &str) {
        self.emit(MeshEvent::PeerAdmitted {
            peer_id: peer_id.to_owned(),
        });
    }

    fn emit(&self, event: MeshEvent) {
        if self.events.send(event).is_err() {
            trace!("mesh event dropped, receiver gone");
        }
    }
}

fn check_kind(kind: &str) -> Result<()> {
    if wire::is_reserved(kind) {
        return Err(Error::ReservedKind(kind.to_owned()));
    }
    Ok(())
}
