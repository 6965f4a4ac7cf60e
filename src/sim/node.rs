//! One simulated participant: a tokio task owning a mesh controller.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use liomesh_overlay::{
    MeshConfig, MeshController, MeshEvent, PeerState, Role, RoomMember, Timer, TopologySnapshot, Transport,
};

use super::network::NetCommand;

/// Inputs to a participant task, from the network or the driver.
#[derive(Debug)]
pub enum NodeInput {
    RoomJoined { members: Vec<RoomMember> },
    MemberJoined(RoomMember),
    MemberLeft { id: String },
    Offer { from: String, nick: Option<String> },
    /// Our offer was accepted.
    Answer { from: String },
    /// Our offer was refused.
    Rejected { from: String },
    ChannelClosed { from: String },
    Message { from: String, frame: String },
    /// Driver: flood an application message.
    Propagate { kind: String, payload: Value },
    /// Driver: leave the room.
    Leave,
    /// Driver: stop and report.
    Shutdown { reply: oneshot::Sender<NodeReport> },
}

/// An application message as seen by the receiver.
#[derive(Debug, Clone, Serialize)]
pub struct Received {
    pub kind: String,
    pub from: String,
    pub nick: Option<String>,
    pub forwarded: bool,
    pub payload: Value,
}

/// Final state of one participant.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub id: String,
    pub live_peers: Vec<String>,
    pub neighbor_latencies: BTreeMap<String, f64>,
    pub originated: Vec<String>,
    pub received: Vec<Received>,
    pub graph: TopologySnapshot,
}

/// Transport backed by the simulated network.
///
/// A channel counts as open from our answer (responder) or from the
/// answer's arrival (initiator) until either side hangs up.
pub struct SimTransport {
    id: String,
    nick: Option<String>,
    net: mpsc::UnboundedSender<NetCommand>,
    open: HashSet<String>,
    timers: BTreeMap<(Instant, u64), Timer>,
    next_seq: u64,
}

impl SimTransport {
    fn new(id: String, nick: Option<String>, net: mpsc::UnboundedSender<NetCommand>) -> Self {
        Self {
            id,
            nick,
            net,
            open: HashSet::new(),
            timers: BTreeMap::new(),
            next_seq: 0,
        }
    }

    fn command(&self, cmd: NetCommand) {
        if self.net.send(cmd).is_err() {
            debug!(peer = %self.id, "network gone, command dropped");
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.keys().next().map(|(at, _)| *at)
    }

    fn take_due(&mut self, now: Instant) -> Vec<Timer> {
        let mut due = Vec::new();
        while let Some(entry) = self.timers.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }
}

impl Transport for SimTransport {
    fn open(&mut self, peer_id: &str, role: Role) {
        // Responders answer once the controller has accepted the offer.
        if role == Role::Initiator {
            self.command(NetCommand::Offer {
                from: self.id.clone(),
                to: peer_id.to_owned(),
                nick: self.nick.clone(),
            });
        }
    }

    fn send_direct(&mut self, peer_id: &str, frame: &str) -> bool {
        if !self.open.contains(peer_id) {
            return false;
        }
        self.command(NetCommand::Deliver {
            from: self.id.clone(),
            to: peer_id.to_owned(),
            frame: frame.to_owned(),
        });
        true
    }

    fn end(&mut self, peer_id: &str, emit_removal: bool) {
        self.open.remove(peer_id);
        debug!(peer = %self.id, remote = %peer_id, emit_removal, "hanging up");
        self.command(NetCommand::Hangup {
            from: self.id.clone(),
            to: peer_id.to_owned(),
        });
    }

    fn schedule(&mut self, timer: Timer, delay: Duration) {
        let at = Instant::now() + delay;
        self.timers.insert((at, self.next_seq), timer);
        self.next_seq += 1;
    }
}

/// Handle to a spawned participant.
pub struct NodeHandle {
    pub id: String,
    pub inputs: mpsc::UnboundedSender<NodeInput>,
    pub task: tokio::task::JoinHandle<()>,
}

/// Spawn a participant. `clock` is the shared origin for millisecond
/// timestamps.
pub fn spawn(config: MeshConfig, net: mpsc::UnboundedSender<NetCommand>, clock: Instant) -> NodeHandle {
    let id = config.self_id.clone();
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let transport = SimTransport::new(id.clone(), config.nick.clone(), net);
    let node = Node {
        mesh: MeshController::new(config, transport, event_tx),
        inputs: input_rx,
        events: event_rx,
        clock,
        originated: Vec::new(),
        received: Vec::new(),
    };
    NodeHandle {
        id,
        inputs: input_tx,
        task: tokio::spawn(node.run()),
    }
}

struct Node {
    mesh: MeshController<SimTransport>,
    inputs: mpsc::UnboundedReceiver<NodeInput>,
    events: mpsc::UnboundedReceiver<MeshEvent>,
    clock: Instant,
    originated: Vec<String>,
    received: Vec<Received>,
}

impl Node {
    fn now_ms(&self) -> i64 {
        self.clock.elapsed().as_millis() as i64
    }

    async fn run(mut self) {
        loop {
            let deadline = self.mesh.transport().next_deadline();
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => self.on_event(event),
                input = self.inputs.recv() => match input {
                    Some(NodeInput::Shutdown { reply }) => {
                        self.drain_events();
                        let _ = reply.send(self.report());
                        break;
                    }
                    Some(input) => self.apply(input),
                    None => break,
                },
                _ = wait_until(deadline) => self.fire_timers(),
            }
        }
        debug!(peer = %self.mesh.self_id(), "participant stopped");
    }

    fn apply(&mut self, input: NodeInput) {
        let now = self.now_ms();
        match input {
            NodeInput::RoomJoined { members } => self.mesh.handle_room_joined(members, now),
            NodeInput::MemberJoined(member) => self.mesh.handle_member_joined(member),
            NodeInput::MemberLeft { id } => self.mesh.handle_member_left(&id, now),
            NodeInput::Offer { from, nick } => self.on_offer(from, nick, now),
            NodeInput::Answer { from } => {
                if matches!(
                    self.mesh.peer_state(&from),
                    Some(PeerState::Probing | PeerState::Admitted)
                ) {
                    self.mesh.transport_mut().open.insert(from.clone());
                    self.mesh.handle_channel_open(&from);
                } else {
                    // We gave up on this peer while the answer was in flight.
                    let transport = self.mesh.transport_mut();
                    transport.open.remove(&from);
                    transport.end(&from, true);
                }
            }
            NodeInput::Rejected { from } => {
                self.mesh.transport_mut().open.remove(&from);
                self.mesh.handle_offer_rejected(&from);
            }
            NodeInput::ChannelClosed { from } => {
                self.mesh.transport_mut().open.remove(&from);
                self.mesh.handle_channel_close(&from, now);
            }
            NodeInput::Message { from, frame } => self.mesh.handle_message(&from, &frame, now),
            NodeInput::Propagate { kind, payload } => {
                match self.mesh.propagate_message(&kind, payload, now) {
                    Ok(id) => {
                        info!(peer = %self.mesh.self_id(), id = %id, "message originated");
                        self.originated.push(id.to_string());
                    }
                    Err(e) => warn!(peer = %self.mesh.self_id(), error = %e, "propagate failed"),
                }
            }
            NodeInput::Leave => {
                let id = self.mesh.self_id().to_owned();
                self.mesh.leave_room();
                self.mesh.transport().command(NetCommand::Leave { id });
            }
            NodeInput::Shutdown { .. } => {}
        }
    }

    fn on_offer(&mut self, from: String, nick: Option<String>, now: i64) {
        let me = self.mesh.self_id().to_owned();
        if self.mesh.handle_offer(&from, nick, now) {
            self.mesh.transport_mut().open.insert(from.clone());
            self.mesh.handle_channel_open(&from);
            self.mesh.transport().command(NetCommand::Answer { from: me, to: from });
        } else {
            self.mesh.transport().command(NetCommand::Reject { from: me, to: from });
        }
    }

    fn fire_timers(&mut self) {
        let now = self.now_ms();
        let due = self.mesh.transport_mut().take_due(Instant::now());
        for timer in due {
            self.mesh.handle_timer(timer, now);
        }
    }

    fn on_event(&mut self, event: MeshEvent) {
        let me = self.mesh.self_id().to_owned();
        match event {
            MeshEvent::PeerAdmitted { peer_id } => {
                debug!(peer = %me, remote = %peer_id, "admitted");
            }
            MeshEvent::PeerEnded { peer_id } => {
                debug!(peer = %me, remote = %peer_id, "ended");
            }
            MeshEvent::DataReceived {
                kind,
                payload,
                from,
                nick,
                forwarded,
            } => {
                info!(peer = %me, from = %from, kind = %kind, forwarded, "data received");
                self.received.push(Received {
                    kind,
                    from,
                    nick,
                    forwarded,
                    payload,
                });
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.on_event(event);
        }
    }

    fn report(&self) -> NodeReport {
        let me = self.mesh.self_id();
        NodeReport {
            id: me.to_owned(),
            live_peers: self.mesh.live_peers(),
            neighbor_latencies: self.mesh.neighbor_latencies(me),
            originated: self.originated.clone(),
            received: self.received.clone(),
            graph: self.mesh.graph().snapshot(),
        }
    }
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
