//! Simulated network and rendezvous.
//!
//! One actor task owns the room roster, the set of open links and a queue
//! of in-flight deliveries. Every delivery between two participants is
//! delayed by that link's latency, drawn once per link from the configured
//! range. Deliveries due at the same instant leave in submission order, so
//! each link is FIFO.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

use liomesh_overlay::{EdgeKey, RoomMember};

use super::node::NodeInput;

/// Requests from participants to the network.
#[derive(Debug)]
pub enum NetCommand {
    /// Enter the room. The joiner gets the roster, everyone else a
    /// member-joined notice.
    Join {
        id: String,
        inputs: mpsc::UnboundedSender<NodeInput>,
    },
    /// Leave the room and drop every link touching `id`.
    Leave { id: String },
    Offer {
        from: String,
        to: String,
        nick: Option<String>,
    },
    /// `from` accepted an offer from `to`; the link is now open.
    Answer { from: String, to: String },
    Reject { from: String, to: String },
    Deliver {
        from: String,
        to: String,
        frame: String,
    },
    Hangup { from: String, to: String },
}

struct Network {
    commands: mpsc::UnboundedReceiver<NetCommand>,
    /// Current room members in join order.
    members: Vec<String>,
    /// Every participant that ever joined, including those that left.
    inboxes: HashMap<String, mpsc::UnboundedSender<NodeInput>>,
    links: HashSet<EdgeKey>,
    latencies: HashMap<EdgeKey, Duration>,
    latency_range: (Duration, Duration),
    in_flight: BTreeMap<(Instant, u64), (String, NodeInput)>,
    next_seq: u64,
}

/// Spawn the network actor. It runs until every command sender is dropped.
pub fn spawn(
    min_latency: Duration,
    max_latency: Duration,
) -> (mpsc::UnboundedSender<NetCommand>, tokio::task::JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let network = Network {
        commands: cmd_rx,
        members: Vec::new(),
        inboxes: HashMap::new(),
        links: HashSet::new(),
        latencies: HashMap::new(),
        latency_range: (min_latency, max_latency.max(min_latency)),
        in_flight: BTreeMap::new(),
        next_seq: 0,
    };
    (cmd_tx, tokio::spawn(network.run()))
}

impl Network {
    async fn run(mut self) {
        loop {
            let next = self.in_flight.keys().next().map(|(at, _)| *at);
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.apply(cmd),
                    None => break,
                },
                _ = wait_until(next) => self.flush_due(),
            }
        }
        debug!(pending = self.in_flight.len(), "network stopped");
    }

    fn apply(&mut self, cmd: NetCommand) {
        match cmd {
            NetCommand::Join { id, inputs } => self.join(id, inputs),
            NetCommand::Leave { id } => self.leave(&id),
            NetCommand::Offer { from, to, nick } => {
                if !self.is_member(&to) {
                    trace!(from = %from, to = %to, "offer to absent member dropped");
                    return;
                }
                let delay = self.latency(&from, &to);
                self.enqueue(delay, to, NodeInput::Offer { from, nick });
            }
            NetCommand::Answer { from, to } => {
                let key = EdgeKey::new(&from, &to);
                let delay = self.latency(&from, &to);
                self.links.insert(key);
                self.enqueue(delay, to, NodeInput::Answer { from });
            }
            NetCommand::Reject { from, to } => {
                let delay = self.latency(&from, &to);
                self.enqueue(delay, to, NodeInput::Rejected { from });
            }
            NetCommand::Deliver { from, to, frame } => {
                if !self.links.contains(&EdgeKey::new(&from, &to)) {
                    trace!(from = %from, to = %to, "frame on closed link dropped");
                    return;
                }
                let delay = self.latency(&from, &to);
                self.enqueue(delay, to, NodeInput::Message { from, frame });
            }
            NetCommand::Hangup { from, to } => {
                if self.links.remove(&EdgeKey::new(&from, &to)) {
                    let delay = self.latency(&from, &to);
                    self.enqueue(delay, to, NodeInput::ChannelClosed { from });
                }
            }
        }
    }

    fn join(&mut self, id: String, inputs: mpsc::UnboundedSender<NodeInput>) {
        self.members.retain(|member| *member != id);
        self.members.push(id.clone());
        self.inboxes.insert(id.clone(), inputs);
        let roster: Vec<RoomMember> = self
            .members
            .iter()
            .map(|member| RoomMember::data(member.as_str()))
            .collect();
        info!(peer = %id, members = roster.len(), "member joined room");

        let signaling = self.latency_range.0;
        let others: Vec<String> = self
            .members
            .iter()
            .filter(|member| **member != id)
            .cloned()
            .collect();
        for other in others {
            self.enqueue(
                signaling,
                other,
                NodeInput::MemberJoined(RoomMember::data(id.as_str())),
            );
        }
        self.enqueue(signaling, id, NodeInput::RoomJoined { members: roster });
    }

    fn leave(&mut self, id: &str) {
        self.members.retain(|member| member != id);
        info!(peer = %id, members = self.members.len(), "member left room");

        let dropped: Vec<EdgeKey> = self
            .links
            .iter()
            .filter(|key| {
                let (a, b) = key.endpoints();
                a == id || b == id
            })
            .cloned()
            .collect();
        for key in dropped {
            self.links.remove(&key);
            let (a, b) = key.endpoints();
            let other = if a == id { b } else { a }.to_owned();
            let delay = self.latency(id, &other);
            self.enqueue(delay, other, NodeInput::ChannelClosed { from: id.to_owned() });
        }

        let signaling = self.latency_range.0;
        let others = self.members.clone();
        for other in others {
            self.enqueue(signaling, other, NodeInput::MemberLeft { id: id.to_owned() });
        }
    }

    fn is_member(&self, id: &str) -> bool {
        self.members.iter().any(|member| member == id)
    }

    /// Latency of the link between `a` and `b`, fixed at first use.
    fn latency(&mut self, a: &str, b: &str) -> Duration {
        let (min, max) = self.latency_range;
        *self
            .latencies
            .entry(EdgeKey::new(a, b))
            .or_insert_with(|| {
                let ms = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
                Duration::from_millis(ms as u64)
            })
    }

    fn enqueue(&mut self, delay: Duration, to: String, input: NodeInput) {
        let at = Instant::now() + delay;
        self.in_flight.insert((at, self.next_seq), (to, input));
        self.next_seq += 1;
    }

    fn flush_due(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.in_flight.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let (to, input) = entry.remove();
            let Some(inputs) = self.inboxes.get(&to) else {
                trace!(to = %to, "delivery to unknown participant dropped");
                continue;
            };
            if inputs.send(input).is_err() {
                trace!(to = %to, "participant stopped, delivery dropped");
            }
        }
    }
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
