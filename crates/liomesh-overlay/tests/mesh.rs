/// Integration tests for the mesh controller.
///
/// Single-participant tests drive one controller through a recording
/// transport. Multi-participant tests wire several controllers to a shared
/// in-memory frame queue and pump it until quiet.
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;

use liomesh_overlay::{
    Error, MeshConfig, MeshController, MeshEvent, PeerState, Role, RoomMember, Timer, Transport,
};

// ---------------------------------------------------------------------------
// Recording transport
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RecordingTransport {
    opened: Vec<(String, Role)>,
    sent: Vec<(String, String)>,
    ended: Vec<(String, bool)>,
    timers: Vec<(Timer, Duration)>,
    /// Peers whose channel refuses sends.
    closed: HashSet<String>,
}

impl RecordingTransport {
    fn take_timers(&mut self) -> Vec<Timer> {
        self.timers.drain(..).map(|(t, _)| t).collect()
    }

    fn timers_for(&self, peer: &str) -> usize {
        self.timers
            .iter()
            .filter(|(Timer::Probe { peer_id, .. }, _)| peer_id == peer)
            .count()
    }

    fn frames_of_type(&self, kind: &str) -> Vec<(String, serde_json::Value)> {
        self.sent
            .iter()
            .filter_map(|(to, raw)| {
                let v: serde_json::Value = serde_json::from_str(raw).ok()?;
                (v["type"] == kind).then(|| (to.clone(), v))
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn open(&mut self, peer_id: &str, role: Role) {
        self.opened.push((peer_id.to_owned(), role));
    }

    fn send_direct(&mut self, peer_id: &str, frame: &str) -> bool {
        if self.closed.contains(peer_id) {
            return false;
        }
        self.sent.push((peer_id.to_owned(), frame.to_owned()));
        true
    }

    fn end(&mut self, peer_id: &str, emit_removal: bool) {
        self.ended.push((peer_id.to_owned(), emit_removal));
    }

    fn schedule(&mut self, timer: Timer, delay: Duration) {
        self.timers.push((timer, delay));
    }
}

type Controller = MeshController<RecordingTransport>;

fn make_controller(config: MeshConfig) -> (Controller, mpsc::UnboundedReceiver<MeshEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MeshController::new(config, RecordingTransport::default(), tx), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<MeshEvent>) -> Vec<MeshEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

fn fire_timers(c: &mut Controller, now_ms: i64) {
    for timer in c.transport_mut().take_timers() {
        c.handle_timer(timer, now_ms);
    }
}

fn pong(sent_at: i64) -> String {
    format!(r#"{{"type":"pong","payload":{{"sentAt":{sent_at},"now":0,"delay":0}},"_id":"pong{sent_at}"}}"#)
}

/// Admit `peer` through an offer and give it a measured latency.
fn admit_with_latency(c: &mut Controller, peer: &str, latency_ms: i64, sent_at: i64) {
    assert!(c.handle_offer(peer, None, sent_at));
    let timers: Vec<Timer> = c
        .transport_mut()
        .take_timers()
        .into_iter()
        .filter(|Timer::Probe { peer_id, .. }| peer_id == peer)
        .collect();
    for t in timers {
        c.handle_timer(t, sent_at);
    }
    c.handle_message(peer, &pong(sent_at), sent_at + latency_ms);
}

// ---------------------------------------------------------------------------
// Admission control
// ---------------------------------------------------------------------------

#[test]
fn admission_rejects_offer_beyond_max_peers() {
    let (mut a, mut rx) = make_controller(MeshConfig::new("a").with_constraints(2, 1));

    assert!(a.handle_offer("b", None, 0));
    assert!(a.handle_offer("c", None, 0));
    assert!(!a.handle_offer("d", None, 0));

    fire_timers(&mut a, 1_000);

    assert_eq!(a.peer_state("b"), Some(PeerState::Admitted));
    assert_eq!(a.peer_state("c"), Some(PeerState::Admitted));
    assert_eq!(a.peer_state("d"), None);
    assert_eq!(a.live_peer_count(), 2);
    assert_eq!(a.transport().opened.len(), 2);

    let admitted: Vec<MeshEvent> = drain(&mut rx);
    assert_eq!(
        admitted,
        vec![
            MeshEvent::PeerAdmitted { peer_id: "b".into() },
            MeshEvent::PeerAdmitted { peer_id: "c".into() },
        ]
    );
}

#[test]
fn unconstrained_mesh_admits_immediately() {
    let (mut a, mut rx) = make_controller(MeshConfig::new("a"));
    assert!(a.handle_offer("b", Some("bob".into()), 0));
    assert_eq!(
        drain(&mut rx),
        vec![MeshEvent::PeerAdmitted { peer_id: "b".into() }]
    );
    assert_eq!(a.peer_state("b"), Some(PeerState::Probing));
    assert_eq!(a.peer_by_nick("bob"), Some("b"));

    // First probe flips state but does not announce twice.
    fire_timers(&mut a, 1_000);
    assert_eq!(a.peer_state("b"), Some(PeerState::Admitted));
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn self_offer_and_unreachable_connect_refused() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a"));
    assert!(!a.handle_offer("a", None, 0));
    assert!(!a.connect("a", 0));
    assert!(a.is_unreachable("a"));
}

// ---------------------------------------------------------------------------
// Latency probe
// ---------------------------------------------------------------------------

#[test]
fn exhausted_probe_marks_unreachable_without_removal() {
    let (mut a, mut rx) = make_controller(MeshConfig::new("a").with_constraints(4, 2));
    for m in roster(&["b", "c", "d"]) {
        a.handle_member_joined(m);
    }
    a.transport_mut().closed.insert("b".into());
    assert!(a.handle_offer("b", None, 0));
    let opened = a.transport().opened.len();

    for attempt in 0..3 {
        assert_eq!(a.transport().timers_for("b"), 1, "attempt {attempt}");
        fire_timers(&mut a, 1_000 * (attempt + 1));
    }

    assert_eq!(a.peer_state("b"), Some(PeerState::Ended));
    assert!(a.is_unreachable("b"));
    assert_eq!(a.transport().timers_for("b"), 0);
    assert_eq!(a.transport().ended, vec![("b".to_owned(), false)]);
    assert!(drain(&mut rx).is_empty());
    // Below the floor with c and d available, but no replacement is sought.
    assert_eq!(a.transport().opened.len(), opened);

    // Never retried.
    assert!(!a.connect("b", 10_000));
}

#[test]
fn probe_retries_until_channel_opens() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a").with_constraints(4, 2));
    a.transport_mut().closed.insert("b".into());
    a.handle_offer("b", None, 0);

    fire_timers(&mut a, 1_000);
    fire_timers(&mut a, 2_000);
    assert_eq!(a.peer_state("b"), Some(PeerState::Probing));

    a.transport_mut().closed.clear();
    a.handle_channel_open("b");
    fire_timers(&mut a, 3_000);
    assert_eq!(a.peer_state("b"), Some(PeerState::Admitted));
    assert!(a.peer_info("b").unwrap().channel_open);
}

#[test]
fn stale_timer_after_hangup_is_ignored() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a"));
    a.handle_offer("b", None, 0);
    let timers = a.transport_mut().take_timers();
    assert!(a.hang_up("b"));

    for t in timers {
        a.handle_timer(t, 1_000);
    }
    assert!(a.transport().frames_of_type("ping").is_empty());
    assert_eq!(a.transport().ended, vec![("b".to_owned(), true)]);
}

#[test]
fn timer_from_previous_connection_is_ignored() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a"));
    a.handle_offer("b", None, 0);
    let old = a.transport_mut().take_timers();
    a.handle_channel_close("b", 500);
    a.handle_offer("b", None, 600);
    let fresh = a.transport_mut().take_timers();

    for t in old {
        a.handle_timer(t, 1_000);
    }
    assert!(a.transport().frames_of_type("ping").is_empty());
    for t in fresh {
        a.handle_timer(t, 1_600);
    }
    assert_eq!(a.transport().frames_of_type("ping").len(), 1);
}

#[test]
fn ping_is_answered_with_pong() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a"));
    a.handle_offer("b", None, 0);
    a.handle_message(
        "b",
        r#"{"type":"ping","payload":{"sentAt":123},"_id":"x"}"#,
        200,
    );
    let pongs = a.transport().frames_of_type("pong");
    assert_eq!(pongs.len(), 1);
    assert_eq!(pongs[0].0, "b");
    assert_eq!(pongs[0].1["payload"]["sentAt"], 123);
    assert_eq!(pongs[0].1["payload"]["now"], 200);
}

// ---------------------------------------------------------------------------
// Graph population
// ---------------------------------------------------------------------------

#[test]
fn probe_and_adjacency_gossip_populate_graph() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a"));
    admit_with_latency(&mut a, "b", 40, 1_000);

    assert_eq!(a.graph().find_edge("a", "b").unwrap().weight, 40.0);
    assert_eq!(a.graph().find_edge("b", "a").unwrap().weight, 40.0);

    a.handle_message(
        "b",
        r#"{"type":"connections","payload":[{"id":"c","weight":10},{"id":"a","weight":99}],"_id":"k"}"#,
        1_100,
    );
    assert_eq!(a.graph().find_edge("b", "c").unwrap().weight, 10.0);
    assert!(!a.graph().is_neighbor("a", "c"));
    // Our own measurement wins over the reported one.
    assert_eq!(a.graph().find_edge("a", "b").unwrap().weight, 40.0);
    assert_eq!(a.neighbor_latencies("b").len(), 2);
}

#[test]
fn weight_update_shares_adjacency() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a"));
    admit_with_latency(&mut a, "b", 40, 1_000);
    let lists = a.transport().frames_of_type("connections");
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].1["payload"], json!([{"id": "b", "weight": 40.0}]));
}

#[test]
fn edge_removed_when_peer_ends() {
    let (mut a, mut rx) = make_controller(MeshConfig::new("a"));
    admit_with_latency(&mut a, "b", 40, 1_000);
    drain(&mut rx);

    a.handle_channel_close("b", 2_000);
    assert!(a.graph().find_edge("a", "b").is_none());
    assert!(a.graph().contains_node("b"));
    assert_eq!(
        drain(&mut rx),
        vec![MeshEvent::PeerEnded { peer_id: "b".into() }]
    );
}

#[test]
fn unreachable_neighbor_is_not_reported_in_adjacency() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a"));
    admit_with_latency(&mut a, "b", 40, 1_000);

    // Heartbeats to b start failing.
    a.transport_mut().closed.insert("b".into());
    for t in 1..=3 {
        fire_timers(&mut a, 1_040 + t * 5_000);
    }
    assert!(a.is_unreachable("b"));

    admit_with_latency(&mut a, "c", 30, 20_000);
    let lists = a.transport().frames_of_type("connections");
    let (to, last) = lists.last().unwrap();
    assert_eq!(to, "c");
    assert_eq!(last["payload"], json!([{"id": "c", "weight": 30.0}]));
}

#[test]
fn malformed_frames_dropped_silently() {
    let (mut a, mut rx) = make_controller(MeshConfig::new("a"));
    a.handle_offer("b", None, 0);
    drain(&mut rx);
    a.handle_message("b", "{not json", 10);
    a.handle_message("b", r#"{"type":"pong","payload":"x","_id":"1"}"#, 10);
    a.handle_message(
        "b",
        r#"{"type":"connections","payload":[{"id":"c","weight":-5}],"_id":"2"}"#,
        10,
    );
    assert!(drain(&mut rx).is_empty());
    assert!(!a.graph().contains_node("c"));
}

// ---------------------------------------------------------------------------
// Room roster and self-healing
// ---------------------------------------------------------------------------

fn roster(ids: &[&str]) -> Vec<RoomMember> {
    ids.iter().map(|id| RoomMember::data(*id)).collect()
}

#[test]
fn join_connects_in_reverse_order_until_min_peers() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a").with_constraints(3, 2));
    a.handle_room_joined(roster(&["a", "b", "c", "d", "e"]), 0);
    let opened: Vec<&str> = a.transport().opened.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(opened, vec!["e", "d"]);
    assert!(a
        .transport()
        .opened
        .iter()
        .all(|(_, role)| *role == Role::Initiator));
}

#[test]
fn unconstrained_join_connects_everyone() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a"));
    a.handle_room_joined(roster(&["b", "a", "c", "d"]), 0);
    let opened: Vec<&str> = a.transport().opened.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(opened, vec!["d", "c", "b"]);
}

#[test]
fn join_skips_members_without_capabilities() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a"));
    let mut members = roster(&["b", "c"]);
    members[1].capabilities.insert("data".into(), false);
    a.handle_room_joined(members, 0);
    let opened: Vec<&str> = a.transport().opened.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(opened, vec!["b"]);
}

#[test]
fn channel_close_below_floor_heals_once() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a").with_constraints(4, 2));
    for m in roster(&["b", "c", "d", "x"]) {
        a.handle_member_joined(m);
    }

    // x never gets a working channel.
    a.transport_mut().closed.insert("x".into());
    a.handle_offer("x", None, 0);
    for t in 1..=3 {
        fire_timers(&mut a, t * 1_000);
    }
    assert!(a.is_unreachable("x"));

    admit_with_latency(&mut a, "b", 20, 5_000);
    admit_with_latency(&mut a, "c", 30, 5_000);
    assert_eq!(a.graph().degree("a"), 2);

    let before = a.transport().opened.len();
    a.handle_channel_close("b", 6_000);
    let opened = &a.transport().opened[before..];
    assert_eq!(opened.len(), 1);
    let (pick, role) = &opened[0];
    assert_eq!(*role, Role::Initiator);
    // roster − self − neighbors − unreachable
    assert!(["b", "d"].contains(&pick.as_str()), "picked {pick}");
}

#[test]
fn rejected_offer_is_dropped_without_removal_or_retry() {
    let (mut a, mut rx) = make_controller(MeshConfig::new("a").with_constraints(4, 2));
    for m in roster(&["b", "c", "d", "e"]) {
        a.handle_member_joined(m);
    }
    admit_with_latency(&mut a, "b", 20, 1_000);
    admit_with_latency(&mut a, "c", 30, 1_000);
    drain(&mut rx);

    let before = a.transport().opened.len();
    a.handle_channel_close("c", 2_000);
    assert_eq!(a.transport().opened.len(), before + 1);
    let rejecter = a.transport().opened[before].0.clone();
    drain(&mut rx);

    a.handle_offer_rejected(&rejecter);
    assert_eq!(a.peer_state(&rejecter), None);
    assert_eq!(a.transport().opened.len(), before + 1);
    assert!(a.transport().ended.is_empty());
    assert!(drain(&mut rx).is_empty());
    assert!(!a.is_unreachable(&rejecter));

    // The next repair looks elsewhere.
    a.handle_channel_close("b", 3_000);
    let opened = &a.transport().opened[before + 1..];
    assert_eq!(opened.len(), 1);
    assert_ne!(opened[0].0, rejecter);
}

#[test]
fn rejection_for_accepted_link_is_ignored() {
    let (mut a, mut rx) = make_controller(MeshConfig::new("a").with_constraints(4, 2));
    assert!(a.handle_offer("b", None, 0));
    drain(&mut rx);
    a.handle_offer_rejected("b");
    assert_eq!(a.peer_state("b"), Some(PeerState::Probing));
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn member_left_removes_from_roster_and_heals_elsewhere() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a").with_constraints(4, 2));
    for m in roster(&["b", "c", "d"]) {
        a.handle_member_joined(m);
    }
    admit_with_latency(&mut a, "b", 20, 1_000);
    admit_with_latency(&mut a, "c", 30, 1_000);

    let before = a.transport().opened.len();
    a.handle_member_left("b", 2_000);
    assert!(a.roster().iter().all(|m| m.id != "b"));
    let opened: Vec<&str> = a.transport().opened[before..]
        .iter()
        .map(|(id, _)| id.as_str())
        .collect();
    assert_eq!(opened, vec!["d"]);
}

#[test]
fn no_heal_when_floor_still_met() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a").with_constraints(4, 1));
    for m in roster(&["b", "c", "d"]) {
        a.handle_member_joined(m);
    }
    admit_with_latency(&mut a, "b", 20, 1_000);
    admit_with_latency(&mut a, "c", 30, 1_000);
    let before = a.transport().opened.len();
    a.handle_channel_close("b", 2_000);
    assert_eq!(a.transport().opened.len(), before);
}

#[test]
fn leave_room_ends_everyone() {
    let (mut a, mut rx) = make_controller(MeshConfig::new("a"));
    a.handle_room_joined(roster(&["b", "c"]), 0);
    drain(&mut rx);
    a.leave_room();
    assert_eq!(a.live_peer_count(), 0);
    assert!(a.roster().is_empty());
    let ended: Vec<MeshEvent> = drain(&mut rx);
    assert_eq!(ended.len(), 2);
    assert!(ended
        .iter()
        .all(|e| matches!(e, MeshEvent::PeerEnded { .. })));
}

// ---------------------------------------------------------------------------
// Trimming
// ---------------------------------------------------------------------------

#[test]
fn droppable_peer_is_the_slow_outlier_not_the_fast_one() {
    let (mut a, mut rx) = make_controller(MeshConfig::new("a").with_constraints(6, 2));
    for (peer, ms) in [("fast", 1), ("p1", 50), ("p2", 52), ("p3", 49), ("slow", 120)] {
        admit_with_latency(&mut a, peer, ms, 1_000);
    }
    assert_eq!(a.droppable_peer().as_deref(), Some("slow"));
    drain(&mut rx);

    assert_eq!(a.trim().as_deref(), Some("slow"));
    assert_eq!(a.peer_state("slow"), Some(PeerState::Ended));
    assert_eq!(a.peer_state("fast"), Some(PeerState::Admitted));
    assert_eq!(
        drain(&mut rx),
        vec![MeshEvent::PeerEnded { peer_id: "slow".into() }]
    );
}

#[test]
fn trim_respects_min_peers() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a").with_constraints(4, 3));
    for (peer, ms) in [("p1", 10), ("p2", 10), ("p3", 100)] {
        admit_with_latency(&mut a, peer, ms, 1_000);
    }
    assert_eq!(a.droppable_peer().as_deref(), Some("p3"));
    assert_eq!(a.trim(), None);
}

#[test]
fn self_optimize_makes_room_for_new_offer() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a").with_constraints(3, 1));
    for (peer, ms) in [("p1", 10), ("p2", 10), ("p3", 100)] {
        admit_with_latency(&mut a, peer, ms, 1_000);
    }
    assert!(a.handle_offer("d", None, 2_000));
    assert_eq!(a.peer_state("p3"), Some(PeerState::Ended));
    assert_eq!(a.live_peer_count(), 3);

    let mut cfg = MeshConfig::new("z").with_constraints(3, 1);
    cfg.self_optimize = false;
    let (mut z, _rx) = make_controller(cfg);
    for (peer, ms) in [("p1", 10), ("p2", 10), ("p3", 100)] {
        admit_with_latency(&mut z, peer, ms, 1_000);
    }
    assert!(!z.handle_offer("d", None, 2_000));
}

// ---------------------------------------------------------------------------
// Direct messaging
// ---------------------------------------------------------------------------

#[test]
fn whisper_errors() {
    let (mut a, _rx) = make_controller(MeshConfig::new("a"));
    assert!(matches!(
        a.whisper("nobody", "chat", json!(1), 0),
        Err(Error::UnknownPeer(_))
    ));
    a.handle_offer("b", None, 0);
    assert!(matches!(
        a.whisper("b", "ping", json!(1), 0),
        Err(Error::ReservedKind(_))
    ));
    a.transport_mut().closed.insert("b".into());
    assert!(matches!(
        a.whisper("b", "chat", json!(1), 0),
        Err(Error::ChannelClosed(_))
    ));
    a.transport_mut().closed.clear();
    assert!(a.whisper("b", "chat", json!("hi"), 0).is_ok());
    assert_eq!(a.transport().frames_of_type("chat").len(), 1);
}

#[test]
fn direct_message_delivered_with_nick() {
    let (mut a, mut rx) = make_controller(MeshConfig::new("a"));
    a.handle_offer("b", Some("bob".into()), 0);
    drain(&mut rx);
    a.handle_message("b", r#"{"type":"chat","payload":"yo","_id":"1"}"#, 5);
    assert_eq!(
        drain(&mut rx),
        vec![MeshEvent::DataReceived {
            kind: "chat".into(),
            payload: json!("yo"),
            from: "b".into(),
            nick: Some("bob".into()),
            forwarded: false,
        }]
    );
}

// ---------------------------------------------------------------------------
// Multi-participant flood
// ---------------------------------------------------------------------------

type Wire = Rc<RefCell<VecDeque<(String, String, String)>>>;

struct WireTransport {
    id: String,
    wire: Wire,
    timers: Vec<Timer>,
}

impl Transport for WireTransport {
    fn open(&mut self, _peer_id: &str, _role: Role) {}

    fn send_direct(&mut self, peer_id: &str, frame: &str) -> bool {
        self.wire
            .borrow_mut()
            .push_back((self.id.clone(), peer_id.to_owned(), frame.to_owned()));
        true
    }

    fn end(&mut self, _peer_id: &str, _emit_removal: bool) {}

    fn schedule(&mut self, timer: Timer, _delay: Duration) {
        self.timers.push(timer);
    }
}

struct Cluster {
    wire: Wire,
    nodes: Vec<MeshController<WireTransport>>,
    events: Vec<mpsc::UnboundedReceiver<MeshEvent>>,
    propagate_frames: usize,
}

impl Cluster {
    fn new(n: usize, edges: &[(usize, usize)], config: impl Fn(&str) -> MeshConfig) -> Self {
        let wire: Wire = Rc::new(RefCell::new(VecDeque::new()));
        let mut nodes = Vec::new();
        let mut events = Vec::new();
        for i in 0..n {
            let id = format!("n{i}");
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = WireTransport {
                id: id.clone(),
                wire: wire.clone(),
                timers: Vec::new(),
            };
            nodes.push(MeshController::new(config(&id), transport, tx));
            events.push(rx);
        }
        let mut cluster = Self {
            wire,
            nodes,
            events,
            propagate_frames: 0,
        };
        for &(a, b) in edges {
            let (ia, ib) = (format!("n{a}"), format!("n{b}"));
            cluster.nodes[a].handle_offer(&ib, None, 0);
            cluster.nodes[b].handle_offer(&ia, None, 0);
        }
        for node in &mut cluster.nodes {
            let timers: Vec<Timer> = node.transport_mut().timers.drain(..).collect();
            for t in timers {
                node.handle_timer(t, 1_000);
            }
        }
        cluster.pump(1_010);
        for rx in &mut cluster.events {
            drain(rx);
        }
        cluster
    }

    fn index(id: &str) -> usize {
        id.trim_start_matches('n').parse().unwrap()
    }

    fn pump(&mut self, now_ms: i64) {
        loop {
            let next = self.wire.borrow_mut().pop_front();
            let Some((from, to, raw)) = next else { break };
            if raw.contains(r#""type":"propagate""#) {
                self.propagate_frames += 1;
            }
            self.nodes[Self::index(&to)].handle_message(&from, &raw, now_ms);
        }
    }

    fn deliveries(&mut self) -> Vec<Vec<MeshEvent>> {
        self.events.iter_mut().map(drain).collect()
    }
}

#[test]
fn flood_over_cycles_delivers_exactly_once() {
    // Ring of five plus two chords.
    let edges = [(0, 1), (1, 2), (2, 3), (3, 4), (4, 0), (0, 2), (1, 3)];
    let mut cluster = Cluster::new(5, &edges, |id| MeshConfig::new(id).with_nick(format!("nick-{id}")));

    cluster.nodes[0]
        .propagate_message("chat", json!({"text": "hello mesh"}), 2_000)
        .unwrap();
    cluster.pump(2_010);

    let deliveries = cluster.deliveries();
    assert!(deliveries[0].is_empty(), "origin must not deliver to itself");
    for (i, events) in deliveries.iter().enumerate().skip(1) {
        assert_eq!(events.len(), 1, "node n{i} deliveries");
        match &events[0] {
            MeshEvent::DataReceived {
                kind,
                from,
                nick,
                forwarded,
                ..
            } => {
                assert_eq!(kind, "chat");
                assert_eq!(from, "n0");
                assert_eq!(nick.as_deref(), Some("nick-n0"));
                assert!(*forwarded);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    // At most one frame per edge direction.
    assert!(cluster.propagate_frames <= 2 * edges.len());
}

#[test]
fn bounced_message_is_not_forwarded_again() {
    // Line n0 - n1 - n2, then n2 echoes the message back to n1.
    let mut cluster = Cluster::new(3, &[(0, 1), (1, 2)], |id| MeshConfig::new(id));
    cluster.nodes[0]
        .propagate_message("chat", json!("m1"), 2_000)
        .unwrap();
    cluster.pump(2_010);
    let frames_after_flood = cluster.propagate_frames;
    assert_eq!(frames_after_flood, 2);

    // Replay what C would send back to B.
    let id = match &cluster.deliveries()[2][0] {
        MeshEvent::DataReceived { .. } => cluster.nodes[2]
            .gossip()
            .cache()
            .oldest()
            .cloned()
            .unwrap(),
        other => panic!("unexpected {other:?}"),
    };
    let bounce = format!(
        r#"{{"type":"propagate","payload":{{"from":"n0","message":{{"type":"chat","payload":"m1","_id":"{id}","shout":false}}}},"_id":"{id}","shout":false}}"#
    );
    cluster.nodes[1].handle_message("n2", &bounce, 2_020);
    assert!(cluster.wire.borrow().is_empty(), "B re-forwarded m1");
    assert!(cluster.deliveries()[1].is_empty());
}

fn propagate_frame(from: &str, kind: &str, id: &str) -> String {
    format!(
        r#"{{"type":"propagate","payload":{{"from":"{from}","message":{{"type":"{kind}","payload":"m","_id":"{id}","shout":false}}}},"_id":"{id}","shout":false}}"#
    )
}

#[test]
fn propagate_with_reserved_inner_type_is_dropped() {
    let mut cluster = Cluster::new(3, &[(0, 1), (1, 2)], |id| MeshConfig::new(id));
    cluster.nodes[1].handle_message("n0", &propagate_frame("n0", "ping", "1_000001"), 2_000);
    assert!(cluster.wire.borrow().is_empty());
    assert!(cluster.deliveries().iter().all(Vec::is_empty));
}

#[test]
fn own_message_echoed_back_is_dropped() {
    let mut cluster = Cluster::new(3, &[(0, 1), (1, 2)], |id| MeshConfig::new(id));
    // An id n1 never cached, claiming n1 as its origin.
    cluster.nodes[1].handle_message("n0", &propagate_frame("n1", "chat", "1_000002"), 2_000);
    assert!(cluster.wire.borrow().is_empty(), "n1 forwarded its own message");
    assert!(cluster.deliveries()[1].is_empty());
}

#[test]
fn shout_reaches_beyond_one_hop_in_constrained_mesh() {
    let mut cluster = Cluster::new(3, &[(0, 1), (1, 2)], |id| {
        MeshConfig::new(id).with_constraints(4, 1)
    });
    cluster.nodes[0].shout("chat", json!("hey"), 2_000).unwrap();
    cluster.pump(2_010);

    let deliveries = cluster.deliveries();
    assert!(deliveries[0].is_empty());
    assert_eq!(deliveries[1].len(), 1);
    assert!(matches!(
        &deliveries[1][0],
        MeshEvent::DataReceived { from, forwarded: false, .. } if from == "n0"
    ));
    assert_eq!(deliveries[2].len(), 1);
    assert!(matches!(
        &deliveries[2][0],
        MeshEvent::DataReceived { from, forwarded: true, .. } if from == "n0"
    ));
}

#[test]
fn shout_stays_one_hop_in_unconstrained_mesh() {
    let mut cluster = Cluster::new(3, &[(0, 1), (1, 2)], |id| MeshConfig::new(id));
    cluster.nodes[0].shout("chat", json!("hey"), 2_000).unwrap();
    cluster.pump(2_010);
    let deliveries = cluster.deliveries();
    assert_eq!(deliveries[1].len(), 1);
    assert!(deliveries[2].is_empty());
}

#[test]
fn cluster_learns_remote_edges() {
    let cluster = Cluster::new(3, &[(0, 1), (1, 2)], |id| MeshConfig::new(id));
    // n0 never connects to n2 but learns n1–n2 from n1's adjacency list.
    let g = cluster.nodes[0].graph();
    assert!(g.find_edge("n0", "n1").is_some());
    assert!(g.find_edge("n1", "n2").is_some());
    assert!(!g.is_neighbor("n0", "n2"));
}
