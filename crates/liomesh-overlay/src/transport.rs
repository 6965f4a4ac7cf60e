//! Interfaces consumed from the connection layer and the rendezvous.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which side of the offer/answer exchange we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// We sent the offer (roster connect or self-healing).
    Initiator,
    /// We accepted an incoming offer.
    Responder,
}

/// Timers the controller asks the host to fire back through
/// [`crate::MeshController::handle_timer`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Next probe attempt for one connection. `epoch` identifies the
    /// connection instance; a timer outliving its connection is ignored.
    Probe { peer_id: String, epoch: u64 },
}

/// Point-to-point connection layer.
///
/// Implementations own the real connections (WebRTC, sockets, in-memory
/// channels). All methods are non-blocking.
pub trait Transport {
    /// Start a connection to `peer_id`.
    fn open(&mut self, peer_id: &str, role: Role);

    /// Send one encoded frame over the data channel. Returns `false` if the
    /// channel is not open.
    fn send_direct(&mut self, peer_id: &str, frame: &str) -> bool;

    /// Tear down the connection. `emit_removal` is `false` when the
    /// controller gave up on the peer and the far side should not treat the
    /// hangup as ordinary churn.
    fn end(&mut self, peer_id: &str, emit_removal: bool);

    /// Fire `timer` after `delay`.
    fn schedule(&mut self, timer: Timer, delay: Duration);
}

/// One entry in the room roster returned by the rendezvous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMember {
    pub id: String,
    /// Capability flags as announced at join (`{"data": true}`).
    #[serde(default)]
    pub capabilities: BTreeMap<String, bool>,
}

impl RoomMember {
    /// A member with the `data` capability enabled.
    pub fn data(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeMap::from([("data".to_owned(), true)]),
        }
    }

    /// Members announcing no capabilities are assumed reachable; otherwise
    /// at least one flag must be set.
    pub fn is_connectable(&self) -> bool {
        self.capabilities.is_empty() || self.capabilities.values().any(|on| *on)
    }
}
