use serde_json::Value;

/// Events delivered to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// A connection proved live (constrained mesh) or was created
    /// (unconstrained mesh).
    PeerAdmitted { peer_id: String },
    /// A connection ended through hangup, remote close or the member
    /// leaving. Not emitted for peers given up as unreachable.
    PeerEnded { peer_id: String },
    /// An application message arrived.
    DataReceived {
        kind: String,
        payload: Value,
        /// Originator. For forwarded messages this is not the relay.
        from: String,
        nick: Option<String>,
        forwarded: bool,
    },
}
