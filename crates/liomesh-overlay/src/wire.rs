//! Data-channel wire format.
//!
//! Every frame is one JSON object:
//!
//! ```text
//! {"type": "ping"|"pong"|"propagate"|"connections"|<app-type>,
//!  "payload": ..., "_id": "<unique id>", "shout": false}
//! ```
//!
//! The four control types are reserved; anything else is an application
//! message and is handed to the application untouched.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const PROPAGATE: &str = "propagate";
pub const CONNECTIONS: &str = "connections";

pub fn is_reserved(kind: &str) -> bool {
    matches!(kind, PING | PONG | PROPAGATE | CONNECTIONS)
}

/// Globally unique message id: origin timestamp plus a random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate(now_ms: i64) -> Self {
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Self(format!("{now_ms}_{suffix:06}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The JSON object carried over the data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "_id")]
    pub id: MessageId,
    #[serde(default)]
    pub shout: bool,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value, id: MessageId) -> Self {
        Self {
            kind: kind.into(),
            payload,
            id,
            shout: false,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Interpret the payload according to `type`.
    pub fn into_frame(self) -> Result<Frame> {
        let frame = match self.kind.as_str() {
            PING => Frame::Ping(serde_json::from_value(self.payload)?),
            PONG => Frame::Pong(serde_json::from_value(self.payload)?),
            PROPAGATE => Frame::Propagate(serde_json::from_value(self.payload)?),
            CONNECTIONS => Frame::Connections(serde_json::from_value(self.payload)?),
            _ => Frame::App(self),
        };
        Ok(frame)
    }

    pub fn ping(ping: &Ping, now_ms: i64) -> Result<Self> {
        Ok(Self::new(PING, serde_json::to_value(ping)?, MessageId::generate(now_ms)))
    }

    pub fn pong(pong: &Pong, now_ms: i64) -> Result<Self> {
        Ok(Self::new(PONG, serde_json::to_value(pong)?, MessageId::generate(now_ms)))
    }

    pub fn connections(edges: &[ReportedEdge], now_ms: i64) -> Result<Self> {
        Ok(Self::new(
            CONNECTIONS,
            serde_json::to_value(edges)?,
            MessageId::generate(now_ms),
        ))
    }

    /// Wrap a forwarded message. The outer id is the inner id.
    pub fn propagate(forwarded: &Forwarded) -> Result<Self> {
        Ok(Self::new(
            PROPAGATE,
            serde_json::to_value(forwarded)?,
            forwarded.message.id.clone(),
        ))
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Ping(Ping),
    Pong(Pong),
    Propagate(Forwarded),
    Connections(Vec<ReportedEdge>),
    App(Envelope),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    /// Sender clock at send time, ms.
    pub sent_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    /// Echo of [`Ping::sent_at`].
    pub sent_at: i64,
    /// Responder clock when replying, ms.
    pub now: i64,
    /// Local processing time the responder measured, ms.
    pub delay: i64,
}

/// One entry of a gossiped adjacency list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedEdge {
    pub id: String,
    pub weight: f64,
}

/// Payload of a `propagate` frame: the original message plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forwarded {
    /// Peer id of the originator, not the relay.
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    pub message: Envelope,
}
