//! Overlay topology and gossip engine for a latency-aware peer mesh.
//!
//! Maintains a latency-aware peer-to-peer mesh over an external transport
//! and floods application messages across it without a central relay.
//!
//! # Architecture
//!
//! - **graph**: undirected weighted graph of observed link latency
//! - **probe**: ping/pong RTT measurement and dead-channel detection
//! - **gossip**: flood broadcast with a bounded dedup cache
//! - **membership**: admission control, outlier trimming, self-healing;
//!   owns the other three and drives the [`Transport`]
//! - **wire**: JSON envelope codec for data-channel frames
//!
//! The engine is single-threaded and never blocks. The host owns the event
//! loop: it forwards transport, signaling and timer events into a
//! [`MeshController`] and reads [`MeshEvent`]s from a channel.

pub mod config;
pub mod error;
pub mod event;
pub mod gossip;
pub mod graph;
pub mod membership;
pub mod metrics;
pub mod optimizer;
pub mod probe;
pub mod transport;
pub mod wire;

pub use config::{Constraints, MeshConfig, ProbeConfig};
pub use error::{Error, Result};
pub use event::MeshEvent;
pub use gossip::{DedupCache, GossipPropagator};
pub use graph::{Edge, EdgeKey, TopologyGraph, TopologySnapshot};
pub use membership::{MeshController, PeerInfo, PeerState};
pub use probe::LatencyProbe;
pub use transport::{Role, RoomMember, Timer, Transport};
pub use wire::{Envelope, MessageId};
