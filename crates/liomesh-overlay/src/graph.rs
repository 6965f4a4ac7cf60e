//! Weighted topology graph: this participant's view of link quality across
//! the whole mesh.
//!
//! Edges come from two sources: our own latency probes (edges that touch
//! us) and adjacency lists gossiped by neighbors (edges between other
//! peers). The graph is a session cache: nodes are never deleted, edges
//! disappear only when the direct connection behind them ends.
//!
//! Edge identity is the sorted pair of endpoint ids, so `(a, b)` and
//! `(b, a)` always resolve to the same edge no matter which side measured
//! or reported it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Canonical, order-independent edge identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    low: String,
    high: String,
}

impl EdgeKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_owned(),
            high: high.to_owned(),
        }
    }

    pub fn endpoints(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}~{}", self.low, self.high)
    }
}

/// An undirected weighted link. `weight` is estimated latency in ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub a: String,
    pub b: String,
    pub weight: f64,
}

impl Edge {
    /// The endpoint that is not `id`, if `id` is an endpoint at all.
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.a == id {
            Some(&self.b)
        } else if self.b == id {
            Some(&self.a)
        } else {
            None
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(&self.a, &self.b)
    }
}

/// Serializable export of the whole graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
    pub total_weight: f64,
}

/// Undirected weighted graph keyed by peer id.
#[derive(Debug, Default)]
pub struct TopologyGraph {
    /// node id → ids adjacent through a live edge.
    nodes: BTreeMap<String, BTreeSet<String>>,
    edges: BTreeMap<EdgeKey, Edge>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update the edge between `a` and `b`.
    ///
    /// Missing nodes are created. Returns the previous weight when the edge
    /// already existed. Self-loops are ignored.
    pub fn upsert_edge(&mut self, a: &str, b: &str, weight: f64) -> Option<f64> {
        if a == b {
            return None;
        }
        let key = EdgeKey::new(a, b);
        let (low, high) = key.endpoints();
        self.nodes
            .entry(low.to_owned())
            .or_default()
            .insert(high.to_owned());
        self.nodes
            .entry(high.to_owned())
            .or_default()
            .insert(low.to_owned());

        match self.edges.get_mut(&key) {
            Some(edge) => Some(std::mem::replace(&mut edge.weight, weight)),
            None => {
                let edge = Edge {
                    a: low.to_owned(),
                    b: high.to_owned(),
                    weight,
                };
                self.edges.insert(key, edge);
                None
            }
        }
    }

    /// Remove the edge between `a` and `b`. Nodes stay.
    pub fn remove_edge(&mut self, a: &str, b: &str) -> Option<Edge> {
        let removed = self.edges.remove(&EdgeKey::new(a, b))?;
        if let Some(adj) = self.nodes.get_mut(a) {
            adj.remove(b);
        }
        if let Some(adj) = self.nodes.get_mut(b) {
            adj.remove(a);
        }
        Some(removed)
    }

    /// Ids directly connected to `id`, in sorted order.
    pub fn neighbors(&self, id: &str) -> Vec<String> {
        self.nodes
            .get(id)
            .map(|adj| adj.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn degree(&self, id: &str) -> usize {
        self.nodes.get(id).map_or(0, BTreeSet::len)
    }

    pub fn is_neighbor(&self, a: &str, b: &str) -> bool {
        self.nodes.get(a).is_some_and(|adj| adj.contains(b))
    }

    pub fn find_edge(&self, a: &str, b: &str) -> Option<&Edge> {
        self.edges.get(&EdgeKey::new(a, b))
    }

    /// Sum of every edge weight (diagnostic).
    pub fn total_weight(&self) -> f64 {
        self.edges.values().map(|e| e.weight).sum()
    }

    /// neighbor id → edge weight for every edge touching `id`.
    pub fn neighbor_latencies(&self, id: &str) -> BTreeMap<String, f64> {
        let Some(adj) = self.nodes.get(id) else {
            return BTreeMap::new();
        };
        adj.iter()
            .filter_map(|other| {
                self.find_edge(id, other)
                    .map(|edge| (other.clone(), edge.weight))
            })
            .collect()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot {
            nodes: self.nodes.keys().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
            total_weight: self.total_weight(),
        }
    }
}
