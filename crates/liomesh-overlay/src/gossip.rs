//! Flood broadcast with duplicate suppression.
//!
//! Each participant forwards a message to each neighbor at most once per
//! message id. A bounded cache remembers, per id, which peers already hold
//! the message; a second arrival of a cached id is dropped, which is what
//! breaks cycles in the mesh.
//!
//! Like the probe, the propagator does not own the transport. Sends go
//! through a caller-supplied closure that reports whether the channel took
//! the frame, and only accepted sends are recorded as deliveries.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace, warn};

use crate::metrics::{self, GOSSIP_DUPLICATES, GOSSIP_EVICTIONS, GOSSIP_FORWARDED};
use crate::wire::{Envelope, Forwarded, MessageId};

/// Distinct message ids remembered before eviction starts.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct CacheEntry {
    peers: HashSet<String>,
    first_seen: (i64, u64),
}

/// Bounded message-id cache ordered by first sighting.
///
/// Eviction removes the entry with the oldest first-seen timestamp (ties
/// go to the earlier insertion). Lookups do not refresh an entry.
#[derive(Debug)]
pub struct DedupCache {
    entries: HashMap<MessageId, CacheEntry>,
    by_age: BTreeMap<(i64, u64), MessageId>,
    capacity: usize,
    next_seq: u64,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_age: BTreeMap::new(),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The id that would be evicted next.
    pub fn oldest(&self) -> Option<&MessageId> {
        self.by_age.values().next()
    }

    /// Record the first sighting of `id`. Returns `false` if already cached.
    pub fn insert(&mut self, id: &MessageId, now_ms: i64) -> bool {
        if self.entries.contains_key(id) {
            return false;
        }
        while self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        let age = (now_ms, self.next_seq);
        self.next_seq += 1;
        self.by_age.insert(age, id.clone());
        self.entries.insert(
            id.clone(),
            CacheEntry {
                peers: HashSet::new(),
                first_seen: age,
            },
        );
        true
    }

    /// Record that `peer_id` holds `id`. No-op for uncached ids.
    pub fn mark_delivered(&mut self, id: &MessageId, peer_id: &str) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.peers.insert(peer_id.to_owned());
        }
    }

    pub fn delivered_to(&self, id: &MessageId, peer_id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.peers.contains(peer_id))
    }

    fn evict_oldest(&mut self) {
        let Some((_, id)) = self.by_age.pop_first() else {
            return;
        };
        if let Some(entry) = self.entries.remove(&id) {
            trace!(id = %id, first_seen = entry.first_seen.0, "evicted gossip cache entry");
        }
        metrics::incr(GOSSIP_EVICTIONS);
    }
}

/// Flood propagator for one participant.
#[derive(Debug)]
pub struct GossipPropagator {
    self_id: String,
    cache: DedupCache,
}

impl GossipPropagator {
    pub fn new(self_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            self_id: self_id.into(),
            cache: DedupCache::new(capacity),
        }
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.cache.contains(id)
    }

    /// Start a flood of a locally originated message.
    ///
    /// The id is cached before the first send so echoes are dropped.
    pub fn originate<F>(
        &mut self,
        forwarded: &Forwarded,
        neighbors: &[String],
        now_ms: i64,
        send: F,
    ) -> usize
    where
        F: FnMut(&str, &str) -> bool,
    {
        self.cache.insert(&forwarded.message.id, now_ms);
        self.cache.mark_delivered(&forwarded.message.id, &self.self_id);
        self.propagate(forwarded, neighbors, true, now_ms, send)
    }

    /// Send `forwarded` to every neighbor not yet known to hold it.
    ///
    /// With `skip_delivered = false` every neighbor is sent a copy
    /// regardless of the cache. Returns the number of accepted sends.
    pub fn propagate<F>(
        &mut self,
        forwarded: &Forwarded,
        neighbors: &[String],
        skip_delivered: bool,
        now_ms: i64,
        mut send: F,
    ) -> usize
    where
        F: FnMut(&str, &str) -> bool,
    {
        let id = &forwarded.message.id;
        self.cache.insert(id, now_ms);

        let frame = match Envelope::propagate(forwarded).and_then(|env| env.encode()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = %id, error = %e, "failed to encode propagate frame");
                return 0;
            }
        };

        let mut sent = 0;
        for peer in neighbors {
            if *peer == self.self_id || *peer == forwarded.from {
                continue;
            }
            if skip_delivered && self.cache.delivered_to(id, peer) {
                continue;
            }
            if send(peer, &frame) {
                self.cache.mark_delivered(id, peer);
                sent += 1;
            } else {
                debug!(peer = %peer, id = %id, "propagate send refused, channel not open");
            }
        }
        metrics::incr_by(GOSSIP_FORWARDED, sent as u64);
        trace!(id = %id, sent, "propagated");
        sent
    }

    /// Handle a `propagate` frame arriving from `relay`.
    ///
    /// Returns the message for application delivery the first time its id
    /// is seen, `None` for duplicates.
    pub fn receive<F>(
        &mut self,
        relay: &str,
        forwarded: Forwarded,
        neighbors: &[String],
        now_ms: i64,
        send: F,
    ) -> Option<Forwarded>
    where
        F: FnMut(&str, &str) -> bool,
    {
        let id = forwarded.message.id.clone();
        if !self.cache.insert(&id, now_ms) {
            self.cache.mark_delivered(&id, relay);
            metrics::incr(GOSSIP_DUPLICATES);
            trace!(id = %id, relay = %relay, "duplicate propagate dropped");
            return None;
        }
        self.cache.mark_delivered(&id, relay);
        self.cache.mark_delivered(&id, &forwarded.from);
        self.propagate(&forwarded, neighbors, true, now_ms, send);
        Some(forwarded)
    }

    /// Re-wrap a direct `shout` from `relay` and flood it onward.
    ///
    /// Returns `false` if the id was already seen, in which case the
    /// caller must not deliver it again.
    pub fn reshout<F>(
        &mut self,
        relay: &str,
        nick: Option<String>,
        message: Envelope,
        neighbors: &[String],
        now_ms: i64,
        send: F,
    ) -> bool
    where
        F: FnMut(&str, &str) -> bool,
    {
        if !self.cache.insert(&message.id, now_ms) {
            self.cache.mark_delivered(&message.id, relay);
            metrics::incr(GOSSIP_DUPLICATES);
            return false;
        }
        self.cache.mark_delivered(&message.id, relay);
        let forwarded = Forwarded {
            from: relay.to_owned(),
            nick,
            message: Envelope {
                shout: false,
                ..message
            },
        };
        self.propagate(&forwarded, neighbors, true, now_ms, send);
        true
    }

    /// Mark a direct send of `id` to `peer_id` (used by shout at origin).
    pub fn record_direct(&mut self, id: &MessageId, peer_id: &str, now_ms: i64) {
        self.cache.insert(id, now_ms);
        self.cache.mark_delivered(id, peer_id);
    }
}
