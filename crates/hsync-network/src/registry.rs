//! Peer registry.
//!
//! Holds the qualified peers keyed by id together with an index ranked by
//! descending total difficulty. Both live under one lock so every reader
//! sees the same membership in both views.
//!
//! Selection is round-robin among the top-weight tier: `best_peer` picks
//! the least-selected peer among those sharing the highest total
//! difficulty, breaking ties by registration order, and counts the pick.

use crate::{NetworkError, NetworkResult, Peer, PeerId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the membership event channel.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Registry membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A peer joined; `count` is the registry size afterwards.
    Added { peer: PeerId, count: usize },
    /// A peer left; `count` is the registry size afterwards.
    Removed { peer: PeerId, count: usize },
}

/// Capability to evict a misbehaving peer.
pub trait PeerDropper: Send + Sync {
    /// Remove the peer and close its connection.
    fn drop_peer(&self, id: &PeerId);
}

#[derive(Default)]
struct RegistryInner {
    peers: HashMap<PeerId, Arc<Peer>>,
    /// Same members as `peers`, by descending total difficulty.
    ranked: Vec<Arc<Peer>>,
    /// Times each peer was handed out by `best_peer`.
    selected: HashMap<PeerId, u64>,
}

/// Concurrency-safe collection of peer links.
pub struct PeerRegistry {
    inner: RwLock<RegistryInner>,
    events: broadcast::Sender<RegistryEvent>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: RwLock::new(RegistryInner::default()),
            events,
        }
    }

    /// Subscribe to membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Register a peer. New peers start with the average throughput and RTT
    /// of the existing ones.
    pub fn add(&self, peer: Arc<Peer>) -> NetworkResult<()> {
        let id = peer.id().clone();
        let count = {
            let mut inner = self.inner.write();
            if inner.peers.contains_key(&id) {
                return Err(NetworkError::AlreadyRegistered(id.to_string()));
            }
            if !inner.ranked.is_empty() {
                let n = inner.ranked.len() as f64;
                let throughput = inner
                    .ranked
                    .iter()
                    .map(|p| p.header_throughput())
                    .sum::<f64>()
                    / n;
                let rtt = inner
                    .ranked
                    .iter()
                    .map(|p| p.rtt().as_secs_f64())
                    .sum::<f64>()
                    / n;
                peer.seed_estimates(throughput, Duration::from_secs_f64(rtt));
            }
            inner.peers.insert(id.clone(), peer.clone());
            inner.ranked.push(peer);
            // Stable sort keeps registration order among equal weights
            inner.ranked.sort_by(|a, b| b.td().cmp(a.td()));
            inner.selected.insert(id.clone(), 0);
            inner.peers.len()
        };

        info!(peer = %id, count, "Peer registered");
        let _ = self.events.send(RegistryEvent::Added { peer: id, count });
        Ok(())
    }

    /// Unregister a peer, keeping the order of the others.
    pub fn remove(&self, id: &PeerId) -> Option<Arc<Peer>> {
        let (peer, count) = {
            let mut inner = self.inner.write();
            let peer = inner.peers.remove(id)?;
            inner.ranked.retain(|p| p.id() != id);
            inner.selected.remove(id);
            (peer, inner.peers.len())
        };

        debug!(peer = %id, count, "Peer unregistered");
        let _ = self.events.send(RegistryEvent::Removed {
            peer: id.clone(),
            count,
        });
        Some(peer)
    }

    pub fn get(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.inner.read().peers.get(id).cloned()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.inner.read().peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all peers by descending weight.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.inner.read().ranked.clone()
    }

    /// Ids in ranked order.
    pub fn ranked_ids(&self) -> Vec<PeerId> {
        self.inner
            .read()
            .ranked
            .iter()
            .map(|p| p.id().clone())
            .collect()
    }

    /// Ids of the keyed map, in no particular order.
    pub fn ids(&self) -> Vec<PeerId> {
        self.inner.read().peers.keys().cloned().collect()
    }

    /// Highest-weight peer, rotating fairly among equally heavy peers.
    pub fn best_peer(&self) -> Option<Arc<Peer>> {
        let mut inner = self.inner.write();
        let top = inner.ranked.first()?.td().clone();

        let mut chosen: Option<(u64, Arc<Peer>)> = None;
        for peer in inner.ranked.iter().take_while(|p| *p.td() == top) {
            let times = inner.selected.get(peer.id()).copied().unwrap_or(0);
            if chosen.as_ref().map_or(true, |(best, _)| times < *best) {
                chosen = Some((times, peer.clone()));
            }
        }

        let (_, peer) = chosen?;
        if let Some(times) = inner.selected.get_mut(peer.id()) {
            *times += 1;
        }
        Some(peer)
    }

    /// Times `best_peer` returned this peer.
    pub fn times_selected(&self, id: &PeerId) -> u64 {
        self.inner.read().selected.get(id).copied().unwrap_or(0)
    }

    /// Idle peers ordered by header throughput, and the total peer count.
    pub fn header_idle_peers(&self) -> (Vec<Arc<Peer>>, usize) {
        let inner = self.inner.read();
        let mut idle: Vec<_> = inner
            .ranked
            .iter()
            .filter(|p| p.is_headers_idle())
            .cloned()
            .collect();
        idle.sort_by(|a, b| {
            b.header_throughput()
                .partial_cmp(&a.header_throughput())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        (idle, inner.ranked.len())
    }

    /// Median RTT of the best `tuning_peers` peers, clamped to `[min, max]`.
    /// Falls back to the median over all peers when fewer are connected and
    /// to `max` when none are.
    pub fn median_rtt(&self, tuning_peers: usize, min: Duration, max: Duration) -> Duration {
        let mut rtts: Vec<Duration> = self.inner.read().ranked.iter().map(|p| p.rtt()).collect();
        rtts.sort();

        let median = if tuning_peers > 0 && rtts.len() >= tuning_peers {
            rtts[tuning_peers / 2]
        } else if !rtts.is_empty() {
            rtts[rtts.len() / 2]
        } else {
            max
        };
        median.clamp(min, max)
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerDropper for PeerRegistry {
    fn drop_peer(&self, id: &PeerId) {
        match self.remove(id) {
            Some(peer) => {
                warn!(peer = %id, "Dropping peer");
                peer.disconnect();
            }
            None => debug!(peer = %id, "Drop requested for unknown peer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use hsync_chain::{BlockHash, Weight};
    use tokio::sync::mpsc;

    fn peer(id: u8, td: u64) -> (Arc<Peer>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        let peer = Peer::new(
            PeerId::from_bytes(vec![id]),
            63,
            BlockHash([id; 32]),
            Weight::from(td),
            tx,
        );
        (Arc::new(peer), rx)
    }

    #[test]
    fn test_add_sorts_by_weight() {
        let registry = PeerRegistry::new();
        let mut keep = Vec::new();
        for (id, td) in [(1, 10), (2, 30), (3, 20)] {
            let (p, rx) = peer(id, td);
            keep.push(rx);
            registry.add(p).unwrap();
        }
        let ranked: Vec<_> = registry.ranked_ids().into_iter().map(|p| p.0[0]).collect();
        assert_eq!(ranked, vec![2, 3, 1]);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let registry = PeerRegistry::new();
        let (a, _rx) = peer(1, 10);
        registry.add(a.clone()).unwrap();
        assert!(matches!(
            registry.add(a),
            Err(NetworkError::AlreadyRegistered(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_preserves_order() {
        let registry = PeerRegistry::new();
        let mut keep = Vec::new();
        for (id, td) in [(1, 40), (2, 30), (3, 20), (4, 10)] {
            let (p, rx) = peer(id, td);
            keep.push(rx);
            registry.add(p).unwrap();
        }
        assert!(registry.remove(&PeerId::from_bytes(vec![2])).is_some());
        assert!(registry.remove(&PeerId::from_bytes(vec![2])).is_none());
        let ranked: Vec<_> = registry.ranked_ids().into_iter().map(|p| p.0[0]).collect();
        assert_eq!(ranked, vec![1, 3, 4]);
    }

    #[test]
    fn test_best_peer_rotates_among_top_tier() {
        let registry = PeerRegistry::new();
        let mut keep = Vec::new();
        for (id, td) in [(1, 50), (2, 50), (3, 10)] {
            let (p, rx) = peer(id, td);
            keep.push(rx);
            registry.add(p).unwrap();
        }
        let picks: Vec<_> = (0..4)
            .map(|_| registry.best_peer().unwrap().id().0[0])
            .collect();
        assert_eq!(picks, vec![1, 2, 1, 2]);
        assert_eq!(registry.times_selected(&PeerId::from_bytes(vec![3])), 0);
    }

    #[test]
    fn test_best_peer_empty() {
        assert!(PeerRegistry::new().best_peer().is_none());
    }

    #[test]
    fn test_drop_peer_disconnects() {
        let registry = PeerRegistry::new();
        let (a, _rx) = peer(1, 10);
        registry.add(a.clone()).unwrap();
        registry.drop_peer(a.id());
        assert!(a.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_membership_events() {
        let registry = PeerRegistry::new();
        let mut events = registry.subscribe();
        let (a, _rx) = peer(1, 10);
        registry.add(a.clone()).unwrap();
        registry.remove(a.id());
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::Added {
                peer: a.id().clone(),
                count: 1
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::Removed {
                peer: a.id().clone(),
                count: 0
            }
        );
    }

    #[test]
    fn test_median_rtt() {
        let registry = PeerRegistry::new();
        let min = Duration::from_secs(2);
        let max = Duration::from_secs(20);
        assert_eq!(registry.median_rtt(5, min, max), max);

        let mut keep = Vec::new();
        for (id, secs) in [(1u8, 3u64), (2, 9), (3, 5)] {
            let (p, rx) = peer(id, 10);
            keep.push(rx);
            registry.add(p.clone()).unwrap();
            p.seed_estimates(0.0, Duration::from_secs(secs));
        }
        // Fewer than five peers: median over everyone
        assert_eq!(registry.median_rtt(5, min, max), Duration::from_secs(5));
        // Clamped to the floor
        for p in registry.peers() {
            p.seed_estimates(0.0, Duration::from_millis(10));
        }
        assert_eq!(registry.median_rtt(5, min, max), min);
    }

    #[test]
    fn test_idle_peers_by_throughput() {
        let registry = PeerRegistry::new();
        let mut keep = Vec::new();
        for (id, tp) in [(1u8, 10.0), (2, 300.0), (3, 50.0)] {
            let (p, rx) = peer(id, 10);
            keep.push(rx);
            registry.add(p.clone()).unwrap();
            p.seed_estimates(tp, Duration::ZERO);
        }
        registry
            .get(&PeerId::from_bytes(vec![3]))
            .unwrap()
            .fetch_headers(1, 10)
            .unwrap();
        let (idle, total) = registry.header_idle_peers();
        assert_eq!(total, 3);
        let ids: Vec<_> = idle.iter().map(|p| p.id().0[0]).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
