//! Live peer registry.
//!
//! The set of currently tracked peers, plus the addresses of connects
//! still in flight. Mutations (`add`, `remove`, the connecting-set
//! bookkeeping) are only ever performed from inside executor tasks;
//! the internal mutex provides memory safety, the executor provides
//! linearization.
//!
//! Invariant: every tracked peer is `Connected` or `Disconnecting`,
//! never `Closed`. A closed peer never re-enters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::peer::{Peer, PeerId, PeerSnapshot};

/// The live set of tracked peers.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Tracked (connected) peers.
    peers: Mutex<HashMap<PeerId, Arc<Peer>>>,
    /// Connect attempts still in flight, kept so shutdown can cancel them.
    connecting: Mutex<HashMap<PeerId, Arc<Peer>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connected peer. Adding an already-tracked peer is a no-op.
    pub(crate) fn add(&self, peer: Arc<Peer>) {
        debug_assert!(peer.state().is_connected());
        let mut peers = self.peers.lock().expect("registry lock poisoned");
        peers.entry(peer.id()).or_insert(peer);
    }

    /// Stop tracking a peer. Removing an absent peer is a no-op.
    pub(crate) fn remove(&self, id: PeerId) -> Option<Arc<Peer>> {
        let mut peers = self.peers.lock().expect("registry lock poisoned");
        peers.remove(&id)
    }

    /// Record a connect attempt in flight.
    pub(crate) fn start_connecting(&self, peer: Arc<Peer>) {
        let mut connecting = self.connecting.lock().expect("registry lock poisoned");
        connecting.insert(peer.id(), peer);
    }

    /// Forget a settled connect attempt.
    pub(crate) fn stop_connecting(&self, id: PeerId) {
        let mut connecting = self.connecting.lock().expect("registry lock poisoned");
        connecting.remove(&id);
    }

    /// Detach every peer, tracked or still connecting. Used by shutdown.
    pub(crate) fn drain_all(&self) -> Vec<Arc<Peer>> {
        let mut all: Vec<Arc<Peer>> = self
            .peers
            .lock()
            .expect("registry lock poisoned")
            .drain()
            .map(|(_, peer)| peer)
            .collect();
        all.extend(
            self.connecting
                .lock()
                .expect("registry lock poisoned")
                .drain()
                .map(|(_, peer)| peer),
        );
        all
    }

    /// Check if a peer is tracked.
    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.lock().expect("registry lock poisoned").contains_key(&id)
    }

    /// Get a tracked peer.
    pub fn get(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers.lock().expect("registry lock poisoned").get(&id).cloned()
    }

    /// Number of tracked peers.
    pub fn len(&self) -> usize {
        self.peers.lock().expect("registry lock poisoned").len()
    }

    /// Whether no peers are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// IDs of all tracked peers.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Snapshots of all tracked peers, for external reporting.
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers
            .lock()
            .expect("registry lock poisoned")
            .values()
            .map(|peer| peer.snapshot())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DefaultDialect, Dialect};
    use crate::peer::PeerState;

    fn connected_peer(id: u64) -> Arc<Peer> {
        let peer = Peer::new(
            PeerId::new(id),
            "127.0.0.1".to_string(),
            8333,
            DefaultDialect::default().derive(),
        );
        assert!(peer.transition_if(PeerState::Connecting, PeerState::Connected));
        peer
    }

    #[test]
    fn test_add_and_remove() {
        let registry = ConnectionRegistry::new();
        let peer = connected_peer(1);

        registry.add(peer.clone());
        assert!(registry.contains(peer.id()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.peer_ids(), vec![peer.id()]);

        let removed = registry.remove(peer.id());
        assert!(removed.is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let registry = ConnectionRegistry::new();
        let peer = connected_peer(1);

        registry.add(peer.clone());
        registry.add(peer.clone());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(registry.remove(PeerId::new(99)).is_none());
        assert!(registry.remove(PeerId::new(99)).is_none());
    }

    #[test]
    fn test_drain_covers_connecting_peers() {
        let registry = ConnectionRegistry::new();
        let tracked = connected_peer(1);
        let pending = Peer::new(
            PeerId::new(2),
            "127.0.0.1".to_string(),
            8333,
            DefaultDialect::default().derive(),
        );

        registry.add(tracked);
        registry.start_connecting(pending);

        let drained = registry.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_reports_tracked_peers() {
        let registry = ConnectionRegistry::new();
        registry.add(connected_peer(5));

        let snapshots = registry.snapshot();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].id, PeerId::new(5));
        assert_eq!(snapshots[0].state, PeerState::Connected);
    }
}
