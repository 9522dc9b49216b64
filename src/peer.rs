//! Peer connection state.
//!
//! A [`Peer`] represents one connection attempt or active connection.
//! Its lifecycle is `Connecting → Connected → Disconnecting → Closed`,
//! with the shortcut `Connecting → Closed` on connect failure or
//! cancellation. `Closed` is terminal: a closed peer never re-enters
//! the registry.
//!
//! Tracked state transitions happen only inside executor tasks; the
//! state cell itself is a `watch` channel so callers on any thread can
//! observe transitions through their [`PeerHandle`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::dialect::Dialect;

/// Unique identifier for a peer connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Create a new peer ID from a counter value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// State of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PeerState {
    /// Outbound connect in flight.
    #[default]
    Connecting,
    /// Connection established and tracked in the registry.
    Connected,
    /// Teardown in progress.
    Disconnecting,
    /// Terminal. Any operation besides querying state is a no-op.
    Closed,
}

impl PeerState {
    /// Check if the connect is still in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, PeerState::Connecting)
    }

    /// Check if the connection is established.
    pub fn is_connected(&self) -> bool {
        matches!(self, PeerState::Connected)
    }

    /// Check if the peer has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        matches!(self, PeerState::Closed)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Connecting => write!(f, "connecting"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::Disconnecting => write!(f, "disconnecting"),
            PeerState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a peer left (or never reached) the connected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A caller asked for the disconnect.
    Requested,
    /// The in-flight connect was cancelled by a disconnect.
    Cancelled,
    /// The connect did not complete within the configured timeout.
    Timeout,
    /// The connect failed at the socket level.
    ConnectFailed(String),
    /// The stream ended or errored after the peer was connected.
    StreamClosed(String),
    /// The delegator shut down.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "disconnect requested"),
            DisconnectReason::Cancelled => write!(f, "connect cancelled"),
            DisconnectReason::Timeout => write!(f, "connect timeout"),
            DisconnectReason::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            DisconnectReason::StreamClosed(e) => write!(f, "stream closed: {}", e),
            DisconnectReason::Shutdown => write!(f, "delegator shutdown"),
        }
    }
}

/// Point-in-time view of a peer for external reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSnapshot {
    /// Peer identifier.
    pub id: PeerId,
    /// Remote address.
    pub address: String,
    /// Remote port.
    pub port: u16,
    /// Current state.
    pub state: PeerState,
    /// Bytes of payload received.
    pub bytes_in: u64,
    /// Bytes of payload sent.
    pub bytes_out: u64,
    /// Frames received.
    pub frames_in: u64,
    /// Frames sent.
    pub frames_out: u64,
}

/// One connection attempt or active connection to a remote node.
///
/// Shared between the registry and any in-flight asynchronous operation
/// referencing it; the last owner releases it.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    address: String,
    port: u16,
    /// Per-connection dialect instance, derived from the template.
    dialect: Box<dyn Dialect>,
    /// State cell; doubles as the notification channel for handles.
    state_tx: watch::Sender<PeerState>,
    /// Cancels the in-flight connect or the I/O task.
    cancel: CancellationToken,
    /// Set exactly once, by whichever task settles the peer to Closed.
    close_reason: Mutex<Option<DisconnectReason>>,
    /// Outbound frame queue, drained by the I/O task once connected.
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
}

impl Peer {
    /// Create a peer in the `Connecting` state.
    pub(crate) fn new(id: PeerId, address: String, port: u16, dialect: Box<dyn Dialect>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(PeerState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            id,
            address,
            port,
            dialect,
            state_tx,
            cancel: CancellationToken::new(),
            close_reason: Mutex::new(None),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            frames_in: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
        })
    }

    /// Peer identifier.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Remote address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Remote port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current state.
    pub fn state(&self) -> PeerState {
        *self.state_tx.borrow()
    }

    /// The per-connection dialect instance.
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Why the peer closed, once it has.
    pub fn close_reason(&self) -> Option<DisconnectReason> {
        self.close_reason.lock().expect("close reason lock poisoned").clone()
    }

    /// Snapshot for external reporting.
    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id,
            address: self.address.clone(),
            port: self.port,
            state: self.state(),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PeerState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Atomically move `from → to`. Returns whether the transition won.
    pub(crate) fn transition_if(&self, from: PeerState, to: PeerState) -> bool {
        let mut moved = false;
        self.state_tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                moved = true;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!(peer = %self.id, from = %from, to = %to, "peer state transition");
        }
        moved
    }

    /// Settle the peer to `Closed` exactly once.
    ///
    /// The winner records the reason and fires the cancellation token,
    /// which terminates the in-flight connect or the I/O task owning
    /// the socket. Returns whether this call won.
    pub(crate) fn settle_closed(&self, reason: DisconnectReason) -> bool {
        let mut slot = self.close_reason.lock().expect("close reason lock poisoned");
        let mut settled = false;
        self.state_tx.send_if_modified(|state| {
            if *state != PeerState::Closed {
                // Reason first: anything observing `Closed` must find it.
                *slot = Some(reason.clone());
                *state = PeerState::Closed;
                settled = true;
                true
            } else {
                false
            }
        });
        drop(slot);
        if settled {
            self.cancel.cancel();
            tracing::debug!(peer = %self.id, reason = %reason, "peer closed");
        }
        settled
    }

    /// Queue an outbound frame. No-op once closed.
    pub(crate) fn queue_outbound(&self, frame: Bytes) -> bool {
        if self.state().is_closed() {
            return false;
        }
        self.outbound_tx.send(frame).is_ok()
    }

    /// Take the outbound queue receiver; the I/O task calls this once.
    pub(crate) fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.outbound_rx.lock().expect("outbound lock poisoned").take()
    }

    pub(crate) fn record_recv(&self, bytes: u64) {
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send(&self, bytes: u64) {
        self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{}, {})", self.id, self.address, self.port, self.state())
    }
}

/// Cloneable handle to a peer, returned by `Delegator::connect`.
///
/// The handle is the peer's notification channel: it exposes the state
/// watch and the close reason. It stays valid after the peer closes.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    peer: Arc<Peer>,
    state_rx: watch::Receiver<PeerState>,
}

impl PeerHandle {
    pub(crate) fn new(peer: Arc<Peer>) -> Self {
        let state_rx = peer.subscribe();
        Self { peer, state_rx }
    }

    /// Peer identifier.
    pub fn id(&self) -> PeerId {
        self.peer.id()
    }

    /// Remote address.
    pub fn address(&self) -> &str {
        self.peer.address()
    }

    /// Remote port.
    pub fn port(&self) -> u16 {
        self.peer.port()
    }

    /// Current state.
    pub fn state(&self) -> PeerState {
        *self.state_rx.borrow()
    }

    /// Wait for the next state change and return the new state.
    pub async fn changed(&mut self) -> PeerState {
        let _ = self.state_rx.changed().await;
        *self.state_rx.borrow_and_update()
    }

    /// Why the peer closed, once it has.
    pub fn close_reason(&self) -> Option<DisconnectReason> {
        self.peer.close_reason()
    }

    /// Queue a frame for delivery.
    ///
    /// Frames queued before the connection is established are sent once
    /// it is. Returns `false` (and drops the frame) once the peer is
    /// closed.
    pub fn send(&self, frame: Bytes) -> bool {
        self.peer.queue_outbound(frame)
    }

    /// Snapshot for external reporting.
    pub fn snapshot(&self) -> PeerSnapshot {
        self.peer.snapshot()
    }

    pub(crate) fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DefaultDialect;
    use std::thread;
    use std::time::Duration;

    fn make_peer() -> Arc<Peer> {
        Peer::new(
            PeerId::new(7),
            "127.0.0.1".to_string(),
            8333,
            DefaultDialect::default().derive(),
        )
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(format!("{}", PeerId::new(42)), "peer-42");
        assert_eq!(format!("{}", PeerState::Connecting), "connecting");
        assert_eq!(format!("{}", make_peer()), "peer-7 (127.0.0.1:8333, connecting)");
    }

    #[test]
    fn test_transition_wins_only_from_expected_state() {
        let peer = make_peer();
        assert!(peer.transition_if(PeerState::Connecting, PeerState::Connected));
        assert_eq!(peer.state(), PeerState::Connected);

        // Already moved; a second identical transition loses.
        assert!(!peer.transition_if(PeerState::Connecting, PeerState::Connected));
        assert_eq!(peer.state(), PeerState::Connected);
    }

    #[test]
    fn test_settle_closed_exactly_once() {
        let peer = make_peer();
        assert!(peer.settle_closed(DisconnectReason::Cancelled));
        assert_eq!(peer.state(), PeerState::Closed);
        assert!(peer.cancel_token().is_cancelled());

        // The loser must not overwrite the recorded reason.
        assert!(!peer.settle_closed(DisconnectReason::Requested));
        assert_eq!(peer.close_reason(), Some(DisconnectReason::Cancelled));
    }

    #[test]
    fn test_close_reason_visible_once_closed() {
        // An observer polling from another thread must never see
        // `Closed` paired with an empty close reason.
        for _ in 0..200 {
            let peer = make_peer();
            let observer = {
                let peer = peer.clone();
                thread::spawn(move || loop {
                    if peer.state().is_closed() {
                        assert!(
                            peer.close_reason().is_some(),
                            "closed peer without a reason"
                        );
                        return;
                    }
                    std::hint::spin_loop();
                })
            };

            peer.settle_closed(DisconnectReason::Requested);
            observer.join().unwrap();
        }
    }

    #[test]
    fn test_handle_changed_wakes_on_transition() {
        let peer = make_peer();
        let mut handle = PeerHandle::new(peer.clone());

        let mover = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            peer.transition_if(PeerState::Connecting, PeerState::Connected);
        });

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert_eq!(runtime.block_on(handle.changed()), PeerState::Connected);
        mover.join().unwrap();
    }

    #[test]
    fn test_closed_peer_cannot_resurrect() {
        let peer = make_peer();
        assert!(peer.settle_closed(DisconnectReason::Requested));
        assert!(!peer.transition_if(PeerState::Connecting, PeerState::Connected));
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[test]
    fn test_outbound_queue_rejected_after_close() {
        let peer = make_peer();
        assert!(peer.queue_outbound(Bytes::from_static(b"before")));

        peer.settle_closed(DisconnectReason::Requested);
        assert!(!peer.queue_outbound(Bytes::from_static(b"after")));

        // Only the frame queued before the close is in the channel.
        let mut rx = peer.take_outbound().unwrap();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"before"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_observes_state() {
        let peer = make_peer();
        let handle = PeerHandle::new(peer.clone());
        assert_eq!(handle.state(), PeerState::Connecting);

        peer.transition_if(PeerState::Connecting, PeerState::Connected);
        assert_eq!(handle.state(), PeerState::Connected);
        assert_eq!(handle.clone().state(), PeerState::Connected);
    }
}
