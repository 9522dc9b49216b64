//! Connection delegator.
//!
//! The facade composing the event loop, the ordered executor, the
//! dialect template, and the registry. Callers on any thread ask it to
//! connect or disconnect; completions arrive on the loop thread; every
//! registry or tracked-state mutation goes through the executor, so the
//! two sides never race.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::config::NetConfig;
use crate::dialect::{DefaultDialect, Dialect};
use crate::error::{NetError, NetResult};
use crate::event_loop::EventLoop;
use crate::executor::OrderedExecutor;
use crate::peer::{DisconnectReason, Peer, PeerHandle, PeerId, PeerSnapshot, PeerState};
use crate::registry::ConnectionRegistry;

/// How long shutdown waits for pending executor tasks to settle before
/// tearing the loop down anyway.
const SHUTDOWN_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Coordinates outbound peer connections.
///
/// One instance per running node; constructed explicitly and passed to
/// whatever needs it. `connect` and `disconnect` never block on network
/// I/O; the only blocking operation is [`shutdown`](Delegator::shutdown).
pub struct Delegator {
    config: Arc<NetConfig>,
    /// Default dialect template, derived per connection.
    dialect: Arc<dyn Dialect>,
    registry: Arc<ConnectionRegistry>,
    next_peer_id: AtomicU64,
    /// Loop and executor; `None` until `init`, `None` again after shutdown.
    inner: Mutex<Option<Inner>>,
}

struct Inner {
    event_loop: EventLoop,
    executor: OrderedExecutor,
}

impl Delegator {
    /// Create a delegator using the built-in dialect.
    pub fn new(config: NetConfig) -> Self {
        let dialect = Arc::new(DefaultDialect::new(config.magic, config.max_frame_size));
        Self::with_dialect(config, dialect)
    }

    /// Create a delegator around a custom dialect template.
    pub fn with_dialect(config: NetConfig, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            config: Arc::new(config),
            dialect,
            registry: Arc::new(ConnectionRegistry::new()),
            next_peer_id: AtomicU64::new(1),
            inner: Mutex::new(None),
        }
    }

    /// Start the event loop and the executor.
    ///
    /// Fails with [`NetError::AlreadyStarted`] if called again without
    /// an intervening shutdown; the running loop is left untouched. On
    /// failure nothing is left partially started.
    pub fn init(&self) -> NetResult<()> {
        let mut inner = self.inner.lock().expect("delegator lock poisoned");
        if inner.is_some() {
            return Err(NetError::AlreadyStarted);
        }

        let event_loop = EventLoop::start()?;
        let executor = OrderedExecutor::start(&event_loop);
        *inner = Some(Inner {
            event_loop,
            executor,
        });

        tracing::info!(dialect = self.dialect.name(), "delegator initialized");
        Ok(())
    }

    /// Whether the loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.lock().expect("delegator lock poisoned").is_some()
    }

    /// Number of tracked peers.
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshots of all tracked peers.
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.registry.snapshot()
    }

    /// The live peer registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Connect to `address` on the configured default port.
    pub fn connect_default(&self, address: &str) -> NetResult<PeerHandle> {
        self.connect(address, self.config.default_port)
    }

    /// Begin an outbound connection attempt.
    ///
    /// Validates arguments synchronously before any resource is touched,
    /// then returns a handle to a `Connecting` peer immediately; the
    /// outcome (including timeout expiry, reported as an ordinary
    /// connect failure) is delivered through the handle's state watch
    /// and close reason. Each call is a distinct attempt, even for an
    /// address/port pair that already has a peer.
    pub fn connect(&self, address: &str, port: u16) -> NetResult<PeerHandle> {
        if address.is_empty() {
            return Err(NetError::InvalidAddress(address.to_string()));
        }
        if port == 0 {
            return Err(NetError::InvalidPort(port));
        }

        let inner_guard = self.inner.lock().expect("delegator lock poisoned");
        let inner = inner_guard.as_ref().ok_or(NetError::NotStarted)?;

        let id = PeerId::new(self.next_peer_id.fetch_add(1, Ordering::Relaxed));
        let peer = Peer::new(id, address.to_string(), port, self.dialect.derive());
        let handle = PeerHandle::new(peer.clone());

        tracing::debug!(peer = %id, addr = %address, port, "connecting");

        // Enqueued before the connect future can complete, so the
        // completion task always observes the attempt as registered.
        inner.executor.submit({
            let registry = self.registry.clone();
            let peer = peer.clone();
            move || registry.start_connecting(peer)
        });

        let executor = inner.executor.clone();
        let registry = self.registry.clone();
        let connect_timeout = self.config.connect_timeout;
        let cancel = peer.cancel_token();
        let host = address.to_string();

        inner.event_loop.spawn(async move {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => Err(DisconnectReason::Cancelled),
                result = timeout(connect_timeout, TcpStream::connect((host.as_str(), port))) => {
                    match result {
                        Ok(Ok(stream)) => Ok(stream),
                        Ok(Err(e)) => Err(DisconnectReason::ConnectFailed(e.to_string())),
                        Err(_) => Err(DisconnectReason::Timeout),
                    }
                }
            };

            match attempt {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::warn!(peer = %id, error = %e, "failed to set TCP_NODELAY");
                    }
                    let loop_handle = Handle::current();
                    let exec = executor.clone();
                    executor.submit(move || {
                        registry.stop_connecting(id);
                        // A racing disconnect may already have closed the
                        // peer; a closed peer never re-enters the registry.
                        if peer.transition_if(PeerState::Connecting, PeerState::Connected) {
                            registry.add(peer.clone());
                            spawn_peer_io(&loop_handle, peer, stream, exec, registry);
                        } else {
                            tracing::debug!(peer = %id, "connect completed after close, dropping stream");
                        }
                    });
                }
                Err(reason) => {
                    // Cancellation completions land here too, so the peer
                    // settles to Closed exactly once either way.
                    executor.submit(move || {
                        registry.stop_connecting(id);
                        peer.settle_closed(reason);
                    });
                }
            }
        });

        Ok(handle)
    }

    /// Disconnect a peer. Fire-and-forget, callable from any thread.
    ///
    /// Schedules the removal on the executor and returns immediately.
    /// An in-flight connect is cancelled; its completion still settles
    /// the peer to `Closed` exactly once. Disconnecting an unknown or
    /// already-closed peer is a safe no-op, as is calling this before
    /// `init` or after shutdown.
    pub fn disconnect(&self, handle: &PeerHandle) {
        let inner_guard = self.inner.lock().expect("delegator lock poisoned");
        let Some(inner) = inner_guard.as_ref() else {
            return;
        };

        let peer = handle.peer().clone();
        let registry = self.registry.clone();
        let accepted = inner.executor.submit(move || match peer.state() {
            PeerState::Connecting => {
                // Never entered the registry; settling fires the
                // cancellation token and the connect future winds down.
                registry.stop_connecting(peer.id());
                peer.settle_closed(DisconnectReason::Cancelled);
            }
            PeerState::Connected | PeerState::Disconnecting => {
                peer.transition_if(PeerState::Connected, PeerState::Disconnecting);
                registry.remove(peer.id());
                peer.settle_closed(DisconnectReason::Requested);
            }
            PeerState::Closed => {
                tracing::trace!(peer = %peer.id(), "disconnect on closed peer, no-op");
            }
        });

        if !accepted {
            tracing::debug!(peer = %handle.id(), "disconnect after shutdown, ignored");
        }
    }

    /// Stop the delegator: close every peer, stop the loop, and join
    /// the worker thread.
    ///
    /// Blocks the caller until the worker has exited. Idempotent; a
    /// stopped delegator can be initialized again.
    pub fn shutdown(&self) {
        let inner = self.inner.lock().expect("delegator lock poisoned").take();
        let Some(mut inner) = inner else {
            return;
        };

        let registry = self.registry.clone();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let accepted = inner.executor.submit(move || {
            for peer in registry.drain_all() {
                peer.settle_closed(DisconnectReason::Shutdown);
            }
            let _ = done_tx.send(());
        });

        if accepted && done_rx.recv_timeout(SHUTDOWN_SETTLE_TIMEOUT).is_err() {
            tracing::warn!("timed out waiting for pending tasks to settle");
        }

        inner.event_loop.shutdown();
        tracing::info!("delegator stopped");
    }
}

impl Drop for Delegator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drive one connected peer's framed read/write loop on the loop thread.
///
/// The task owns the socket. It exits on cancellation (a disconnect or
/// shutdown already settling the peer elsewhere) or on stream end, in
/// which case it schedules its own removal through the executor.
fn spawn_peer_io(
    loop_handle: &Handle,
    peer: Arc<Peer>,
    stream: TcpStream,
    executor: OrderedExecutor,
    registry: Arc<ConnectionRegistry>,
) {
    let cancel = peer.cancel_token();

    loop_handle.spawn(async move {
        let Some(mut outbound) = peer.take_outbound() else {
            return;
        };
        let mut framed = Framed::new(stream, peer.dialect().framing());

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => break None,
                frame = framed.next() => match frame {
                    Some(Ok(payload)) => {
                        peer.record_recv(payload.len() as u64);
                        tracing::trace!(peer = %peer.id(), bytes = payload.len(), "frame received");
                    }
                    Some(Err(e)) => break Some(DisconnectReason::StreamClosed(e.to_string())),
                    None => break Some(DisconnectReason::StreamClosed("closed by remote".to_string())),
                },
                outgoing = outbound.recv() => match outgoing {
                    Some(payload) => {
                        let len = payload.len() as u64;
                        if let Err(e) = framed.send(payload).await {
                            break Some(DisconnectReason::StreamClosed(e.to_string()));
                        }
                        peer.record_send(len);
                    }
                    None => break None,
                },
            }
        };

        // The socket closes when `framed` drops. Removal and the final
        // transition go through the executor like every other mutation.
        if let Some(reason) = reason {
            executor.submit(move || {
                if peer.transition_if(PeerState::Connected, PeerState::Disconnecting) {
                    registry.remove(peer.id());
                    peer.settle_closed(reason);
                }
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DefaultDialect;

    #[test]
    fn test_connect_validates_before_checking_loop() {
        // Not initialized: argument validation still comes first.
        let delegator = Delegator::new(NetConfig::default());

        match delegator.connect("", 8333) {
            Err(NetError::InvalidAddress(addr)) => assert!(addr.is_empty()),
            other => panic!("expected InvalidAddress, got {:?}", other.map(|h| h.id())),
        }
        assert!(matches!(
            delegator.connect("127.0.0.1", 0),
            Err(NetError::InvalidPort(0))
        ));
        assert!(matches!(
            delegator.connect("127.0.0.1", 8333),
            Err(NetError::NotStarted)
        ));
    }

    #[test]
    fn test_disconnect_before_init_is_noop() {
        let delegator = Delegator::new(NetConfig::default());
        let peer = Peer::new(
            PeerId::new(1),
            "127.0.0.1".to_string(),
            8333,
            DefaultDialect::default().derive(),
        );
        let handle = PeerHandle::new(peer);

        delegator.disconnect(&handle);
        assert_eq!(handle.state(), PeerState::Connecting);
    }

    #[test]
    fn test_shutdown_without_init_is_noop() {
        let delegator = Delegator::new(NetConfig::default());
        delegator.shutdown();
        assert!(!delegator.is_running());
    }
}
