//! Peer connection delegation.
//!
//! This crate coordinates outbound peer connections for a networked
//! node: it owns an asynchronous event loop on a single dedicated
//! worker thread, accepts connect/disconnect requests from arbitrary
//! threads, and keeps a consistent registry of live peers even while
//! asynchronous completions race against caller requests.
//!
//! # Architecture
//!
//! ```text
//! Caller threads                    Loop thread (net-loop)
//! ─────────────                     ──────────────────────
//! Delegator::connect ───spawn────▶  async connect (timeout, cancel)
//! Delegator::disconnect ──┐              │ completion
//!                         ▼              ▼
//!                   OrderedExecutor (one task at a time)
//!                         │
//!                         ▼
//!                  ConnectionRegistry + peer state
//! ```
//!
//! Every mutation of the registry or of a peer's tracked state runs as
//! an [`OrderedExecutor`] task, so no two mutations ever execute
//! concurrently. Per-peer failures stay on that peer; only a failure to
//! start the loop itself is fatal.
//!
//! # Usage
//!
//! ```no_run
//! use peerlink::{Delegator, NetConfig};
//!
//! let delegator = Delegator::new(NetConfig::default());
//! delegator.init()?;
//!
//! let handle = delegator.connect("127.0.0.1", 8333)?;
//! // ... outcome arrives via handle.state() / handle.close_reason()
//! delegator.disconnect(&handle);
//! delegator.shutdown();
//! # Ok::<(), peerlink::NetError>(())
//! ```

pub mod config;
pub mod delegator;
pub mod dialect;
pub mod error;
pub mod event_loop;
pub mod executor;
pub mod peer;
pub mod registry;

// Re-export main types
pub use config::{
    NetConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAGIC, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT,
};
pub use delegator::Delegator;
pub use dialect::{DefaultDialect, Dialect, FrameCodec};
pub use error::{NetError, NetResult};
pub use event_loop::EventLoop;
pub use executor::OrderedExecutor;
pub use peer::{DisconnectReason, PeerHandle, PeerId, PeerSnapshot, PeerState};
pub use registry::ConnectionRegistry;
