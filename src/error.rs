//! Delegator error types.

use std::io;

use thiserror::Error;

/// Errors surfaced by the connection delegator.
///
/// Only loop startup failures are fatal; everything that happens to an
/// individual connection is delivered through that peer's own
/// notification channel and never affects other peers.
#[derive(Debug, Error)]
pub enum NetError {
    /// The event loop worker thread or its reactor could not be started.
    #[error("failed to start event loop: {0}")]
    Init(#[source] io::Error),

    /// `init` was called while the loop is already running.
    #[error("delegator already initialized")]
    AlreadyStarted,

    /// An operation requiring a running loop was called before `init`
    /// (or after `shutdown`).
    #[error("delegator not initialized")]
    NotStarted,

    /// Empty or malformed remote address.
    #[error("invalid peer address: {0:?}")]
    InvalidAddress(String),

    /// Unusable remote port.
    #[error("invalid peer port: {0}")]
    InvalidPort(u16),

    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Invalid network magic bytes at the start of a frame.
    #[error("invalid network magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },
}

/// Result type for delegator operations.
pub type NetResult<T> = Result<T, NetError>;
