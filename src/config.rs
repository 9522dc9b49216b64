//! Delegator configuration.

use std::time::Duration;

/// Default remote port for outbound connections.
pub const DEFAULT_PORT: u16 = 8333;

/// Default timeout for establishing outbound connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Network magic bytes identifying the default wire dialect.
pub const DEFAULT_MAGIC: [u8; 4] = [0x50, 0x4C, 0x4E, 0x4B]; // "PLNK"

/// Default maximum frame size in bytes (1 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Configuration for the connection delegator.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Remote port used when none is given to `connect_default`.
    pub default_port: u16,

    /// Timeout for establishing outbound connections. Expiry is
    /// reported as an ordinary connect failure on the affected peer.
    pub connect_timeout: Duration,

    /// Magic bytes for the default dialect's framing.
    pub magic: [u8; 4],

    /// Maximum frame size accepted by the default dialect.
    pub max_frame_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            magic: DEFAULT_MAGIC,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl NetConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default remote port.
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the framing magic bytes.
    pub fn with_magic(mut self, magic: [u8; 4]) -> Self {
        self.magic = magic;
        self
    }

    /// Set the maximum frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}
