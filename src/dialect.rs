//! Wire dialects.
//!
//! A dialect is a per-connection framing codec factory. It carries only
//! configuration, never per-connection mutable state: every connection
//! derives its own instance and builds a fresh codec from it.
//!
//! The default dialect frames payloads as:
//! - 4 bytes: network magic
//! - 4 bytes: big-endian payload length
//! - N bytes: opaque payload
//!
//! What the payload means is none of this crate's business.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{DEFAULT_MAGIC, DEFAULT_MAX_FRAME_SIZE};
use crate::error::{NetError, NetResult};

/// Frame header size: 4 bytes magic + 4 bytes length.
const HEADER_SIZE: usize = 8;

/// Per-connection codec factory.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Derive the instance bound to one connection.
    fn derive(&self) -> Box<dyn Dialect>;

    /// Build a fresh framing codec for one connection.
    fn framing(&self) -> FrameCodec;

    /// Dialect name, for logs.
    fn name(&self) -> &'static str;
}

/// The built-in length-prefixed dialect. Configuration only.
#[derive(Debug, Clone)]
pub struct DefaultDialect {
    magic: [u8; 4],
    max_frame_size: usize,
}

impl DefaultDialect {
    /// Create a dialect with the given magic and frame size cap.
    pub fn new(magic: [u8; 4], max_frame_size: usize) -> Self {
        Self {
            magic,
            max_frame_size,
        }
    }
}

impl Default for DefaultDialect {
    fn default() -> Self {
        Self::new(DEFAULT_MAGIC, DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Dialect for DefaultDialect {
    fn derive(&self) -> Box<dyn Dialect> {
        Box::new(self.clone())
    }

    fn framing(&self) -> FrameCodec {
        FrameCodec::new(self.magic, self.max_frame_size)
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Length-prefixed framing codec produced by a dialect.
#[derive(Debug)]
pub struct FrameCodec {
    magic: [u8; 4],
    max_frame_size: usize,
    /// Payload length of the current frame, once its header is read.
    current_length: Option<usize>,
}

impl FrameCodec {
    /// Create a codec with the given magic and frame size cap.
    pub fn new(magic: [u8; 4], max_frame_size: usize) -> Self {
        Self {
            magic,
            max_frame_size,
            current_length: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> NetResult<Option<Self::Item>> {
        if self.current_length.is_none() {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let magic: [u8; 4] = src[0..4].try_into().expect("header slice");
            if magic != self.magic {
                return Err(NetError::InvalidMagic {
                    expected: self.magic,
                    actual: magic,
                });
            }

            let length = u32::from_be_bytes(src[4..8].try_into().expect("header slice")) as usize;
            if length > self.max_frame_size {
                return Err(NetError::FrameTooLarge {
                    size: length,
                    max: self.max_frame_size,
                });
            }

            self.current_length = Some(length);
        }

        let length = self.current_length.unwrap_or(0);
        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();
        self.current_length = None;

        Ok(Some(payload))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = NetError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> NetResult<()> {
        let length = payload.len();
        if length > self.max_frame_size {
            return Err(NetError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        dst.reserve(HEADER_SIZE + length);
        dst.put_slice(&self.magic);
        dst.put_u32(length as u32);
        dst.put_slice(&payload);

        Ok(())
    }
}
