//! Frame types for the Surge gateway.
//!
//! A frame is one discrete unit of the duplex wire protocol. The gateway does
//! not define its own framing: frames are produced by the transport layer and
//! classified here by type.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload written in reply to a client ping.
pub const PONG_PAYLOAD: &[u8] = b"pong";

/// Payload written by the keepalive driver.
pub const PING_PAYLOAD: &[u8] = b"ping";

/// Frame type identifiers.
///
/// The numeric values are the RFC 6455 opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Continuation = 0x0,
    Text = 0x1,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl FrameType {
    /// Lowercase name, used as a log field and metrics label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Continuation => "continuation",
            FrameType::Text => "text",
            FrameType::Close => "close",
            FrameType::Ping => "ping",
            FrameType::Pong => "pong",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x0 => Ok(FrameType::Continuation),
            0x1 => Ok(FrameType::Text),
            0x8 => Ok(FrameType::Close),
            0x9 => Ok(FrameType::Ping),
            0xA => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame: a type tag plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameType,
    payload: Bytes,
}

impl Frame {
    /// Create a frame of the given type.
    #[must_use]
    pub fn new(kind: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Create a Text frame.
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Text, payload)
    }

    /// Create a keepalive Ping frame carrying `"ping"`.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(FrameType::Ping, Bytes::from_static(PING_PAYLOAD))
    }

    /// Create a Pong reply carrying `"pong"`.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(FrameType::Pong, Bytes::from_static(PONG_PAYLOAD))
    }

    /// Create an empty Close frame.
    #[must_use]
    pub fn close() -> Self {
        Self::new(FrameType::Close, Bytes::new())
    }

    /// Create a Continuation frame.
    #[must_use]
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Continuation, payload)
    }

    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        self.kind
    }

    /// Get the payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Strip trailing NUL padding from a text payload.
///
/// Some clients pad fixed-size buffers with zero bytes. Only the tail is
/// trimmed; interior NULs are kept. Trimming is idempotent.
#[must_use]
pub fn trim_trailing_nul(payload: &Bytes) -> Bytes {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    payload.slice(..end)
}
