//! Encoding of queue messages into Text frame payloads.
//!
//! The canonical representation is compact JSON. Encoding is total: it
//! either yields bytes that fit in a single frame or a [`ProtocolError`].

use bytes::Bytes;
use thiserror::Error;

use crate::message::OutboundMessage;

/// Maximum outbound payload size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame type the gateway does not handle.
    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),

    /// Payload exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Encode a message to its canonical byte representation.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode(message: &OutboundMessage) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(message)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}
