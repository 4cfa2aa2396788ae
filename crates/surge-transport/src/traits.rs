//! Transport abstraction traits for Surge.
//!
//! A connection's transport is split into a read half ([`FrameSource`]) driven
//! by the connection's read loop and a write half ([`FrameSink`]) shared by
//! every writer of that connection.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use surge_protocol::Frame;
use thiserror::Error;

/// Stable identity of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a connection ID for peers without a known address.
    #[must_use]
    pub fn generate() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::{SystemTime, UNIX_EPOCH};

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", timestamp.wrapping_add(counter)))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SocketAddr> for ConnectionId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
///
/// Every variant is fatal to the connection it occurred on and to nothing
/// else.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed, or its handle already released.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No frame arrived within the idle timeout, or a write missed its deadline.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] surge_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next complete frame.
    ///
    /// Returns `None` if the peer ended the stream cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// The write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the write half, flushing a close frame where the protocol has one.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_peer_addr() {
        let addr: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        let id = ConnectionId::from(addr);
        assert_eq!(id.as_str(), "10.0.0.7:51234");
        assert_eq!(id.to_string(), "10.0.0.7:51234");
    }
}
