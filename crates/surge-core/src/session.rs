//! Per-connection frame engine.
//!
//! Reads one frame at a time off the transport, classifies it and reacts.
//! Frames on a connection are handled strictly in arrival order. Any read
//! error, protocol error, Close frame or failed Pong write ends the session:
//! the connection is unlinked, its handle released, and the loop returns.

use crate::bridge::InboundBridge;
use crate::connection::Connection;
use crate::metrics;
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use surge_protocol::{trim_trailing_nul, Frame, FrameType};
use surge_transport::{FrameSource, TransportError};
use tracing::{debug, info, warn};

/// Session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// End the session if no frame arrives for this long. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

/// Why a session ended.
#[derive(Debug)]
pub enum Termination {
    /// The peer sent a Close frame.
    PeerClosed,
    /// The inbound stream ended without a Close frame.
    StreamEnded,
    /// The connection was cancelled from outside (keepalive failure, shutdown).
    Cancelled,
    /// A read or write failed.
    Error(TransportError),
}

/// The read loop for one connection.
pub struct Session {
    conn: Arc<Connection>,
    registry: Arc<Registry>,
    inbound: InboundBridge,
    config: SessionConfig,
}

impl Session {
    /// Create a session for a linked connection.
    #[must_use]
    pub fn new(
        conn: Arc<Connection>,
        registry: Arc<Registry>,
        inbound: InboundBridge,
        config: SessionConfig,
    ) -> Self {
        Self {
            conn,
            registry,
            inbound,
            config,
        }
    }

    /// Run until the connection terminates.
    pub async fn run(self, mut source: impl FrameSource) -> Termination {
        let id = self.conn.id().clone();

        let termination = loop {
            let next = tokio::select! {
                biased;
                _ = self.conn.cancelled() => break Termination::Cancelled,
                next = self.read_frame(&mut source) => next,
            };

            match next {
                Ok(Some(frame)) => {
                    if let Some(termination) = self.dispatch(frame).await {
                        break termination;
                    }
                }
                Ok(None) => break Termination::StreamEnded,
                Err(e) => break Termination::Error(e),
            }
        };

        let idle_ms = self.conn.idle_for().as_millis() as u64;
        match &termination {
            Termination::Error(e) => {
                metrics::record_error("transport");
                warn!(connection = %id, error = %e, idle_ms, "Stopping listener for connection");
            }
            other => info!(
                connection = %id,
                reason = ?other,
                idle_ms,
                "Stopping listener for connection"
            ),
        }

        self.registry.unlink(&self.conn).await;
        termination
    }

    async fn read_frame(
        &self,
        source: &mut impl FrameSource,
    ) -> Result<Option<Frame>, TransportError> {
        match self.config.idle_timeout {
            Some(timeout) => tokio::time::timeout(timeout, source.recv())
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => source.recv().await,
        }
    }

    /// Handle one frame. Returns `Some` when the session must end.
    async fn dispatch(&self, frame: Frame) -> Option<Termination> {
        let id = self.conn.id();
        let kind = frame.frame_type();
        let length = frame.len();

        self.conn.touch();
        metrics::record_frame(kind, "inbound");

        match kind {
            FrameType::Ping => {
                debug!(connection = %id, length, "Received ping frame");
                if let Err(e) = self.conn.send(Frame::pong()).await {
                    warn!(connection = %id, error = %e, "Failed to send pong frame");
                    return Some(Termination::Error(e));
                }
                metrics::record_frame(FrameType::Pong, "outbound");
                debug!(connection = %id, "Sent pong frame");
            }

            FrameType::Pong => {
                debug!(connection = %id, length, "Received pong frame");
            }

            FrameType::Text => {
                let payload = trim_trailing_nul(frame.payload());
                debug!(connection = %id, length, trimmed = payload.len(), "Received text frame");
                self.inbound.forward(id, payload);
            }

            FrameType::Continuation => {
                // Fragments are logged only; they are never reassembled here.
                debug!(
                    connection = %id,
                    length,
                    payload = %String::from_utf8_lossy(frame.payload()),
                    "Received continuation frame"
                );
            }

            FrameType::Close => {
                debug!(connection = %id, "Received close frame");
                return Some(Termination::PeerClosed);
            }
        }

        None
    }
}
