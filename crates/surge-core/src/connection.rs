//! A live client connection.
//!
//! The connection owns the write half of its transport. Every writer (the
//! frame engine's pong replies, the keepalive driver, broadcasts) goes through
//! [`Connection::send`], which serializes writes behind a per-connection lock.
//! Every write has a deadline and gives way to cancellation, so a peer that
//! stops reading can stall neither other writers nor the release of its handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_protocol::Frame;
use surge_transport::{ConnectionId, FrameSink, TransportError};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// Default deadline for a single transport write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Closed,
}

/// A live connection and its transport write handle.
pub struct Connection {
    id: ConnectionId,
    sink: Mutex<Option<Box<dyn FrameSink>>>,
    open: AtomicBool,
    token: CancellationToken,
    write_timeout: Duration,
    connected_at: Instant,
    /// Milliseconds since `connected_at` of the last inbound frame.
    last_seen_ms: AtomicU64,
}

impl Connection {
    /// Create a connection with its own cancellation token.
    #[must_use]
    pub fn new(id: impl Into<ConnectionId>, sink: impl FrameSink + 'static) -> Arc<Self> {
        Self::with_token(id, sink, CancellationToken::new(), DEFAULT_WRITE_TIMEOUT)
    }

    /// Create a connection whose lifetime is bounded by `token`.
    ///
    /// Pass a child of the server's shutdown token so that shutdown reaches
    /// every connection task. Each write fails with
    /// [`TransportError::Timeout`] if it takes longer than `write_timeout`.
    #[must_use]
    pub fn with_token(
        id: impl Into<ConnectionId>,
        sink: impl FrameSink + 'static,
        token: CancellationToken,
        write_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            sink: Mutex::new(Some(Box::new(sink))),
            open: AtomicBool::new(true),
            token,
            write_timeout,
            connected_at: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        })
    }

    /// Get the connection's identity.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.open.load(Ordering::SeqCst) {
            ConnectionState::Active
        } else {
            ConnectionState::Closed
        }
    }

    /// Check if the connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Write one frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] without touching the
    /// transport once the handle has been released or the connection
    /// cancelled, [`TransportError::Timeout`] if the write misses its
    /// deadline, or the transport's own error if the write fails.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TransportError::ConnectionClosed),
            result = self.write(frame) => result,
        }
    }

    /// Take the write lock and write one frame within the deadline.
    async fn write(&self, frame: Frame) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(TransportError::ConnectionClosed);
        };

        tokio::time::timeout(self.write_timeout, sink.send(frame))
            .await
            .unwrap_or(Err(TransportError::Timeout))
    }

    /// Send a Close frame, then release the handle.
    ///
    /// The Close frame is attempted even after cancellation, bounded by the
    /// write deadline.
    pub async fn close(&self) {
        if self.is_open() {
            if let Err(e) = self.write(Frame::close()).await {
                debug!(connection = %self.id, error = %e, "Close frame not delivered");
            }
        }
        self.release().await;
    }

    /// Release the transport handle and cancel the connection's tasks.
    ///
    /// Returns `true` if this call released the handle. Later calls are
    /// no-ops, so a handle is never closed twice. Cancelling first makes any
    /// in-flight [`Connection::send`] give up the write lock.
    pub(crate) async fn release(&self) -> bool {
        self.open.store(false, Ordering::SeqCst);
        self.token.cancel();

        let sink = self.sink.lock().await.take();
        match sink {
            Some(mut sink) => {
                match tokio::time::timeout(self.write_timeout, sink.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(connection = %self.id, error = %e, "Transport close failed");
                    }
                    Err(_) => debug!(connection = %self.id, "Transport close timed out"),
                }
                true
            }
            None => false,
        }
    }

    /// Completes once the connection is closed or its token is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Whether the connection's tasks have been told to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        let elapsed = self.connected_at.elapsed().as_millis() as u64;
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last inbound frame (or since connecting).
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.connected_at.elapsed().saturating_sub(last_seen)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_protocol::FrameType;
    use surge_transport::memory;

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (_source, sink, mut peer) = memory::channel();
        let conn = Connection::new("peer-1", sink);

        conn.send(Frame::text("hi")).await.unwrap();
        let frame = peer.recv().await.unwrap();
        assert_eq!(frame.frame_type(), FrameType::Text);
        assert_eq!(frame.payload().as_ref(), b"hi");
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (_source, sink, peer) = memory::channel();
        let conn = Connection::new("peer-1", sink);

        assert!(conn.release().await);
        assert!(!conn.release().await);
        assert!(peer.is_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.is_cancelled());
    }

    #[tokio::test]
    async fn test_send_after_release_fails_fast() {
        let (_source, sink, _peer) = memory::channel();
        let conn = Connection::new("peer-1", sink);
        conn.release().await;

        assert!(matches!(
            conn.send(Frame::ping()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_sends_close_frame() {
        let (_source, sink, mut peer) = memory::channel();
        let conn = Connection::new("peer-1", sink);

        conn.close().await;
        assert_eq!(peer.recv().await.unwrap().frame_type(), FrameType::Close);
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_child_token_cancelled_by_parent() {
        let (_source, sink, _peer) = memory::channel();
        let shutdown = CancellationToken::new();
        let conn = Connection::with_token(
            "peer-1",
            sink,
            shutdown.child_token(),
            DEFAULT_WRITE_TIMEOUT,
        );

        shutdown.cancel();
        conn.cancelled().await;
        assert!(conn.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out() {
        let (_source, sink, peer) = memory::channel();
        let conn = Connection::new("slow", sink);
        peer.stall_writes();

        assert!(matches!(
            conn.send(Frame::ping()).await,
            Err(TransportError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_release_during_stalled_write() {
        let (_source, sink, peer) = memory::channel();
        let conn = Connection::with_token(
            "slow",
            sink,
            CancellationToken::new(),
            Duration::from_secs(3600),
        );
        peer.stall_writes();

        let in_flight = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.send(Frame::ping()).await }
        });
        tokio::task::yield_now().await;

        // The pending write gives way, so release takes the handle promptly.
        let released = tokio::time::timeout(Duration::from_secs(5), conn.release()).await;
        assert_eq!(released.ok(), Some(true));
        assert!(peer.is_closed());
        assert!(matches!(
            in_flight.await.unwrap(),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_on_stalled_peer_is_bounded() {
        let (_source, sink, peer) = memory::channel();
        let conn = Connection::new("slow", sink);
        peer.stall_writes();

        conn.close().await;
        assert!(!conn.is_open());
        assert!(peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_tracking() {
        let (_source, sink, _peer) = memory::channel();
        let conn = Connection::new("peer-1", sink);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(conn.idle_for(), Duration::from_secs(30));

        conn.touch();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(conn.idle_for(), Duration::from_secs(5));
    }
}
