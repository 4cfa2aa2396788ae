//! Keepalive driver.
//!
//! Sends a Ping frame on a fixed interval for as long as the connection
//! lives. A failed ping write unlinks the connection; the driver also stops
//! as soon as the connection is released for any other reason.

use crate::connection::Connection;
use crate::metrics;
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use surge_protocol::{Frame, FrameType};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Default ping interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Why the driver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveExit {
    /// The connection was released elsewhere.
    Cancelled,
    /// A ping write failed and the driver unlinked the connection.
    WriteFailed,
}

/// Spawn the driver for a connection.
pub fn spawn(
    conn: Arc<Connection>,
    registry: Arc<Registry>,
    interval: Duration,
) -> JoinHandle<KeepaliveExit> {
    tokio::spawn(run(conn, registry, interval))
}

/// Ping `conn` every `interval`, starting immediately.
pub async fn run(
    conn: Arc<Connection>,
    registry: Arc<Registry>,
    interval: Duration,
) -> KeepaliveExit {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = conn.cancelled() => {
                debug!(connection = %conn.id(), "Keepalive stopped");
                return KeepaliveExit::Cancelled;
            }
            _ = ticker.tick() => {}
        }

        debug!(connection = %conn.id(), "Attempting to send ping frame");
        if let Err(e) = conn.send(Frame::ping()).await {
            warn!(connection = %conn.id(), error = %e, "Failed to send ping frame");
            registry.unlink(&conn).await;
            return KeepaliveExit::WriteFailed;
        }
        metrics::record_frame(FrameType::Ping, "outbound");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_transport::memory::{self, MemoryPeer};

    fn linked(registry: &Arc<Registry>, id: &str) -> (Arc<Connection>, MemoryPeer) {
        let (_source, sink, peer) = memory::channel();
        let conn = Connection::new(id, sink);
        registry.link(Arc::clone(&conn)).unwrap();
        (conn, peer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_every_interval() {
        let registry = Arc::new(Registry::new());
        let (conn, mut peer) = linked(&registry, "a");
        let task = spawn(Arc::clone(&conn), Arc::clone(&registry), DEFAULT_INTERVAL);

        // First ping goes out immediately, then one per interval.
        for _ in 0..3 {
            let frame = peer.recv().await.unwrap();
            assert_eq!(frame.frame_type(), FrameType::Ping);
            assert_eq!(frame.payload().as_ref(), b"ping");
        }

        registry.unlink(&conn).await;
        assert_eq!(task.await.unwrap(), KeepaliveExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_failure_unlinks_only_that_connection() {
        let registry = Arc::new(Registry::new());
        let (a, mut peer_a) = linked(&registry, "a");
        let (b, peer_b) = linked(&registry, "b");

        let task_a = spawn(Arc::clone(&a), Arc::clone(&registry), DEFAULT_INTERVAL);
        let task_b = spawn(Arc::clone(&b), Arc::clone(&registry), DEFAULT_INTERVAL);

        assert_eq!(peer_a.recv().await.unwrap().frame_type(), FrameType::Ping);
        peer_b.fail_writes();

        assert_eq!(task_b.await.unwrap(), KeepaliveExit::WriteFailed);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(a.id()));
        assert!(!registry.contains(b.id()));

        // The surviving connection keeps being pinged.
        assert_eq!(peer_a.recv().await.unwrap().frame_type(), FrameType::Ping);
        assert!(!task_a.is_finished());

        registry.unlink(&a).await;
        assert_eq!(task_a.await.unwrap(), KeepaliveExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pings_after_unlink() {
        let registry = Arc::new(Registry::new());
        let (conn, mut peer) = linked(&registry, "a");
        let task = spawn(Arc::clone(&conn), Arc::clone(&registry), DEFAULT_INTERVAL);

        assert_eq!(peer.recv().await.unwrap().frame_type(), FrameType::Ping);
        registry.unlink(&conn).await;
        task.await.unwrap();

        tokio::time::advance(DEFAULT_INTERVAL * 3).await;
        assert!(peer.drain(FrameType::Ping).is_empty());
    }

    #[tokio::test]
    async fn test_released_handle_fails_fast() {
        let registry = Arc::new(Registry::new());
        let (conn, _peer) = linked(&registry, "a");
        registry.unlink(&conn).await;

        // Cancellation wins over the immediate first tick.
        let exit = run(Arc::clone(&conn), Arc::clone(&registry), DEFAULT_INTERVAL).await;
        assert_eq!(exit, KeepaliveExit::Cancelled);
        assert!(conn.send(Frame::ping()).await.is_err());
    }
}
