//! Connection registry.
//!
//! The registry is the set of live connections and the sole owner of their
//! transport handles. Linking, unlinking and the snapshot taken for a
//! broadcast all go through one lock; the lock is never held across a write.

use crate::connection::Connection;
use crate::metrics;
use bytes::Bytes;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use surge_protocol::{Frame, FrameType};
use surge_transport::ConnectionId;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A connection with this identity is already linked.
    #[error("Connection already linked: {0}")]
    AlreadyLinked(ConnectionId),
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections in the snapshot.
    pub recipients: usize,
    /// Writes that succeeded.
    pub delivered: usize,
    /// Writes that failed; each failed connection was unlinked.
    pub failed: usize,
}

/// The set of live connections.
#[derive(Default)]
pub struct Registry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection with the same identity is already
    /// linked. The existing entry is left untouched.
    pub fn link(&self, conn: Arc<Connection>) -> Result<(), RegistryError> {
        let active = {
            let mut connections = self.connections.lock();
            match connections.entry(conn.id().clone()) {
                Entry::Occupied(_) => {
                    return Err(RegistryError::AlreadyLinked(conn.id().clone()));
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&conn));
                }
            }
            connections.len()
        };

        metrics::record_link(active);
        info!(connection = %conn.id(), active, "Linked connection");
        Ok(())
    }

    /// Deregister a connection and release its transport handle.
    ///
    /// Only removes the entry if it is this very connection, so a late call
    /// from a finished connection cannot evict a newer one that reused the
    /// identity. Returns `false` if nothing was removed.
    pub async fn unlink(&self, conn: &Arc<Connection>) -> bool {
        let (removed, active) = {
            let mut connections = self.connections.lock();
            let removed = match connections.get(conn.id()) {
                Some(existing) if Arc::ptr_eq(existing, conn) => connections.remove(conn.id()),
                _ => None,
            };
            (removed, connections.len())
        };

        // Release even if absent: the caller is done with this connection.
        conn.release().await;

        match removed {
            Some(_) => {
                metrics::record_unlink(active);
                info!(connection = %conn.id(), active, "Unlinked connection");
                true
            }
            None => false,
        }
    }

    /// Write a Text frame with `payload` to every linked connection.
    ///
    /// Works on a point-in-time snapshot. A failed write unlinks that
    /// connection and does not affect delivery to the others.
    pub async fn broadcast(&self, payload: Bytes) -> BroadcastReport {
        let snapshot = self.snapshot();
        let mut report = BroadcastReport {
            recipients: snapshot.len(),
            ..BroadcastReport::default()
        };

        if snapshot.is_empty() {
            debug!("Broadcast with no linked connections");
            return report;
        }

        let frame = Frame::text(payload);
        let results = join_all(snapshot.iter().map(|conn| {
            let frame = frame.clone();
            async move { conn.send(frame).await }
        }))
        .await;

        for (conn, result) in snapshot.iter().zip(results) {
            match result {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::record_frame(FrameType::Text, "outbound");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(connection = %conn.id(), error = %e, "Failed to send text frame");
                    self.unlink(conn).await;
                }
            }
        }

        metrics::record_broadcast(report.failed);
        debug!(
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast complete"
        );
        report
    }

    /// Close every connection and empty the registry.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock();
            connections.drain().map(|(_, conn)| conn).collect()
        };

        let count = drained.len();
        join_all(drained.iter().map(|conn| conn.close())).await;
        metrics::record_unlink(0);

        if count > 0 {
            info!(count, "Closed all connections");
        }
        count
    }

    /// Point-in-time copy of the linked connections.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Number of linked connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether no connection is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Whether a connection with this identity is linked.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.lock().contains_key(id)
    }

    /// Identities of all linked connections.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.lock().keys().cloned().collect()
    }
}
