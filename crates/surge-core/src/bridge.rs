//! Bridges between the connection layer and the message queue.
//!
//! - [`InboundBridge`]: client Text payload → queue publish
//! - [`OutboundBridge`]: queue message → broadcast to every connection

use crate::metrics;
use crate::queue::{QueueClient, Subscription};
use crate::registry::{BroadcastReport, Registry};
use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::Arc;
use surge_protocol::{codec, OutboundMessage, ProtocolError};
use surge_transport::ConnectionId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Forwards client messages to the queue.
///
/// Publishes are fire-and-forget: at most once, no retry, and never awaited
/// by the caller.
#[derive(Clone)]
pub struct InboundBridge {
    target: Option<(Arc<dyn QueueClient>, Arc<str>)>,
}

impl InboundBridge {
    /// Create a bridge that publishes to `destination`.
    ///
    /// A `None` destination disables forwarding.
    #[must_use]
    pub fn new(queue: Arc<dyn QueueClient>, destination: Option<String>) -> Self {
        Self {
            target: destination.map(|d| (queue, Arc::from(d))),
        }
    }

    /// Create a bridge that discards everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// Whether a destination is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    /// Publish a payload in the background.
    ///
    /// Returns the publish task, or `None` when the bridge is disabled.
    pub fn forward(&self, source: &ConnectionId, payload: Bytes) -> Option<JoinHandle<()>> {
        let Some((queue, destination)) = &self.target else {
            debug!(connection = %source, "No publish destination, text frame discarded");
            return None;
        };

        let queue = Arc::clone(queue);
        let destination = Arc::clone(destination);
        let source = source.clone();

        Some(tokio::spawn(async move {
            let bytes = payload.len();
            match queue.publish(&destination, payload).await {
                Ok(()) => {
                    metrics::record_publish(true);
                    debug!(connection = %source, destination = %destination, bytes, "Published message to queue");
                }
                Err(e) => {
                    metrics::record_publish(false);
                    warn!(connection = %source, destination = %destination, error = %e, "Failed to publish message to queue");
                }
            }
        }))
    }
}

/// Broadcasts queue messages to every linked connection.
#[derive(Clone)]
pub struct OutboundBridge {
    registry: Arc<Registry>,
}

impl OutboundBridge {
    /// Create a bridge over a registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Encode a message and broadcast it.
    ///
    /// # Errors
    ///
    /// If the message cannot be encoded nothing is sent to anyone.
    pub async fn deliver(&self, message: &OutboundMessage) -> Result<BroadcastReport, ProtocolError> {
        let payload = codec::encode(message).map_err(|e| {
            metrics::record_error("serialization");
            error!(message_id = %message.id, error = %e, "Failed to encode queue message");
            e
        })?;

        Ok(self.registry.broadcast(payload).await)
    }

    /// Deliver every message from a subscription until it ends or
    /// `shutdown` fires. Returns the number of messages consumed.
    pub async fn consume(&self, mut subscription: Subscription, shutdown: CancellationToken) -> u64 {
        let mut consumed = 0;

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = subscription.next() => match next {
                    Some(message) => message,
                    None => {
                        warn!("Queue subscription ended");
                        break;
                    }
                },
            };

            consumed += 1;
            if let Ok(report) = self.deliver(&message).await {
                debug!(
                    message_id = %message.id,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Delivered queue message"
                );
            }
        }

        info!(consumed, "Queue consumer stopped");
        consumed
    }
}
