//! Message queue abstraction.
//!
//! The gateway only needs two primitives from a queue: fire-and-forget
//! publish to a named destination, and a subscription that yields delivered
//! messages. [`MemoryQueue`] provides both in-process.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream, StreamExt};
use surge_protocol::OutboundMessage;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default per-queue buffer capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue backend has shut down.
    #[error("Queue closed")]
    Closed,

    /// No queue with this name exists.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// The backend rejected the publish.
    #[error("Publish failed: {0}")]
    Publish(String),
}

/// A stream of messages delivered by a queue.
pub type Subscription = BoxStream<'static, OutboundMessage>;

/// A message queue client.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Publish a message body to a destination.
    async fn publish(&self, destination: &str, body: Bytes) -> Result<(), QueueError>;

    /// Subscribe to messages delivered on a source.
    async fn subscribe(&self, source: &str) -> Result<Subscription, QueueError>;
}

/// In-process queue: one broadcast channel per queue name.
///
/// Queues are created on first use. Publishing to a queue nobody subscribes
/// to succeeds and the message is dropped.
pub struct MemoryQueue {
    queues: DashMap<String, broadcast::Sender<OutboundMessage>>,
    capacity: usize,
}

impl MemoryQueue {
    /// Create a queue with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a queue with a specific per-queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, name: &str) -> broadcast::Sender<OutboundMessage> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(queue = %name, "Creating queue");
                broadcast::channel(self.capacity).0
            })
            .clone()
    }

    /// Deliver a message to every subscriber of `name`.
    ///
    /// Returns the number of subscribers that received it.
    pub fn push(&self, name: &str, message: OutboundMessage) -> usize {
        match self.sender(name).send(message) {
            Ok(count) => count,
            Err(_) => {
                trace!(queue = %name, "No subscribers, message dropped");
                0
            }
        }
    }

    /// Number of active subscribers on a queue.
    #[must_use]
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.queues
            .get(name)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Names of all queues created so far.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn publish(&self, destination: &str, body: Bytes) -> Result<(), QueueError> {
        let message = OutboundMessage::with_generated_id(String::from_utf8_lossy(&body));
        self.push(destination, message);
        Ok(())
    }

    async fn subscribe(&self, source: &str) -> Result<Subscription, QueueError> {
        let receiver = self.sender(source).subscribe();
        let name = source.to_string();

        let messages = stream::unfold(receiver, move |mut rx| {
            let name = name.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => return Some((message, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(queue = %name, skipped, "Subscriber lagged, messages skipped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(messages.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let queue = MemoryQueue::new();
        let mut sub = queue.subscribe("events").await.unwrap();

        queue
            .publish("events", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let message = sub.next().await.unwrap();
        assert_eq!(message.body, "hello");
        assert!(message.id.starts_with("msg_"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let queue = MemoryQueue::new();
        assert!(queue.publish("nobody", Bytes::from_static(b"x")).await.is_ok());
        assert_eq!(queue.subscriber_count("nobody"), 0);
        assert_eq!(queue.queue_names(), vec!["nobody".to_string()]);
    }

    #[tokio::test]
    async fn test_push_fans_out() {
        let queue = MemoryQueue::new();
        let mut a = queue.subscribe("q").await.unwrap();
        let mut b = queue.subscribe("q").await.unwrap();

        assert_eq!(queue.push("q", OutboundMessage::new("42", "x")), 2);
        assert_eq!(a.next().await.unwrap().id, "42");
        assert_eq!(b.next().await.unwrap().id, "42");
    }

    #[tokio::test]
    async fn test_lagged_subscriber_continues() {
        let queue = MemoryQueue::with_capacity(2);
        let mut sub = queue.subscribe("q").await.unwrap();

        for i in 0..5 {
            queue.push("q", OutboundMessage::new(i.to_string(), "x"));
        }

        // The oldest messages were overwritten; the stream resumes with the rest.
        assert_eq!(sub.next().await.unwrap().id, "3");
        assert_eq!(sub.next().await.unwrap().id, "4");
    }
}
