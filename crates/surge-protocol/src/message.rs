//! Queue-delivered messages.
//!
//! These are the values handed to the gateway by the queue consumer and
//! fanned out to every connected client as a Text frame.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("msg_{:x}", timestamp.wrapping_add(counter))
}

/// A message delivered by the queue for broadcast.
///
/// Fields serialize in declaration order and attribute keys are kept sorted,
/// so two equal messages always encode to identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Queue-assigned message identifier.
    pub id: String,
    /// Message body.
    pub body: String,
    /// Queue message attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl OutboundMessage {
    /// Create a new message.
    #[must_use]
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Create a message with a freshly generated ID.
    #[must_use]
    pub fn with_generated_id(body: impl Into<String>) -> Self {
        Self::new(generate_message_id(), body)
    }

    /// Attach an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = OutboundMessage::new("42", "x").with_attribute("origin", "test");
        assert_eq!(msg.id, "42");
        assert_eq!(msg.body, "x");
        assert_eq!(msg.attributes.get("origin").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_unique_message_ids() {
        let id1 = generate_message_id();
        let id2 = generate_message_id();
        assert_ne!(id1, id2);
        assert!(id1.starts_with("msg_"));
    }
}
