//! # surge-protocol
//!
//! Frame model and message encoding for the Surge gateway.
//!
//! This crate defines the frames exchanged with clients and the canonical
//! encoding of queue messages that are broadcast to them.
//!
//! ## Frame Types
//!
//! - `Text` - Client messages, forwarded to the queue
//! - `Ping` / `Pong` - Keepalive pings and replies
//! - `Continuation` - Message fragments (logged only)
//! - `Close` - Connection teardown
//!
//! ## Example
//!
//! ```rust
//! use surge_protocol::{codec, OutboundMessage};
//!
//! let message = OutboundMessage::new("42", "x");
//! let encoded = codec::encode(&message).unwrap();
//! assert_eq!(&encoded[..], br#"{"id":"42","body":"x"}"#);
//! ```

pub mod codec;
pub mod frames;
pub mod message;

pub use codec::{encode, ProtocolError, MAX_FRAME_SIZE};
pub use frames::{trim_trailing_nul, Frame, FrameType};
pub use message::{generate_message_id, OutboundMessage};
