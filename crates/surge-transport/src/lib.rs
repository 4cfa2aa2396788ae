//! # surge-transport
//!
//! Transport abstraction layer for the Surge gateway.
//!
//! A connection's transport is split into two halves:
//!
//! - **`FrameSource`** - the read half, owned by the connection's read loop
//! - **`FrameSink`** - the write half, shared by every writer behind a lock
//!
//! Implementations:
//!
//! - **WebSocket** - axum's upgraded socket (feature `websocket`, default)
//! - **Memory** - an in-process pair with a scriptable peer, for tests
//!
//! ```rust,ignore
//! use surge_transport::{FrameSource, websocket};
//!
//! async fn handle_socket(socket: axum::extract::ws::WebSocket) {
//!     let (mut source, sink) = websocket::split(socket);
//!     while let Ok(Some(frame)) = source.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, FrameSink, FrameSource, TransportError};
