//! # surge-core
//!
//! Connection lifecycle and queue bridging for the Surge gateway.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Concurrency-safe set of live connections
//! - **Session** - Per-connection frame read/dispatch loop
//! - **Keepalive** - Per-connection ping driver
//! - **Bridge** - Client → queue and queue → clients adapters
//! - **Gateway** - Ties the above together for each accepted connection
//!
//! ## Architecture
//!
//! ```text
//!                 ┌─────────────┐  text   ┌───────────────┐ publish ┌─────────┐
//! client ────────▶│   Session   │────────▶│ InboundBridge │────────▶│         │
//!        ◀─ pong ─└─────────────┘         └───────────────┘         │  Queue  │
//!        ◀─ ping ─┌─────────────┐                                   │         │
//!                 │  Keepalive  │         ┌────────────────┐ deliver│         │
//!                 └─────────────┘         │ OutboundBridge │◀───────┤         │
//!        ◀─ text ─┌─────────────┐◀────────└────────────────┘        └─────────┘
//!                 │  Registry   │ broadcast
//!                 └─────────────┘
//! ```

pub mod bridge;
pub mod connection;
pub mod gateway;
pub mod keepalive;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod session;

pub use bridge::{InboundBridge, OutboundBridge};
pub use connection::{Connection, ConnectionState, DEFAULT_WRITE_TIMEOUT};
pub use gateway::{Gateway, GatewayConfig};
pub use queue::{MemoryQueue, QueueClient, QueueError, Subscription};
pub use registry::{BroadcastReport, Registry, RegistryError};
pub use session::{Session, SessionConfig, Termination};
