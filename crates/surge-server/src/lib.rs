//! # Surge Server
//!
//! HTTP front end for the Surge gateway: configuration, bearer-token
//! authorization, the WebSocket upgrade endpoint, health reporting and
//! Prometheus export.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{run_server, AppState, Server};
