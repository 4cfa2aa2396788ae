//! # Surge
//!
//! WebSocket gateway between realtime clients and a message queue.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! surge
//!
//! # Run with custom config
//! surge --config /path/to/surge.toml
//!
//! # Run with environment variables
//! SURGE_PORT=8080 SURGE_QUEUE__PUBLISH_DESTINATION=client-messages surge
//! ```

use anyhow::Result;
use surge_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "surge=debug,surge_server=debug,surge_core=debug,surge_transport=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match std::env::args().skip_while(|arg| arg != "--config").nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    tracing::info!("Starting Surge gateway on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
