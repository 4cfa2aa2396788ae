//! Connection lifecycle.
//!
//! [`Gateway`] owns the registry and the bridge configuration and runs each
//! accepted connection from link to unlink.

use crate::bridge::{InboundBridge, OutboundBridge};
use crate::connection::{Connection, DEFAULT_WRITE_TIMEOUT};
use crate::keepalive::{self, DEFAULT_INTERVAL};
use crate::queue::{QueueClient, QueueError};
use crate::registry::{Registry, RegistryError};
use crate::session::{Session, SessionConfig, Termination};
use std::sync::Arc;
use std::time::Duration;
use surge_transport::{ConnectionId, FrameSink, FrameSource};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Keepalive ping interval.
    pub ping_interval: Duration,
    /// Read idle timeout; `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Queue destination for client messages; `None` disables forwarding.
    pub publish_destination: Option<String>,
    /// Deadline for a single write to a client.
    pub write_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_INTERVAL,
            idle_timeout: None,
            publish_destination: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// The connection gateway.
pub struct Gateway {
    registry: Arc<Registry>,
    queue: Arc<dyn QueueClient>,
    inbound: InboundBridge,
    config: GatewayConfig,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Create a gateway over a queue client.
    #[must_use]
    pub fn new(queue: Arc<dyn QueueClient>, config: GatewayConfig) -> Self {
        info!("Creating gateway with config: {:?}", config);
        let inbound = InboundBridge::new(Arc::clone(&queue), config.publish_destination.clone());
        if !inbound.is_enabled() {
            warn!("No publish destination configured, client messages will not be forwarded");
        }

        Self {
            registry: Arc::new(Registry::new()),
            queue,
            inbound,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// A bridge that broadcasts queue messages to this gateway's connections.
    #[must_use]
    pub fn outbound(&self) -> OutboundBridge {
        OutboundBridge::new(Arc::clone(&self.registry))
    }

    /// The token cancelled by [`Gateway::shutdown`].
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one connection from link to unlink.
    ///
    /// Spawns the keepalive driver, then drives the frame engine on the
    /// current task. Returns once the connection is gone and its keepalive
    /// task has stopped.
    ///
    /// # Errors
    ///
    /// Returns an error, after closing the new connection, if its identity is
    /// already linked.
    pub async fn serve_connection(
        &self,
        id: ConnectionId,
        source: impl FrameSource,
        sink: impl FrameSink + 'static,
    ) -> Result<Termination, RegistryError> {
        let conn = Connection::with_token(
            id,
            sink,
            self.shutdown.child_token(),
            self.config.write_timeout,
        );

        if let Err(e) = self.registry.link(Arc::clone(&conn)) {
            warn!(connection = %conn.id(), error = %e, "Rejecting connection");
            conn.close().await;
            return Err(e);
        }

        let keepalive = keepalive::spawn(
            Arc::clone(&conn),
            Arc::clone(&self.registry),
            self.config.ping_interval,
        );

        let session = Session::new(
            Arc::clone(&conn),
            Arc::clone(&self.registry),
            self.inbound.clone(),
            SessionConfig {
                idle_timeout: self.config.idle_timeout,
            },
        );
        let termination = session.run(source).await;

        match keepalive.await {
            Ok(exit) => debug!(connection = %conn.id(), ?exit, "Keepalive finished"),
            Err(e) => warn!(connection = %conn.id(), error = %e, "Keepalive task failed"),
        }

        Ok(termination)
    }

    /// Subscribe to `source` and broadcast its messages until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be created.
    pub async fn spawn_consumer(&self, source: &str) -> Result<JoinHandle<u64>, QueueError> {
        let subscription = self.queue.subscribe(source).await?;
        let outbound = self.outbound();
        let shutdown = self.shutdown.clone();

        info!(source = %source, "Consuming queue");
        Ok(tokio::spawn(async move {
            outbound.consume(subscription, shutdown).await
        }))
    }

    /// Stop consumers and close every connection.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let closed = self.registry.close_all().await;
        info!(closed, "Gateway shut down");
    }
}
