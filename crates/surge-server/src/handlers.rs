//! HTTP and WebSocket handlers for the Surge server.
//!
//! This module wires the gateway into axum: the upgrade endpoint, the
//! health route, request logging, and the server lifecycle.

use crate::auth::{self, JwtAuth};
use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, MatchedPath, Request, State,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use surge_core::{Gateway, MemoryQueue, QueueClient};
use surge_transport::{websocket, ConnectionId};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The connection gateway.
    pub gateway: Gateway,
    /// Server configuration.
    pub config: Config,
    /// Bearer-token verifier guarding the upgrade endpoint.
    pub auth: Arc<JwtAuth>,
}

impl AppState {
    /// Create new app state over a queue client.
    ///
    /// # Errors
    ///
    /// Returns an error if no JWT secret is configured; the upgrade endpoint
    /// is never served unauthenticated.
    pub fn new(config: Config, queue: Arc<dyn QueueClient>) -> Result<Self> {
        let secret = config
            .auth
            .jwt_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .context("auth.jwt_secret must be set (SURGE_AUTH__JWT_SECRET)")?;
        let auth = Arc::new(JwtAuth::new(secret));

        Ok(Self {
            gateway: Gateway::new(queue, config.gateway()),
            config,
            auth,
        })
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.auth),
            auth::require_bearer,
        ))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// A bound, not yet serving, gateway server.
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
    queue: Arc<MemoryQueue>,
    consumer: Option<JoinHandle<u64>>,
}

impl Server {
    /// Bind the listener, then create the queue and gateway and start consuming.
    ///
    /// # Errors
    ///
    /// Returns an error if no JWT secret is configured, the listen address is
    /// invalid or cannot be bound, or the consume source cannot be subscribed.
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        let queue = Arc::new(MemoryQueue::with_capacity(config.queue.capacity));
        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&queue) as Arc<dyn QueueClient>,
        )?);

        let source = state
            .config
            .queue
            .consume_source
            .as_deref()
            .filter(|source| !source.is_empty());
        let consumer = match source {
            Some(source) => Some(state.gateway.spawn_consumer(source).await?),
            None => {
                warn!("No consume source configured, clients will not receive queue messages");
                None
            }
        };

        Ok(Self {
            listener,
            state,
            queue,
            consumer,
        })
    }

    /// The address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared server state.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// The in-process queue the gateway publishes to and consumes from.
    #[must_use]
    pub fn queue(&self) -> Arc<MemoryQueue> {
        Arc::clone(&self.queue)
    }

    /// Serve until `signal` resolves, then close every connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while serving.
    pub async fn run<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!("Surge server listening on {}", addr);
        info!(
            "WebSocket endpoint: ws://{}{}",
            addr, self.state.config.transport.websocket_path
        );

        let app = router(Arc::clone(&self.state));
        let state = Arc::clone(&self.state);

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutdown signal received");
            state.gateway.shutdown().await;
        })
        .await?;

        if let Some(consumer) = self.consumer {
            match consumer.await {
                Ok(delivered) => info!(delivered, "Queue consumer stopped"),
                Err(e) => error!(error = %e, "Queue consumer failed"),
            }
        }

        Ok(())
    }
}

/// Run the HTTP/WebSocket server until ctrl-c or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    Server::bind(config).await?.run(shutdown_signal()).await
}

/// Resolve on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Log every request with its method, URI, matched route and duration.
async fn log_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "-".to_string(), |path| path.as_str().to_string());

    let response = next.run(request).await;
    let elapsed = start.elapsed();
    let status = response.status().as_u16();

    info!(
        %method,
        %uri,
        route = %route,
        status,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "Request served"
    );
    metrics::record_request(&route, status, elapsed);

    response
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.gateway.registry().len()
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.transport.max_message_size)
        .on_failed_upgrade(move |e| warn!(peer = %addr, error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handle_websocket(socket, addr, state))
}

/// Handle an upgraded WebSocket connection.
async fn handle_websocket(socket: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    let id = ConnectionId::from(addr);
    debug!(connection = %id, "WebSocket connected");

    let (source, sink) = websocket::split(socket);
    match state.gateway.serve_connection(id.clone(), source, sink).await {
        Ok(termination) => debug!(connection = %id, ?termination, "WebSocket disconnected"),
        Err(e) => warn!(connection = %id, error = %e, "WebSocket rejected"),
    }
}
