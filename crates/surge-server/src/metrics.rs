//! Metrics export for the Surge server.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Metric names.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "surge_http_requests_total";
    pub const HTTP_REQUEST_SECONDS: &str = "surge_http_request_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    surge_core::metrics::describe_metrics();

    metrics::describe_counter!(
        names::HTTP_REQUESTS_TOTAL,
        "HTTP requests served, by route and status"
    );
    metrics::describe_histogram!(
        names::HTTP_REQUEST_SECONDS,
        "HTTP request handling time in seconds"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a served HTTP request.
pub fn record_request(route: &str, status: u16, elapsed: Duration) {
    let route = route.to_string();
    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "route" => route.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(names::HTTP_REQUEST_SECONDS, "route" => route).record(elapsed.as_secs_f64());
}
